//! tunnel-client: registers local services with a tunnel-server and bridges
//! forwarded connections back to them.

mod config;
mod control_client;
mod forward_client;
mod logging;

use std::path::PathBuf;

use clap::Parser;
use config::ClientConfig;
use control_client::ControlClient;
use logging::LogWay;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "tunnel-client", disable_version_flag = true, about = "Reverse TCP tunnel client")]
struct Cli {
    /// Print the crate version, then exit.
    #[arg(long)]
    version: bool,

    /// Path to the YAML config file.
    #[arg(long, default_value = "./tunnel-client.yaml")]
    cfg_file: PathBuf,

    /// Where to send log output.
    #[arg(long, value_enum, default_value_t = LogWay::Console)]
    log_way: LogWay,

    /// Log file path, required when --log_way file.
    #[arg(long)]
    log_file: Option<String>,

    /// Log level filter (error, warn, info, debug, trace).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Disable ANSI color in console log output.
    #[arg(long)]
    log_disable_color: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.version {
        // The client doesn't banner on normal startup either; --version
        // just prints the crate version, exiting before logging/config load.
        println!("{}", env!("CARGO_PKG_VERSION"));
        std::process::exit(0);
    }

    let _log_guard = match logging::init(logging::Options {
        log_way: cli.log_way,
        log_file: cli.log_file.as_deref(),
        log_level: &cli.log_level,
        log_disable_color: cli.log_disable_color,
    }) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to initialize logging: {e}");
            std::process::exit(1);
        }
    };

    let client_config = match ClientConfig::load(&cli.cfg_file) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let client = ControlClient::new(
        client_config.server_ip,
        client_config.control_port,
        client_config.services,
    );

    tokio::select! {
        _ = client.run() => {}
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("tunnel-client stopped");
}

/// Wait for SIGINT, SIGTERM, or (on unix) SIGQUIT.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        let mut sigquit = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::quit())
            .expect("failed to install SIGQUIT handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
            _ = sigquit.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
