//! Logger initialization from CLI flags. Mirrors `tunnel-server`'s
//! `logging.rs`; duplicated rather than shared since neither binary depends
//! on the other and the surface is small.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogWay {
    Console,
    File,
}

pub struct Options<'a> {
    pub log_way: LogWay,
    pub log_file: Option<&'a str>,
    pub log_level: &'a str,
    pub log_disable_color: bool,
}

pub fn init(opts: Options<'_>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(opts.log_level.to_string()));

    match opts.log_way {
        LogWay::Console => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(!opts.log_disable_color)
                .with_target(false)
                .init();
            Ok(None)
        }
        LogWay::File => {
            let path = opts
                .log_file
                .ok_or_else(|| anyhow::anyhow!("--log_file is required when --log_way file"))?;
            let path = std::path::Path::new(path);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("--log_file has no file name: {}", path.display()))?;
            let file_appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_target(false)
                .with_writer(non_blocking)
                .init();
            Ok(Some(guard))
        }
    }
}
