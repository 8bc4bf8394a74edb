//! Startup banner, printed once by the server.

const BANNER: &str = r#"
 _____                       _   _____                    _
|_   _|   _ _ __  _ __   ___| | |_   _|   _ _ __  _ __   ___| |
  | || | | | '_ \| '_ \ / _ \ |   | || | | | '_ \| '_ \ / _ \ |
  | || |_| | | | | | | |  __/ |   | || |_| | | | | | | |  __/ |
  |_| \__,_|_| |_|_| |_|\___|_|   |_| \__,_|_| |_|_| |_|\___|_|
"#;

pub fn print(version: &str) {
    tracing::info!("{BANNER}\nVERSION: {version}");
}

/// Prints the banner and version straight to stdout, independent of the
/// tracing subscriber. Used by `--version`, which must work even before
/// logging is initialized.
pub fn print_stdout(version: &str) {
    println!("{BANNER}\nVERSION: {version}");
}
