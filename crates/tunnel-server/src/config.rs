//! Server configuration: YAML file, validated before any TCP activity.

use std::net::IpAddr;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Errors produced while loading or validating a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid ip address {0:?}")]
    InvalidIp(String),
    #[error("port {0} out of range")]
    InvalidPort(i64),
}

/// `server:` section of the YAML config.
///
/// `control_port` is parsed as `i64` rather than `u16` so an out-of-range
/// value produces a clean [`ConfigError::InvalidPort`] instead of a raw
/// serde deserialize failure, mirroring the original's `ValidatePort`.
#[derive(Debug, Clone, Deserialize)]
struct ServerSection {
    ip: String,
    control_port: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    server: ServerSection,
}

/// Resolved, validated server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub ip: String,
    pub control_port: u16,
}

impl ServerConfig {
    /// Read `path`, parse it as YAML, and validate the result.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let file: ConfigFile = serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;
        validate_ip(&file.server.ip)?;
        let control_port = validate_port(file.server.control_port)?;
        Ok(ServerConfig {
            ip: file.server.ip,
            control_port,
        })
    }
}

fn validate_ip(ip: &str) -> Result<(), ConfigError> {
    ip.parse::<IpAddr>()
        .map(|_| ())
        .map_err(|_| ConfigError::InvalidIp(ip.to_string()))
}

fn validate_port(port: i64) -> Result<u16, ConfigError> {
    u16::try_from(port).map_err(|_| ConfigError::InvalidPort(port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_valid_config() {
        let f = write_tmp("server:\n  ip: \"0.0.0.0\"\n  control_port: 7000\n");
        let cfg = ServerConfig::load(f.path()).unwrap();
        assert_eq!(cfg.ip, "0.0.0.0");
        assert_eq!(cfg.control_port, 7000);
    }

    #[test]
    fn rejects_invalid_ip() {
        let f = write_tmp("server:\n  ip: \"not-an-ip\"\n  control_port: 7000\n");
        let err = ServerConfig::load(f.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidIp(_)));
    }

    #[test]
    fn rejects_out_of_range_port() {
        let f = write_tmp("server:\n  ip: \"0.0.0.0\"\n  control_port: 99999\n");
        let err = ServerConfig::load(f.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort(99999)));
    }

    #[test]
    fn rejects_missing_file() {
        let err = ServerConfig::load(Path::new("/no/such/file.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
