//! Client configuration: YAML file, validated before any TCP activity.

use std::collections::HashSet;
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
    #[error("config forward_port duplication")]
    DuplicateForwardPort,
}

#[derive(Debug, Clone, Deserialize)]
struct ServerSection {
    ip: String,
    control_port: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct ServiceSection {
    ip: String,
    port: i64,
    forward_port: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    server: ServerSection,
    #[serde(default)]
    service: Vec<ServiceSection>,
}

/// One local service to expose: its own address, and the public port
/// (`forward_port`) it should be reachable at through the server.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub ip: String,
    pub port: u16,
    pub forward_port: u16,
}

/// Resolved, validated client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_ip: String,
    pub control_port: u16,
    pub services: Vec<ServiceConfig>,
}

impl ClientConfig {
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

        let mut services = Vec::with_capacity(file.service.len());
        let mut seen_forward_ports = HashSet::with_capacity(file.service.len());
        for svc in file.service {
            validate_ip(&svc.ip)?;
            let port = validate_port(svc.port)?;
            let forward_port = validate_port(svc.forward_port)?;
            if !seen_forward_ports.insert(forward_port) {
                return Err(ConfigError::DuplicateForwardPort);
            }
            services.push(ServiceConfig {
                ip: svc.ip,
                port,
                forward_port,
            });
        }

        Ok(ClientConfig {
            server_ip: file.server.ip,
            control_port,
            services,
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
        let f = write_tmp(
            "server:\n  ip: \"1.2.3.4\"\n  control_port: 7000\n\
             service:\n  - ip: \"127.0.0.1\"\n    port: 22\n    forward_port: 2222\n",
        );
        let cfg = ClientConfig::load(f.path()).unwrap();
        assert_eq!(cfg.server_ip, "1.2.3.4");
        assert_eq!(cfg.control_port, 7000);
        assert_eq!(cfg.services.len(), 1);
        assert_eq!(cfg.services[0].forward_port, 2222);
    }

    #[test]
    fn rejects_invalid_server_ip() {
        let f = write_tmp("server:\n  ip: \"nope\"\n  control_port: 7000\n");
        let err = ClientConfig::load(f.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidIp(_)));
    }

    #[test]
    fn rejects_duplicate_forward_port() {
        let f = write_tmp(
            "server:\n  ip: \"1.2.3.4\"\n  control_port: 7000\n\
             service:\n  - ip: \"127.0.0.1\"\n    port: 22\n    forward_port: 2222\n\
             \x20\x20- ip: \"127.0.0.1\"\n    port: 80\n    forward_port: 2222\n",
        );
        let err = ClientConfig::load(f.path()).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateForwardPort));
        assert_eq!(err.to_string(), "config forward_port duplication");
    }

    #[test]
    fn rejects_out_of_range_service_port() {
        let f = write_tmp(
            "server:\n  ip: \"1.2.3.4\"\n  control_port: 7000\n\
             service:\n  - ip: \"127.0.0.1\"\n    port: 99999\n    forward_port: 2222\n",
        );
        let err = ClientConfig::load(f.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort(99999)));
    }
}
