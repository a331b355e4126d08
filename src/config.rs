use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listen: String,
    pub interval_secs: u64,
    #[serde(default)]
    pub nrpe: NrpeConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NrpeConfig {
    #[serde(default = "default_nrpe_enabled")]
    pub enabled: bool,
    #[serde(default = "default_nrpe_listen")]
    pub listen: String,
    #[serde(default = "default_nrpe_timeout")]
    pub timeout: String,
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    #[serde(default = "default_allow_arguments")]
    pub allow_arguments: bool,
    #[serde(default)]
    pub allow_nasty_characters: bool,
}

impl Default for NrpeConfig {
    fn default() -> Self {
        Self {
            enabled: default_nrpe_enabled(),
            listen: default_nrpe_listen(),
            timeout: default_nrpe_timeout(),
            allowed_hosts: Vec::new(),
            allow_arguments: default_allow_arguments(),
            allow_nasty_characters: false,
        }
    }
}

impl NrpeConfig {
    pub fn timeout(&self) -> Duration {
        humantime::parse_duration(&self.timeout).unwrap_or(Duration::from_secs(30))
    }

    pub fn allowed_hosts(&self) -> Vec<IpAddr> {
        self.allowed_hosts
            .iter()
            .filter_map(|h| h.trim().parse().ok())
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation("listen is required".to_string()));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a host:port socket address".to_string(),
            ));
        }
        if self.interval_secs < 1 {
            return Err(ConfigError::Validation(
                "interval_secs must be >= 1".to_string(),
            ));
        }

        validate_nrpe(&self.nrpe)?;

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_nrpe(cfg: &NrpeConfig) -> Result<(), ConfigError> {
    if SocketAddr::from_str(&cfg.listen).is_err() {
        return Err(ConfigError::Validation(
            "nrpe.listen must be a host:port socket address".to_string(),
        ));
    }
    match humantime::parse_duration(&cfg.timeout) {
        Ok(d) if d.is_zero() => {
            return Err(ConfigError::Validation(
                "nrpe.timeout must be > 0".to_string(),
            ))
        }
        Ok(_) => {}
        Err(err) => {
            return Err(ConfigError::Validation(format!(
                "nrpe.timeout '{}' is not a duration: {err}",
                cfg.timeout
            )))
        }
    }
    for host in &cfg.allowed_hosts {
        if host.trim().parse::<IpAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "nrpe.allowed_hosts entry '{host}' is not an IP address"
            )));
        }
    }
    Ok(())
}

fn default_nrpe_enabled() -> bool {
    true
}

fn default_nrpe_listen() -> String {
    "0.0.0.0:5666".to_string()
}

fn default_nrpe_timeout() -> String {
    "30s".to_string()
}

const fn default_allow_arguments() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            listen: "127.0.0.1:9108".to_string(),
            interval_secs: 5,
            nrpe: NrpeConfig::default(),
        }
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = valid_config();
        cfg.validate().expect("default config must validate");
        assert_eq!(cfg.nrpe.timeout(), Duration::from_secs(30));
        assert!(cfg.nrpe.allow_arguments);
        assert!(!cfg.nrpe.allow_nasty_characters);
    }

    #[test]
    fn example_yaml_parses() {
        let cfg: Config = serde_yaml::from_str(Config::example_yaml()).expect("example yaml");
        cfg.validate().expect("example must validate");
    }

    #[test]
    fn minimal_yaml_fills_nrpe_defaults() {
        let cfg: Config =
            serde_yaml::from_str("listen: 127.0.0.1:9108\ninterval_secs: 5\n").expect("yaml");
        assert!(cfg.nrpe.enabled);
        assert_eq!(cfg.nrpe.listen, "0.0.0.0:5666");
    }

    #[test]
    fn rejects_bad_timeout_and_hosts() {
        let mut cfg = valid_config();
        cfg.nrpe.timeout = "soon".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = valid_config();
        cfg.nrpe.timeout = "0s".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = valid_config();
        cfg.nrpe.allowed_hosts = vec!["monitoring.example".to_string()];
        assert!(cfg.validate().is_err());

        let mut cfg = valid_config();
        cfg.nrpe.allowed_hosts = vec!["10.0.0.1".to_string(), "::1".to_string()];
        cfg.validate().expect("ip hosts are valid");
        assert_eq!(cfg.nrpe.allowed_hosts().len(), 2);
    }

    #[test]
    fn rejects_zero_interval() {
        let mut cfg = valid_config();
        cfg.interval_secs = 0;
        assert!(cfg.validate().is_err());
    }
}
