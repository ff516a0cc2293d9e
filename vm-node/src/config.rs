//! # Node Configuration and TOML File Loading
//!
//! This module contains the node configuration structure, along with
//! facilities for loading configuration files from the filesystem.
//!
//! Jump to [`Config::load_toml_file`] for configuration file loading.

use serde::Deserialize;
use std::{
    net::SocketAddr,
    num::NonZero,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Refusing to load {0}, file extension isn't .toml")]
    FileExtension(PathBuf),
    #[error("Failed to read config file {path}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}")]
    ParseFile {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// A known peer machine: identity, endpoint, floor coordinates.
/// Static at runtime, consumed read-only by the peer directory.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Peer {
    pub id: String,
    pub host: String,
    pub coor_x: f64,
    pub coor_y: f64,
}

/// Initial stock of one drink slot.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Drink {
    pub code: String,
    pub quantity: u8,
}

#[derive(Deserialize, Debug)]
struct ConfigFile {
    id: String,
    listen: SocketAddr,
    coor_x: f64,
    coor_y: f64,
    thread_count: NonZero<usize>,
    discovery_window_ms: u64,
    reservation_timeout_ms: u64,
    connect_timeout_ms: u64,
    peers: Vec<Peer>,
    drinks: Vec<Drink>,
}

/// Node configuration
///
/// Use [`Config::load_toml_file`] to initialize.
#[derive(Debug, Clone)]
pub struct Config {
    pub id: String,
    pub listen: SocketAddr,
    pub coor_x: f64,
    pub coor_y: f64,
    pub thread_count: NonZero<usize>,
    pub discovery_window: Duration,
    pub reservation_timeout: Duration,
    pub connect_timeout: Duration,
    pub peers: Vec<Peer>,
    pub drinks: Vec<Drink>,
}

impl From<ConfigFile> for Config {
    fn from(
        ConfigFile {
            id,
            listen,
            coor_x,
            coor_y,
            thread_count,
            discovery_window_ms,
            reservation_timeout_ms,
            connect_timeout_ms,
            peers,
            drinks,
        }: ConfigFile,
    ) -> Self {
        Self {
            id,
            listen,
            coor_x,
            coor_y,
            thread_count,
            discovery_window: Duration::from_millis(discovery_window_ms),
            reservation_timeout: Duration::from_millis(reservation_timeout_ms),
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            peers,
            drinks,
        }
    }
}

impl Config {
    /// Loads a .toml file from the filesystem, parses it, and initializes a [`Config`].
    pub fn load_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.extension() != Some(std::ffi::OsStr::new("toml")) {
            return Err(ConfigError::FileExtension(path.to_path_buf()));
        }
        let toml = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let conf: ConfigFile = toml::from_str(&toml).map_err(|e| ConfigError::ParseFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(conf.into())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unwrap is ok in test code")]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let toml = r#"
            id = "T1"
            listen = "127.0.0.1:8901"
            coor_x = 10.0
            coor_y = 10.0
            thread_count = 4
            discovery_window_ms = 2000
            reservation_timeout_ms = 3000
            connect_timeout_ms = 1000
            peers = [
                { id = "T2", host = "127.0.0.1:8902", coor_x = 20.0, coor_y = 20.0 },
            ]
            drinks = [
                { code = "02", quantity = 5 },
            ]
        "#;
        let conf: Config = toml::from_str::<ConfigFile>(toml).unwrap().into();
        assert_eq!(conf.id, "T1");
        assert_eq!(conf.discovery_window, Duration::from_secs(2));
        assert_eq!(conf.peers[0].id, "T2");
        assert_eq!(conf.drinks[0].quantity, 5);
    }

    #[test]
    fn rejects_wrong_extension() {
        assert!(matches!(
            Config::load_toml_file("config.json"),
            Err(ConfigError::FileExtension(_))
        ));
    }
}
