//! Configuration from environment variables.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `STUDY_TIMER_DATA_DIR` | platform data dir | Preference store directory |
//! | `STUDY_TIMER_USER` | - | Namespace for per-user sessions, tasks and settings |
//! | `STUDY_TIMER_WS_ADDR` | `127.0.0.1:8765` | Daemon control channel address |
//! | `STUDY_TIMER_NOTIFICATIONS` | `true` | Desktop notifications on phase completion |
//! | `STUDY_TIMER_SOUND` | `true` | Terminal bell on phase completion |
//!
//! Command-line flags override the environment.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use directories::ProjectDirs;
use thiserror::Error;

const DEFAULT_WS_ADDR: &str = "127.0.0.1:8765";

const ENV_DATA_DIR: &str = "STUDY_TIMER_DATA_DIR";
const ENV_USER: &str = "STUDY_TIMER_USER";
const ENV_WS_ADDR: &str = "STUDY_TIMER_WS_ADDR";
const ENV_NOTIFICATIONS: &str = "STUDY_TIMER_NOTIFICATIONS";
const ENV_SOUND: &str = "STUDY_TIMER_SOUND";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("failed to determine a data directory; set STUDY_TIMER_DATA_DIR")]
    NoDataDirectory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub user: Option<String>,
    pub ws_addr: SocketAddr,
    pub notifications: bool,
    pub sound: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = match lookup(ENV_DATA_DIR).filter(|v| !v.trim().is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir()?,
        };

        let user = lookup(ENV_USER)
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());

        let ws_addr = match lookup(ENV_WS_ADDR) {
            Some(raw) => parse_addr(ENV_WS_ADDR, &raw)?,
            None => parse_addr(ENV_WS_ADDR, DEFAULT_WS_ADDR)?,
        };

        let notifications = match lookup(ENV_NOTIFICATIONS) {
            Some(raw) => parse_bool(ENV_NOTIFICATIONS, &raw)?,
            None => true,
        };

        let sound = match lookup(ENV_SOUND) {
            Some(raw) => parse_bool(ENV_SOUND, &raw)?,
            None => true,
        };

        Ok(Self {
            data_dir,
            user,
            ws_addr,
            notifications,
            sound,
        })
    }
}

fn default_data_dir() -> Result<PathBuf, ConfigError> {
    ProjectDirs::from("", "", "study_timer")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(ConfigError::NoDataDirectory)
}

pub fn parse_addr(key: &str, raw: &str) -> Result<SocketAddr, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected host:port, got '{raw}'"),
        })
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected true or false, got '{raw}'"),
        }),
    }
}
