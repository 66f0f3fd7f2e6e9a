//! Runtime configuration from environment variables

use crate::session::HistoryPolicy;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_HISTORY_TURNS: usize = 20;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub data_dir: PathBuf,
    /// Overrides `data_dir/relay.db`
    pub db_path: Option<PathBuf>,
    pub port: u16,
    pub backend_url: Option<String>,
    pub backend_api_key: Option<String>,
    pub backend_timeout: Duration,
    pub history_policy: HistoryPolicy,
    pub max_history_turns: usize,
    pub max_upload_bytes: usize,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        Ok(Self {
            data_dir: get("RELAY_DATA_DIR").map_or_else(|| PathBuf::from("data"), PathBuf::from),
            db_path: get("RELAY_DB_PATH").map(PathBuf::from),
            port: parse_or("RELAY_PORT", get("RELAY_PORT"), DEFAULT_PORT)?,
            backend_url: get("BACKEND_URL"),
            backend_api_key: get("BACKEND_API_KEY"),
            backend_timeout: Duration::from_secs(parse_or(
                "BACKEND_TIMEOUT_SECS",
                get("BACKEND_TIMEOUT_SECS"),
                DEFAULT_TIMEOUT_SECS,
            )?),
            history_policy: parse_or(
                "HISTORY_ON_SWITCH",
                get("HISTORY_ON_SWITCH"),
                HistoryPolicy::default(),
            )?,
            max_history_turns: parse_or(
                "MAX_HISTORY_TURNS",
                get("MAX_HISTORY_TURNS"),
                DEFAULT_MAX_HISTORY_TURNS,
            )?,
            max_upload_bytes: parse_or(
                "MAX_UPLOAD_BYTES",
                get("MAX_UPLOAD_BYTES"),
                DEFAULT_MAX_UPLOAD_BYTES,
            )?,
        })
    }

    /// Check the settings the relay cannot start without
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend_url.is_none() {
            return Err(ConfigError::Missing("BACKEND_URL"));
        }
        if self.backend_api_key.is_none() {
            return Err(ConfigError::Missing("BACKEND_API_KEY"));
        }
        if self.backend_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                var: "BACKEND_TIMEOUT_SECS",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("relay.db"))
    }
}

fn parse_or<T>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
        }),
    }
}
