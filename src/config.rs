//! Process configuration parsed from environment variables.
//!
//! `from_env` reads the real environment (after `.env` is loaded by `main`);
//! `from_lookup` takes any key lookup so tests never touch global env state.

use std::num::NonZeroUsize;
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_SNAPSHOT_DIR: &str = "data/whiteboards";
pub const DEFAULT_FILE_BASE_URL: &str = "/api/files";
pub const DEFAULT_CLIENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    /// Identifier of this node. `None` means the local (master) node.
    pub server_id: Option<String>,
    pub snapshot_dir: PathBuf,
    pub file_base_url: String,
    pub client_channel_capacity: usize,
    /// Drop a room's whiteboards and undo history once its last participant leaves.
    pub close_empty_rooms: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            server_id: None,
            snapshot_dir: PathBuf::from(DEFAULT_SNAPSHOT_DIR),
            file_base_url: DEFAULT_FILE_BASE_URL.to_string(),
            client_channel_capacity: DEFAULT_CLIENT_CHANNEL_CAPACITY,
            close_empty_rooms: true,
        }
    }
}

impl Config {
    /// Build config from the process environment.
    ///
    /// Optional:
    /// - `PORT`: default 3000
    /// - `SERVER_ID`: unset means local node
    /// - `SNAPSHOT_DIR`: default `data/whiteboards`
    /// - `FILE_BASE_URL`: default `/api/files`
    /// - `CLIENT_CHANNEL_CAPACITY`: default 256, must be at least 1
    /// - `CLOSE_EMPTY_ROOMS`: default `true`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` when a value is present but unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` when a value is present but unparseable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let server_id = lookup("SERVER_ID").filter(|s| !s.trim().is_empty());

        Ok(Self {
            port: parse_or(&lookup, "PORT", defaults.port)?,
            server_id,
            snapshot_dir: lookup("SNAPSHOT_DIR").map_or(defaults.snapshot_dir, PathBuf::from),
            file_base_url: lookup("FILE_BASE_URL")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or(defaults.file_base_url),
            client_channel_capacity: parse_nonzero_or(&lookup, "CLIENT_CHANNEL_CAPACITY", defaults.client_channel_capacity)?,
            close_empty_rooms: parse_bool_or(&lookup, "CLOSE_EMPTY_ROOMS", defaults.close_empty_rooms)?,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

/// Like `parse_or`, but zero is rejected: it sizes a bounded channel.
fn parse_nonzero_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: usize,
) -> Result<usize, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<NonZeroUsize>()
            .map(NonZeroUsize::get)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn parse_bool_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid { key, value: raw }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
