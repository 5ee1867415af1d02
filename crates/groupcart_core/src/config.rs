//! Runtime configuration loaded from environment variables.
//!
//! # Invariants
//! - Every setting has a default; a missing variable is logged, never fatal.
//! - A present but malformed variable is an error, not a silent default.

use crate::logging::default_log_level;
use crate::model::group::DEFAULT_GROUP_ID_LEN;
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const DB_PATH_VAR: &str = "GROUPCART_DB_PATH";
pub const LOG_LEVEL_VAR: &str = "GROUPCART_LOG_LEVEL";
pub const LOG_DIR_VAR: &str = "GROUPCART_LOG_DIR";
pub const GROUP_ID_LEN_VAR: &str = "GROUPCART_GROUP_ID_LEN";

pub const DEFAULT_DB_FILE_NAME: &str = "groupcart.sqlite3";
pub const GROUP_ID_LEN_RANGE: std::ops::RangeInclusive<usize> = 4..=32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key} value `{value}`: {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub log_level: String,
    /// File logging is off when unset.
    pub log_dir: Option<PathBuf>,
    pub group_id_len: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_FILE_NAME),
            log_level: default_log_level().to_string(),
            log_dir: None,
            group_id_len: DEFAULT_GROUP_ID_LEN,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let read = |key: &'static str| {
            let value = lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty());
            if value.is_none() {
                info!("event=config_default module=config status=ok key={key}");
            }
            value
        };

        let db_path = read(DB_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);
        let log_level = read(LOG_LEVEL_VAR).unwrap_or(defaults.log_level);

        let log_dir = match read(LOG_DIR_VAR) {
            Some(raw) => {
                let dir = PathBuf::from(&raw);
                if !dir.is_absolute() {
                    return Err(ConfigError::InvalidValue {
                        key: LOG_DIR_VAR,
                        value: raw,
                        reason: "must be an absolute path".to_string(),
                    });
                }
                Some(dir)
            }
            None => None,
        };

        let group_id_len = match read(GROUP_ID_LEN_VAR) {
            Some(raw) => parse_group_id_len(&raw)?,
            None => defaults.group_id_len,
        };

        Ok(Self {
            db_path,
            log_level,
            log_dir,
            group_id_len,
        })
    }
}

fn parse_group_id_len(raw: &str) -> Result<usize, ConfigError> {
    let invalid = |reason: String| {
        warn!("event=config_parse module=config status=error key={GROUP_ID_LEN_VAR}");
        ConfigError::InvalidValue {
            key: GROUP_ID_LEN_VAR,
            value: raw.to_string(),
            reason,
        }
    };
    let len = raw
        .parse::<usize>()
        .map_err(|err| invalid(err.to_string()))?;
    if !GROUP_ID_LEN_RANGE.contains(&len) {
        return Err(invalid(format!(
            "expected {}..={}",
            GROUP_ID_LEN_RANGE.start(),
            GROUP_ID_LEN_RANGE.end()
        )));
    }
    Ok(len)
}
