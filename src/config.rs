use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::quiz::controller::ControllerSettings;
use crate::quiz::service::DEFAULT_BASE_URL;
use crate::quiz::Difficulty;

pub const IDENTITY_FILE: &str = "identities.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub api_base_url: String,
    pub data_dir: PathBuf,
    pub request_timeout: Duration,
    pub initial_difficulty: Difficulty,
    pub outer_retry_limit: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_BASE_URL.to_string(),
            data_dir: PathBuf::from("."),
            request_timeout: Duration::from_secs(15),
            initial_difficulty: Difficulty::Medium,
            outer_retry_limit: None,
        }
    }
}

impl Config {
    /// Reads the process environment; `main` loads `.env` into it beforehand.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let request_timeout = match get("QUIZ_REQUEST_TIMEOUT_SECS") {
            Some(value) => Duration::from_secs(parse_number("QUIZ_REQUEST_TIMEOUT_SECS", &value)?),
            None => defaults.request_timeout,
        };
        let initial_difficulty = match get("QUIZ_INITIAL_DIFFICULTY") {
            Some(value) => value.parse().map_err(|e: crate::quiz::UnknownDifficulty| {
                ConfigError::Invalid {
                    name: "QUIZ_INITIAL_DIFFICULTY",
                    value: value.clone(),
                    reason: e.to_string(),
                }
            })?,
            None => defaults.initial_difficulty,
        };
        let outer_retry_limit = match get("QUIZ_OUTER_RETRY_LIMIT") {
            Some(value) => Some(parse_number("QUIZ_OUTER_RETRY_LIMIT", &value)?),
            None => None,
        };

        Ok(Self {
            api_base_url: get("QUIZ_API_BASE_URL").unwrap_or(defaults.api_base_url),
            data_dir: get("QUIZ_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            request_timeout,
            initial_difficulty,
            outer_retry_limit,
        })
    }

    pub fn identity_path(&self) -> PathBuf {
        self.data_dir.join(IDENTITY_FILE)
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            initial_difficulty: self.initial_difficulty,
            outer_retry_limit: self.outer_retry_limit,
            ..ControllerSettings::default()
        }
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
