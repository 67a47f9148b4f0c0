use std::collections::HashMap;
use std::env;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

/// Bundled defaults for builds without a .env file (mobile, release)
const BUNDLED_CONFIG: &str = include_str!("../assets/config.env");

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const DEFAULT_SEED_MESSAGES: usize = 95;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub page_size: NonZeroUsize,
    pub conversation_id: Option<String>,
    pub log_level: tracing::Level,
    pub store_latency: Duration,
    pub seed_messages: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: NonZeroUsize::new(DEFAULT_PAGE_SIZE).unwrap_or(NonZeroUsize::MIN),
            conversation_id: None,
            log_level: tracing::Level::INFO,
            store_latency: Duration::ZERO,
            seed_messages: DEFAULT_SEED_MESSAGES,
        }
    }
}

impl Config {
    /// Read from the process environment, falling back to the bundled defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bundled = parse_env_lines(BUNDLED_CONFIG);
        Self::from_lookup(|key| env::var(key).ok().or_else(|| bundled.get(key).cloned()))
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let page_size = match non_empty(lookup("FINCHAT_PAGE_SIZE")) {
            Some(raw) => {
                let n: usize = parse("FINCHAT_PAGE_SIZE", &raw)?;
                NonZeroUsize::new(n).ok_or_else(|| ConfigError::Invalid {
                    key: "FINCHAT_PAGE_SIZE",
                    value: raw,
                    reason: "must be positive".to_string(),
                })?
            }
            None => defaults.page_size,
        };

        let log_level = match non_empty(lookup("FINCHAT_LOG_LEVEL")) {
            Some(raw) => parse("FINCHAT_LOG_LEVEL", &raw)?,
            None => defaults.log_level,
        };

        let store_latency = match non_empty(lookup("FINCHAT_STORE_LATENCY_MS")) {
            Some(raw) => Duration::from_millis(parse("FINCHAT_STORE_LATENCY_MS", &raw)?),
            None => defaults.store_latency,
        };

        let seed_messages = match non_empty(lookup("FINCHAT_SEED_MESSAGES")) {
            Some(raw) => parse("FINCHAT_SEED_MESSAGES", &raw)?,
            None => defaults.seed_messages,
        };

        Ok(Self {
            page_size,
            conversation_id: non_empty(lookup("FINCHAT_CONVERSATION")),
            log_level,
            store_latency,
            seed_messages,
        })
    }
}

/// Load `.env` into the process environment.
///
/// A missing file is normal outside desktop dev. Any other failure is handed back so
/// the caller can log it once tracing is up.
#[cfg(not(target_arch = "wasm32"))]
pub fn load_dotenv() -> Result<(), dotenvy::Error> {
    ignore_missing(dotenvy::dotenv())
}

#[cfg(target_arch = "wasm32")]
pub fn load_dotenv() -> Result<(), dotenvy::Error> {
    Ok(())
}

#[cfg_attr(target_arch = "wasm32", allow(dead_code))]
fn ignore_missing<T>(result: Result<T, dotenvy::Error>) -> Result<(), dotenvy::Error> {
    match result {
        Ok(_) => Ok(()),
        Err(err) if err.not_found() => Ok(()),
        Err(err) => Err(err),
    }
}

fn parse_env_lines(source: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();
    for line in source.lines() {
        let line = line.trim();
        // Skip comments and empty lines
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            values.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    values
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|err: T::Err| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: err.to_string(),
    })
}
