use std::{path::PathBuf, str::FromStr, time::Duration};

use log::LevelFilter;
use thiserror::Error;

const DB_PATH: &str = "SNIPBOX_DB_PATH";
const POOL_SIZE: &str = "SNIPBOX_POOL_SIZE";
const POOL_TIMEOUT: &str = "SNIPBOX_POOL_TIMEOUT";
const BUSY_TIMEOUT: &str = "SNIPBOX_BUSY_TIMEOUT";
const HASH_MEMORY_KIB: &str = "SNIPBOX_HASH_MEMORY_KIB";
const HASH_ITERATIONS: &str = "SNIPBOX_HASH_ITERATIONS";
const HASH_PARALLELISM: &str = "SNIPBOX_HASH_PARALLELISM";
const LOG_LEVEL: &str = "SNIPBOX_LOG_LEVEL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} must be a number, got {value:?}")]
    Number { key: &'static str, value: String },
    #[error("{key} must be a duration like \"30s\", got {value:?}: {source}")]
    Duration {
        key: &'static str,
        value: String,
        source: humantime::DurationError,
    },
    #[error("{key} must be a log level, got {value:?}")]
    LogLevel { key: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database: DatabaseConfig,
    pub hashing: HashConfig,
    pub log_level: LevelFilter,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    /// Upper bound on open connections.
    pub pool_size: u32,
    /// How long an operation may wait for a free connection.
    pub connection_timeout: Duration,
    /// How long SQLite retries a locked database before giving up.
    pub busy_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(path: impl Into<PathBuf>) -> DatabaseConfig {
        DatabaseConfig {
            path: path.into(),
            pool_size: 10,
            connection_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Argon2id work factors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashConfig {
    fn default() -> Self {
        HashConfig {
            memory_kib: argon2::Params::DEFAULT_M_COST,
            iterations: argon2::Params::DEFAULT_T_COST,
            parallelism: argon2::Params::DEFAULT_P_COST,
        }
    }
}

impl Config {
    /// Read configuration from the process environment.
    /// Call `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Config, ConfigError> {
        Config::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = HashConfig::default();
        let mut database =
            DatabaseConfig::new(lookup(DB_PATH).unwrap_or_else(|| "snipbox.sqlite3".into()));

        if let Some(value) = lookup(POOL_SIZE) {
            database.pool_size = non_zero(POOL_SIZE, parse_number(POOL_SIZE, value)?)?;
        }
        if let Some(value) = lookup(POOL_TIMEOUT) {
            database.connection_timeout = parse_duration(POOL_TIMEOUT, value)?;
        }
        if let Some(value) = lookup(BUSY_TIMEOUT) {
            database.busy_timeout = parse_duration(BUSY_TIMEOUT, value)?;
        }

        let hashing = HashConfig {
            memory_kib: match lookup(HASH_MEMORY_KIB) {
                Some(value) => parse_number(HASH_MEMORY_KIB, value)?,
                None => defaults.memory_kib,
            },
            iterations: match lookup(HASH_ITERATIONS) {
                Some(value) => parse_number(HASH_ITERATIONS, value)?,
                None => defaults.iterations,
            },
            parallelism: match lookup(HASH_PARALLELISM) {
                Some(value) => parse_number(HASH_PARALLELISM, value)?,
                None => defaults.parallelism,
            },
        };

        let log_level = match lookup(LOG_LEVEL) {
            Some(value) => LevelFilter::from_str(&value).map_err(|_| ConfigError::LogLevel {
                key: LOG_LEVEL,
                value,
            })?,
            None => LevelFilter::Info,
        };

        Ok(Config {
            database,
            hashing,
            log_level,
        })
    }
}

fn parse_number<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Number { key, value })
}

fn parse_duration(key: &'static str, value: String) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim())
        .map_err(|source| ConfigError::Duration { key, value, source })
}

fn non_zero(key: &'static str, value: u32) -> Result<u32, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Zero(key));
    }
    Ok(value)
}
