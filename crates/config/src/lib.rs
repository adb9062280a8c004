use dotenv::dotenv;
use dotenv::from_path;
use std::env;
use thiserror::Error;

/// bcrypt only accepts work factors in this range.
const MIN_BCRYPT_COST: u32 = 4;
const MAX_BCRYPT_COST: u32 = 31;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load .env file from path {path}: {reason}")]
    EnvFile { path: String, reason: String },

    #[error("Invalid {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub database_pool_size: u32,
    pub bcrypt_cost: u32,
    pub log_level: String,
}

impl Config {
    /// Load configuration from a specified `.env` file path or default to the root `.env` file.
    /// Variables already set in the process environment win over the file.
    pub fn from_env(env_path: Option<&str>) -> Result<Self, ConfigError> {
        if let Some(path) = env_path {
            from_path(path).map_err(|e| ConfigError::EnvFile {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        } else {
            // A missing default `.env` is fine
            dotenv().ok();
        }

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup, falling back to defaults for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_path = lookup("DATABASE_PATH")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "social.db".to_string());

        let database_pool_size: u32 = parse_or(&lookup, "DATABASE_POOL_SIZE", 8)?;
        if database_pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "DATABASE_POOL_SIZE",
                reason: "must be at least 1".to_string(),
            });
        }

        let bcrypt_cost: u32 = parse_or(&lookup, "BCRYPT_COST", 10)?;
        if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&bcrypt_cost) {
            return Err(ConfigError::InvalidValue {
                key: "BCRYPT_COST",
                reason: format!(
                    "{} is outside {}..={}",
                    bcrypt_cost, MIN_BCRYPT_COST, MAX_BCRYPT_COST
                ),
            });
        }

        Ok(Self {
            database_path,
            database_pool_size,
            bcrypt_cost,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
