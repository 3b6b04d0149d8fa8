//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub cors_origin: String,
    /// Directory proof images are stored under.
    pub blob_root: PathBuf,
    pub blob_signing_key: String,
    /// Base URL signed proof links are issued against.
    pub public_base_url: String,
    pub signed_url_ttl: Duration,
    pub evaluator_enabled: bool,
    pub evaluator_interval: Duration,
    pub evaluator_concurrency: usize,
    /// Shared secret for `/internal/*`. The internal routes refuse every call without it.
    pub service_key: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server and Database Settings ---
        let bind_address = parse_or(&lookup, "BIND_ADDRESS", SocketAddr::from(([0, 0, 0, 0], 3000)))?;

        let database_url =
            lookup("DATABASE_URL").ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_origin =
            lookup("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:5173".to_string());

        // --- Proof Storage ---
        let blob_root = lookup("BLOB_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/proofs"));
        let blob_signing_key = lookup("BLOB_SIGNING_KEY")
            .ok_or_else(|| ConfigError::MissingVar("BLOB_SIGNING_KEY".to_string()))?;
        let public_base_url = lookup("PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("http://{}", bind_address))
            .trim_end_matches('/')
            .to_string();
        let signed_url_ttl = Duration::from_secs(parse_or(&lookup, "SIGNED_URL_TTL_SECS", 3600)?);

        // --- Deadline Evaluator ---
        let evaluator_enabled = parse_or(&lookup, "EVALUATOR_ENABLED", true)?;
        let interval_secs: u64 = parse_or(&lookup, "EVALUATOR_INTERVAL_SECS", 3600)?;
        if interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "EVALUATOR_INTERVAL_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        let evaluator_concurrency = parse_or(&lookup, "EVALUATOR_CONCURRENCY", 4)?;

        let service_key = lookup("SERVICE_KEY").filter(|k| !k.is_empty());

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            cors_origin,
            blob_root,
            blob_signing_key,
            public_base_url,
            signed_url_ttl,
            evaluator_enabled,
            evaluator_interval: Duration::from_secs(interval_secs),
            evaluator_concurrency,
            service_key,
        })
    }
}

/// Parses `name` when set, otherwise falls back to `default`.
fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        None => Ok(default),
    }
}
