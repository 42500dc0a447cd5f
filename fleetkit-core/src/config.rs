use std::convert::Infallible;
use std::env;
use std::str::FromStr;

use crate::errors::ConfigError;
use crate::logging::LogFormat;
use crate::metadata::Metadata;
use crate::structured_error::ErrorFactory;

/// Runtime environment used by the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

/// Unknown values fall back to [`Environment::Development`].
impl FromStr for Environment {
    type Err = Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "staging" | "stage" => Environment::Staging,
            _ => Environment::Development,
        })
    }
}

/// Settings every service built on the toolkit needs.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub service_name: String,
    pub environment: Environment,
    pub log_level: String,
    pub log_format: LogFormat,
    /// Seeded into the metadata of every error built by [`Self::error_factory`].
    pub error_default_meta: Metadata,
}

impl CoreConfig {
    /// Loads configuration from the process environment (and `.env`).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::load(|suffix| suffix.to_string(), "FLEETKIT_ENV")
    }

    /// Loads configuration from env vars prefixed with the provided value (e.g. `ORDERS_`).
    pub fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::load(|suffix| format!("{prefix}{suffix}"), &format!("{prefix}ENV"))
    }

    fn load(key: impl Fn(&str) -> String, env_key: &str) -> Result<Self, ConfigError> {
        let service_key = key("SERVICE_NAME");
        let service_name = env::var(&service_key)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or(ConfigError::MissingEnvVar(service_key))?;

        let environment = env::var(env_key)
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default();

        let log_level = env::var(key("LOG_LEVEL")).unwrap_or_else(|_| "info".to_string());

        let log_format = match optional_var(&key("LOG_FORMAT"))? {
            Some(raw) => raw
                .parse::<LogFormat>()
                .map_err(|err| ConfigError::Internal(err.to_string()))?,
            None if environment == Environment::Production => LogFormat::Json,
            None => LogFormat::Pretty,
        };

        let error_default_meta = optional_var(&key("ERROR_DEFAULT_META"))?
            .map(|raw| parse_meta_pairs(&raw))
            .unwrap_or_default();

        Ok(Self {
            service_name,
            environment,
            log_level,
            log_format,
            error_default_meta,
        })
    }

    /// Whether the service is running in production.
    pub fn is_production(&self) -> bool {
        matches!(self.environment, Environment::Production)
    }

    /// Factory seeding `service` and the configured defaults into every error.
    pub fn error_factory(&self) -> ErrorFactory {
        ErrorFactory::new(self.error_default_meta.with("service", self.service_name.as_str()))
    }
}

/// Database settings for the document store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub run_migrations: bool,
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("DATABASE_URL".into()))?;

        let max_connections = parse_var("DATABASE_MAX_CONNECTIONS", 10)?;
        let run_migrations = parse_var("DATABASE_RUN_MIGRATIONS", true)?;

        Ok(Self {
            database_url,
            max_connections,
            run_migrations,
        })
    }
}

/// Settings for outbound HTTP calls.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { timeout_ms: 10_000 }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Ok(Self {
            timeout_ms: parse_var("HTTP_CLIENT_TIMEOUT_MS", Self::default().timeout_ms)?,
        })
    }
}

fn optional_var(key: &str) -> Result<Option<String>, ConfigError> {
    match env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(source) => Err(ConfigError::InvalidEnvVar {
            key: key.to_string(),
            source,
        }),
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match optional_var(key)? {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Internal(format!("{key} has an invalid value: {raw}"))),
        None => Ok(default),
    }
}

/// Parses `k=v,k2=v2`. Entries without `=` are ignored.
pub fn parse_meta_pairs(raw: &str) -> Metadata {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}
