use std::env;
use std::str::FromStr;

use chrono::Duration;
use thiserror::Error;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::create_security_headers_layer;

const DEV_JWT_SECRET: &str = "eventpass-dev-jwt-secret";
const DEV_PAYMENT_SECRET: &str = "eventpass-dev-payment-secret";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be set in production")]
    Missing { name: &'static str },

    #[error("{name} has invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub production: bool,
    pub storage: StorageBackend,
    pub database_url: String,
    pub database_max_connections: u32,
    pub jwt_secret: String,
    pub payment_key_id: String,
    pub payment_key_secret: String,
    pub currency: String,
    pub checkin_opens_minutes: i64,
    pub cancellation_cutoff_hours: i64,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for Config {
    /// Development settings with the in-memory store.
    fn default() -> Self {
        Self {
            port: 3001,
            production: false,
            storage: StorageBackend::Memory,
            database_url: "postgres://localhost/eventpass".to_string(),
            database_max_connections: 10,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            payment_key_id: "rzp_test_key".to_string(),
            payment_key_secret: DEV_PAYMENT_SECRET.to_string(),
            currency: "INR".to_string(),
            checkin_opens_minutes: 120,
            cancellation_cutoff_hours: 24,
            cors_allowed_origins: cors::DEFAULT_ALLOWED_ORIGINS
                .split(',')
                .map(str::to_string)
                .collect(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a config from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let production = lookup("RUST_ENV")
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false);

        let secret = |name: &'static str, dev_default: &str| -> Result<String, ConfigError> {
            match lookup(name).filter(|v| !v.trim().is_empty()) {
                Some(value) => Ok(value),
                None if production => Err(ConfigError::Missing { name }),
                None => Ok(dev_default.to_string()),
            }
        };

        Ok(Self {
            port: parsed(&lookup, "PORT", defaults.port)?,
            production,
            storage: parsed(&lookup, "STORAGE_BACKEND", StorageBackend::Postgres)?,
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            database_max_connections: parsed(
                &lookup,
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            jwt_secret: secret("JWT_SECRET", DEV_JWT_SECRET)?,
            payment_key_id: lookup("PAYMENT_KEY_ID").unwrap_or(defaults.payment_key_id),
            payment_key_secret: secret("PAYMENT_KEY_SECRET", DEV_PAYMENT_SECRET)?,
            currency: lookup("PAYMENT_CURRENCY").unwrap_or(defaults.currency),
            checkin_opens_minutes: parsed(
                &lookup,
                "CHECKIN_OPENS_MINUTES",
                defaults.checkin_opens_minutes,
            )?,
            cancellation_cutoff_hours: parsed(
                &lookup,
                "CANCELLATION_CUTOFF_HOURS",
                defaults.cancellation_cutoff_hours,
            )?,
            cors_allowed_origins: lookup("CORS_ALLOWED_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|origin| !origin.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or(defaults.cors_allowed_origins),
        })
    }

    pub fn checkin_opens_before(&self) -> Duration {
        Duration::minutes(self.checkin_opens_minutes)
    }

    pub fn cancellation_cutoff(&self) -> Duration {
        Duration::hours(self.cancellation_cutoff_hours)
    }
}

fn parsed<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.port, 3001);
        assert_eq!(config.storage, StorageBackend::Postgres);
        assert_eq!(config.checkin_opens_before(), Duration::hours(2));
        assert_eq!(config.cancellation_cutoff(), Duration::hours(24));
        assert!(!config.production);
    }

    #[test]
    fn invalid_numbers_fail() {
        let err = Config::from_lookup(lookup_from(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "PORT", .. }));
    }

    #[test]
    fn production_requires_secrets() {
        let err = Config::from_lookup(lookup_from(&[("RUST_ENV", "production")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { name: "JWT_SECRET" }));

        let config = Config::from_lookup(lookup_from(&[
            ("RUST_ENV", "production"),
            ("JWT_SECRET", "a"),
            ("PAYMENT_KEY_SECRET", "b"),
            ("STORAGE_BACKEND", "memory"),
        ]))
        .unwrap();
        assert!(config.production);
        assert_eq!(config.storage, StorageBackend::Memory);
    }

    #[test]
    fn origins_are_split_and_trimmed() {
        let config = Config::from_lookup(lookup_from(&[(
            "CORS_ALLOWED_ORIGINS",
            "https://a.example, https://b.example,",
        )]))
        .unwrap();
        assert_eq!(
            config.cors_allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
    }
}
