//! Service configuration from the environment

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::claims::RetryPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} is not valid: {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("DATABASE_URL is required when STORE=postgres")]
    MissingDatabaseUrl,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StoreBackend {
    #[default]
    Postgres,
    /// Process-local ledger, lost on restart
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(Self::Postgres),
            "memory" | "mem" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub nats_url: Option<String>,
    pub db_max_connections: u32,
    pub lock_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8083,
            store: StoreBackend::Postgres,
            database_url: None,
            nats_url: None,
            db_max_connections: 10,
            lock_timeout: Duration::from_millis(3000),
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let config = Self {
            port: parse(&var, "PORT", defaults.port)?,
            store: parse(&var, "STORE", defaults.store)?,
            database_url: var("DATABASE_URL"),
            nats_url: var("NATS_URL"),
            db_max_connections: parse(&var, "DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            lock_timeout: Duration::from_millis(parse(&var, "LOCK_TIMEOUT_MS", 3000)?),
            retry: RetryPolicy {
                max_attempts: parse(&var, "CLAIM_MAX_ATTEMPTS", defaults.retry.max_attempts)?.max(1),
                backoff: Duration::from_millis(parse(&var, "CLAIM_RETRY_BACKOFF_MS", 50)?),
            },
        };
        if config.store == StoreBackend::Postgres && config.database_url.is_none() {
            return Err(ConfigError::MissingDatabaseUrl);
        }
        Ok(config)
    }
}

fn parse<T: FromStr>(var: &impl Fn(&str) -> Option<String>, name: &'static str, default: T) -> Result<T, ConfigError> {
    match var(name) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_with_memory_store() {
        let config = Config::from_lookup(lookup(&[("STORE", "memory")])).unwrap();
        assert_eq!(config.port, 8083);
        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(config.lock_timeout, Duration::from_secs(3));
        assert_eq!(config.retry, RetryPolicy { max_attempts: 3, backoff: Duration::from_millis(50) });
    }

    #[test]
    fn test_postgres_requires_database_url() {
        assert_eq!(Config::from_lookup(lookup(&[])), Err(ConfigError::MissingDatabaseUrl));
        let config = Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/shop"), ("PORT", "9000")])).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/shop"));
    }

    #[test]
    fn test_invalid_values_are_named() {
        let err = Config::from_lookup(lookup(&[("STORE", "memory"), ("LOCK_TIMEOUT_MS", "soon")])).unwrap_err();
        assert_eq!(err, ConfigError::Invalid { name: "LOCK_TIMEOUT_MS", value: "soon".into() });
        assert!(Config::from_lookup(lookup(&[("STORE", "redis")])).is_err());
    }

    #[test]
    fn test_attempts_never_zero() {
        let config = Config::from_lookup(lookup(&[("STORE", "memory"), ("CLAIM_MAX_ATTEMPTS", "0")])).unwrap();
        assert_eq!(config.retry.max_attempts, 1);
    }
}
