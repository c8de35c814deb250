//! Service configuration from environment variables (`.env` honoured)

use anyhow::{Context, Result};

const DEFAULT_BIND: &str = "127.0.0.1:8080";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_url: String,
    pub api_bind: String,
    pub db_max_connections: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from any variable lookup
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            db_url: var("DB_URL").context("DB_URL env var missing")?,
            api_bind: var("API_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            db_max_connections: var("DB_MAX_CONNECTIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::from_vars(lookup(&[("DB_URL", "postgres://localhost/ops")])).unwrap();
        assert_eq!(cfg.api_bind, "127.0.0.1:8080");
        assert_eq!(cfg.db_max_connections, 5);
    }

    #[test]
    fn test_db_url_required() {
        let err = Config::from_vars(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("DB_URL"));
    }

    #[test]
    fn test_bad_pool_size_falls_back() {
        let cfg = Config::from_vars(lookup(&[
            ("DB_URL", "postgres://localhost/ops"),
            ("DB_MAX_CONNECTIONS", "lots"),
            ("API_BIND", "0.0.0.0:9000"),
        ]))
        .unwrap();
        assert_eq!(cfg.db_max_connections, 5);
        assert_eq!(cfg.api_bind, "0.0.0.0:9000");
    }
}
