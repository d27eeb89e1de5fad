//! Service configuration read from the environment.

use crate::error::ConfigError;
use std::net::SocketAddr;

pub const DEFAULT_BASE_POINT: &str = "/api/v1";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";

#[derive(Clone, Debug, PartialEq)]
pub struct ServiceConfig {
    pub base_point: String,
    /// Absent means the in-memory store.
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub body_limit: usize,
    pub bind: SocketAddr,
}

impl ServiceConfig {
    /// Reads `DBMOD_BASE_POINT`, `DATABASE_URL`, `DBMOD_MAX_CONNECTIONS`, `DBMOD_BODY_LIMIT` and `DBMOD_BIND`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Ok(ServiceConfig {
            base_point: get("DBMOD_BASE_POINT").unwrap_or_else(|| DEFAULT_BASE_POINT.into()),
            database_url: get("DATABASE_URL"),
            max_connections: parse(get("DBMOD_MAX_CONNECTIONS"), "DBMOD_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
            body_limit: parse(get("DBMOD_BODY_LIMIT"), "DBMOD_BODY_LIMIT", DEFAULT_BODY_LIMIT)?,
            bind: match get("DBMOD_BIND") {
                Some(v) => parse(Some(v), "DBMOD_BIND", default_bind())?,
                None => default_bind(),
            },
        })
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            base_point: DEFAULT_BASE_POINT.into(),
            database_url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            body_limit: DEFAULT_BODY_LIMIT,
            bind: default_bind(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

fn parse<T>(value: Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|e: T::Err| ConfigError::InvalidSetting {
            key: key.to_string(),
            message: format!("{:?}: {}", v, e),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = ServiceConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, ServiceConfig::default());
        assert_eq!(cfg.bind.to_string(), DEFAULT_BIND);
    }

    #[test]
    fn values_are_parsed() {
        let cfg = ServiceConfig::from_lookup(lookup(&[
            ("DBMOD_BASE_POINT", "/svc"),
            ("DATABASE_URL", "postgres://localhost/dbmod"),
            ("DBMOD_MAX_CONNECTIONS", "12"),
            ("DBMOD_BIND", "0.0.0.0:8080"),
        ]))
        .unwrap();
        assert_eq!(cfg.base_point, "/svc");
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/dbmod"));
        assert_eq!(cfg.max_connections, 12);
        assert_eq!(cfg.bind.port(), 8080);
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = ServiceConfig::from_lookup(lookup(&[("DBMOD_BODY_LIMIT", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting { ref key, .. } if key == "DBMOD_BODY_LIMIT"));
    }
}
