use std::env;
use std::path::PathBuf;

use chrono::Duration;

pub const MIN_SECRET_LEN: usize = 32;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("{0} must be at least 32 characters long")]
    WeakSecret(&'static str),
    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

/// Process configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub session_secret: String,
    pub session_ttl: Duration,
    pub secure_cookies: bool,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub data_dir: PathBuf,
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(v) => v.trim().parse().map_err(|_| ConfigError::Invalid { name, value: v }),
        Err(_) => Ok(default),
    }
}

fn flag(name: &str) -> bool {
    env::var(name).map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let session_secret = env::var("SESSION_SECRET").map_err(|_| ConfigError::Missing("SESSION_SECRET"))?;
        if session_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::WeakSecret("SESSION_SECRET"));
        }
        let ttl_hours: i64 = parsed("SESSION_TTL_HOURS", 24)?;
        if ttl_hours <= 0 {
            return Err(ConfigError::Invalid { name: "SESSION_TTL_HOURS", value: ttl_hours.to_string() });
        }
        Ok(Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            session_secret,
            session_ttl: Duration::hours(ttl_hours),
            secure_cookies: flag("SECURE_COOKIES"),
            database_url: env::var("DATABASE_URL").ok(),
            db_max_connections: parsed("DB_MAX_CONNECTIONS", 5)?,
            data_dir: env::var("NOVELLA_DATA_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("data")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: &[&str] = &[
        "SESSION_SECRET", "SESSION_TTL_HOURS", "BIND_ADDR", "SECURE_COOKIES",
        "DATABASE_URL", "DB_MAX_CONNECTIONS", "NOVELLA_DATA_DIR",
    ];

    fn reset() {
        for v in VARS { env::remove_var(v); }
    }

    #[test]
    #[serial_test::serial]
    fn secret_is_required_and_must_be_long() {
        reset();
        assert_eq!(Config::from_env().unwrap_err(), ConfigError::Missing("SESSION_SECRET"));
        env::set_var("SESSION_SECRET", "short");
        assert_eq!(Config::from_env().unwrap_err(), ConfigError::WeakSecret("SESSION_SECRET"));
        reset();
    }

    #[test]
    #[serial_test::serial]
    fn defaults_apply() {
        reset();
        env::set_var("SESSION_SECRET", "x".repeat(32));
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert_eq!(cfg.session_ttl, Duration::hours(24));
        assert_eq!(cfg.db_max_connections, 5);
        assert_eq!(cfg.data_dir, PathBuf::from("data"));
        assert!(!cfg.secure_cookies);
        assert!(cfg.database_url.is_none());
        reset();
    }

    #[test]
    #[serial_test::serial]
    fn bad_numbers_are_reported() {
        reset();
        env::set_var("SESSION_SECRET", "x".repeat(32));
        env::set_var("DB_MAX_CONNECTIONS", "lots");
        assert!(matches!(Config::from_env(), Err(ConfigError::Invalid { name: "DB_MAX_CONNECTIONS", .. })));
        env::set_var("DB_MAX_CONNECTIONS", "3");
        env::set_var("SESSION_TTL_HOURS", "0");
        assert!(matches!(Config::from_env(), Err(ConfigError::Invalid { name: "SESSION_TTL_HOURS", .. })));
        reset();
    }
}
