use std::{env, path::PathBuf, time::Duration};

/// Default location of the embedded database file.
pub const DEFAULT_SQLITE_PATH: &str = "./data/harnsaeure.db";

/// Connection settings for the preferred PostgreSQL backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    /// Pool size (default: 20)
    pub max_connections: u32,
    /// Time allowed to acquire a pooled connection (default: 10s)
    pub connect_timeout: Duration,
    /// Time allowed for the startup reachability probe (default: 5s)
    pub probe_timeout: Duration,
}

impl PostgresConfig {
    /// Settings for `host` with every other field at its default.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 5432,
            database: "gout_diary".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_connections: 20,
            connect_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
        }
    }

    /// `host:port/database`, for logs. Never includes the password.
    pub fn describe(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Preferred backend. `None` when `DB_HOST` is unset.
    pub postgres: Option<PostgresConfig>,
    /// Path to the embedded database file (default: "./data/harnsaeure.db")
    pub sqlite_path: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `DB_HOST` - PostgreSQL host; the preferred backend is only tried when set
    /// - `DB_PORT` - PostgreSQL port (default: 5432)
    /// - `DB_NAME` - Database name (default: "gout_diary")
    /// - `DB_USER` - Database user (default: "postgres")
    /// - `DB_PASSWORD` - Database password (default: empty)
    /// - `DB_MAX_CONNECTIONS` - Pool size (default: 20)
    /// - `DB_CONNECT_TIMEOUT_SECS` - Pool acquire timeout (default: 10)
    /// - `DB_PROBE_TIMEOUT_SECS` - Startup probe timeout (default: 5)
    /// - `DB_PATH` - SQLite database path (default: "./data/harnsaeure.db")
    pub fn from_env() -> Self {
        let postgres = env::var("DB_HOST")
            .ok()
            .filter(|host| !host.trim().is_empty())
            .map(|host| {
                let defaults = PostgresConfig::new(host);
                PostgresConfig {
                    port: parse_var("DB_PORT").unwrap_or(defaults.port),
                    database: env::var("DB_NAME").unwrap_or_else(|_| defaults.database.clone()),
                    user: env::var("DB_USER").unwrap_or_else(|_| defaults.user.clone()),
                    password: env::var("DB_PASSWORD").unwrap_or_default(),
                    max_connections: parse_var("DB_MAX_CONNECTIONS")
                        .unwrap_or(defaults.max_connections),
                    connect_timeout: parse_var("DB_CONNECT_TIMEOUT_SECS")
                        .map(Duration::from_secs)
                        .unwrap_or(defaults.connect_timeout),
                    probe_timeout: parse_var("DB_PROBE_TIMEOUT_SECS")
                        .map(Duration::from_secs)
                        .unwrap_or(defaults.probe_timeout),
                    ..defaults
                }
            });

        Self {
            postgres,
            sqlite_path: env::var("DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_SQLITE_PATH)),
        }
    }

    /// Configuration that only ever uses the embedded backend at `path`.
    pub fn sqlite_only(path: impl Into<PathBuf>) -> Self {
        Self {
            postgres: None,
            sqlite_path: path.into(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_defaults() {
        let config = PostgresConfig::new("db.internal");

        assert_eq!(config.port, 5432);
        assert_eq!(config.database, "gout_diary");
        assert_eq!(config.user, "postgres");
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.probe_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_describe_omits_password() {
        let mut config = PostgresConfig::new("db.internal");
        config.password = "hunter2".to_string();

        let described = config.describe();
        assert_eq!(described, "db.internal:5432/gout_diary");
        assert!(!described.contains("hunter2"));
    }

    #[test]
    fn test_sqlite_only() {
        let config = Config::sqlite_only("/tmp/diary.db");

        assert!(config.postgres.is_none());
        assert_eq!(config.sqlite_path, PathBuf::from("/tmp/diary.db"));
    }
}
