//! Connection and pagination settings.
//!
//! Read from the process environment (after loading a `.env` file when
//! one exists):
//!
//! | variable              | default      |
//! |-----------------------|--------------|
//! | `ARANGO_DB`           | `datalayer`  |
//! | `ARANGO_HOST`         | `localhost`  |
//! | `ARANGO_PORT`         | `8529`       |
//! | `ARANGO_PROTOCOL`     | `http`       |
//! | `ARANGO_USERNAME`     | unset        |
//! | `ARANGO_PASSWORD`     | unset        |
//! | `ARANGO_TIMEOUT_SECS` | `30`         |
//! | `ARANGO_BATCH_SIZE`   | `1000`       |
//! | `PAGINATION_DEFAULT`  | `25`         |
//! | `PAGINATION_LIMIT`    | `50`         |
//! | `ARANGO_COERCE_DATES` | `false`      |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;

use crate::error::{DbError, DbResult};

pub const DEFAULT_DATABASE: &str = "datalayer";
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8529;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_BATCH_SIZE: u32 = 1000;
pub const DEFAULT_PAGE_SIZE: u32 = 25;
pub const MAX_PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct ArangoConfig {
    pub database: String,
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
    /// Documents per cursor batch
    pub batch_size: u32,
    /// Page size used when a request names none
    pub default_page_size: u32,
    /// Upper bound for a requested page size
    pub max_page_size: u32,
    pub coerce_dates: bool,
}

impl Default for ArangoConfig {
    fn default() -> Self {
        Self {
            database: DEFAULT_DATABASE.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            protocol: "http".to_string(),
            username: None,
            password: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            batch_size: DEFAULT_BATCH_SIZE,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            coerce_dates: false,
        }
    }
}

fn parse_var<T: FromStr>(name: &str, raw: Option<String>, default: T) -> DbResult<T>
where
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e| {
            DbError::ConfigError(format!("{} has invalid value '{}': {}", name, raw, e))
        }),
    }
}

fn parse_flag(name: &str, raw: Option<String>) -> DbResult<bool> {
    match raw.as_deref().map(|s| s.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(s) => match s.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            _ => Err(DbError::ConfigError(format!(
                "{} must be a boolean, got '{}'",
                name, s
            ))),
        },
    }
}

impl ArangoConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> DbResult<Self> {
        if let Some(path) = Self::load_dotenv() {
            tracing::debug!("Loaded environment from {}", path.display());
        }
        Self::from_process_env()
    }

    /// Merge `.env` into the process environment. Returns the file used.
    pub fn load_dotenv() -> Option<PathBuf> {
        dotenvy::dotenv().ok()
    }

    /// Read the process environment as it is, without touching `.env`.
    pub fn from_process_env() -> DbResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> DbResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            database: lookup("ARANGO_DB").unwrap_or(defaults.database),
            host: lookup("ARANGO_HOST").unwrap_or(defaults.host),
            port: parse_var("ARANGO_PORT", lookup("ARANGO_PORT"), defaults.port)?,
            protocol: lookup("ARANGO_PROTOCOL").unwrap_or(defaults.protocol),
            username: lookup("ARANGO_USERNAME"),
            password: lookup("ARANGO_PASSWORD"),
            timeout: Duration::from_secs(parse_var(
                "ARANGO_TIMEOUT_SECS",
                lookup("ARANGO_TIMEOUT_SECS"),
                DEFAULT_TIMEOUT_SECS,
            )?),
            batch_size: parse_var(
                "ARANGO_BATCH_SIZE",
                lookup("ARANGO_BATCH_SIZE"),
                defaults.batch_size,
            )?,
            default_page_size: parse_var(
                "PAGINATION_DEFAULT",
                lookup("PAGINATION_DEFAULT"),
                defaults.default_page_size,
            )?,
            max_page_size: parse_var(
                "PAGINATION_LIMIT",
                lookup("PAGINATION_LIMIT"),
                defaults.max_page_size,
            )?,
            coerce_dates: parse_flag("ARANGO_COERCE_DATES", lookup("ARANGO_COERCE_DATES"))?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(DbError::ConfigError(format!(
                "ARANGO_PROTOCOL must be http or https, got '{}'",
                self.protocol
            )));
        }
        if self.max_page_size == 0 || self.default_page_size == 0 {
            return Err(DbError::ConfigError(
                "page sizes must be at least 1".to_string(),
            ));
        }
        if self.default_page_size > self.max_page_size {
            return Err(DbError::ConfigError(format!(
                "PAGINATION_DEFAULT ({}) exceeds PAGINATION_LIMIT ({})",
                self.default_page_size, self.max_page_size
            )));
        }
        if self.batch_size == 0 {
            return Err(DbError::ConfigError(
                "ARANGO_BATCH_SIZE must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Server root, e.g. `http://localhost:8529/`
    pub fn base_url(&self) -> DbResult<Url> {
        let raw = format!("{}://{}:{}/", self.protocol, self.host, self.port);
        Url::parse(&raw).map_err(|e| DbError::ConfigError(format!("invalid server url '{}': {}", raw, e)))
    }
}
