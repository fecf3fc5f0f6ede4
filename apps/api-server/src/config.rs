//! Centralized configuration for api-server.
//!
//! All environment variables are loaded and validated at startup to fail fast
//! on misconfiguration rather than at request time.

use axum::http::HeaderValue;
use std::env;
use std::fmt;
use std::path::PathBuf;

/// Storage backend provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageProvider {
    /// In-memory storage. Starts empty and the HTTP surface is read-only,
    /// so this only serves smoke tests.
    Memory,
    /// SQLite file-based storage
    Sqlite,
}

impl StorageProvider {
    fn from_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("sqlite") {
            Self::Sqlite
        } else {
            Self::Memory
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn from_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Configuration error for {}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Server configuration loaded from environment variables.
///
/// All fields are validated at construction time.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port (default: 3001)
    pub port: u16,
    /// CORS allow origin
    pub cors_allow_origin: HeaderValue,
    /// Storage provider
    pub storage_provider: StorageProvider,
    /// SQLite database path (when using sqlite storage)
    pub db_path: Option<PathBuf>,
    /// Log format
    pub log_format: LogFormat,
    /// Page size used when a listing request carries none (default: 20)
    pub default_page_size: u32,
    /// Largest page size a listing request may ask for (default: 100)
    pub max_page_size: u32,
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// Fails fast on invalid configuration.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Port
        let port = get("PORT").and_then(|s| s.parse().ok()).unwrap_or(3001);

        // CORS allow origin
        let cors_origin_str = get("CORS_ALLOW_ORIGIN").unwrap_or_else(|| "*".into());
        let cors_allow_origin = if cors_origin_str == "*" {
            HeaderValue::from_static("*")
        } else {
            HeaderValue::from_str(&cors_origin_str).map_err(|e| ConfigError {
                field: "CORS_ALLOW_ORIGIN",
                message: format!("Invalid header value '{}': {}", cors_origin_str, e),
            })?
        };

        // Storage provider
        let storage_provider = StorageProvider::from_str(
            &get("STORAGE_PROVIDER").unwrap_or_else(|| "sqlite".into()),
        );

        // DB path (for sqlite)
        let db_path = get("DB_PATH").map(PathBuf::from);

        // Log format
        let log_format = LogFormat::from_str(&get("LOG_FORMAT").unwrap_or_else(|| "pretty".into()));

        // Page sizes
        let default_page_size = parse_page_size(get("DEFAULT_PAGE_SIZE"), "DEFAULT_PAGE_SIZE", 20)?;
        let max_page_size = parse_page_size(get("MAX_PAGE_SIZE"), "MAX_PAGE_SIZE", 100)?;
        if default_page_size > max_page_size {
            return Err(ConfigError {
                field: "DEFAULT_PAGE_SIZE",
                message: format!(
                    "{} exceeds MAX_PAGE_SIZE ({})",
                    default_page_size, max_page_size
                ),
            });
        }

        Ok(Self {
            port,
            cors_allow_origin,
            storage_provider,
            db_path,
            log_format,
            default_page_size,
            max_page_size,
        })
    }

    /// Log warnings about configuration that loses data.
    pub fn warn_if_ephemeral(&self) {
        if self.storage_provider == StorageProvider::Memory {
            tracing::warn!(
                "STORAGE_PROVIDER=memory: the in-memory store starts empty and cannot be \
                 filled over HTTP; every listing will be empty."
            );
        }
    }
}

fn parse_page_size(
    raw: Option<String>,
    field: &'static str,
    default: u32,
) -> Result<u32, ConfigError> {
    match raw {
        None => Ok(default),
        Some(s) => match s.parse::<u32>() {
            Ok(n) if n >= 1 => Ok(n),
            _ => Err(ConfigError {
                field,
                message: format!("must be a positive integer, got '{}'", s),
            }),
        },
    }
}
