use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::filter::FilterLimits;

/// Minimum HMAC key length accepted outside development.
const MIN_SECRET_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing configuration: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("JWT secret must be at least {0} bytes outside development")]
    WeakSecret(usize),

    #[error("Unsupported JWT algorithm {0}; only HMAC algorithms are accepted")]
    UnsupportedAlgorithm(String),

    #[error("default page size {default} must be between 1 and the maximum {max}")]
    PageSize { default: u32, max: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub filter: FilterConfig,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub max_leaves: usize,
    pub max_depth: usize,
    pub max_list_values: usize,
    pub default_limit: u32,
    pub max_page_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres URL. Without one the server runs on the in-memory store.
    pub url: Option<String>,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    pub query_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(skip_serializing)]
    pub jwt_secret: String,
    pub jwt_algorithm: String,
    pub clock_skew_secs: u64,
    pub token_ttl_secs: u64,
    pub enable_cors: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = match lookup("APP_ENV").as_deref() {
            Some("production") | Some("prod") => Environment::Production,
            Some("staging") | Some("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        let config = match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_overrides(&lookup)?;

        config.validate()?;
        Ok(config)
    }

    fn with_overrides<F>(mut self, lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server
        if let Some(v) = lookup("PORT") {
            self.server.port = parse("PORT", &v)?;
        }

        // Filter overrides
        if let Some(v) = lookup("FILTER_MAX_LEAVES") {
            self.filter.max_leaves = parse("FILTER_MAX_LEAVES", &v)?;
        }
        if let Some(v) = lookup("FILTER_MAX_DEPTH") {
            self.filter.max_depth = parse("FILTER_MAX_DEPTH", &v)?;
        }
        if let Some(v) = lookup("FILTER_MAX_LIST_VALUES") {
            self.filter.max_list_values = parse("FILTER_MAX_LIST_VALUES", &v)?;
        }
        if let Some(v) = lookup("FILTER_DEFAULT_LIMIT") {
            self.filter.default_limit = parse("FILTER_DEFAULT_LIMIT", &v)?;
        }
        if let Some(v) = lookup("FILTER_MAX_PAGE_SIZE") {
            self.filter.max_page_size = parse("FILTER_MAX_PAGE_SIZE", &v)?;
        }

        // Database overrides
        if let Some(v) = lookup("DATABASE_URL") {
            self.database.url = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Some(v) = lookup("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse("DATABASE_MAX_CONNECTIONS", &v)?;
        }
        if let Some(v) = lookup("DATABASE_CONNECT_TIMEOUT") {
            self.database.connect_timeout_secs = parse("DATABASE_CONNECT_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("DATABASE_QUERY_TIMEOUT_MS") {
            self.database.query_timeout_ms = parse("DATABASE_QUERY_TIMEOUT_MS", &v)?;
        }

        // Security overrides
        if let Some(v) = lookup("SECURITY_JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Some(v) = lookup("SECURITY_JWT_ALGORITHM") {
            self.security.jwt_algorithm = v.trim().to_ascii_uppercase();
        }
        if let Some(v) = lookup("SECURITY_CLOCK_SKEW_SECS") {
            self.security.clock_skew_secs = parse("SECURITY_CLOCK_SKEW_SECS", &v)?;
        }
        if let Some(v) = lookup("SECURITY_TOKEN_TTL_SECS") {
            self.security.token_ttl_secs = parse("SECURITY_TOKEN_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("SECURITY_ENABLE_CORS") {
            self.security.enable_cors = parse("SECURITY_ENABLE_CORS", &v)?;
        }

        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.security.jwt_secret.is_empty() {
            return Err(ConfigError::Missing("SECURITY_JWT_SECRET"));
        }
        if self.environment != Environment::Development
            && self.security.jwt_secret.len() < MIN_SECRET_BYTES
        {
            return Err(ConfigError::WeakSecret(MIN_SECRET_BYTES));
        }
        self.jwt_algorithm()?;

        let filter = &self.filter;
        if filter.max_page_size == 0
            || filter.default_limit == 0
            || filter.default_limit > filter.max_page_size
        {
            return Err(ConfigError::PageSize {
                default: filter.default_limit,
                max: filter.max_page_size,
            });
        }
        Ok(())
    }

    /// Parsed signing algorithm, restricted to the HMAC family.
    pub fn jwt_algorithm(&self) -> Result<Algorithm, ConfigError> {
        let name = &self.security.jwt_algorithm;
        let algorithm = Algorithm::from_str(name)
            .map_err(|_| ConfigError::UnsupportedAlgorithm(name.clone()))?;
        match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(algorithm),
            _ => Err(ConfigError::UnsupportedAlgorithm(name.clone())),
        }
    }

    pub fn filter_limits(&self) -> FilterLimits {
        FilterLimits {
            max_leaves: self.filter.max_leaves,
            max_depth: self.filter.max_depth,
            max_list_values: self.filter.max_list_values,
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.database.query_timeout_ms)
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            server: ServerConfig { port: 3000 },
            filter: FilterConfig {
                max_leaves: 64,
                max_depth: 8,
                max_list_values: 256,
                default_limit: 20,
                max_page_size: 100,
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
                connect_timeout_secs: 30,
                query_timeout_ms: 10_000,
            },
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_algorithm: "HS256".to_string(),
                clock_skew_secs: 0,
                token_ttl_secs: 60 * 60 * 24 * 30, // 30 days
                enable_cors: true,
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            server: ServerConfig { port: 3000 },
            filter: FilterConfig {
                max_leaves: 32,
                max_depth: 5,
                max_list_values: 100,
                default_limit: 20,
                max_page_size: 100,
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 20,
                connect_timeout_secs: 10,
                query_timeout_ms: 5_000,
            },
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_algorithm: "HS256".to_string(),
                clock_skew_secs: 0,
                token_ttl_secs: 60 * 60 * 24,
                enable_cors: true,
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            server: ServerConfig { port: 3000 },
            filter: FilterConfig {
                max_leaves: 16,
                max_depth: 3,
                max_list_values: 50,
                default_limit: 20,
                max_page_size: 100,
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 50,
                connect_timeout_secs: 5,
                query_timeout_ms: 2_000,
            },
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_algorithm: "HS256".to_string(),
                clock_skew_secs: 0,
                token_ttl_secs: 60 * 60,
                enable_cors: false,
            },
        }
    }
}

fn parse<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}
