//! Application configuration loaded from environment variables.
//!
//! All configuration is loaded from environment variables with sensible
//! defaults for development. A `.env` file in the working directory is honoured.
//!
//! # Proxy Rules
//!
//! - `REAL_IP_RULES`: inline JSON rule document (`{"proxy": [...]}`)
//! - `REAL_IP_RULES_FILE`: path to a JSON rule document
//!
//! At most one of the two may be set. With neither, the middleware has no
//! rules and passes every request through untouched.
//!
//! # Selection
//!
//! - `REAL_IP_MIDDLEWARE_NAME`: name reported in log events (default: `real-ip`)
//! - `REAL_IP_IGNORED_RANGES`: comma-separated CIDRs never selected as the real IP
//!
//! # Server & Observability
//!
//! - `HOST` / `PORT`: demo server bind address (default: `0.0.0.0:3000`)
//! - `RUST_LOG`: tracing filter (default: `info`)
//! - `LOG_FORMAT`: `pretty` (default) or `json`
//! - `METRICS_PORT`: Prometheus endpoint port (default: 9090, 0 = disabled)

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{AppError, AppResult};
use crate::middleware::rule::RealIpConfig;
use crate::middleware::real_ip::DEFAULT_NAME;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other:?}, expected pretty or json")),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    // =========================================================================
    // Real IP Configuration
    // =========================================================================
    /// Ordered proxy rules in their wire form.
    pub rules: RealIpConfig,

    /// Name used for this middleware instance in log events.
    pub middleware_name: String,

    /// CIDR ranges excluded from real-IP selection (empty = accept any address).
    pub ignored_ranges: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log filter (e.g., "info", "real_ip_gateway=debug")
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` for unparseable values or conflicting
    /// rule sources, and rule parse/validation errors for a bad rule document.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,

            rules: load_rules(
                env::var("REAL_IP_RULES").ok().filter(|s| !s.trim().is_empty()),
                env::var_os("REAL_IP_RULES_FILE").map(PathBuf::from),
            )?,
            middleware_name: env::var("REAL_IP_MIDDLEWARE_NAME")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_NAME.to_string()),
            ignored_ranges: parse_list(&env::var("REAL_IP_IGNORED_RANGES").unwrap_or_default()),

            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format: Self::parse_env("LOG_FORMAT", LogFormat::Pretty)?,
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate that every rule compiles.
    fn validate(&self) -> AppResult<()> {
        self.rules.compile().map(|_| ())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address, `None` when disabled.
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_enabled()
            .then(|| SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }
}

/// Load the rule document from an inline JSON string or a file.
///
/// # Errors
///
/// Both sources set is a configuration error; unreadable files and malformed
/// JSON are reported as such.
pub fn load_rules(inline: Option<String>, file: Option<PathBuf>) -> AppResult<RealIpConfig> {
    match (inline, file) {
        (Some(_), Some(_)) => Err(AppError::ConfigError(
            "REAL_IP_RULES and REAL_IP_RULES_FILE are mutually exclusive".to_string(),
        )),
        (Some(json), None) => RealIpConfig::from_json(&json),
        (None, Some(path)) => load_rules_file(&path),
        (None, None) => Ok(RealIpConfig::default()),
    }
}

fn load_rules_file(path: &Path) -> AppResult<RealIpConfig> {
    let content = fs::read_to_string(path)?;
    RealIpConfig::from_json(&content)
}

/// Split a comma-separated list, dropping empty entries.
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Default configuration for testing and development.
impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            rules: RealIpConfig::default(),
            middleware_name: DEFAULT_NAME.to_string(),
            ignored_ranges: vec![],
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_port: 9090,
        }
    }
}
