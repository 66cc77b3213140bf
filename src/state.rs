//! Shared application state for the demo server's handlers.

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;

/// Shared application state, cloned for each request handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Timestamp when the application started
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }

    /// Number of configured proxy rules.
    pub fn rule_count(&self) -> usize {
        self.config.rules.proxy.len()
    }

    /// Seconds since the application started.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
