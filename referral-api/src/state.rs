//! Application State
//!
//! Shared state for the referral API service.

use chrono::{DateTime, Utc};
use referral_core::{ReferralService, StorageBackend};
use std::sync::Arc;

use crate::auth::AuthConfig;

/// Ledger service over the configured backend
pub type LedgerService = ReferralService<StorageBackend>;

/// Application configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Service name
    pub service_name: String,
    /// Service version
    pub version: String,
    /// Listen address
    pub listen_addr: String,
    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            service_name: "referral-api".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            listen_addr: "0.0.0.0:3000".to_string(),
            enable_cors: true,
        }
    }
}

impl ApiConfig {
    /// Load from environment variables
    ///
    /// - REFERRAL_API_LISTEN_ADDR: listen address (default 0.0.0.0:3000)
    /// - REFERRAL_API_CORS: enable permissive CORS (default true)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            listen_addr: std::env::var("REFERRAL_API_LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            enable_cors: std::env::var("REFERRAL_API_CORS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(defaults.enable_cors),
            ..Self::default()
        }
    }
}

/// Application state shared across handlers
pub struct AppState {
    /// Configuration
    pub config: ApiConfig,
    /// Authentication configuration
    pub auth_config: AuthConfig,
    /// Referral ledger
    pub service: Arc<LedgerService>,
    /// Service start time
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Create state with default API configuration
    pub fn new(service: Arc<LedgerService>, auth_config: AuthConfig) -> Self {
        Self::with_config(ApiConfig::default(), auth_config, service)
    }

    /// Create state with explicit configuration
    pub fn with_config(config: ApiConfig, auth_config: AuthConfig, service: Arc<LedgerService>) -> Self {
        Self {
            config,
            auth_config,
            service,
            started_at: Utc::now(),
        }
    }

    /// Seconds since startup
    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
