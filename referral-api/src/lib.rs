//! Referral API - HTTP interface for the referral reward ledger
//!
//! # Endpoints
//!
//! All ledger endpoints are nested under `/api/v1`:
//!
//! | Method | Path                                  | Auth          |
//! |--------|---------------------------------------|---------------|
//! | POST   | /referrals/codes                      | JWT           |
//! | GET    | /referrals/me                         | JWT           |
//! | POST   | /referrals/redeem                     | optional JWT  |
//! | POST   | /referrals/:referral_id/claim         | JWT           |
//! | POST   | /referrals/codes/:code/deactivate     | JWT           |
//! | GET    | /referrals/validate/:code             | none          |
//! | POST   | /referrals/complete                   | internal key  |
//!
//! plus `GET /health`.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use referral_api::{run_server, ApiConfig, AppState, AuthConfig};
//! use referral_core::{MemoryUserDirectory, ReferralConfig, ReferralService, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let service = ReferralService::new(
//!         Arc::new(StorageBackend::memory()),
//!         Arc::new(MemoryUserDirectory::new()),
//!         ReferralConfig::from_env(),
//!     );
//!     let state = AppState::with_config(ApiConfig::from_env(), AuthConfig::from_env(), Arc::new(service));
//!     run_server(state).await.unwrap();
//! }
//! ```

pub mod auth;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod state;

pub use auth::{AuthClaims, AuthConfig, AuthError, INTERNAL_KEY_HEADER};
pub use dto::*;
pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::{build_app, create_router, create_v1_router};
pub use server::run_server;
pub use state::{ApiConfig, AppState, LedgerService};

/// Referral API version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
