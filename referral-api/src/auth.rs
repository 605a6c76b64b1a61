//! Authentication
//!
//! Two independent guards:
//!
//! ## User JWT (HS256)
//! ```text
//! Authorization: Bearer <token>
//! ```
//! The `sub` claim is the platform user ID.
//!
//! ## Internal key
//! ```text
//! x-internal-key: <key>
//! ```
//! Gates the completion trigger. The key is compared in constant time and a
//! missing key or missing configuration rejects the request.
//!
//! # Configuration
//! - `JWT_SECRET`: HS256 secret for user tokens
//! - `INTERNAL_API_KEY`: shared secret for the completion trigger

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use referral_core::UserId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::error::ErrorResponse;
use crate::state::AppState;

/// Header carrying the internal key
pub const INTERNAL_KEY_HEADER: &str = "x-internal-key";

/// Authentication configuration
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// HS256 secret for user tokens
    pub jwt_secret: Option<String>,
    /// Shared secret for internal callers
    pub internal_api_key: Option<String>,
}

impl AuthConfig {
    /// Minimum secret length
    const MIN_SECRET_LENGTH: usize = 32;

    /// Create from environment variables
    pub fn from_env() -> Self {
        Self {
            jwt_secret: non_empty_env("JWT_SECRET"),
            internal_api_key: non_empty_env("INTERNAL_API_KEY"),
        }
    }

    pub fn new(jwt_secret: impl Into<String>, internal_api_key: impl Into<String>) -> Self {
        Self {
            jwt_secret: Some(jwt_secret.into()),
            internal_api_key: Some(internal_api_key.into()),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        match &self.jwt_secret {
            Some(secret) if secret.len() < Self::MIN_SECRET_LENGTH => Err(format!(
                "JWT secret must be at least {} bytes",
                Self::MIN_SECRET_LENGTH
            )),
            _ => Ok(()),
        }
    }

    /// Sign a token for `user_id` valid for `ttl`
    pub fn issue_token(&self, user_id: &UserId, ttl: Duration) -> Result<String, AuthError> {
        let secret = self.jwt_secret.as_deref().ok_or(AuthError::NotConfigured)?;
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| AuthError::ValidationFailed("Token lifetime out of range".to_string()))?;
        let claims = AuthClaims {
            sub: user_id.to_string(),
            exp: expires_at.timestamp() as u64,
            iat: now.timestamp() as u64,
            roles: Vec::new(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| AuthError::ValidationFailed(e.to_string()))
    }

    /// Decode and validate a user token
    pub fn validate_token(&self, token: &str) -> Result<AuthClaims, AuthError> {
        let secret = self.jwt_secret.as_deref().ok_or(AuthError::NotConfigured)?;
        let validation = Validation::new(Algorithm::HS256);
        let key = DecodingKey::from_secret(secret.as_bytes());

        decode::<AuthClaims>(token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                if e.kind() == &jsonwebtoken::errors::ErrorKind::ExpiredSignature {
                    AuthError::TokenExpired
                } else {
                    AuthError::ValidationFailed(e.to_string())
                }
            })
    }

    /// Check the internal key header
    pub fn verify_internal_key(&self, headers: &HeaderMap) -> Result<(), AuthError> {
        let expected = self
            .internal_api_key
            .as_deref()
            .ok_or(AuthError::NotConfigured)?;
        let provided = headers
            .get(INTERNAL_KEY_HEADER)
            .and_then(|h| h.to_str().ok())
            .ok_or(AuthError::MissingInternalKey)?;

        if bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
            Ok(())
        } else {
            Err(AuthError::InvalidInternalKey)
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl AuthClaims {
    pub fn user_id(&self) -> UserId {
        UserId::new(&self.sub)
    }
}

/// Authentication error
#[derive(Debug)]
pub enum AuthError {
    /// Missing authorization header
    MissingToken,
    /// Invalid token format
    InvalidTokenFormat,
    /// Token validation failed
    ValidationFailed(String),
    /// Token expired
    TokenExpired,
    /// Missing internal key header
    MissingInternalKey,
    /// Internal key mismatch
    InvalidInternalKey,
    /// Secret not configured on this server
    NotConfigured,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (code, message) = match self {
            AuthError::MissingToken => ("MISSING_TOKEN", "Authorization header is required".to_string()),
            AuthError::InvalidTokenFormat => (
                "INVALID_TOKEN_FORMAT",
                "Invalid authorization header format. Expected: Bearer <token>".to_string(),
            ),
            AuthError::ValidationFailed(msg) => ("TOKEN_VALIDATION_FAILED", msg),
            AuthError::TokenExpired => ("TOKEN_EXPIRED", "Token has expired".to_string()),
            AuthError::MissingInternalKey | AuthError::InvalidInternalKey => {
                ("UNAUTHORIZED", "Invalid internal key".to_string())
            }
            AuthError::NotConfigured => ("UNAUTHORIZED", "Authentication is not configured".to_string()),
        };

        let body = ErrorResponse {
            code: code.to_string(),
            message,
        };
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

/// Extract the token from an `Authorization` header value
pub fn extract_token(auth_header: &str) -> Result<&str, AuthError> {
    auth_header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidTokenFormat)
}

/// Require a valid user token; claims are stored in request extensions
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingToken)?;

    let token = extract_token(auth_header)?;
    let claims = state.auth_config.validate_token(token)?;
    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

/// Attach claims when a token is present.
///
/// A request without an `Authorization` header passes through anonymously;
/// a header that fails validation is rejected like under [`require_auth`].
pub async fn optional_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let Some(value) = request.headers().get(AUTHORIZATION) else {
        return Ok(next.run(request).await);
    };

    let auth_header = value.to_str().map_err(|_| AuthError::InvalidTokenFormat)?;
    let token = extract_token(auth_header)?;
    let claims = state.auth_config.validate_token(token)?;
    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

/// Require the internal key before the handler runs
pub async fn require_internal_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    if let Err(e) = state.auth_config.verify_internal_key(request.headers()) {
        warn!(path = %request.uri().path(), "Internal key rejected");
        return Err(e);
    }
    Ok(next.run(request).await)
}
