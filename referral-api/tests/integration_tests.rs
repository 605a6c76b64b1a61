//! Integration tests for referral API endpoints
//!
//! These tests drive the full router, including the auth layers, over an
//! in-memory ledger.

use axum::http::{header::AUTHORIZATION, HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use chrono::Duration;
use referral_api::{build_app, AppState, AuthConfig, INTERNAL_KEY_HEADER};
use referral_core::{
    MemoryUserDirectory, ReferralConfig, ReferralService, StorageBackend, UserDirectory, UserId,
    UserProfile,
};
use serde_json::{json, Value};
use std::sync::Arc;

const JWT_SECRET: &str = "integration-secret-0123456789abcdef";
const INTERNAL_KEY: &str = "internal-test-key";

struct TestApp {
    server: TestServer,
    auth: AuthConfig,
    directory: Arc<MemoryUserDirectory>,
}

impl TestApp {
    fn bearer(&self, user: &str) -> HeaderValue {
        let token = self
            .auth
            .issue_token(&UserId::new(user), Duration::hours(1))
            .unwrap();
        HeaderValue::from_str(&format!("Bearer {}", token)).unwrap()
    }

    async fn create_code(&self, inviter: &str, body: Value) -> Value {
        let response = self
            .server
            .post("/api/v1/referrals/codes")
            .add_header(AUTHORIZATION, self.bearer(inviter))
            .json(&body)
            .await;
        response.assert_status(StatusCode::CREATED);
        response.json::<Value>()
    }

    async fn redeem(&self, user: Option<&str>, code: &str) -> axum_test::TestResponse {
        let mut request = self
            .server
            .post("/api/v1/referrals/redeem")
            .json(&json!({ "code": code }));
        if let Some(user) = user {
            request = request.add_header(AUTHORIZATION, self.bearer(user));
        }
        request.await
    }

    async fn complete(&self, invitee: &str) -> axum_test::TestResponse {
        self.server
            .post("/api/v1/referrals/complete")
            .add_header(
                HeaderName::from_static(INTERNAL_KEY_HEADER),
                HeaderValue::from_static(INTERNAL_KEY),
            )
            .json(&json!({ "inviteeId": invitee }))
            .await
    }
}

fn create_test_app() -> TestApp {
    let directory = Arc::new(MemoryUserDirectory::new());
    let service = ReferralService::new(
        Arc::new(StorageBackend::memory()),
        directory.clone(),
        ReferralConfig::default(),
    );
    let auth = AuthConfig::new(JWT_SECRET, INTERNAL_KEY);
    let state = AppState::new(Arc::new(service), auth.clone());

    TestApp {
        server: TestServer::new(build_app(state)).unwrap(),
        auth,
        directory,
    }
}

// ============ Health Endpoint Tests ============

#[tokio::test]
async fn test_health_check() {
    let app = create_test_app();

    let response = app.server.get("/health").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "referral-api");
}

// ============ Code Endpoint Tests ============

#[tokio::test]
async fn test_create_code_requires_token() {
    let app = create_test_app();

    let response = app
        .server
        .post("/api/v1/referrals/codes")
        .json(&json!({}))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["code"], "MISSING_TOKEN");
}

#[tokio::test]
async fn test_create_code() {
    let app = create_test_app();

    let body = app.create_code("alice", json!({ "usageLimit": 3 })).await;

    let code = body["code"].as_str().unwrap();
    assert_eq!(code.len(), 8);
    assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
    assert_eq!(body["usageLimit"], 3);
}

#[tokio::test]
async fn test_create_code_rejects_past_expiry() {
    let app = create_test_app();

    let response = app
        .server
        .post("/api/v1/referrals/codes")
        .add_header(AUTHORIZATION, app.bearer("alice"))
        .json(&json!({ "expiresAt": "2001-01-01T00:00:00Z" }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_deactivate_by_non_owner_is_forbidden() {
    let app = create_test_app();
    let created = app.create_code("alice", json!({})).await;
    let code = created["code"].as_str().unwrap();

    let response = app
        .server
        .post(&format!("/api/v1/referrals/codes/{}/deactivate", code))
        .add_header(AUTHORIZATION, app.bearer("mallory"))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);

    let response = app
        .server
        .post(&format!("/api/v1/referrals/codes/{}/deactivate", code))
        .add_header(AUTHORIZATION, app.bearer("alice"))
        .await;
    response.assert_status_ok();

    let response = app.redeem(Some("bob"), code).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "INACTIVE_CODE");
}

// ============ Redemption Endpoint Tests ============

#[tokio::test]
async fn test_redeem_malformed_code() {
    let app = create_test_app();

    let response = app.redeem(Some("bob"), "short").await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_redeem_unknown_code() {
    let app = create_test_app();

    let response = app.redeem(Some("bob"), "ZZZZZZZZ").await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "INVALID_CODE");
}

#[tokio::test]
async fn test_self_referral_rejected() {
    let app = create_test_app();
    let created = app.create_code("alice", json!({})).await;

    let response = app
        .redeem(Some("alice"), created["code"].as_str().unwrap())
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "SELF_REFERRAL");
}

#[tokio::test]
async fn test_usage_limit_reached() {
    let app = create_test_app();
    let created = app.create_code("alice", json!({ "usageLimit": 1 })).await;
    let code = created["code"].as_str().unwrap();

    app.redeem(Some("bob"), code)
        .await
        .assert_status(StatusCode::CREATED);

    let response = app.redeem(Some("carol"), code).await;
    response.assert_status(StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["code"], "USAGE_LIMIT_REACHED");
}

#[tokio::test]
async fn test_invitee_redeems_only_once() {
    let app = create_test_app();
    let first = app.create_code("alice", json!({})).await;
    let second = app.create_code("dave", json!({})).await;

    app.redeem(Some("bob"), first["code"].as_str().unwrap())
        .await
        .assert_status(StatusCode::CREATED);

    let response = app
        .redeem(Some("bob"), second["code"].as_str().unwrap())
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "ALREADY_REFERRED");
}

#[tokio::test]
async fn test_redeem_with_invalid_token_is_rejected() {
    let app = create_test_app();
    let created = app.create_code("alice", json!({ "usageLimit": 1 })).await;
    let code = created["code"].as_str().unwrap();

    let response = app
        .server
        .post("/api/v1/referrals/redeem")
        .add_header(AUTHORIZATION, HeaderValue::from_static("Bearer not-a-jwt"))
        .json(&json!({ "code": code }))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["code"], "TOKEN_VALIDATION_FAILED");

    let response = app
        .server
        .post("/api/v1/referrals/redeem")
        .add_header(AUTHORIZATION, HeaderValue::from_static("Token abc"))
        .json(&json!({ "code": code }))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);

    // the rejected attempts consumed nothing
    app.redeem(Some("bob"), code)
        .await
        .assert_status(StatusCode::CREATED);
}

#[tokio::test]
async fn test_anonymous_redeem_then_claim() {
    let app = create_test_app();
    let created = app.create_code("alice", json!({})).await;

    let response = app.redeem(None, created["code"].as_str().unwrap()).await;
    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    let referral_id = body["referralId"].as_str().unwrap().to_string();
    assert_eq!(body["status"], "pending");

    let response = app
        .server
        .post(&format!("/api/v1/referrals/{}/claim", referral_id))
        .add_header(AUTHORIZATION, app.bearer("bob"))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["inviteeId"], "bob");

    let response = app
        .server
        .post(&format!("/api/v1/referrals/{}/claim", referral_id))
        .add_header(AUTHORIZATION, app.bearer("carol"))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_claim_unknown_referral() {
    let app = create_test_app();

    let response = app
        .server
        .post("/api/v1/referrals/ref_missing/claim")
        .add_header(AUTHORIZATION, app.bearer("bob"))
        .await;

    response.assert_status_not_found();
}

// ============ Completion Endpoint Tests ============

#[tokio::test]
async fn test_complete_requires_valid_internal_key() {
    let app = create_test_app();

    let response = app
        .server
        .post("/api/v1/referrals/complete")
        .add_header(
            HeaderName::from_static(INTERNAL_KEY_HEADER),
            HeaderValue::from_static("wrong-key"),
        )
        .json(&json!({ "inviteeId": "bob" }))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_complete_applies_rewards_once() {
    let app = create_test_app();
    let created = app.create_code("alice", json!({})).await;
    app.redeem(Some("bob"), created["code"].as_str().unwrap())
        .await
        .assert_status(StatusCode::CREATED);

    let response = app.complete("bob").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["processed"], 1);
    assert_eq!(body["inviterAwarded"], 25);
    assert_eq!(body["inviteeAwarded"], 50);

    let response = app.complete("bob").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["processed"], 0);
    assert_eq!(body["reason"], "already_applied");

    let response = app
        .server
        .get("/api/v1/referrals/me")
        .add_header(AUTHORIZATION, app.bearer("alice"))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    let referrals = body["inviterReferrals"].as_array().unwrap();
    assert_eq!(referrals.len(), 1);
    assert_eq!(referrals[0]["status"], "completed");
    assert_eq!(referrals[0]["rewardApplied"], true);
    let rewards = body["rewards"].as_array().unwrap();
    assert_eq!(rewards.len(), 1);
    assert_eq!(rewards[0]["amount"], 25);
}

#[tokio::test]
async fn test_complete_accepts_user_id_field() {
    let app = create_test_app();
    let created = app.create_code("alice", json!({})).await;
    app.redeem(Some("bob"), created["code"].as_str().unwrap())
        .await
        .assert_status(StatusCode::CREATED);

    let response = app
        .server
        .post("/api/v1/referrals/complete")
        .add_header(
            HeaderName::from_static(INTERNAL_KEY_HEADER),
            HeaderValue::from_static(INTERNAL_KEY),
        )
        .json(&json!({ "userId": "bob", "eventType": "onboarding_done" }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["processed"], 1);
    assert_eq!(body["inviteeAwarded"], 50);
}

#[tokio::test]
async fn test_complete_without_referral() {
    let app = create_test_app();

    let response = app.complete("stranger").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["processed"], 0);
    assert_eq!(body["reason"], "no_pending_referral");
}

#[tokio::test]
async fn test_complete_rejects_empty_invitee() {
    let app = create_test_app();

    let response = app.complete("  ").await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

// ============ Validation Endpoint Tests ============

#[tokio::test]
async fn test_validate_code() {
    let app = create_test_app();
    app.directory
        .upsert(UserProfile::new("alice", "alice_w"))
        .await
        .unwrap();
    let created = app.create_code("alice", json!({})).await;
    let code = created["code"].as_str().unwrap();

    let response = app
        .server
        .get(&format!("/api/v1/referrals/validate/{}", code))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["valid"], true);
    assert_eq!(body["inviter"]["username"], "alice_w");
    assert_eq!(body["bonus"]["inviterPoints"], 25);
    assert_eq!(body["bonus"]["inviteePoints"], 50);

    let response = app.server.get("/api/v1/referrals/validate/ZZZZZZZZ").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["valid"], false);
    assert_eq!(body["error"], "Invalid referral code");
}
