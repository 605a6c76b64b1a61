//! HTTP handlers

use axum::{
    extract::{Path, State},
    http::{header::USER_AGENT, HeaderMap, StatusCode},
    Extension, Json,
};
use referral_core::{
    CompletionOutcome, InviterValidation, RedeemRequest, Referral, ReferralError, ReferralId,
    ReferralSource, SkipReason, UserId, UserReferrals,
};
use std::sync::Arc;

use crate::auth::AuthClaims;
use crate::dto::*;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: state.config.service_name.clone(),
        version: state.config.version.clone(),
        uptime_secs: state.uptime_secs(),
    })
}

/// POST /referrals/codes
pub async fn create_code(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthClaims>,
    Json(request): Json<CreateCodeRequest>,
) -> ApiResult<(StatusCode, Json<CreateCodeResponse>)> {
    let options = request.into_options()?;
    let code = state.service.create_code(&claims.user_id(), options).await?;
    Ok((StatusCode::CREATED, Json(code.into())))
}

/// GET /referrals/me
pub async fn get_my_referrals(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthClaims>,
) -> ApiResult<Json<UserReferrals>> {
    let referrals = state.service.get_referrals_for_user(&claims.user_id()).await?;
    Ok(Json(referrals))
}

/// POST /referrals/redeem
///
/// Anonymous callers are allowed; the referral is linked later via claim.
pub async fn redeem_code(
    State(state): State<Arc<AppState>>,
    claims: Option<Extension<AuthClaims>>,
    headers: HeaderMap,
    Json(request): Json<RedeemCodeRequest>,
) -> ApiResult<(StatusCode, Json<RedeemCodeResponse>)> {
    request.validate(state.service.config().code_length)?;

    let source = ReferralSource {
        ip: client_ip(&headers),
        user_agent: header_string(&headers, USER_AGENT.as_str()),
        device_fingerprint: request.device_fingerprint,
    };
    let redeem = RedeemRequest {
        user_id: claims.map(|Extension(c)| c.user_id()),
        code: request.code,
        invitee_email: request.invitee_email,
        source,
    };

    let referral = state.service.redeem_code(redeem).await?;
    Ok((StatusCode::CREATED, Json(referral.into())))
}

/// POST /referrals/:referral_id/claim
pub async fn claim_referral(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthClaims>,
    Path(referral_id): Path<String>,
) -> ApiResult<Json<Referral>> {
    let referral = state
        .service
        .claim_referral(&ReferralId::new(referral_id), &claims.user_id())
        .await?;
    Ok(Json(referral))
}

/// POST /referrals/codes/:code/deactivate
pub async fn deactivate_code(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthClaims>,
    Path(code): Path<String>,
) -> ApiResult<Json<CreateCodeResponse>> {
    let code = state
        .service
        .deactivate_code(&claims.user_id(), &code)
        .await?;
    Ok(Json(code.into()))
}

/// GET /referrals/validate/:code
pub async fn validate_code(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> ApiResult<Json<InviterValidation>> {
    Ok(Json(state.service.validate_and_get_inviter(&code).await?))
}

/// POST /referrals/complete (internal key)
///
/// A completion that lost the race to a concurrent one is reported as an
/// `already_applied` no-op.
pub async fn complete_referral(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CompleteReferralRequest>,
) -> ApiResult<Json<CompletionOutcome>> {
    if request.invitee_id.trim().is_empty() {
        return Err(ApiError::validation("inviteeId is required"));
    }

    let invitee_id = UserId::new(request.invitee_id);
    match state
        .service
        .complete_referral_for_invitee(&invitee_id, &request.event_type)
        .await
    {
        Ok(outcome) => Ok(Json(outcome)),
        Err(ReferralError::AlreadyApplied(_)) => {
            Ok(Json(CompletionOutcome::skipped(SkipReason::AlreadyApplied)))
        }
        Err(e) => Err(e.into()),
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// First hop of `x-forwarded-for`, falling back to `x-real-ip`
fn client_ip(headers: &HeaderMap) -> Option<String> {
    header_string(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string()))
        .or_else(|| header_string(headers, "x-real-ip"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_ip() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), None);

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(client_ip(&headers).as_deref(), Some("10.0.0.2"));

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers).as_deref(), Some("203.0.113.7"));
    }
}
