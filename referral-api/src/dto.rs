//! Request and response bodies

use chrono::{DateTime, Utc};
use referral_core::{CodeOptions, Referral, ReferralCode, ReferralStatus};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};

/// Health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub uptime_secs: i64,
}

/// POST /referrals/codes
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCodeRequest {
    #[serde(default)]
    pub usage_limit: u32,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub campaign: Option<String>,
}

impl CreateCodeRequest {
    pub fn into_options(self) -> ApiResult<CodeOptions> {
        if let Some(expires_at) = self.expires_at {
            if expires_at <= Utc::now() {
                return Err(ApiError::validation("expiresAt must be in the future"));
            }
        }
        Ok(CodeOptions {
            usage_limit: self.usage_limit,
            expires_at: self.expires_at,
            campaign: self.campaign,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCodeResponse {
    pub code: String,
    pub code_id: String,
    pub usage_limit: u32,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<ReferralCode> for CreateCodeResponse {
    fn from(code: ReferralCode) -> Self {
        Self {
            code: code.code,
            code_id: code.id.0,
            usage_limit: code.usage_limit,
            expires_at: code.expires_at,
        }
    }
}

/// POST /referrals/redeem
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemCodeRequest {
    pub code: String,
    #[serde(default)]
    pub invitee_email: Option<String>,
    #[serde(default)]
    pub device_fingerprint: Option<String>,
}

impl RedeemCodeRequest {
    /// Reject codes that cannot exist before touching the ledger
    pub fn validate(&self, code_length: usize) -> ApiResult<()> {
        let well_formed = self.code.len() == code_length
            && self.code.bytes().all(|b| b.is_ascii_alphanumeric());
        if !well_formed {
            return Err(ApiError::validation(format!(
                "code must be {} alphanumeric characters",
                code_length
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemCodeResponse {
    pub referral_id: String,
    pub status: ReferralStatus,
}

impl From<Referral> for RedeemCodeResponse {
    fn from(referral: Referral) -> Self {
        Self {
            referral_id: referral.id.0,
            status: referral.status,
        }
    }
}

/// POST /referrals/complete
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteReferralRequest {
    #[serde(alias = "userId")]
    pub invitee_id: String,
    #[serde(default = "default_event_type")]
    pub event_type: String,
}

fn default_event_type() -> String {
    "email_verified".to_string()
}
