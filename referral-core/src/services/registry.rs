//! Referral code registry
//!
//! Creates codes with collision retry and exposes the conditional usage
//! decrement that redemption races on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ReferralConfig;
use crate::error::{ReferralError, ReferralResult, StoreError};
use crate::storage::ReferralStorage;
use crate::token::TokenGenerator;
use crate::types::{CodeId, ReferralCode, UserId};

/// Options for a new code
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeOptions {
    /// Maximum redemptions, 0 = unlimited
    #[serde(default)]
    pub usage_limit: u32,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub campaign: Option<String>,
}

/// Referral code registry
pub struct CodeRegistry<S: ReferralStorage> {
    storage: Arc<S>,
    generator: Arc<TokenGenerator>,
    code_length: usize,
    max_attempts: u32,
}

impl<S: ReferralStorage> CodeRegistry<S> {
    pub fn new(storage: Arc<S>, generator: Arc<TokenGenerator>, config: &ReferralConfig) -> Self {
        Self {
            storage,
            generator,
            code_length: config.code_length,
            max_attempts: config.max_code_attempts,
        }
    }

    /// Create a code for `inviter_id`, retrying with a fresh token on collision
    pub async fn create_code(
        &self,
        inviter_id: &UserId,
        options: CodeOptions,
    ) -> ReferralResult<ReferralCode> {
        for attempt in 1..=self.max_attempts {
            let code = ReferralCode::new(
                self.generator.generate(self.code_length),
                inviter_id.clone(),
                options.usage_limit,
                options.expires_at,
                options.campaign.clone(),
            );

            match self.storage.insert_code(&code).await {
                Ok(()) => {
                    info!(
                        inviter_id = %inviter_id,
                        code_id = %code.id,
                        usage_limit = code.usage_limit,
                        "Referral code created"
                    );
                    return Ok(code);
                }
                Err(StoreError::Duplicate { .. }) => {
                    debug!(attempt, "Referral code collision, generating a new token");
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(
            inviter_id = %inviter_id,
            attempts = self.max_attempts,
            "Referral code generation exhausted"
        );
        Err(ReferralError::CodeGenerationExhausted {
            attempts: self.max_attempts,
        })
    }

    /// Look up a code by value
    pub async fn get_code(&self, code: &str) -> ReferralResult<Option<ReferralCode>> {
        Ok(self.storage.find_code_by_value(code).await?)
    }

    /// Consume one use; `None` means the limit is reached or the code is inactive
    pub async fn decrement_usage(&self, code_id: &CodeId) -> ReferralResult<Option<ReferralCode>> {
        Ok(self.storage.decrement_remaining_uses(code_id).await?)
    }

    /// Return a use consumed by a redemption that did not complete
    pub async fn restore_usage(&self, code_id: &CodeId) -> ReferralResult<Option<ReferralCode>> {
        Ok(self.storage.restore_remaining_use(code_id).await?)
    }

    /// Deactivate a code; only its inviter may do so
    pub async fn deactivate_code(
        &self,
        inviter_id: &UserId,
        code: &str,
    ) -> ReferralResult<ReferralCode> {
        let existing = self
            .storage
            .find_code_by_value(code)
            .await?
            .ok_or_else(|| ReferralError::InvalidCode(code.to_string()))?;

        if existing.inviter_id != *inviter_id {
            warn!(code_id = %existing.id, caller = %inviter_id, "Deactivation by non-owner rejected");
            return Err(ReferralError::NotCodeOwner(code.to_string()));
        }

        let updated = self
            .storage
            .set_code_active(&existing.id, false)
            .await?
            .ok_or_else(|| ReferralError::InvalidCode(code.to_string()))?;

        info!(code_id = %updated.id, "Referral code deactivated");
        Ok(updated)
    }
}
