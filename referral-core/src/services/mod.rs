//! Referral services
//!
//! [`ReferralService`] wires the code registry, the referral ledger and the
//! reward engine over one storage backend and exposes the operations used
//! by the HTTP layer and the CLI.

pub mod redemption;
pub mod registry;
pub mod rewards;

pub use redemption::{RedeemRequest, ReferralLedger};
pub use registry::{CodeOptions, CodeRegistry};
pub use rewards::{CompletionOutcome, RewardEngine, SkipReason};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{ReferralConfig, RewardPolicy};
use crate::directory::{UserDirectory, UserProfile};
use crate::error::ReferralResult;
use crate::storage::ReferralStorage;
use crate::token::TokenGenerator;
use crate::types::{Referral, ReferralCode, ReferralId, ReferralReward, UserId};

/// Referral history of one user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserReferrals {
    /// Referrals created from the user's codes
    pub inviter_referrals: Vec<Referral>,
    /// Referral that brought the user in
    pub invitee_referral: Option<Referral>,
    /// Reward rows credited to the user
    pub rewards: Vec<ReferralReward>,
}

/// Bonus advertised on a valid code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralBonus {
    pub inviter_points: i64,
    pub invitee_points: i64,
}

impl From<&RewardPolicy> for ReferralBonus {
    fn from(policy: &RewardPolicy) -> Self {
        Self {
            inviter_points: policy.inviter_reward,
            invitee_points: policy.invitee_reward,
        }
    }
}

/// Result of checking a code before signup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviterValidation {
    pub valid: bool,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inviter: Option<UserProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bonus: Option<ReferralBonus>,
}

impl InviterValidation {
    fn invalid(code: &str, error: &str) -> Self {
        Self {
            valid: false,
            code: code.to_string(),
            error: Some(error.to_string()),
            inviter: None,
            bonus: None,
        }
    }
}

/// Referral service
pub struct ReferralService<S: ReferralStorage> {
    storage: Arc<S>,
    registry: Arc<CodeRegistry<S>>,
    ledger: ReferralLedger<S>,
    engine: RewardEngine<S>,
    directory: Arc<dyn UserDirectory>,
    config: ReferralConfig,
}

impl<S: ReferralStorage> ReferralService<S> {
    /// Create a service with an OS-seeded token generator
    pub fn new(storage: Arc<S>, directory: Arc<dyn UserDirectory>, config: ReferralConfig) -> Self {
        Self::with_generator(storage, directory, config, TokenGenerator::secure())
    }

    /// Create a service with an explicit token generator
    pub fn with_generator(
        storage: Arc<S>,
        directory: Arc<dyn UserDirectory>,
        config: ReferralConfig,
        generator: TokenGenerator,
    ) -> Self {
        let registry = Arc::new(CodeRegistry::new(
            storage.clone(),
            Arc::new(generator),
            &config,
        ));
        let ledger = ReferralLedger::new(storage.clone(), registry.clone());
        let engine = RewardEngine::new(storage.clone(), config.policy);
        Self {
            storage,
            registry,
            ledger,
            engine,
            directory,
            config,
        }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn config(&self) -> &ReferralConfig {
        &self.config
    }

    pub fn directory(&self) -> &Arc<dyn UserDirectory> {
        &self.directory
    }

    pub fn engine(&self) -> &RewardEngine<S> {
        &self.engine
    }

    /// Create a referral code for `inviter_id`
    pub async fn create_code(
        &self,
        inviter_id: &UserId,
        options: CodeOptions,
    ) -> ReferralResult<ReferralCode> {
        self.registry.create_code(inviter_id, options).await
    }

    /// Look up a code by value
    pub async fn get_code(&self, code: &str) -> ReferralResult<Option<ReferralCode>> {
        self.registry.get_code(code).await
    }

    /// Redeem a code
    pub async fn redeem_code(&self, request: RedeemRequest) -> ReferralResult<Referral> {
        self.ledger.redeem_code(request).await
    }

    /// Link an anonymous referral to a signed-up user
    pub async fn claim_referral(
        &self,
        referral_id: &ReferralId,
        user_id: &UserId,
    ) -> ReferralResult<Referral> {
        self.ledger.claim_referral(referral_id, user_id).await
    }

    /// Deactivate one of the inviter's codes
    pub async fn deactivate_code(
        &self,
        inviter_id: &UserId,
        code: &str,
    ) -> ReferralResult<ReferralCode> {
        self.registry.deactivate_code(inviter_id, code).await
    }

    /// Apply rewards for the invitee's pending referral
    pub async fn complete_referral_for_invitee(
        &self,
        invitee_id: &UserId,
        event_type: &str,
    ) -> ReferralResult<CompletionOutcome> {
        self.engine
            .complete_referral_for_invitee(invitee_id, event_type)
            .await
    }

    /// Referral history of a user
    pub async fn get_referrals_for_user(&self, user_id: &UserId) -> ReferralResult<UserReferrals> {
        Ok(UserReferrals {
            inviter_referrals: self.ledger.referrals_by_inviter(user_id).await?,
            invitee_referral: self.ledger.referral_of_invitee(user_id).await?,
            rewards: self.storage.list_rewards_for_user(user_id).await?,
        })
    }

    /// Check a code and describe its inviter
    pub async fn validate_and_get_inviter(&self, code: &str) -> ReferralResult<InviterValidation> {
        let Some(referral_code) = self.registry.get_code(code).await? else {
            return Ok(InviterValidation::invalid(code, "Invalid referral code"));
        };
        if !referral_code.active {
            return Ok(InviterValidation::invalid(code, "Referral code is not active"));
        }
        if referral_code.is_expired_at(Utc::now()) {
            return Ok(InviterValidation::invalid(code, "Referral code has expired"));
        }
        if referral_code.is_exhausted() {
            return Ok(InviterValidation::invalid(code, "Referral code usage limit reached"));
        }

        let Some(inviter) = self.directory.find_by_id(&referral_code.inviter_id).await? else {
            return Ok(InviterValidation::invalid(code, "Inviter not found"));
        };

        Ok(InviterValidation {
            valid: true,
            code: code.to_string(),
            error: None,
            inviter: Some(inviter),
            bonus: Some(ReferralBonus::from(&self.config.policy)),
        })
    }

    /// Credit balance of a user
    pub async fn credits_of(&self, user_id: &UserId) -> ReferralResult<i64> {
        Ok(self.storage.credits_of(user_id).await?)
    }
}
