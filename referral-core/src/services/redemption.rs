//! Referral redemption
//!
//! Turns a submitted code into a pending referral. Checks run in a fixed
//! order so the reported rejection is stable: code lookup and state,
//! self-referral, usage limit, existing referral, insert.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::registry::CodeRegistry;
use crate::error::{ReferralError, ReferralResult, StoreError};
use crate::storage::ReferralStorage;
use crate::types::{CodeId, Referral, ReferralId, ReferralSource, UserId};

/// Redemption request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemRequest {
    /// Redeeming user; absent during anonymous signup
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub code: String,
    #[serde(default)]
    pub invitee_email: Option<String>,
    #[serde(default)]
    pub source: ReferralSource,
}

impl RedeemRequest {
    pub fn new(user_id: Option<UserId>, code: impl Into<String>) -> Self {
        Self {
            user_id,
            code: code.into(),
            ..Default::default()
        }
    }
}

/// Referral ledger
pub struct ReferralLedger<S: ReferralStorage> {
    storage: Arc<S>,
    registry: Arc<CodeRegistry<S>>,
}

impl<S: ReferralStorage> ReferralLedger<S> {
    pub fn new(storage: Arc<S>, registry: Arc<CodeRegistry<S>>) -> Self {
        Self { storage, registry }
    }

    /// Redeem a code, creating a pending referral
    pub async fn redeem_code(&self, request: RedeemRequest) -> ReferralResult<Referral> {
        let code = self
            .registry
            .get_code(&request.code)
            .await?
            .ok_or_else(|| ReferralError::InvalidCode(request.code.clone()))?;

        if !code.active {
            return Err(ReferralError::InactiveCode(request.code));
        }
        if code.is_expired_at(Utc::now()) {
            return Err(ReferralError::ExpiredCode(request.code));
        }

        if request.user_id.as_ref() == Some(&code.inviter_id) {
            warn!(code_id = %code.id, "Self-referral rejected");
            return Err(ReferralError::SelfReferral);
        }

        let consumed = if code.has_usage_limit() {
            if self.registry.decrement_usage(&code.id).await?.is_none() {
                warn!(code_id = %code.id, "Referral code usage limit reached");
                return Err(ReferralError::UsageLimitReached(request.code));
            }
            true
        } else {
            false
        };

        let mut referral = Referral::pending(&code, request.user_id.clone(), request.source);
        referral.invitee_email = request.invitee_email;

        if let Err(err) = self.insert_referral(&referral).await {
            if consumed {
                self.give_back_use(&code.id).await;
            }
            return Err(err);
        }

        info!(
            referral_id = %referral.id,
            code_id = %code.id,
            inviter_id = %referral.inviter_id,
            anonymous = referral.is_anonymous(),
            "Referral code redeemed"
        );
        Ok(referral)
    }

    async fn insert_referral(&self, referral: &Referral) -> ReferralResult<()> {
        if let Some(invitee) = &referral.invitee_id {
            if self.storage.find_referral_by_invitee(invitee).await?.is_some() {
                warn!(invitee_id = %invitee, "Invitee already referred");
                return Err(ReferralError::AlreadyReferred(invitee.to_string()));
            }
        }

        match self.storage.insert_referral(referral).await {
            Ok(()) => Ok(()),
            Err(StoreError::Duplicate { key, .. }) => {
                warn!(invitee_id = %key, "Invitee referred concurrently");
                Err(ReferralError::AlreadyReferred(key))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn give_back_use(&self, code_id: &CodeId) {
        if let Err(e) = self.registry.restore_usage(code_id).await {
            warn!(code_id = %code_id, error = %e, "Failed to restore referral code use");
        }
    }

    /// Attach a signed-up user to an anonymous referral
    pub async fn claim_referral(
        &self,
        referral_id: &ReferralId,
        user_id: &UserId,
    ) -> ReferralResult<Referral> {
        let referral = self
            .storage
            .get_referral(referral_id)
            .await?
            .ok_or_else(|| ReferralError::ReferralNotFound(referral_id.to_string()))?;

        if referral.invitee_id.is_some() {
            return Err(ReferralError::InviteeAlreadyLinked(referral_id.to_string()));
        }
        if referral.inviter_id == *user_id {
            return Err(ReferralError::SelfReferral);
        }

        let linked = self
            .storage
            .attach_invitee(referral_id, user_id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound { id, .. } => ReferralError::ReferralNotFound(id),
                StoreError::Precondition(_) => {
                    ReferralError::InviteeAlreadyLinked(referral_id.to_string())
                }
                StoreError::Duplicate { key, .. } => ReferralError::AlreadyReferred(key),
                other => other.into(),
            })?;

        info!(referral_id = %linked.id, invitee_id = %user_id, "Anonymous referral claimed");
        Ok(linked)
    }

    /// Referrals created from the user's codes
    pub async fn referrals_by_inviter(&self, inviter_id: &UserId) -> ReferralResult<Vec<Referral>> {
        Ok(self.storage.list_referrals_by_inviter(inviter_id).await?)
    }

    /// The referral that brought the user in
    pub async fn referral_of_invitee(&self, invitee_id: &UserId) -> ReferralResult<Option<Referral>> {
        Ok(self.storage.find_referral_by_invitee(invitee_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReferralConfig;
    use crate::services::registry::CodeOptions;
    use crate::storage::MemoryStorage;
    use crate::token::TokenGenerator;
    use chrono::Duration;

    struct Fixture {
        storage: Arc<MemoryStorage>,
        registry: Arc<CodeRegistry<MemoryStorage>>,
        ledger: ReferralLedger<MemoryStorage>,
    }

    fn fixture() -> Fixture {
        let storage = Arc::new(MemoryStorage::new());
        let registry = Arc::new(CodeRegistry::new(
            storage.clone(),
            Arc::new(TokenGenerator::seeded(9)),
            &ReferralConfig::default(),
        ));
        let ledger = ReferralLedger::new(storage.clone(), registry.clone());
        Fixture {
            storage,
            registry,
            ledger,
        }
    }

    fn alice() -> UserId {
        UserId::new("alice")
    }

    #[tokio::test]
    async fn test_redeem_creates_pending_referral() {
        let f = fixture();
        let code = f.registry.create_code(&alice(), CodeOptions::default()).await.unwrap();

        let referral = f
            .ledger
            .redeem_code(RedeemRequest::new(Some(UserId::new("bob")), &code.code))
            .await
            .unwrap();

        assert!(referral.is_pending());
        assert!(!referral.reward_applied);
        assert_eq!(referral.inviter_id, alice());
        assert_eq!(referral.code_id, code.id);
    }

    #[tokio::test]
    async fn test_unknown_code() {
        let f = fixture();
        let err = f
            .ledger
            .redeem_code(RedeemRequest::new(Some(UserId::new("bob")), "NOPE1234"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReferralError::InvalidCode(_)));
    }

    #[tokio::test]
    async fn test_self_referral() {
        let f = fixture();
        let code = f.registry.create_code(&alice(), CodeOptions::default()).await.unwrap();
        let err = f
            .ledger
            .redeem_code(RedeemRequest::new(Some(alice()), &code.code))
            .await
            .unwrap_err();
        assert!(matches!(err, ReferralError::SelfReferral));
    }

    #[tokio::test]
    async fn test_expired_code_rejected_regardless_of_uses() {
        let f = fixture();
        let code = f
            .registry
            .create_code(
                &alice(),
                CodeOptions {
                    usage_limit: 10,
                    expires_at: Some(Utc::now() - Duration::hours(1)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = f
            .ledger
            .redeem_code(RedeemRequest::new(Some(UserId::new("bob")), &code.code))
            .await
            .unwrap_err();
        assert!(matches!(err, ReferralError::ExpiredCode(_)));
        let stored = f.storage.get_code(&code.id).await.unwrap().unwrap();
        assert_eq!(stored.remaining_uses, 10);
    }

    #[tokio::test]
    async fn test_inactive_code() {
        let f = fixture();
        let code = f.registry.create_code(&alice(), CodeOptions::default()).await.unwrap();
        f.registry.deactivate_code(&alice(), &code.code).await.unwrap();

        let err = f
            .ledger
            .redeem_code(RedeemRequest::new(Some(UserId::new("bob")), &code.code))
            .await
            .unwrap_err();
        assert!(matches!(err, ReferralError::InactiveCode(_)));
    }

    #[tokio::test]
    async fn test_usage_limit() {
        let f = fixture();
        let code = f
            .registry
            .create_code(
                &alice(),
                CodeOptions {
                    usage_limit: 1,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        f.ledger
            .redeem_code(RedeemRequest::new(Some(UserId::new("bob")), &code.code))
            .await
            .unwrap();
        let err = f
            .ledger
            .redeem_code(RedeemRequest::new(Some(UserId::new("carol")), &code.code))
            .await
            .unwrap_err();
        assert!(matches!(err, ReferralError::UsageLimitReached(_)));
    }

    #[tokio::test]
    async fn test_already_referred_returns_consumed_use() {
        let f = fixture();
        let open = f.registry.create_code(&alice(), CodeOptions::default()).await.unwrap();
        let limited = f
            .registry
            .create_code(
                &UserId::new("dave"),
                CodeOptions {
                    usage_limit: 2,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let bob = UserId::new("bob");

        f.ledger
            .redeem_code(RedeemRequest::new(Some(bob.clone()), &open.code))
            .await
            .unwrap();
        let err = f
            .ledger
            .redeem_code(RedeemRequest::new(Some(bob), &limited.code))
            .await
            .unwrap_err();
        assert!(matches!(err, ReferralError::AlreadyReferred(_)));

        let stored = f.storage.get_code(&limited.id).await.unwrap().unwrap();
        assert_eq!(stored.remaining_uses, 2);
    }

    #[tokio::test]
    async fn test_anonymous_redemption_and_claim() {
        let f = fixture();
        let code = f.registry.create_code(&alice(), CodeOptions::default()).await.unwrap();

        let mut request = RedeemRequest::new(None, &code.code);
        request.invitee_email = Some("erin@example.com".to_string());
        let anonymous = f.ledger.redeem_code(request).await.unwrap();
        assert!(anonymous.is_anonymous());

        let err = f.ledger.claim_referral(&anonymous.id, &alice()).await.unwrap_err();
        assert!(matches!(err, ReferralError::SelfReferral));

        let erin = UserId::new("erin");
        let claimed = f.ledger.claim_referral(&anonymous.id, &erin).await.unwrap();
        assert_eq!(claimed.invitee_id, Some(erin.clone()));
        assert_eq!(claimed.invitee_email.as_deref(), Some("erin@example.com"));

        let again = f
            .ledger
            .claim_referral(&anonymous.id, &UserId::new("frank"))
            .await
            .unwrap_err();
        assert!(matches!(again, ReferralError::InviteeAlreadyLinked(_)));

        let missing = f
            .ledger
            .claim_referral(&ReferralId::new("ref_missing"), &erin)
            .await
            .unwrap_err();
        assert!(matches!(missing, ReferralError::ReferralNotFound(_)));
    }

    #[tokio::test]
    async fn test_claim_by_already_referred_user() {
        let f = fixture();
        let code = f.registry.create_code(&alice(), CodeOptions::default()).await.unwrap();
        let bob = UserId::new("bob");

        f.ledger
            .redeem_code(RedeemRequest::new(Some(bob.clone()), &code.code))
            .await
            .unwrap();
        let anonymous = f
            .ledger
            .redeem_code(RedeemRequest::new(None, &code.code))
            .await
            .unwrap();

        let err = f.ledger.claim_referral(&anonymous.id, &bob).await.unwrap_err();
        assert!(matches!(err, ReferralError::AlreadyReferred(_)));
    }
}
