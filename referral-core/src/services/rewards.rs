//! Reward application engine
//!
//! Applies referral rewards exactly once per referral. A cheap fast path
//! filters out invitees without a pending referral; the authoritative
//! idempotency check runs again inside the ledger transaction, together with
//! the monthly inviter cap, both reward rows and both credit increments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::RewardPolicy;
use crate::error::{ReferralError, ReferralResult};
use crate::storage::{LedgerTx, ReferralStorage};
use crate::types::{ReferralId, ReferralReward, RewardRole, UserId, META_EVENT_TYPE};

/// Why a completion event did not apply rewards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoPendingReferral,
    AlreadyApplied,
}

/// Result of a completion event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOutcome {
    /// 1 when rewards were applied, 0 otherwise
    pub processed: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
    pub inviter_awarded: i64,
    pub invitee_awarded: i64,
}

impl CompletionOutcome {
    pub fn applied(inviter_awarded: i64, invitee_awarded: i64) -> Self {
        Self {
            processed: 1,
            reason: None,
            inviter_awarded,
            invitee_awarded,
        }
    }

    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            processed: 0,
            reason: Some(reason),
            inviter_awarded: 0,
            invitee_awarded: 0,
        }
    }
}

/// Reward application engine
pub struct RewardEngine<S: ReferralStorage> {
    storage: Arc<S>,
    policy: RewardPolicy,
}

impl<S: ReferralStorage> RewardEngine<S> {
    pub fn new(storage: Arc<S>, policy: RewardPolicy) -> Self {
        Self { storage, policy }
    }

    pub fn policy(&self) -> &RewardPolicy {
        &self.policy
    }

    /// Apply rewards for the invitee's pending referral
    pub async fn complete_referral_for_invitee(
        &self,
        invitee_id: &UserId,
        event_type: &str,
    ) -> ReferralResult<CompletionOutcome> {
        self.complete_at(invitee_id, event_type, Utc::now()).await
    }

    /// Apply rewards as of `now`, which selects the month used for the inviter cap
    pub async fn complete_at(
        &self,
        invitee_id: &UserId,
        event_type: &str,
        now: DateTime<Utc>,
    ) -> ReferralResult<CompletionOutcome> {
        let Some(referral) = self.storage.find_referral_by_invitee(invitee_id).await? else {
            return Ok(CompletionOutcome::skipped(SkipReason::NoPendingReferral));
        };
        if referral.reward_applied {
            return Ok(CompletionOutcome::skipped(SkipReason::AlreadyApplied));
        }
        if !referral.is_pending() {
            return Ok(CompletionOutcome::skipped(SkipReason::NoPendingReferral));
        }

        let policy = self.policy;
        let result = self
            .storage
            .transaction(|tx| apply_rewards(tx, &referral.id, invitee_id, &policy, event_type, now))
            .await;

        match &result {
            Ok(outcome) => {
                if outcome.inviter_awarded == 0 {
                    info!(
                        inviter_id = %referral.inviter_id,
                        cap = policy.inviter_monthly_cap,
                        "Inviter monthly cap reached, inviter reward skipped"
                    );
                }
                info!(
                    referral_id = %referral.id,
                    event_type,
                    inviter_awarded = outcome.inviter_awarded,
                    invitee_awarded = outcome.invitee_awarded,
                    "Referral rewards applied"
                );
            }
            Err(ReferralError::AlreadyApplied(_)) => {
                warn!(referral_id = %referral.id, "Referral rewards applied by a concurrent completion");
            }
            Err(e) => {
                error!(referral_id = %referral.id, error = %e, "Reward transaction aborted");
            }
        }
        result
    }
}

/// Transaction body: every write goes through `tx` and commits together
fn apply_rewards(
    tx: &mut dyn LedgerTx,
    referral_id: &ReferralId,
    invitee_id: &UserId,
    policy: &RewardPolicy,
    event_type: &str,
    now: DateTime<Utc>,
) -> ReferralResult<CompletionOutcome> {
    let mut referral = tx
        .get_referral(referral_id)?
        .ok_or_else(|| ReferralError::ReferralMissing(referral_id.to_string()))?;
    if referral.reward_applied {
        return Err(ReferralError::AlreadyApplied(referral_id.to_string()));
    }
    if !referral.is_pending() {
        return Err(ReferralError::NotPending(referral_id.to_string()));
    }

    let month_total = policy.month_total(tx.applied_rewards_in_month(&referral.inviter_id, now)?);
    let inviter_awarded = if policy.inviter_eligible(month_total) {
        let reward = ReferralReward::credit(
            referral.id.clone(),
            referral.inviter_id.clone(),
            RewardRole::Inviter,
            policy.inviter_reward,
            now,
        )
        .with_metadata(META_EVENT_TYPE, event_type);
        tx.record_reward(&reward)?;
        tx.increment_credits(&referral.inviter_id, policy.inviter_reward)?;
        policy.inviter_reward
    } else {
        0
    };

    let invitee_reward = ReferralReward::credit(
        referral.id.clone(),
        invitee_id.clone(),
        RewardRole::Invitee,
        policy.invitee_reward,
        now,
    )
    .with_metadata(META_EVENT_TYPE, event_type);
    tx.record_reward(&invitee_reward)?;
    tx.increment_credits(invitee_id, policy.invitee_reward)?;

    referral.mark_completed(Some(invitee_reward.id), now);
    tx.put_referral(&referral)?;

    Ok(CompletionOutcome::applied(inviter_awarded, policy.invitee_reward))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::types::{Referral, ReferralCode, ReferralSource, ReferralStatus};
    use chrono::TimeZone;

    async fn pending_referral(storage: &MemoryStorage, inviter: &str, invitee: &str) -> Referral {
        let code = ReferralCode::new(format!("{:0>8}", invitee), UserId::new(inviter), 0, None, None);
        let referral = Referral::pending(&code, Some(UserId::new(invitee)), ReferralSource::default());
        storage.insert_referral(&referral).await.unwrap();
        referral
    }

    #[tokio::test]
    async fn test_completion_applies_both_rewards() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = RewardEngine::new(storage.clone(), RewardPolicy::default());
        let referral = pending_referral(&storage, "alice", "bob").await;
        let bob = UserId::new("bob");

        let outcome = engine
            .complete_referral_for_invitee(&bob, "email_verified")
            .await
            .unwrap();
        assert_eq!(outcome, CompletionOutcome::applied(25, 50));

        let stored = storage.get_referral(&referral.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReferralStatus::Completed);
        assert!(stored.reward_applied);

        let invitee_rewards = storage.list_rewards_for_user(&bob).await.unwrap();
        assert_eq!(invitee_rewards.len(), 1);
        assert_eq!(stored.reward_record_id, Some(invitee_rewards[0].id.clone()));
        assert_eq!(
            invitee_rewards[0].metadata.get(META_EVENT_TYPE).map(String::as_str),
            Some("email_verified")
        );
        assert_eq!(storage.credits_of(&bob).await.unwrap(), 50);
        assert_eq!(storage.credits_of(&UserId::new("alice")).await.unwrap(), 25);
    }

    #[tokio::test]
    async fn test_second_completion_is_noop() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = RewardEngine::new(storage.clone(), RewardPolicy::default());
        pending_referral(&storage, "alice", "bob").await;
        let bob = UserId::new("bob");

        engine.complete_referral_for_invitee(&bob, "email_verified").await.unwrap();
        let second = engine
            .complete_referral_for_invitee(&bob, "email_verified")
            .await
            .unwrap();

        assert_eq!(second, CompletionOutcome::skipped(SkipReason::AlreadyApplied));
        assert_eq!(storage.credits_of(&bob).await.unwrap(), 50);
        assert_eq!(storage.reward_count().await, 2);
    }

    #[tokio::test]
    async fn test_no_pending_referral() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = RewardEngine::new(storage.clone(), RewardPolicy::default());

        let outcome = engine
            .complete_referral_for_invitee(&UserId::new("nobody"), "email_verified")
            .await
            .unwrap();
        assert_eq!(outcome, CompletionOutcome::skipped(SkipReason::NoPendingReferral));
        assert_eq!(storage.reward_count().await, 0);
    }

    #[tokio::test]
    async fn test_monthly_cap_skips_inviter_only() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = RewardEngine::new(storage.clone(), RewardPolicy::default());
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();

        for invitee in ["u1", "u2", "u3", "u4"] {
            pending_referral(&storage, "alice", invitee).await;
            let outcome = engine
                .complete_at(&UserId::new(invitee), "email_verified", now)
                .await
                .unwrap();
            assert_eq!(outcome.inviter_awarded, 25);
        }

        pending_referral(&storage, "alice", "u5").await;
        let capped = engine
            .complete_at(&UserId::new("u5"), "email_verified", now)
            .await
            .unwrap();
        assert_eq!(capped, CompletionOutcome::applied(0, 50));
        assert_eq!(storage.credits_of(&UserId::new("alice")).await.unwrap(), 100);
        assert_eq!(storage.credits_of(&UserId::new("u5")).await.unwrap(), 50);

        let next_month = Utc.with_ymd_and_hms(2026, 11, 1, 0, 0, 0).unwrap();
        pending_referral(&storage, "alice", "u6").await;
        let fresh = engine
            .complete_at(&UserId::new("u6"), "email_verified", next_month)
            .await
            .unwrap();
        assert_eq!(fresh.inviter_awarded, 25);
    }

    #[tokio::test]
    async fn test_non_pending_referral_is_skipped() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = RewardEngine::new(storage.clone(), RewardPolicy::default());
        let code = ReferralCode::new("AAAAAAAA", UserId::new("alice"), 0, None, None);
        let mut referral = Referral::pending(&code, Some(UserId::new("bob")), ReferralSource::default());
        referral.status = ReferralStatus::OnHold;
        storage.insert_referral(&referral).await.unwrap();

        let outcome = engine
            .complete_referral_for_invitee(&UserId::new("bob"), "email_verified")
            .await
            .unwrap();
        assert_eq!(outcome, CompletionOutcome::skipped(SkipReason::NoPendingReferral));
    }

    #[tokio::test]
    async fn test_transaction_body_detects_applied_flag() {
        let storage = MemoryStorage::new();
        let referral = pending_referral(&storage, "alice", "bob").await;
        let policy = RewardPolicy::default();
        let bob = UserId::new("bob");
        let now = Utc::now();

        storage
            .transaction(|tx| apply_rewards(tx, &referral.id, &bob, &policy, "email_verified", now))
            .await
            .unwrap();
        let err = storage
            .transaction(|tx| apply_rewards(tx, &referral.id, &bob, &policy, "email_verified", now))
            .await
            .unwrap_err();
        assert!(matches!(err, ReferralError::AlreadyApplied(_)));

        let missing = storage
            .transaction(|tx| {
                apply_rewards(tx, &ReferralId::new("ref_gone"), &bob, &policy, "email_verified", now)
            })
            .await
            .unwrap_err();
        assert!(matches!(missing, ReferralError::ReferralMissing(_)));
        assert_eq!(storage.credits_of(&bob).await.unwrap(), 50);
    }

    #[tokio::test]
    async fn test_transaction_body_rejects_non_pending_referral() {
        let storage = MemoryStorage::new();
        let code = ReferralCode::new("AAAAAAAA", UserId::new("alice"), 0, None, None);
        let bob = UserId::new("bob");
        let mut referral = Referral::pending(&code, Some(bob.clone()), ReferralSource::default());
        referral.status = ReferralStatus::OnHold;
        storage.insert_referral(&referral).await.unwrap();
        let policy = RewardPolicy::default();

        let err = storage
            .transaction(|tx| apply_rewards(tx, &referral.id, &bob, &policy, "email_verified", Utc::now()))
            .await
            .unwrap_err();

        assert!(matches!(err, ReferralError::NotPending(_)));
        assert_eq!(storage.reward_count().await, 0);
        assert_eq!(storage.credits_of(&bob).await.unwrap(), 0);
        let stored = storage.get_referral(&referral.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReferralStatus::OnHold);
        assert!(!stored.reward_applied);
    }

    #[tokio::test]
    async fn test_monthly_cap_counts_rewards_received_as_invitee() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = RewardEngine::new(storage.clone(), RewardPolicy::default());
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();

        // alice joined through zed's code earlier this month
        pending_referral(&storage, "zed", "alice").await;
        let joined = engine
            .complete_at(&UserId::new("alice"), "email_verified", now)
            .await
            .unwrap();
        assert_eq!(joined, CompletionOutcome::applied(25, 50));

        let mut awarded = Vec::new();
        for invitee in ["v1", "v2", "v3", "v4"] {
            pending_referral(&storage, "alice", invitee).await;
            let outcome = engine
                .complete_at(&UserId::new(invitee), "email_verified", now)
                .await
                .unwrap();
            assert_eq!(outcome.invitee_awarded, 50);
            awarded.push(outcome.inviter_awarded);
        }

        assert_eq!(awarded, vec![25, 25, 25, 0]);
        assert_eq!(storage.applied_rewards_in_month(&UserId::new("alice"), now).await.unwrap(), 4);
        assert_eq!(storage.credits_of(&UserId::new("alice")).await.unwrap(), 50 + 75);
    }
}
