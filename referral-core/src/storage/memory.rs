//! In-memory storage
//!
//! All collections live behind a single lock so that unique indexes,
//! conditional updates and transactions are atomic with respect to each other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{month_count_key, LedgerTx, ReferralStorage};
use crate::error::{ReferralResult, StoreError, StoreResult};
use crate::types::{CodeId, Referral, ReferralCode, ReferralId, ReferralReward, UserId};

#[derive(Debug, Default)]
struct MemoryState {
    codes: HashMap<CodeId, ReferralCode>,
    code_index: HashMap<String, CodeId>,
    referrals: HashMap<ReferralId, Referral>,
    invitee_index: HashMap<UserId, ReferralId>,
    rewards: Vec<ReferralReward>,
    credits: HashMap<UserId, i64>,
    monthly_counts: HashMap<String, i64>,
}

impl MemoryState {
    fn applied_rewards_in_month(&self, user_id: &UserId, now: DateTime<Utc>) -> i64 {
        self.monthly_counts
            .get(&month_count_key(user_id, now))
            .copied()
            .unwrap_or(0)
    }

    fn commit(&mut self, staged: Staged) {
        self.referrals.extend(staged.referrals);
        self.rewards.extend(staged.rewards);
        for (user_id, delta) in staged.credit_deltas {
            *self.credits.entry(user_id).or_insert(0) += delta;
        }
        for (key, delta) in staged.count_deltas {
            *self.monthly_counts.entry(key).or_insert(0) += delta;
        }
    }
}

/// In-memory storage for tests and development
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reward rows
    pub async fn reward_count(&self) -> usize {
        self.state.read().await.rewards.len()
    }
}

/// Writes of an open transaction, merged into the state on commit
#[derive(Debug, Default)]
struct Staged {
    referrals: HashMap<ReferralId, Referral>,
    rewards: Vec<ReferralReward>,
    credit_deltas: HashMap<UserId, i64>,
    count_deltas: HashMap<String, i64>,
}

/// Transaction reading through its staged writes to the locked state
struct MemoryTx<'a> {
    base: &'a MemoryState,
    staged: Staged,
}

impl LedgerTx for MemoryTx<'_> {
    fn get_referral(&self, referral_id: &ReferralId) -> StoreResult<Option<Referral>> {
        Ok(self
            .staged
            .referrals
            .get(referral_id)
            .or_else(|| self.base.referrals.get(referral_id))
            .cloned())
    }

    fn put_referral(&mut self, referral: &Referral) -> StoreResult<()> {
        let existing = self
            .get_referral(&referral.id)?
            .ok_or_else(|| StoreError::not_found("Referral", referral.id.as_str()))?;
        if existing.invitee_id != referral.invitee_id {
            return Err(StoreError::Precondition(format!(
                "invitee of referral {} cannot change in a transaction",
                referral.id
            )));
        }
        self.staged
            .referrals
            .insert(referral.id.clone(), referral.clone());
        Ok(())
    }

    fn applied_rewards_in_month(&self, user_id: &UserId, now: DateTime<Utc>) -> StoreResult<i64> {
        let staged = self
            .staged
            .count_deltas
            .get(&month_count_key(user_id, now))
            .copied()
            .unwrap_or(0);
        Ok(self.base.applied_rewards_in_month(user_id, now) + staged)
    }

    fn record_reward(&mut self, reward: &ReferralReward) -> StoreResult<()> {
        if reward.counts_toward_monthly_cap() {
            *self
                .staged
                .count_deltas
                .entry(month_count_key(&reward.user_id, reward.created_at))
                .or_insert(0) += 1;
        }
        self.staged.rewards.push(reward.clone());
        Ok(())
    }

    fn increment_credits(&mut self, user_id: &UserId, amount: i64) -> StoreResult<i64> {
        let delta = self.staged.credit_deltas.entry(user_id.clone()).or_insert(0);
        *delta += amount;
        let base = self.base.credits.get(user_id).copied().unwrap_or(0);
        Ok(base + *delta)
    }
}

#[async_trait]
impl ReferralStorage for MemoryStorage {
    // ==================== Codes ====================

    async fn insert_code(&self, code: &ReferralCode) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state.code_index.contains_key(&code.code) {
            return Err(StoreError::duplicate("ReferralCode", &code.code));
        }
        state.code_index.insert(code.code.clone(), code.id.clone());
        state.codes.insert(code.id.clone(), code.clone());
        Ok(())
    }

    async fn find_code_by_value(&self, code: &str) -> StoreResult<Option<ReferralCode>> {
        let state = self.state.read().await;
        Ok(state
            .code_index
            .get(code)
            .and_then(|id| state.codes.get(id))
            .cloned())
    }

    async fn get_code(&self, code_id: &CodeId) -> StoreResult<Option<ReferralCode>> {
        Ok(self.state.read().await.codes.get(code_id).cloned())
    }

    async fn decrement_remaining_uses(&self, code_id: &CodeId) -> StoreResult<Option<ReferralCode>> {
        let mut state = self.state.write().await;
        let Some(code) = state.codes.get_mut(code_id) else {
            return Ok(None);
        };
        if code.try_consume_use(Utc::now()) {
            Ok(Some(code.clone()))
        } else {
            Ok(None)
        }
    }

    async fn restore_remaining_use(&self, code_id: &CodeId) -> StoreResult<Option<ReferralCode>> {
        let mut state = self.state.write().await;
        let Some(code) = state.codes.get_mut(code_id) else {
            return Ok(None);
        };
        if code.restore_use(Utc::now()) {
            Ok(Some(code.clone()))
        } else {
            Ok(None)
        }
    }

    async fn set_code_active(&self, code_id: &CodeId, active: bool) -> StoreResult<Option<ReferralCode>> {
        let mut state = self.state.write().await;
        Ok(state.codes.get_mut(code_id).map(|code| {
            code.set_active(active, Utc::now());
            code.clone()
        }))
    }

    // ==================== Referrals ====================

    async fn insert_referral(&self, referral: &Referral) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if let Some(invitee) = &referral.invitee_id {
            if state.invitee_index.contains_key(invitee) {
                return Err(StoreError::duplicate("Referral", invitee.as_str()));
            }
            state
                .invitee_index
                .insert(invitee.clone(), referral.id.clone());
        }
        state
            .referrals
            .insert(referral.id.clone(), referral.clone());
        Ok(())
    }

    async fn get_referral(&self, referral_id: &ReferralId) -> StoreResult<Option<Referral>> {
        Ok(self.state.read().await.referrals.get(referral_id).cloned())
    }

    async fn find_referral_by_invitee(&self, invitee_id: &UserId) -> StoreResult<Option<Referral>> {
        let state = self.state.read().await;
        Ok(state
            .invitee_index
            .get(invitee_id)
            .and_then(|id| state.referrals.get(id))
            .cloned())
    }

    async fn list_referrals_by_inviter(&self, inviter_id: &UserId) -> StoreResult<Vec<Referral>> {
        let state = self.state.read().await;
        let mut referrals: Vec<Referral> = state
            .referrals
            .values()
            .filter(|r| r.inviter_id == *inviter_id)
            .cloned()
            .collect();
        referrals.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(referrals)
    }

    async fn attach_invitee(&self, referral_id: &ReferralId, invitee_id: &UserId) -> StoreResult<Referral> {
        let mut state = self.state.write().await;
        if state.invitee_index.contains_key(invitee_id) {
            return Err(StoreError::duplicate("Referral", invitee_id.as_str()));
        }
        let referral = state
            .referrals
            .get_mut(referral_id)
            .ok_or_else(|| StoreError::not_found("Referral", referral_id.as_str()))?;
        if referral.invitee_id.is_some() {
            return Err(StoreError::Precondition(format!(
                "referral {} already has an invitee",
                referral_id
            )));
        }
        referral.invitee_id = Some(invitee_id.clone());
        referral.updated_at = Utc::now();
        let updated = referral.clone();
        state
            .invitee_index
            .insert(invitee_id.clone(), referral_id.clone());
        Ok(updated)
    }

    // ==================== Rewards & credits ====================

    async fn list_rewards_for_user(&self, user_id: &UserId) -> StoreResult<Vec<ReferralReward>> {
        let state = self.state.read().await;
        Ok(state
            .rewards
            .iter()
            .filter(|r| r.user_id == *user_id)
            .cloned()
            .collect())
    }

    async fn credits_of(&self, user_id: &UserId) -> StoreResult<i64> {
        Ok(self
            .state
            .read()
            .await
            .credits
            .get(user_id)
            .copied()
            .unwrap_or(0))
    }

    async fn applied_rewards_in_month(&self, user_id: &UserId, now: DateTime<Utc>) -> StoreResult<i64> {
        Ok(self.state.read().await.applied_rewards_in_month(user_id, now))
    }

    // ==================== Transactions ====================

    async fn transaction<T, F>(&self, body: F) -> ReferralResult<T>
    where
        T: Send,
        F: Fn(&mut dyn LedgerTx) -> ReferralResult<T> + Send + Sync,
    {
        let mut state = self.state.write().await;
        let mut tx = MemoryTx {
            base: &state,
            staged: Staged::default(),
        };
        let value = body(&mut tx)?;
        let staged = tx.staged;
        state.commit(staged);
        Ok(value)
    }
}
