//! Runtime-selected storage backend

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::{LedgerTx, MemoryStorage, ReferralStorage, SledStorage, StorageConfig};
use crate::directory::{MemoryUserDirectory, UserDirectory};
use crate::error::{ReferralResult, StoreResult};
use crate::types::{CodeId, Referral, ReferralCode, ReferralId, ReferralReward, UserId};

/// Memory or sled storage, chosen from [`StorageConfig`]
#[derive(Debug, Clone)]
pub enum StorageBackend {
    Memory(MemoryStorage),
    Sled(SledStorage),
}

impl StorageBackend {
    /// Open the backend selected by `config`
    pub fn open(config: &StorageConfig) -> StoreResult<Self> {
        if config.is_memory() {
            Ok(Self::memory())
        } else {
            Ok(Self::Sled(SledStorage::new(config)?))
        }
    }

    /// Empty in-memory backend
    pub fn memory() -> Self {
        Self::Memory(MemoryStorage::new())
    }

    /// Backend name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Sled(_) => "sled",
        }
    }

    /// User directory living next to the ledger; memory backends get an empty one
    pub fn user_directory(&self) -> StoreResult<Arc<dyn UserDirectory>> {
        match self {
            Self::Memory(_) => Ok(Arc::new(MemoryUserDirectory::new())),
            Self::Sled(s) => Ok(Arc::new(s.user_directory()?)),
        }
    }

    /// Flush pending writes; no-op for memory
    pub fn flush(&self) -> StoreResult<()> {
        match self {
            Self::Memory(_) => Ok(()),
            Self::Sled(s) => s.flush(),
        }
    }
}

#[async_trait]
impl ReferralStorage for StorageBackend {
    async fn insert_code(&self, code: &ReferralCode) -> StoreResult<()> {
        match self {
            Self::Memory(s) => s.insert_code(code).await,
            Self::Sled(s) => s.insert_code(code).await,
        }
    }

    async fn find_code_by_value(&self, code: &str) -> StoreResult<Option<ReferralCode>> {
        match self {
            Self::Memory(s) => s.find_code_by_value(code).await,
            Self::Sled(s) => s.find_code_by_value(code).await,
        }
    }

    async fn get_code(&self, code_id: &CodeId) -> StoreResult<Option<ReferralCode>> {
        match self {
            Self::Memory(s) => s.get_code(code_id).await,
            Self::Sled(s) => s.get_code(code_id).await,
        }
    }

    async fn decrement_remaining_uses(&self, code_id: &CodeId) -> StoreResult<Option<ReferralCode>> {
        match self {
            Self::Memory(s) => s.decrement_remaining_uses(code_id).await,
            Self::Sled(s) => s.decrement_remaining_uses(code_id).await,
        }
    }

    async fn restore_remaining_use(&self, code_id: &CodeId) -> StoreResult<Option<ReferralCode>> {
        match self {
            Self::Memory(s) => s.restore_remaining_use(code_id).await,
            Self::Sled(s) => s.restore_remaining_use(code_id).await,
        }
    }

    async fn set_code_active(&self, code_id: &CodeId, active: bool) -> StoreResult<Option<ReferralCode>> {
        match self {
            Self::Memory(s) => s.set_code_active(code_id, active).await,
            Self::Sled(s) => s.set_code_active(code_id, active).await,
        }
    }

    async fn insert_referral(&self, referral: &Referral) -> StoreResult<()> {
        match self {
            Self::Memory(s) => s.insert_referral(referral).await,
            Self::Sled(s) => s.insert_referral(referral).await,
        }
    }

    async fn get_referral(&self, referral_id: &ReferralId) -> StoreResult<Option<Referral>> {
        match self {
            Self::Memory(s) => s.get_referral(referral_id).await,
            Self::Sled(s) => s.get_referral(referral_id).await,
        }
    }

    async fn find_referral_by_invitee(&self, invitee_id: &UserId) -> StoreResult<Option<Referral>> {
        match self {
            Self::Memory(s) => s.find_referral_by_invitee(invitee_id).await,
            Self::Sled(s) => s.find_referral_by_invitee(invitee_id).await,
        }
    }

    async fn list_referrals_by_inviter(&self, inviter_id: &UserId) -> StoreResult<Vec<Referral>> {
        match self {
            Self::Memory(s) => s.list_referrals_by_inviter(inviter_id).await,
            Self::Sled(s) => s.list_referrals_by_inviter(inviter_id).await,
        }
    }

    async fn attach_invitee(&self, referral_id: &ReferralId, invitee_id: &UserId) -> StoreResult<Referral> {
        match self {
            Self::Memory(s) => s.attach_invitee(referral_id, invitee_id).await,
            Self::Sled(s) => s.attach_invitee(referral_id, invitee_id).await,
        }
    }

    async fn list_rewards_for_user(&self, user_id: &UserId) -> StoreResult<Vec<ReferralReward>> {
        match self {
            Self::Memory(s) => s.list_rewards_for_user(user_id).await,
            Self::Sled(s) => s.list_rewards_for_user(user_id).await,
        }
    }

    async fn credits_of(&self, user_id: &UserId) -> StoreResult<i64> {
        match self {
            Self::Memory(s) => s.credits_of(user_id).await,
            Self::Sled(s) => s.credits_of(user_id).await,
        }
    }

    async fn applied_rewards_in_month(&self, user_id: &UserId, now: DateTime<Utc>) -> StoreResult<i64> {
        match self {
            Self::Memory(s) => s.applied_rewards_in_month(user_id, now).await,
            Self::Sled(s) => s.applied_rewards_in_month(user_id, now).await,
        }
    }

    async fn transaction<T, F>(&self, body: F) -> ReferralResult<T>
    where
        T: Send,
        F: Fn(&mut dyn LedgerTx) -> ReferralResult<T> + Send + Sync,
    {
        match self {
            Self::Memory(s) => s.transaction(body).await,
            Self::Sled(s) => s.transaction(body).await,
        }
    }
}
