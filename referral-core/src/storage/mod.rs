//! Referral ledger storage
//!
//! Persistence for codes, referrals, reward rows and credit balances.
//!
//! Contended state is protected by storage primitives only:
//! - code decrement is a conditional compare-and-swap
//! - code values and invitees are unique indexes checked at insert
//! - reward application runs inside a [`LedgerTx`] transaction that commits
//!   every write or none

pub mod backend;
pub mod memory;
pub mod sled;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::env;

use crate::error::{ReferralResult, StoreResult};
use crate::types::{month_key, CodeId, ReferralCode, Referral, ReferralId, ReferralReward, UserId};

/// Referral ledger storage interface
#[async_trait]
pub trait ReferralStorage: Send + Sync {
    // ==================== Codes ====================

    /// Insert a new code; fails with `Duplicate` when the code value exists
    async fn insert_code(&self, code: &ReferralCode) -> StoreResult<()>;

    /// Look up a code by its value
    async fn find_code_by_value(&self, code: &str) -> StoreResult<Option<ReferralCode>>;

    /// Look up a code by document ID
    async fn get_code(&self, code_id: &CodeId) -> StoreResult<Option<ReferralCode>>;

    /// Consume one use when `remaining_uses > 0` and the code is active.
    ///
    /// Returns the updated code, or `None` when the condition does not hold.
    async fn decrement_remaining_uses(&self, code_id: &CodeId) -> StoreResult<Option<ReferralCode>>;

    /// Give back one use consumed by a redemption that failed afterwards
    async fn restore_remaining_use(&self, code_id: &CodeId) -> StoreResult<Option<ReferralCode>>;

    /// Set the active flag; `None` when the code does not exist
    async fn set_code_active(&self, code_id: &CodeId, active: bool) -> StoreResult<Option<ReferralCode>>;

    // ==================== Referrals ====================

    /// Insert a referral; fails with `Duplicate` when its invitee already has one
    async fn insert_referral(&self, referral: &Referral) -> StoreResult<()>;

    /// Get a referral by ID
    async fn get_referral(&self, referral_id: &ReferralId) -> StoreResult<Option<Referral>>;

    /// Get the referral of an invitee
    async fn find_referral_by_invitee(&self, invitee_id: &UserId) -> StoreResult<Option<Referral>>;

    /// List referrals created from an inviter's codes, newest first
    async fn list_referrals_by_inviter(&self, inviter_id: &UserId) -> StoreResult<Vec<Referral>>;

    /// Attach an invitee to an anonymous referral.
    ///
    /// Fails with `NotFound` for an unknown referral, `Precondition` when the
    /// referral already has an invitee, and `Duplicate` when the user already
    /// has another referral.
    async fn attach_invitee(&self, referral_id: &ReferralId, invitee_id: &UserId) -> StoreResult<Referral>;

    // ==================== Rewards & credits ====================

    /// List reward rows of a user, oldest first
    async fn list_rewards_for_user(&self, user_id: &UserId) -> StoreResult<Vec<ReferralReward>>;

    /// Current credit balance of a user
    async fn credits_of(&self, user_id: &UserId) -> StoreResult<i64>;

    /// Number of applied reward rows of `user_id`, in either role, in the month containing `now`
    async fn applied_rewards_in_month(&self, user_id: &UserId, now: DateTime<Utc>) -> StoreResult<i64>;

    // ==================== Transactions ====================

    /// Run `body` inside a serializable transaction.
    ///
    /// Writes made through the [`LedgerTx`] become visible only if `body`
    /// returns `Ok`. The body may run more than once when the backend retries
    /// on conflict, so it must not have side effects outside the context.
    async fn transaction<T, F>(&self, body: F) -> ReferralResult<T>
    where
        T: Send,
        F: Fn(&mut dyn LedgerTx) -> ReferralResult<T> + Send + Sync;
}

/// Transaction context for reward application
pub trait LedgerTx {
    /// Read a referral as of this transaction
    fn get_referral(&self, referral_id: &ReferralId) -> StoreResult<Option<Referral>>;

    /// Overwrite a referral; its invitee must not change
    fn put_referral(&mut self, referral: &Referral) -> StoreResult<()>;

    /// Number of applied reward rows of `user_id` in the month containing `now`,
    /// including rows recorded earlier in this transaction
    fn applied_rewards_in_month(&self, user_id: &UserId, now: DateTime<Utc>) -> StoreResult<i64>;

    /// Append a reward row; applied rows bump the user's monthly counter
    fn record_reward(&mut self, reward: &ReferralReward) -> StoreResult<()>;

    /// Add `amount` to a user's balance, returning the new balance
    fn increment_credits(&mut self, user_id: &UserId, amount: i64) -> StoreResult<i64>;
}

/// Key of a user's applied-reward counter for the month containing `at`
pub(crate) fn month_count_key(user_id: &UserId, at: DateTime<Utc>) -> String {
    format!("{}:{}", user_id, month_key(at))
}

/// Storage configuration
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    /// Sled data directory; empty selects the memory backend
    pub data_dir: String,
}

impl StorageConfig {
    /// Sled storage in `data_dir`
    pub fn sled(data_dir: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// In-memory storage
    pub fn memory() -> Self {
        Self::default()
    }

    /// Load from REFERRAL_DATA_DIR
    pub fn from_env() -> Self {
        Self {
            data_dir: env::var("REFERRAL_DATA_DIR").unwrap_or_default(),
        }
    }

    /// Whether the memory backend is selected
    pub fn is_memory(&self) -> bool {
        self.data_dir.trim().is_empty()
    }
}

pub use backend::StorageBackend;
pub use memory::MemoryStorage;
pub use self::sled::SledStorage;
