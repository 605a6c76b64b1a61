//! Sled persistent storage
//!
//! Documents are stored as JSON in one tree per collection, with separate
//! trees for the unique indexes. Counters (credits, monthly applied-reward counts)
//! are big-endian `i64` values.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionResult, TransactionalTree, UnabortableTransactionError,
};
use sled::{IVec, Transactional};
use std::path::Path;
use tracing::debug;

use super::{month_count_key, LedgerTx, ReferralStorage, StorageConfig};
use crate::directory::SledUserDirectory;
use crate::error::{ReferralError, ReferralResult, StoreError, StoreResult};
use crate::types::{CodeId, Referral, ReferralCode, ReferralId, ReferralReward, UserId};

/// Tree names
const CODES_TREE: &str = "codes";
const CODE_INDEX_TREE: &str = "code_index";
const REFERRALS_TREE: &str = "referrals";
const INVITEE_INDEX_TREE: &str = "invitee_index";
const REWARDS_TREE: &str = "rewards";
const CREDITS_TREE: &str = "credits";
const MONTHLY_COUNTS_TREE: &str = "monthly_reward_counts";
const USERS_TREE: &str = "users";

/// Sled persistent storage
#[derive(Debug, Clone)]
pub struct SledStorage {
    db: sled::Db,
    codes: sled::Tree,
    code_index: sled::Tree,
    referrals: sled::Tree,
    invitee_index: sled::Tree,
    rewards: sled::Tree,
    credits: sled::Tree,
    monthly_counts: sled::Tree,
}

impl SledStorage {
    /// Open storage from configuration
    pub fn new(config: &StorageConfig) -> StoreResult<Self> {
        Self::open(&config.data_dir)
    }

    /// Open or create a sled database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)
            .map_err(|e| StoreError::Storage(format!("Failed to open sled db: {}", e)))?;

        Ok(Self {
            codes: open_tree(&db, CODES_TREE)?,
            code_index: open_tree(&db, CODE_INDEX_TREE)?,
            referrals: open_tree(&db, REFERRALS_TREE)?,
            invitee_index: open_tree(&db, INVITEE_INDEX_TREE)?,
            rewards: open_tree(&db, REWARDS_TREE)?,
            credits: open_tree(&db, CREDITS_TREE)?,
            monthly_counts: open_tree(&db, MONTHLY_COUNTS_TREE)?,
            db,
        })
    }

    /// User profiles kept in the same database
    pub fn user_directory(&self) -> StoreResult<SledUserDirectory> {
        Ok(SledUserDirectory::new(open_tree(&self.db, USERS_TREE)?))
    }

    /// Flush to disk
    pub fn flush(&self) -> StoreResult<()> {
        self.db
            .flush()
            .map_err(|e| StoreError::Storage(format!("Failed to flush db: {}", e)))?;
        Ok(())
    }

    // ==================== Helpers ====================

    fn serialize<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn reward_prefix(user_id: &UserId) -> Vec<u8> {
        let mut key = user_id.as_str().as_bytes().to_vec();
        key.push(0);
        key
    }

    fn reward_key(reward: &ReferralReward) -> Vec<u8> {
        let mut key = Self::reward_prefix(&reward.user_id);
        key.extend_from_slice(reward.id.as_str().as_bytes());
        key
    }

    /// Read-modify-write a code with compare-and-swap, retrying on contention.
    ///
    /// `apply` returns false when its precondition does not hold.
    fn update_code<F>(&self, code_id: &CodeId, apply: F) -> StoreResult<Option<ReferralCode>>
    where
        F: Fn(&mut ReferralCode) -> bool,
    {
        let key = code_id.as_str().as_bytes();
        loop {
            let Some(current) = self.codes.get(key)? else {
                return Ok(None);
            };
            let mut code: ReferralCode = Self::deserialize(&current)?;
            if !apply(&mut code) {
                return Ok(None);
            }
            let updated = Self::serialize(&code)?;
            match self.codes.compare_and_swap(key, Some(current), Some(updated))? {
                Ok(()) => return Ok(Some(code)),
                Err(_) => debug!(code_id = %code_id, "Code changed concurrently, retrying update"),
            }
        }
    }
}

fn open_tree(db: &sled::Db, name: &str) -> StoreResult<sled::Tree> {
    db.open_tree(name)
        .map_err(|e| StoreError::Storage(format!("Failed to open {} tree: {}", name, e)))
}

fn decode_i64(bytes: &IVec) -> StoreResult<i64> {
    let raw = <[u8; 8]>::try_from(&bytes[..])
        .map_err(|_| StoreError::Serialization("counter is not 8 bytes".to_string()))?;
    Ok(i64::from_be_bytes(raw))
}

fn from_unabortable(err: UnabortableTransactionError) -> StoreError {
    match err {
        UnabortableTransactionError::Conflict => StoreError::TxConflict,
        UnabortableTransactionError::Storage(e) => e.into(),
    }
}

fn from_tx_error(err: TransactionError<StoreError>) -> StoreError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => e.into(),
    }
}

/// Reward transaction over the referral, reward and counter trees
struct SledTx<'a> {
    referrals: &'a TransactionalTree,
    rewards: &'a TransactionalTree,
    credits: &'a TransactionalTree,
    monthly_counts: &'a TransactionalTree,
}

impl SledTx<'_> {
    fn add_to_counter(tree: &TransactionalTree, key: &[u8], amount: i64) -> StoreResult<i64> {
        let current = match tree.get(key).map_err(from_unabortable)? {
            Some(bytes) => decode_i64(&bytes)?,
            None => 0,
        };
        let next = current + amount;
        tree.insert(key, &next.to_be_bytes()[..])
            .map_err(from_unabortable)?;
        Ok(next)
    }
}

impl LedgerTx for SledTx<'_> {
    fn get_referral(&self, referral_id: &ReferralId) -> StoreResult<Option<Referral>> {
        match self
            .referrals
            .get(referral_id.as_str().as_bytes())
            .map_err(from_unabortable)?
        {
            Some(bytes) => Ok(Some(SledStorage::deserialize(&bytes)?)),
            None => Ok(None),
        }
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
        let value = SledStorage::serialize(referral)?;
        self.referrals
            .insert(referral.id.as_str().as_bytes(), value)
            .map_err(from_unabortable)?;
        Ok(())
    }

    fn applied_rewards_in_month(&self, user_id: &UserId, now: DateTime<Utc>) -> StoreResult<i64> {
        let key = month_count_key(user_id, now);
        match self
            .monthly_counts
            .get(key.as_bytes())
            .map_err(from_unabortable)?
        {
            Some(bytes) => decode_i64(&bytes),
            None => Ok(0),
        }
    }

    fn record_reward(&mut self, reward: &ReferralReward) -> StoreResult<()> {
        let value = SledStorage::serialize(reward)?;
        self.rewards
            .insert(SledStorage::reward_key(reward), value)
            .map_err(from_unabortable)?;

        if reward.counts_toward_monthly_cap() {
            let key = month_count_key(&reward.user_id, reward.created_at);
            Self::add_to_counter(self.monthly_counts, key.as_bytes(), 1)?;
        }
        Ok(())
    }

    fn increment_credits(&mut self, user_id: &UserId, amount: i64) -> StoreResult<i64> {
        Self::add_to_counter(self.credits, user_id.as_str().as_bytes(), amount)
    }
}

#[async_trait]
impl ReferralStorage for SledStorage {
    // ==================== Codes ====================

    async fn insert_code(&self, code: &ReferralCode) -> StoreResult<()> {
        let value = Self::serialize(code)?;
        let result: TransactionResult<(), StoreError> = (&self.codes, &self.code_index)
            .transaction(|(codes, code_index)| -> ConflictableTransactionResult<(), StoreError> {
                if code_index.get(code.code.as_bytes())?.is_some() {
                    return Err(ConflictableTransactionError::Abort(StoreError::duplicate(
                        "ReferralCode",
                        code.code.as_str(),
                    )));
                }
                code_index.insert(code.code.as_bytes(), code.id.as_str().as_bytes())?;
                codes.insert(code.id.as_str().as_bytes(), value.as_slice())?;
                Ok(())
            });
        result.map_err(from_tx_error)
    }

    async fn find_code_by_value(&self, code: &str) -> StoreResult<Option<ReferralCode>> {
        match self.code_index.get(code.as_bytes())? {
            Some(code_id) => match self.codes.get(&code_id)? {
                Some(bytes) => Ok(Some(Self::deserialize(&bytes)?)),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    async fn get_code(&self, code_id: &CodeId) -> StoreResult<Option<ReferralCode>> {
        match self.codes.get(code_id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(Self::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn decrement_remaining_uses(&self, code_id: &CodeId) -> StoreResult<Option<ReferralCode>> {
        self.update_code(code_id, |code| code.try_consume_use(Utc::now()))
    }

    async fn restore_remaining_use(&self, code_id: &CodeId) -> StoreResult<Option<ReferralCode>> {
        self.update_code(code_id, |code| code.restore_use(Utc::now()))
    }

    async fn set_code_active(&self, code_id: &CodeId, active: bool) -> StoreResult<Option<ReferralCode>> {
        self.update_code(code_id, |code| {
            code.set_active(active, Utc::now());
            true
        })
    }

    // ==================== Referrals ====================

    async fn insert_referral(&self, referral: &Referral) -> StoreResult<()> {
        let value = Self::serialize(referral)?;
        let result: TransactionResult<(), StoreError> = (&self.referrals, &self.invitee_index)
            .transaction(|(referrals, invitee_index)| -> ConflictableTransactionResult<(), StoreError> {
                if let Some(invitee) = &referral.invitee_id {
                    if invitee_index.get(invitee.as_str().as_bytes())?.is_some() {
                        return Err(ConflictableTransactionError::Abort(StoreError::duplicate(
                            "Referral",
                            invitee.as_str(),
                        )));
                    }
                    invitee_index.insert(
                        invitee.as_str().as_bytes(),
                        referral.id.as_str().as_bytes(),
                    )?;
                }
                referrals.insert(referral.id.as_str().as_bytes(), value.as_slice())?;
                Ok(())
            });
        result.map_err(from_tx_error)
    }

    async fn get_referral(&self, referral_id: &ReferralId) -> StoreResult<Option<Referral>> {
        match self.referrals.get(referral_id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(Self::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn find_referral_by_invitee(&self, invitee_id: &UserId) -> StoreResult<Option<Referral>> {
        match self.invitee_index.get(invitee_id.as_str().as_bytes())? {
            Some(referral_id) => match self.referrals.get(&referral_id)? {
                Some(bytes) => Ok(Some(Self::deserialize(&bytes)?)),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    async fn list_referrals_by_inviter(&self, inviter_id: &UserId) -> StoreResult<Vec<Referral>> {
        let mut referrals = Vec::new();
        for item in self.referrals.iter() {
            let (_, bytes) = item?;
            let referral: Referral = Self::deserialize(&bytes)?;
            if referral.inviter_id == *inviter_id {
                referrals.push(referral);
            }
        }
        referrals.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(referrals)
    }

    async fn attach_invitee(&self, referral_id: &ReferralId, invitee_id: &UserId) -> StoreResult<Referral> {
        let result: TransactionResult<Referral, StoreError> = (&self.referrals, &self.invitee_index)
            .transaction(|(referrals, invitee_index)| -> ConflictableTransactionResult<Referral, StoreError> {
                if invitee_index.get(invitee_id.as_str().as_bytes())?.is_some() {
                    return Err(ConflictableTransactionError::Abort(StoreError::duplicate(
                        "Referral",
                        invitee_id.as_str(),
                    )));
                }
                let Some(bytes) = referrals.get(referral_id.as_str().as_bytes())? else {
                    return Err(ConflictableTransactionError::Abort(StoreError::not_found(
                        "Referral",
                        referral_id.as_str(),
                    )));
                };
                let mut referral: Referral =
                    Self::deserialize(&bytes).map_err(ConflictableTransactionError::Abort)?;
                if referral.invitee_id.is_some() {
                    return Err(ConflictableTransactionError::Abort(StoreError::Precondition(
                        format!("referral {} already has an invitee", referral_id),
                    )));
                }
                referral.invitee_id = Some(invitee_id.clone());
                referral.updated_at = Utc::now();
                let value = Self::serialize(&referral).map_err(ConflictableTransactionError::Abort)?;

                referrals.insert(referral_id.as_str().as_bytes(), value)?;
                invitee_index.insert(
                    invitee_id.as_str().as_bytes(),
                    referral_id.as_str().as_bytes(),
                )?;
                Ok(referral)
            });
        result.map_err(from_tx_error)
    }

    // ==================== Rewards & credits ====================

    async fn list_rewards_for_user(&self, user_id: &UserId) -> StoreResult<Vec<ReferralReward>> {
        let mut rewards = Vec::new();
        for item in self.rewards.scan_prefix(Self::reward_prefix(user_id)) {
            let (_, bytes) = item?;
            rewards.push(Self::deserialize::<ReferralReward>(&bytes)?);
        }
        rewards.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rewards)
    }

    async fn credits_of(&self, user_id: &UserId) -> StoreResult<i64> {
        match self.credits.get(user_id.as_str().as_bytes())? {
            Some(bytes) => decode_i64(&bytes),
            None => Ok(0),
        }
    }

    async fn applied_rewards_in_month(&self, user_id: &UserId, now: DateTime<Utc>) -> StoreResult<i64> {
        let key = month_count_key(user_id, now);
        match self.monthly_counts.get(key.as_bytes())? {
            Some(bytes) => decode_i64(&bytes),
            None => Ok(0),
        }
    }

    // ==================== Transactions ====================

    async fn transaction<T, F>(&self, body: F) -> ReferralResult<T>
    where
        T: Send,
        F: Fn(&mut dyn LedgerTx) -> ReferralResult<T> + Send + Sync,
    {
        let result: TransactionResult<T, ReferralError> = (
            &self.referrals,
            &self.rewards,
            &self.credits,
            &self.monthly_counts,
        )
            .transaction(
                |(referrals, rewards, credits, monthly_counts)| -> ConflictableTransactionResult<T, ReferralError> {
                    let mut tx = SledTx {
                        referrals,
                        rewards,
                        credits,
                        monthly_counts,
                    };
                    body(&mut tx).map_err(|err| match err {
                        ReferralError::Store(StoreError::TxConflict) => {
                            debug!("Ledger transaction conflict, retrying");
                            ConflictableTransactionError::Conflict
                        }
                        other => ConflictableTransactionError::Abort(other),
                    })
                },
            );

        match result {
            Ok(value) => Ok(value),
            Err(TransactionError::Abort(err)) => Err(err),
            Err(TransactionError::Storage(err)) => Err(StoreError::from(err).into()),
        }
    }
}
