//! Reward ledger row

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::common::{ReferralId, RewardId, UserId};

/// Reward type for credit grants
pub const REWARD_TYPE_CREDIT: &str = "credit";

/// Metadata key carrying the completion event type
pub const META_EVENT_TYPE: &str = "event_type";

/// Reward row status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardStatus {
    #[default]
    Applied,
    Failed,
    Reverted,
}

/// Which side of the referral received the reward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardRole {
    Inviter,
    Invitee,
}

impl std::fmt::Display for RewardRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inviter => write!(f, "inviter"),
            Self::Invitee => write!(f, "invitee"),
        }
    }
}

/// Append-only record of one credit grant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralReward {
    /// Row ID
    pub id: RewardId,
    /// Referral that produced the grant
    pub referral_id: Option<ReferralId>,
    /// Receiver
    pub user_id: UserId,
    /// Reward type (`credit`)
    pub reward_type: String,
    /// Receiver side
    pub role: RewardRole,
    /// Amount in credits
    pub amount: i64,
    /// Row status
    pub status: RewardStatus,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Created at
    pub created_at: DateTime<Utc>,
}

impl ReferralReward {
    /// Create an applied credit grant
    pub fn credit(
        referral_id: ReferralId,
        user_id: UserId,
        role: RewardRole,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RewardId::generate(),
            referral_id: Some(referral_id),
            user_id,
            reward_type: REWARD_TYPE_CREDIT.to_string(),
            role,
            amount,
            status: RewardStatus::Applied,
            metadata: HashMap::new(),
            created_at: now,
        }
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Applied rows of either role count toward the receiver's monthly cap
    pub fn counts_toward_monthly_cap(&self) -> bool {
        self.status == RewardStatus::Applied
    }
}
