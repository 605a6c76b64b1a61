//! Referral document

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::code::ReferralCode;
use super::common::{CodeId, ReferralId, RewardId, UserId};

/// Referral lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferralStatus {
    /// Redeemed, waiting for a completion event
    #[default]
    Pending,
    /// Rewards applied
    Completed,
    /// Rejected by moderation
    Rejected,
    /// Held for review
    OnHold,
}

impl std::fmt::Display for ReferralStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Completed => write!(f, "completed"),
            Self::Rejected => write!(f, "rejected"),
            Self::OnHold => write!(f, "on_hold"),
        }
    }
}

/// Where a redemption came from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_fingerprint: Option<String>,
}

/// One redemption of a referral code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Referral {
    /// Document ID
    pub id: ReferralId,
    /// Redeemed code
    pub code_id: CodeId,
    /// Code owner
    pub inviter_id: UserId,
    /// Redeeming user; `None` until an anonymous redemption is claimed
    pub invitee_id: Option<UserId>,
    /// Invitee email, when known before signup
    pub invitee_email: Option<String>,
    /// Lifecycle status
    pub status: ReferralStatus,
    /// Idempotency guard for reward application
    pub reward_applied: bool,
    /// Invitee reward row written on completion
    pub reward_record_id: Option<RewardId>,
    /// Redemption source
    #[serde(default)]
    pub source: ReferralSource,
    /// Created at
    pub created_at: DateTime<Utc>,
    /// Updated at
    pub updated_at: DateTime<Utc>,
}

impl Referral {
    /// Create a pending referral for a code
    pub fn pending(code: &ReferralCode, invitee_id: Option<UserId>, source: ReferralSource) -> Self {
        let now = Utc::now();
        Self {
            id: ReferralId::generate(),
            code_id: code.id.clone(),
            inviter_id: code.inviter_id.clone(),
            invitee_id,
            invitee_email: None,
            status: ReferralStatus::Pending,
            reward_applied: false,
            reward_record_id: None,
            source,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the referral waits for a completion event
    pub fn is_pending(&self) -> bool {
        self.status == ReferralStatus::Pending
    }

    /// Whether no invitee is attached yet
    pub fn is_anonymous(&self) -> bool {
        self.invitee_id.is_none()
    }

    /// Mark completed with rewards applied
    pub fn mark_completed(&mut self, reward_record_id: Option<RewardId>, now: DateTime<Utc>) {
        self.status = ReferralStatus::Completed;
        self.reward_applied = true;
        self.reward_record_id = reward_record_id;
        self.updated_at = now;
    }
}
