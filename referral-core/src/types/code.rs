//! Referral code document

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::common::{CodeId, UserId};

/// Usage-limited, optionally expiring referral code owned by an inviter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralCode {
    /// Document ID
    pub id: CodeId,
    /// 8-char base62 code, unique
    pub code: String,
    /// Owner of the code
    pub inviter_id: UserId,
    /// Expiry, if any
    pub expires_at: Option<DateTime<Utc>>,
    /// Maximum redemptions, 0 = unlimited
    pub usage_limit: u32,
    /// Redemptions left; only meaningful when `usage_limit > 0`
    pub remaining_uses: u32,
    /// Deactivated codes cannot be redeemed
    pub active: bool,
    /// Marketing campaign tag
    pub campaign: Option<String>,
    /// Created at
    pub created_at: DateTime<Utc>,
    /// Updated at
    pub updated_at: DateTime<Utc>,
}

impl ReferralCode {
    /// Create a new active code
    pub fn new(
        code: impl Into<String>,
        inviter_id: UserId,
        usage_limit: u32,
        expires_at: Option<DateTime<Utc>>,
        campaign: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: CodeId::generate(),
            code: code.into(),
            inviter_id,
            expires_at,
            usage_limit,
            remaining_uses: usage_limit,
            active: true,
            campaign,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the code has an enforced usage limit
    pub fn has_usage_limit(&self) -> bool {
        self.usage_limit > 0
    }

    /// Whether the code expired before `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |expires_at| expires_at < now)
    }

    /// Whether a limited code has no uses left
    pub fn is_exhausted(&self) -> bool {
        self.has_usage_limit() && self.remaining_uses == 0
    }

    /// Consume one use if `remaining_uses > 0` and the code is active
    pub fn try_consume_use(&mut self, now: DateTime<Utc>) -> bool {
        if !self.active || self.remaining_uses == 0 {
            return false;
        }
        self.remaining_uses -= 1;
        self.updated_at = now;
        true
    }

    /// Give back one use, never above `usage_limit`
    pub fn restore_use(&mut self, now: DateTime<Utc>) -> bool {
        if self.remaining_uses >= self.usage_limit {
            return false;
        }
        self.remaining_uses += 1;
        self.updated_at = now;
        true
    }

    /// Set the active flag
    pub fn set_active(&mut self, active: bool, now: DateTime<Utc>) {
        self.active = active;
        self.updated_at = now;
    }
}
