//! Referral Ledger Configuration
//!
//! Reward amounts and code generation settings.
//! Supports loading from environment variables with REFERRAL_ prefix.

use serde::{Deserialize, Serialize};
use std::env;

use crate::token::DEFAULT_CODE_LENGTH;

/// Credits granted per completed referral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardPolicy {
    /// Inviter reward per completion
    pub inviter_reward: i64,
    /// Invitee reward per completion
    pub invitee_reward: i64,
    /// Inviter rewards stop once this month's total reaches the cap.
    /// The total counts every applied reward row of the user, in either role,
    /// at `inviter_reward` each.
    pub inviter_monthly_cap: i64,
}

impl Default for RewardPolicy {
    fn default() -> Self {
        Self {
            inviter_reward: 25,
            invitee_reward: 50,
            inviter_monthly_cap: 100,
        }
    }
}

impl RewardPolicy {
    /// Load policy from environment variables
    ///
    /// Environment variables:
    /// - REFERRAL_INVITER_REWARD: credits per completion for the inviter
    /// - REFERRAL_INVITEE_REWARD: credits per completion for the invitee
    /// - REFERRAL_INVITER_MONTHLY_CAP: monthly inviter cap
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            inviter_reward: env_parse("REFERRAL_INVITER_REWARD").unwrap_or(defaults.inviter_reward),
            invitee_reward: env_parse("REFERRAL_INVITEE_REWARD").unwrap_or(defaults.invitee_reward),
            inviter_monthly_cap: env_parse("REFERRAL_INVITER_MONTHLY_CAP")
                .unwrap_or(defaults.inviter_monthly_cap),
        }
    }

    /// Monthly total of a user with `applied_rows` applied reward rows this month
    pub fn month_total(&self, applied_rows: i64) -> i64 {
        applied_rows.saturating_mul(self.inviter_reward)
    }

    /// Whether an inviter with `month_total` credits this month may still be rewarded
    pub fn inviter_eligible(&self, month_total: i64) -> bool {
        month_total < self.inviter_monthly_cap
    }

    /// Validate the policy
    pub fn validate(&self) -> Result<(), String> {
        if self.inviter_reward < 0 || self.invitee_reward < 0 {
            return Err("Reward amounts must not be negative".to_string());
        }
        if self.inviter_monthly_cap < 0 {
            return Err("Inviter monthly cap must not be negative".to_string());
        }
        Ok(())
    }
}

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralConfig {
    /// Reward amounts
    pub policy: RewardPolicy,
    /// Generated code length
    #[serde(default = "default_code_length")]
    pub code_length: usize,
    /// Attempts before code creation gives up on collisions
    #[serde(default = "default_max_code_attempts")]
    pub max_code_attempts: u32,
}

fn default_code_length() -> usize {
    DEFAULT_CODE_LENGTH
}

fn default_max_code_attempts() -> u32 {
    5
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            policy: RewardPolicy::default(),
            code_length: default_code_length(),
            max_code_attempts: default_max_code_attempts(),
        }
    }
}

impl ReferralConfig {
    /// Load configuration from environment variables
    ///
    /// Reads the reward policy plus:
    /// - REFERRAL_CODE_LENGTH: generated code length
    /// - REFERRAL_MAX_CODE_ATTEMPTS: collision retries on code creation
    pub fn from_env() -> Self {
        Self {
            policy: RewardPolicy::from_env(),
            code_length: env_parse("REFERRAL_CODE_LENGTH").unwrap_or_else(default_code_length),
            max_code_attempts: env_parse("REFERRAL_MAX_CODE_ATTEMPTS")
                .unwrap_or_else(default_max_code_attempts),
        }
    }

    /// Replace the reward policy
    pub fn with_policy(mut self, policy: RewardPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        self.policy.validate()?;
        if self.code_length == 0 {
            return Err("Code length must be positive".to_string());
        }
        if self.max_code_attempts == 0 {
            return Err("At least one code generation attempt is required".to_string());
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
