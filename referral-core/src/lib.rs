//! Referral Core - Referral Reward Ledger
//!
//! This crate implements the referral ledger of the skill-exchange platform:
//! inviters create codes, invitees redeem them, and a completion event (for
//! example a verified email) credits both sides exactly once.
//!
//! # Architecture
//!
//! - **Token Generator**: base62 codes from an injected RNG
//! - **Code Registry**: code creation with collision retry, conditional usage decrement
//! - **Referral Ledger**: ordered redemption checks, anonymous referral claiming
//! - **Reward Engine**: idempotent reward transaction with a monthly inviter cap
//! - **Storage**: memory and sled backends behind [`ReferralStorage`]
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use referral_core::{
//!     CodeOptions, MemoryStorage, MemoryUserDirectory, RedeemRequest, ReferralConfig,
//!     ReferralService, UserId,
//! };
//!
//! async fn example() {
//!     let service = ReferralService::new(
//!         Arc::new(MemoryStorage::new()),
//!         Arc::new(MemoryUserDirectory::new()),
//!         ReferralConfig::default(),
//!     );
//!
//!     let inviter = UserId::new("alice");
//!     let code = service.create_code(&inviter, CodeOptions::default()).await.unwrap();
//!
//!     let invitee = UserId::new("bob");
//!     service
//!         .redeem_code(RedeemRequest::new(Some(invitee.clone()), code.code))
//!         .await
//!         .unwrap();
//!
//!     let outcome = service
//!         .complete_referral_for_invitee(&invitee, "email_verified")
//!         .await
//!         .unwrap();
//!     assert_eq!(outcome.processed, 1);
//! }
//! ```

pub mod config;
pub mod directory;
pub mod error;
pub mod services;
pub mod storage;
pub mod token;
pub mod types;

pub use config::{ReferralConfig, RewardPolicy};
pub use directory::{seed_from_file, MemoryUserDirectory, SledUserDirectory, UserDirectory, UserProfile};
pub use error::{ErrorKind, ReferralError, ReferralResult, StoreError, StoreResult};
pub use services::{
    CodeOptions, CodeRegistry, CompletionOutcome, InviterValidation, RedeemRequest,
    ReferralBonus, ReferralLedger, ReferralService, RewardEngine, SkipReason, UserReferrals,
};
pub use storage::{LedgerTx, MemoryStorage, ReferralStorage, SledStorage, StorageBackend, StorageConfig};
pub use token::{TokenGenerator, DEFAULT_CODE_LENGTH};
pub use types::*;
