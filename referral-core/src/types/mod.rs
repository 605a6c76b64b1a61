//! Referral ledger documents

mod code;
mod common;
mod referral;
mod reward;

pub use code::*;
pub use common::*;
pub use referral::*;
pub use reward::*;
