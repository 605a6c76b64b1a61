//! Referral Ledger Error Types
//!
//! Storage failures and domain rejections for the referral ledger.

use thiserror::Error;

/// Storage Result type
pub type StoreResult<T> = Result<T, StoreError>;

/// Referral Result type
pub type ReferralResult<T> = Result<T, ReferralError>;

/// Storage Error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Unique index violation
    #[error("Duplicate {entity}: {key}")]
    Duplicate { entity: String, key: String },

    /// Entity not found
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    /// Conditional write rejected
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Concurrent transaction touched the same keys; the transaction is retried
    #[error("Transaction conflict")]
    TxConflict,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Backend error
    #[error("Storage error: {0}")]
    Storage(String),
}

impl StoreError {
    /// Create a duplicate error
    pub fn duplicate(entity: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Duplicate {
            entity: entity.into(),
            key: key.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Error category, used by the HTTP layer to pick a status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input from the client (invalid, expired or inactive code, self referral...)
    Validation,
    /// Contended resource exhausted (usage limit, code generation retries)
    Conflict,
    /// Ledger state moved under a running operation
    Consistency,
    /// Caller is not allowed to touch the resource
    Authorization,
    /// Storage or serialization failure
    Internal,
}

/// Referral Ledger Error
#[derive(Error, Debug)]
pub enum ReferralError {
    /// No code with this value
    #[error("Invalid referral code: {0}")]
    InvalidCode(String),

    /// Code has been deactivated
    #[error("Referral code not active: {0}")]
    InactiveCode(String),

    /// Code is past its expiry
    #[error("Referral code expired: {0}")]
    ExpiredCode(String),

    /// Inviter tried to redeem their own code
    #[error("Self-referral is not allowed")]
    SelfReferral,

    /// Usage-limited code has no remaining uses
    #[error("Referral code usage limit reached: {0}")]
    UsageLimitReached(String),

    /// Invitee already has a referral
    #[error("User already has a referral: {0}")]
    AlreadyReferred(String),

    /// Anonymous referral was already claimed by a user
    #[error("Referral already linked to an invitee: {0}")]
    InviteeAlreadyLinked(String),

    /// Referral does not exist
    #[error("Referral not found: {0}")]
    ReferralNotFound(String),

    /// Only the inviter may manage a code
    #[error("Referral code {0} does not belong to the caller")]
    NotCodeOwner(String),

    /// Token generation kept colliding with existing codes
    #[error("Failed to generate unique referral code after {attempts} attempts")]
    CodeGenerationExhausted { attempts: u32 },

    /// Referral disappeared inside the reward transaction
    #[error("Referral missing during reward application: {0}")]
    ReferralMissing(String),

    /// Referral left the pending state before its rewards were applied
    #[error("Referral is not pending: {0}")]
    NotPending(String),

    /// Rewards for this referral were applied by a concurrent completion
    #[error("Referral rewards already applied: {0}")]
    AlreadyApplied(String),

    /// Storage error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl ReferralError {
    /// Get the error category
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReferralError::InvalidCode(_)
            | ReferralError::InactiveCode(_)
            | ReferralError::ExpiredCode(_)
            | ReferralError::SelfReferral
            | ReferralError::AlreadyReferred(_)
            | ReferralError::InviteeAlreadyLinked(_) => ErrorKind::Validation,
            ReferralError::ReferralNotFound(_) => ErrorKind::Validation,
            ReferralError::UsageLimitReached(_)
            | ReferralError::CodeGenerationExhausted { .. } => ErrorKind::Conflict,
            ReferralError::ReferralMissing(_)
            | ReferralError::NotPending(_)
            | ReferralError::AlreadyApplied(_) => ErrorKind::Consistency,
            ReferralError::NotCodeOwner(_) => ErrorKind::Authorization,
            ReferralError::Store(_) => ErrorKind::Internal,
        }
    }

    /// Get a stable error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            ReferralError::InvalidCode(_) => "INVALID_CODE",
            ReferralError::InactiveCode(_) => "INACTIVE_CODE",
            ReferralError::ExpiredCode(_) => "EXPIRED_CODE",
            ReferralError::SelfReferral => "SELF_REFERRAL",
            ReferralError::UsageLimitReached(_) => "USAGE_LIMIT_REACHED",
            ReferralError::AlreadyReferred(_) => "ALREADY_REFERRED",
            ReferralError::InviteeAlreadyLinked(_) => "INVITEE_ALREADY_LINKED",
            ReferralError::ReferralNotFound(_) => "REFERRAL_NOT_FOUND",
            ReferralError::NotCodeOwner(_) => "NOT_CODE_OWNER",
            ReferralError::CodeGenerationExhausted { .. } => "CODE_GENERATION_EXHAUSTED",
            ReferralError::ReferralMissing(_) => "REFERRAL_MISSING",
            ReferralError::NotPending(_) => "REFERRAL_NOT_PENDING",
            ReferralError::AlreadyApplied(_) => "ALREADY_APPLIED",
            ReferralError::Store(_) => "STORE_ERROR",
        }
    }
}
