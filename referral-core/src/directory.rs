//! User directory
//!
//! Lookup of platform users, used to describe the inviter behind a code.
//! Profiles are written by the platform (or seeded from a JSON file); the
//! ledger only reads them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::{StoreError, StoreResult};
use crate::types::UserId;

/// Public profile of a platform user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
}

impl UserProfile {
    /// Profile with only a username
    pub fn new(id: impl Into<UserId>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            first_name: None,
            profile_image_url: None,
            skills: Vec::new(),
        }
    }
}

/// User lookup
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Find a user by ID
    async fn find_by_id(&self, user_id: &UserId) -> StoreResult<Option<UserProfile>>;

    /// Insert or replace a profile
    async fn upsert(&self, profile: UserProfile) -> StoreResult<()>;
}

/// In-memory user directory
#[derive(Debug, Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<UserId, UserProfile>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_id(&self, user_id: &UserId) -> StoreResult<Option<UserProfile>> {
        Ok(self.users.read().await.get(user_id).cloned())
    }

    async fn upsert(&self, profile: UserProfile) -> StoreResult<()> {
        self.users.write().await.insert(profile.id.clone(), profile);
        Ok(())
    }
}

/// User directory stored as JSON documents in a sled tree
#[derive(Debug, Clone)]
pub struct SledUserDirectory {
    users: sled::Tree,
}

impl SledUserDirectory {
    pub fn new(users: sled::Tree) -> Self {
        Self { users }
    }
}

#[async_trait]
impl UserDirectory for SledUserDirectory {
    async fn find_by_id(&self, user_id: &UserId) -> StoreResult<Option<UserProfile>> {
        match self.users.get(user_id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, profile: UserProfile) -> StoreResult<()> {
        let value = serde_json::to_vec(&profile)?;
        self.users.insert(profile.id.as_str().as_bytes(), value)?;
        Ok(())
    }
}

/// Load a JSON array of profiles from `path` into `directory`.
///
/// Returns the number of profiles written.
pub async fn seed_from_file(directory: &dyn UserDirectory, path: impl AsRef<Path>) -> StoreResult<usize> {
    let path = path.as_ref();
    let raw = tokio::fs::read(path)
        .await
        .map_err(|e| StoreError::Storage(format!("Failed to read {}: {}", path.display(), e)))?;
    let profiles: Vec<UserProfile> = serde_json::from_slice(&raw)?;

    let count = profiles.len();
    for profile in profiles {
        directory.upsert(profile).await?;
    }
    info!(path = %path.display(), count, "Seeded user directory");
    Ok(count)
}
