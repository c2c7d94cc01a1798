//! Local user repositories: in-memory and JSON file backed.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use directories::ProjectDirs;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use super::user::{LocalUser, UserRepository};
use crate::error::SyncError;

/// Users file name.
const USERS_FILE: &str = "users.json";

/// Insert `user` into `users`.
///
/// A user without an id replaces the row with the same principal name, taking
/// over its id, and only gets the next id when no such row exists. Rows stay
/// unique per principal name even when two lookups raced before the save.
fn upsert_into(users: &mut Vec<LocalUser>, mut user: LocalUser) -> LocalUser {
    let slot = match user.id {
        Some(id) => users.iter_mut().find(|u| u.id == Some(id)),
        None => users
            .iter_mut()
            .find(|u| u.user_principal_name == user.user_principal_name),
    };

    match slot {
        Some(slot) => {
            user.id = slot.id;
            *slot = user.clone();
        }
        None => {
            if user.id.is_none() {
                let next_id = users.iter().filter_map(|u| u.id).max().unwrap_or(0) + 1;
                user.id = Some(next_id);
            }
            users.push(user.clone());
        }
    }
    user
}

/// Repository kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryUserRepository {
    users: Mutex<Vec<LocalUser>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.users.lock().await.len()
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn find_by_principal_name(&self, upn: &str) -> Result<Option<LocalUser>, SyncError> {
        let users = self.users.lock().await;
        Ok(users.iter().find(|u| u.user_principal_name == upn).cloned())
    }

    async fn save(&self, user: LocalUser) -> Result<LocalUser, SyncError> {
        let mut users = self.users.lock().await;
        Ok(upsert_into(&mut users, user))
    }
}

/// Repository persisted as a JSON array on disk.
#[derive(Debug)]
pub struct JsonFileUserRepository {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileUserRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Repository at the platform data directory.
    ///
    /// Returns `~/.local/share/teams-sso/users.json` on Linux.
    pub fn at_default_location() -> Result<Self, SyncError> {
        Self::default_path()
            .map(Self::new)
            .ok_or(SyncError::NoDataDirectory)
    }

    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "teams-sso").map(|dirs| dirs.data_dir().join(USERS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<LocalUser>, SyncError> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Users file does not exist yet: {:?}", self.path);
                Ok(Vec::new())
            }
            Err(e) => Err(SyncError::Io(e)),
        }
    }

    async fn store(&self, users: &[LocalUser]) -> Result<(), SyncError> {
        // Create parent directories if they don't exist
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(users)?;
        fs::write(&self.path, content).await?;

        debug!("Saved {} users to {:?}", users.len(), self.path);
        Ok(())
    }
}

#[async_trait]
impl UserRepository for JsonFileUserRepository {
    async fn find_by_principal_name(&self, upn: &str) -> Result<Option<LocalUser>, SyncError> {
        let _guard = self.lock.lock().await;
        let users = self.load().await?;
        Ok(users.into_iter().find(|u| u.user_principal_name == upn))
    }

    async fn save(&self, user: LocalUser) -> Result<LocalUser, SyncError> {
        let _guard = self.lock.lock().await;
        let mut users = self.load().await?;
        let saved = upsert_into(&mut users, user);
        self.store(&users).await?;
        Ok(saved)
    }
}
