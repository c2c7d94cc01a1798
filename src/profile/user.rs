//! Local user record synchronized from the Graph profile.

use super::ProfileRecord;
use crate::error::SyncError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Application-side user, keyed by `userPrincipalName`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalUser {
    /// Repository-assigned identifier; `None` until first saved.
    pub id: Option<u64>,
    pub guid: Option<String>,
    pub user_principal_name: String,
    pub display_name: Option<String>,
    pub mail: Option<String>,
    pub job_title: Option<String>,
}

impl LocalUser {
    /// Copy every profile field this record shares with the profile, except `id`.
    fn apply_profile(&mut self, profile: &ProfileRecord) {
        let text = |field: &str| profile.get_str(field).map(str::to_string);

        self.guid = text("guid");
        self.display_name = text("displayName");
        self.mail = text("mail");
        self.job_title = text("jobTitle");
        if let Some(upn) = profile.user_principal_name() {
            self.user_principal_name = upn.to_string();
        }
    }
}

/// Persistence for local users.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_principal_name(&self, upn: &str) -> Result<Option<LocalUser>, SyncError>;

    /// Insert or replace `user`.
    ///
    /// A user without an id replaces the stored user with the same principal
    /// name, so two racing first syncs still leave a single record.
    async fn save(&self, user: LocalUser) -> Result<LocalUser, SyncError>;
}

/// Creates or updates the local user for a fetched profile.
pub struct LocalUserSync<R> {
    repository: R,
}

impl<R: UserRepository> LocalUserSync<R> {
    pub fn new(repository: R) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Upsert the local user matching the profile's principal name.
    ///
    /// Applying the same profile twice stores the same record.
    pub async fn upsert(&self, profile: &ProfileRecord) -> Result<LocalUser, SyncError> {
        let upn = profile
            .user_principal_name()
            .ok_or(SyncError::MissingPrincipalName)?;

        let existing = self.repository.find_by_principal_name(upn).await?;
        let created = existing.is_none();

        let mut user = existing.unwrap_or_default();
        user.apply_profile(profile);

        let saved = self.repository.save(user).await?;
        info!(
            user_id = ?saved.id,
            created,
            "Local user synchronized from Teams profile"
        );
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::repository::MemoryUserRepository;
    use crate::profile::tests::graph_me;
    use serde_json::json;

    fn profile(id: &str, upn: &str) -> ProfileRecord {
        ProfileRecord::from_graph(graph_me(id, upn)).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_creates_user() {
        let sync = LocalUserSync::new(MemoryUserRepository::new());

        let user = sync.upsert(&profile("guid-1", "john@contoso.com")).await.unwrap();

        assert_eq!(user.id, Some(1));
        assert_eq!(user.guid.as_deref(), Some("guid-1"));
        assert_eq!(user.user_principal_name, "john@contoso.com");
        assert_eq!(user.display_name.as_deref(), Some("John Doe"));
        assert_eq!(user.job_title.as_deref(), Some("Engineer"));
        assert_eq!(user.mail, None);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let sync = LocalUserSync::new(MemoryUserRepository::new());
        let p = profile("guid-1", "john@contoso.com");

        let first = sync.upsert(&p).await.unwrap();
        let second = sync.upsert(&p).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(sync.repository().len().await, 1);
    }

    #[tokio::test]
    async fn test_upsert_updates_in_place() {
        let sync = LocalUserSync::new(MemoryUserRepository::new());
        let first = sync.upsert(&profile("guid-1", "john@contoso.com")).await.unwrap();

        let mut renamed = graph_me("guid-1", "john@contoso.com");
        renamed["displayName"] = json!("Johnny");
        let updated = sync
            .upsert(&ProfileRecord::from_graph(renamed).unwrap())
            .await
            .unwrap();

        assert_eq!(updated.id, first.id);
        assert_eq!(updated.display_name.as_deref(), Some("Johnny"));
        assert_eq!(sync.repository().len().await, 1);
    }

    #[tokio::test]
    async fn test_distinct_principals_get_distinct_users() {
        let sync = LocalUserSync::new(MemoryUserRepository::new());
        let a = sync.upsert(&profile("a", "a@contoso.com")).await.unwrap();
        let b = sync.upsert(&profile("b", "b@contoso.com")).await.unwrap();

        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_upsert_requires_principal_name() {
        let sync = LocalUserSync::new(MemoryUserRepository::new());
        let p = ProfileRecord::from_graph(json!({"id": "x", "displayName": "No UPN"})).unwrap();

        let err = sync.upsert(&p).await.unwrap_err();
        assert!(matches!(err, SyncError::MissingPrincipalName));
    }
}
