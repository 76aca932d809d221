//! Durable store contract.
//!
//! The engine talks to persistence only through [`Store`]. Every mutation is
//! idempotent and timestamp-gated: a merge whose upstream response timestamp
//! is not newer than the stored row is a no-op, and each operation reports
//! the [`ChangeSet`] of rows that actually changed. Mutations that change a
//! repository or organization root also bump that root's version exactly
//! once, which is what the delta-sync protocol pages against.

pub mod sql;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::changes::ChangeSet;
use crate::entity::account::Model as AccountModel;
use crate::entity::cache_metadata::MetadataSlot;
use crate::entity::repository::Model as RepositoryModel;
use crate::gateway::{
    AccessCredential, AccountRecord, CacheMetadata, IssueRecord, LabelRecord, RepositoryRecord,
};
use crate::session::messages::SyncLogEntry;
use crate::versions::VersionVector;

pub use sql::SqlStore;

/// Errors from store operations.
///
/// Concurrent merge collisions are resolved internally by the timestamp rule
/// and never surface here.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from sea-orm.
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// One page of a computed delta.
#[derive(Clone, Debug, PartialEq)]
pub struct DeltaPage {
    pub entries: Vec<SyncLogEntry>,
    /// Versions covered once this page (and its predecessors) are applied.
    pub versions: VersionVector,
}

/// A full reconciliation against one client vector, computed from a single
/// consistent snapshot.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Delta {
    /// Repositories the client holds a version for but can no longer see.
    pub removed_repositories: Vec<i64>,
    /// Organizations the client holds a version for but can no longer see.
    pub removed_organizations: Vec<i64>,
    /// The client vector with removed roots dropped; attached to the
    /// removal batch.
    pub vector_after_removals: VersionVector,
    /// Changed data in dependency order, pre-cut into pages.
    pub pages: Vec<DeltaPage>,
    /// The vector once every page has been applied.
    pub final_vector: VersionVector,
    /// Total `Set` entries across all pages.
    pub total_entries: usize,
}

impl Delta {
    /// True when there is nothing to tell the client.
    pub fn is_empty(&self) -> bool {
        self.removed_repositories.is_empty()
            && self.removed_organizations.is_empty()
            && self.pages.is_empty()
    }
}

/// Persistence operations the sync engine consumes.
#[async_trait]
pub trait Store: Send + Sync {
    /// Merge one account record. Timestamp-gated; returns the rows changed.
    async fn upsert_account(
        &self,
        response_ts: DateTime<Utc>,
        record: &AccountRecord,
    ) -> Result<ChangeSet>;

    /// Merge a batch of account records under one response timestamp.
    async fn bulk_upsert_accounts(
        &self,
        response_ts: DateTime<Utc>,
        records: &[AccountRecord],
    ) -> Result<ChangeSet>;

    /// Merge a batch of repository records.
    async fn bulk_upsert_repositories(
        &self,
        response_ts: DateTime<Utc>,
        records: &[RepositoryRecord],
    ) -> Result<ChangeSet>;

    /// Merge a repository's issues (labels embedded).
    async fn bulk_upsert_issues(
        &self,
        repository_id: i64,
        response_ts: DateTime<Utc>,
        records: &[IssueRecord],
    ) -> Result<ChangeSet>;

    /// Replace a repository's label set, diffing against current rows.
    async fn set_repository_labels(
        &self,
        repository_id: i64,
        labels: &[LabelRecord],
    ) -> Result<ChangeSet>;

    /// Replace a repository's assignable-user set.
    async fn set_repository_assignees(
        &self,
        repository_id: i64,
        account_ids: &[i64],
    ) -> Result<ChangeSet>;

    /// Replace a user's repository access links (`(repository_id, admin)`).
    async fn set_linked_repositories(
        &self,
        user_id: i64,
        links: &[(i64, bool)],
    ) -> Result<ChangeSet>;

    /// Replace the set of organizations a user belongs to.
    async fn set_user_organizations(
        &self,
        user_id: i64,
        organization_ids: &[i64],
    ) -> Result<ChangeSet>;

    /// Replace an organization's member set (`(user_id, admin)`).
    async fn set_organization_members(
        &self,
        organization_id: i64,
        members: &[(i64, bool)],
    ) -> Result<ChangeSet>;

    /// Load the stored revalidation state for one (identity, slot).
    async fn get_cache_metadata(
        &self,
        identity_id: i64,
        slot: MetadataSlot,
    ) -> Result<CacheMetadata>;

    /// Persist revalidation state for one (identity, slot).
    async fn put_cache_metadata(
        &self,
        identity_id: i64,
        slot: MetadataSlot,
        metadata: &CacheMetadata,
    ) -> Result<()>;

    /// Activation lookup for a user or organization.
    async fn load_account(&self, id: i64) -> Result<Option<AccountModel>>;

    /// Activation lookup for a repository.
    async fn load_repository(&self, id: i64) -> Result<Option<RepositoryModel>>;

    /// The user's own credential, if active and present.
    async fn credential_for(&self, user_id: i64) -> Result<Option<AccessCredential>>;

    /// Some member's credential usable to poll an organization.
    async fn member_credential(&self, organization_id: i64) -> Result<Option<AccessCredential>>;

    /// Some linked user's credential usable to poll a repository.
    async fn collaborator_credential(&self, repository_id: i64)
        -> Result<Option<AccessCredential>>;

    /// Attach a credential to a user and reactivate the account.
    async fn set_credential(&self, user_id: i64, token: &str) -> Result<()>;

    /// Mark an account inactive (access revoked upstream).
    async fn mark_account_inactive(&self, id: i64) -> Result<()>;

    /// Repository ids a user is linked to.
    async fn linked_repositories(&self, user_id: i64) -> Result<Vec<i64>>;

    /// Organization ids a user belongs to.
    async fn user_organizations(&self, user_id: i64) -> Result<Vec<i64>>;

    /// An organization's current member set (`(user_id, admin)`).
    async fn organization_members(&self, organization_id: i64) -> Result<Vec<(i64, bool)>>;

    /// Ids of active users holding a credential (engine bootstrap).
    async fn credentialed_users(&self) -> Result<Vec<i64>>;

    /// Reconcile a client vector against the current snapshot.
    ///
    /// Root deletions come first; pages follow dependency order and carry
    /// covered-so-far vectors so a disconnected client resumes correctly.
    async fn compute_delta(
        &self,
        user_id: i64,
        client: &VersionVector,
        page_size: usize,
    ) -> Result<Delta>;
}
