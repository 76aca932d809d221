//! Upstream fetch contract: conditional revalidation, priorities, outcomes.
//!
//! The mirror only ever reaches the polled upstream API through
//! [`UpstreamGateway`]. Every fetch carries the prior [`CacheMetadata`] for
//! the sub-resource; the gateway answers either "not modified" (no payload,
//! refreshed metadata) or a fresh payload plus new metadata, and reports rate
//! limiting and failures without inventing metadata locally.

pub mod budget;
pub mod errors;
pub mod records;

#[cfg(feature = "github")]
pub mod github;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use budget::{BudgetPool, RateBudget, DEFAULT_RPS};
pub use errors::{GatewayError, Result};
pub use records::{
    AccountKind, AccountRecord, IssueRecord, LabelRecord, MembershipRecord, RepoPermissions,
    RepositoryRecord,
};

/// Upstream revalidation state for one polled sub-resource.
///
/// Produced only from upstream responses, never invented locally. A
/// freshly-tracked identity has no metadata, which is always stale.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Opaque revalidation token (the upstream ETag), sent back as
    /// `If-None-Match` on the next fetch.
    pub etag: Option<String>,
    /// Instant after which the cached representation must be revalidated.
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheMetadata {
    /// True when the metadata no longer vouches for the cached data.
    ///
    /// Unset expiry counts as stale, so a new identity is fetched on its
    /// first cycle regardless of any token.
    #[inline]
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires| expires <= now)
    }

    /// True when nothing has ever been cached for this sub-resource.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.expires_at.is_none()
    }
}

/// Two-level request priority against a shared rate budget.
///
/// Interactive requests gate access-control decisions (org/repo membership)
/// and are served ahead of Background requests when both are queued.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestPriority {
    Interactive,
    Background,
}

/// Successful outcome of a conditional fetch.
#[derive(Debug, Clone)]
pub enum FetchOutcome<T> {
    /// The prior metadata was still valid; no payload.
    NotModified { metadata: CacheMetadata },
    /// A payload to merge, with refreshed metadata and the upstream response
    /// timestamp used for last-writer-wins merging.
    Fresh {
        payload: T,
        metadata: CacheMetadata,
        response_ts: DateTime<Utc>,
    },
}

impl<T> FetchOutcome<T> {
    /// True if the result indicates not modified.
    #[inline]
    pub fn is_not_modified(&self) -> bool {
        matches!(self, FetchOutcome::NotModified { .. })
    }

    /// The refreshed metadata, whichever arm carries it.
    pub fn metadata(&self) -> &CacheMetadata {
        match self {
            FetchOutcome::NotModified { metadata } => metadata,
            FetchOutcome::Fresh { metadata, .. } => metadata,
        }
    }
}

/// Credential under which upstream requests are made.
///
/// The gateway's rate budget is keyed by token, so agents sharing a
/// credential share its budget.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessCredential {
    pub user_id: i64,
    pub token: String,
}

impl AccessCredential {
    pub fn new(user_id: i64, token: impl Into<String>) -> Self {
        Self {
            user_id,
            token: token.into(),
        }
    }
}

/// Organization member role filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberRole {
    Member,
    Admin,
}

impl MemberRole {
    /// Upstream query-string value for this role.
    pub fn as_str(self) -> &'static str {
        match self {
            MemberRole::Member => "member",
            MemberRole::Admin => "admin",
        }
    }
}

/// Polymorphic fetch capability over the upstream API.
///
/// One method per (entity kind, sub-resource) pair; list endpoints return the
/// fully-paginated result under a single metadata token.
#[async_trait]
pub trait UpstreamGateway: Send + Sync {
    /// The authenticated user's own account record.
    async fn fetch_user(
        &self,
        cred: &AccessCredential,
        prior: &CacheMetadata,
        priority: RequestPriority,
    ) -> Result<FetchOutcome<AccountRecord>>;

    /// Repositories visible to the authenticated user.
    async fn fetch_user_repositories(
        &self,
        cred: &AccessCredential,
        prior: &CacheMetadata,
        priority: RequestPriority,
    ) -> Result<FetchOutcome<Vec<RepositoryRecord>>>;

    /// Active organization memberships of the authenticated user.
    async fn fetch_user_organizations(
        &self,
        cred: &AccessCredential,
        prior: &CacheMetadata,
        priority: RequestPriority,
    ) -> Result<FetchOutcome<Vec<MembershipRecord>>>;

    /// One organization's account record.
    async fn fetch_organization(
        &self,
        cred: &AccessCredential,
        login: &str,
        prior: &CacheMetadata,
        priority: RequestPriority,
    ) -> Result<FetchOutcome<AccountRecord>>;

    /// Members of an organization, filtered by role.
    async fn fetch_organization_members(
        &self,
        cred: &AccessCredential,
        login: &str,
        role: MemberRole,
        prior: &CacheMetadata,
        priority: RequestPriority,
    ) -> Result<FetchOutcome<Vec<AccountRecord>>>;

    /// One repository's record.
    async fn fetch_repository(
        &self,
        cred: &AccessCredential,
        full_name: &str,
        prior: &CacheMetadata,
        priority: RequestPriority,
    ) -> Result<FetchOutcome<RepositoryRecord>>;

    /// A repository's labels.
    async fn fetch_repository_labels(
        &self,
        cred: &AccessCredential,
        full_name: &str,
        prior: &CacheMetadata,
        priority: RequestPriority,
    ) -> Result<FetchOutcome<Vec<LabelRecord>>>;

    /// A repository's issues (all states).
    async fn fetch_repository_issues(
        &self,
        cred: &AccessCredential,
        full_name: &str,
        prior: &CacheMetadata,
        priority: RequestPriority,
    ) -> Result<FetchOutcome<Vec<IssueRecord>>>;

    /// Accounts assignable to a repository's issues.
    async fn fetch_repository_assignees(
        &self,
        cred: &AccessCredential,
        full_name: &str,
        prior: &CacheMetadata,
        priority: RequestPriority,
    ) -> Result<FetchOutcome<Vec<AccountRecord>>>;
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn empty_metadata_is_always_stale() {
        let metadata = CacheMetadata::default();
        assert!(metadata.is_empty());
        assert!(metadata.is_stale(Utc::now()));
    }

    #[test]
    fn metadata_with_future_expiry_is_fresh() {
        let metadata = CacheMetadata {
            etag: Some("\"abc\"".to_string()),
            expires_at: Some(Utc::now() + Duration::seconds(60)),
        };
        assert!(!metadata.is_stale(Utc::now()));
    }

    #[test]
    fn metadata_with_past_expiry_is_stale() {
        let now = Utc::now();
        let metadata = CacheMetadata {
            etag: Some("\"abc\"".to_string()),
            expires_at: Some(now - Duration::seconds(1)),
        };
        assert!(metadata.is_stale(now));
    }

    #[test]
    fn metadata_expiring_exactly_now_is_stale() {
        let now = Utc::now();
        let metadata = CacheMetadata {
            etag: None,
            expires_at: Some(now),
        };
        assert!(metadata.is_stale(now));
    }

    #[test]
    fn etag_alone_does_not_make_metadata_fresh() {
        let metadata = CacheMetadata {
            etag: Some("\"abc\"".to_string()),
            expires_at: None,
        };
        assert!(!metadata.is_empty());
        assert!(metadata.is_stale(Utc::now()));
    }

    #[test]
    fn fetch_outcome_accessors() {
        let metadata = CacheMetadata {
            etag: Some("\"v2\"".to_string()),
            expires_at: None,
        };
        let fresh = FetchOutcome::Fresh {
            payload: 42u32,
            metadata: metadata.clone(),
            response_ts: Utc::now(),
        };
        assert!(!fresh.is_not_modified());
        assert_eq!(fresh.metadata(), &metadata);

        let not_modified: FetchOutcome<u32> = FetchOutcome::NotModified {
            metadata: metadata.clone(),
        };
        assert!(not_modified.is_not_modified());
    }
}
