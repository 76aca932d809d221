//! Typed upstream payloads.
//!
//! Each record maps one upstream JSON shape onto an explicit struct; fields
//! the mirror does not store are dropped here, at the edge, rather than
//! carried around as loose JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether an account is a user or an organization.
///
/// Matches the upstream `type` discriminator (`"User"` / `"Organization"`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountKind {
    #[default]
    User,
    Organization,
}

/// A user or organization account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: i64,
    pub login: String,
    #[serde(rename = "type", default)]
    pub kind: AccountKind,
}

impl AccountRecord {
    /// Convenience constructor for a user account.
    pub fn user(id: i64, login: impl Into<String>) -> Self {
        Self {
            id,
            login: login.into(),
            kind: AccountKind::User,
        }
    }

    /// Convenience constructor for an organization account.
    pub fn organization(id: i64, login: impl Into<String>) -> Self {
        Self {
            id,
            login: login.into(),
            kind: AccountKind::Organization,
        }
    }
}

/// Permissions the acting credential holds on a repository.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoPermissions {
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub push: bool,
    #[serde(default)]
    pub pull: bool,
}

/// A repository as returned by the upstream API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub has_issues: bool,
    pub owner: AccountRecord,
    #[serde(default)]
    pub permissions: RepoPermissions,
}

/// An issue label (scoped to its repository by the fetch that produced it).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRecord {
    pub name: String,
    pub color: String,
}

/// An issue, with its label summaries embedded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRecord {
    pub id: i64,
    pub number: i64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub state: String,
    pub user: AccountRecord,
    #[serde(default)]
    pub assignee: Option<AccountRecord>,
    #[serde(default)]
    pub labels: Vec<LabelRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

/// One entry of the authenticated user's organization membership list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRecord {
    pub organization: AccountRecord,
    #[serde(default)]
    pub role: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_kind_maps_upstream_type_field() {
        let json = r#"{"id": 1, "login": "octocat", "type": "Organization"}"#;
        let account: AccountRecord = serde_json::from_str(json).expect("deserialize");
        assert_eq!(account.kind, AccountKind::Organization);
    }

    #[test]
    fn account_kind_defaults_to_user_when_absent() {
        let json = r#"{"id": 1, "login": "octocat"}"#;
        let account: AccountRecord = serde_json::from_str(json).expect("deserialize");
        assert_eq!(account.kind, AccountKind::User);
    }

    #[test]
    fn repository_permissions_default_to_none() {
        let json = r#"{
            "id": 42,
            "name": "mirror",
            "full_name": "octocat/mirror",
            "owner": {"id": 1, "login": "octocat"}
        }"#;
        let repo: RepositoryRecord = serde_json::from_str(json).expect("deserialize");
        assert!(!repo.permissions.push);
        assert!(!repo.private);
        assert!(!repo.has_issues);
    }

    #[test]
    fn issue_unknown_fields_are_dropped() {
        let json = r#"{
            "id": 9,
            "number": 3,
            "title": "bug",
            "state": "open",
            "user": {"id": 1, "login": "octocat"},
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-02T00:00:00Z",
            "reactions": {"+1": 4},
            "node_id": "abc"
        }"#;
        let issue: IssueRecord = serde_json::from_str(json).expect("deserialize");
        assert_eq!(issue.number, 3);
        assert!(issue.labels.is_empty());
        assert!(issue.assignee.is_none());
    }
}
