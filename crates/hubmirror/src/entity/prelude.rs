//! Re-exports of all entity types for convenient import.

pub use super::account::Entity as Account;
pub use super::account_repository::Entity as AccountRepository;
pub use super::cache_metadata::Entity as CacheMetadataRow;
pub use super::issue::Entity as Issue;
pub use super::issue_label::Entity as IssueLabel;
pub use super::label::Entity as Label;
pub use super::organization_member::Entity as OrganizationMember;
pub use super::repo_assignee::Entity as RepoAssignee;
pub use super::repository::Entity as Repository;
pub use super::sync_log::Entity as SyncLog;
