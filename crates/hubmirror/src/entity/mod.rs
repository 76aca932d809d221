//! Database entities for the mirrored data model.
//!
//! Rows are keyed by upstream numeric ids. Cyclic upstream references
//! (account ↔ repository ↔ organization) are represented as ids plus explicit
//! relation tables, never as in-memory back-pointers.

pub mod account;
pub mod account_repository;
pub mod cache_metadata;
pub mod issue;
pub mod issue_label;
pub mod label;
pub mod organization_member;
pub mod prelude;
pub mod repo_assignee;
pub mod repository;
pub mod sync_log;
