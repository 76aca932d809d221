//! Sync log entity - per-root version bookkeeping for the delta protocol.
//!
//! One row per (root, entity). `row_version` is assigned from the root's next
//! version inside the mutating transaction, so a root's version increases
//! exactly once per committed mutation to its row-set. The delta computation
//! selects rows with `row_version` above the client's vector entry.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Top-level identity kind a log row is versioned under.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum RootKind {
    #[sea_orm(string_value = "repo")]
    Repository,
    #[sea_orm(string_value = "org")]
    Organization,
}

/// Kind of entity a log row points at.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum LoggedEntity {
    #[sea_orm(string_value = "account")]
    Account,
    #[sea_orm(string_value = "issue")]
    Issue,
    #[sea_orm(string_value = "repository")]
    Repository,
    #[sea_orm(string_value = "organization")]
    Organization,
}

impl LoggedEntity {
    /// Dependency rank within one root: entities a client must apply first
    /// sort lower (accounts before the issues that reference them, the root
    /// record last since it embeds child summaries).
    pub fn rank(self) -> u8 {
        match self {
            LoggedEntity::Account => 0,
            LoggedEntity::Issue => 1,
            LoggedEntity::Repository => 2,
            LoggedEntity::Organization => 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_log")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub root_kind: RootKind,

    #[sea_orm(primary_key, auto_increment = false)]
    pub root_id: i64,

    #[sea_orm(primary_key, auto_increment = false)]
    pub entity_kind: LoggedEntity,

    #[sea_orm(primary_key, auto_increment = false)]
    pub entity_id: i64,

    /// Root version at which this entity last changed.
    pub row_version: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accounts_rank_before_issues_and_roots() {
        assert!(LoggedEntity::Account.rank() < LoggedEntity::Issue.rank());
        assert!(LoggedEntity::Issue.rank() < LoggedEntity::Repository.rank());
        assert!(LoggedEntity::Account.rank() < LoggedEntity::Organization.rank());
    }
}
