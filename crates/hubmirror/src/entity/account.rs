//! Account entity - mirrored users and organizations.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Whether an account row is a user or an organization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum AccountKind {
    #[sea_orm(string_value = "user")]
    User,
    #[sea_orm(string_value = "org")]
    Organization,
}

/// Account model - one row per mirrored user or organization.
///
/// Accounts are never hard-deleted; `active` is cleared when upstream revokes
/// access, which also suspends the identity's polling agent.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "accounts")]
pub struct Model {
    /// Upstream numeric id.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,

    pub kind: AccountKind,

    pub login: String,

    /// Upstream response timestamp of the last applied merge; merges with an
    /// older timestamp are no-ops.
    pub response_ts: DateTimeUtc,

    /// Cleared when upstream revokes this identity's access.
    pub active: bool,

    /// Access token, present only for signed-in users.
    #[sea_orm(column_type = "Text", nullable)]
    pub token: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
