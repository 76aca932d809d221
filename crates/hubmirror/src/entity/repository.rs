//! Repository entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "repositories")]
pub struct Model {
    /// Upstream numeric id.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,

    /// Owning account (user or organization).
    pub account_id: i64,

    pub name: String,

    pub full_name: String,

    pub private: bool,

    pub has_issues: bool,

    /// Upstream response timestamp of the last applied merge.
    pub response_ts: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
