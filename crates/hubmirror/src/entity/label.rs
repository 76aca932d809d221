//! Repository label entity.
//!
//! Labels have no upstream numeric id the protocol cares about; they are
//! keyed by (repository, name) and embedded as summaries in repository and
//! issue entries.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "labels")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub repository_id: i64,

    #[sea_orm(primary_key, auto_increment = false)]
    pub name: String,

    pub color: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
