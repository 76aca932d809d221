//! Cache metadata entity - durable home of per-sub-resource revalidation state.
//!
//! Agents own this state in memory while active; the row is the source of
//! truth on (re)activation.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Which polled sub-resource of an identity a metadata row covers.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum MetadataSlot {
    /// The identity's own record.
    #[sea_orm(string_value = "profile")]
    Profile,
    /// A user's linked repositories.
    #[sea_orm(string_value = "repositories")]
    Repositories,
    /// A user's organization memberships.
    #[sea_orm(string_value = "organizations")]
    Organizations,
    /// An organization's non-admin members.
    #[sea_orm(string_value = "members")]
    Members,
    /// An organization's admin members.
    #[sea_orm(string_value = "admins")]
    Admins,
    /// A repository's labels.
    #[sea_orm(string_value = "labels")]
    Labels,
    /// A repository's issues.
    #[sea_orm(string_value = "issues")]
    Issues,
    /// A repository's assignable users.
    #[sea_orm(string_value = "assignees")]
    Assignees,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "cache_metadata")]
pub struct Model {
    /// Identity (account or repository) owning the slot.
    #[sea_orm(primary_key, auto_increment = false)]
    pub identity_id: i64,

    #[sea_orm(primary_key, auto_increment = false)]
    pub slot: MetadataSlot,

    #[sea_orm(column_type = "Text", nullable)]
    pub etag: Option<String>,

    pub expires_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
