//! Issue entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Issue state as upstream reports it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum IssueState {
    #[sea_orm(string_value = "open")]
    Open,
    #[sea_orm(string_value = "closed")]
    Closed,
}

impl IssueState {
    /// Map the upstream state string; anything unrecognized counts as open.
    pub fn from_upstream(state: &str) -> Self {
        if state.eq_ignore_ascii_case("closed") {
            IssueState::Closed
        } else {
            IssueState::Open
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IssueState::Open => "open",
            IssueState::Closed => "closed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "issues")]
pub struct Model {
    /// Upstream numeric id.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,

    pub repository_id: i64,

    /// Issue number within its repository.
    pub number: i64,

    pub state: IssueState,

    pub title: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub body: Option<String>,

    /// Authoring account.
    pub user_id: i64,

    pub assignee_id: Option<i64>,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,

    pub closed_at: Option<DateTimeUtc>,

    /// Upstream response timestamp of the last applied merge.
    pub response_ts: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_state_maps_upstream_strings() {
        assert_eq!(IssueState::from_upstream("open"), IssueState::Open);
        assert_eq!(IssueState::from_upstream("closed"), IssueState::Closed);
        assert_eq!(IssueState::from_upstream("CLOSED"), IssueState::Closed);
        assert_eq!(IssueState::from_upstream("draft"), IssueState::Open);
    }
}
