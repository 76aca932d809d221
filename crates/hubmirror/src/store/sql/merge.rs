//! Timestamp-gated row merges and sync-log version bookkeeping.
//!
//! Merges are last-writer-wins by upstream response timestamp: a record whose
//! timestamp is not newer than the stored row is a no-op. Field-identical
//! payloads with a newer timestamp stamp the row but report no change and
//! bump no version.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set};

use crate::changes::ChangeSet;
use crate::entity::account::AccountKind as StoredKind;
use crate::entity::issue::IssueState;
use crate::entity::prelude::*;
use crate::entity::sync_log::{LoggedEntity, RootKind};
use crate::entity::{account, issue, issue_label, repository, sync_log};
use crate::gateway::{AccountKind, AccountRecord, IssueRecord, RepositoryRecord};
use crate::store::Result;

/// Allocates at most one new version per root within one store operation.
///
/// All log rows touched by the operation for a given root share that version,
/// so a root's version increases exactly once per committed mutation.
pub(super) struct VersionAllocator {
    assigned: HashMap<(RootKind, i64), i64>,
}

impl VersionAllocator {
    pub(super) fn new() -> Self {
        Self {
            assigned: HashMap::new(),
        }
    }

    pub(super) async fn version_for<C: ConnectionTrait>(
        &mut self,
        db: &C,
        kind: RootKind,
        root_id: i64,
    ) -> Result<i64> {
        if let Some(&version) = self.assigned.get(&(kind, root_id)) {
            return Ok(version);
        }
        let version = next_root_version(db, kind, root_id).await?;
        self.assigned.insert((kind, root_id), version);
        Ok(version)
    }
}

/// The next unused version for a root (current max + 1).
async fn next_root_version<C: ConnectionTrait>(
    db: &C,
    kind: RootKind,
    root_id: i64,
) -> Result<i64> {
    let newest = SyncLog::find()
        .filter(sync_log::Column::RootKind.eq(kind))
        .filter(sync_log::Column::RootId.eq(root_id))
        .order_by_desc(sync_log::Column::RowVersion)
        .one(db)
        .await?;

    Ok(newest.map(|row| row.row_version).unwrap_or(0) + 1)
}

/// Set a log row's version, inserting the row if it does not exist.
pub(super) async fn touch_log<C: ConnectionTrait>(
    db: &C,
    kind: RootKind,
    root_id: i64,
    entity_kind: LoggedEntity,
    entity_id: i64,
    version: i64,
) -> Result<()> {
    let existing = find_log_row(db, kind, root_id, entity_kind, entity_id).await?;

    match existing {
        Some(_) => {
            let update = sync_log::ActiveModel {
                row_version: Set(version),
                ..Default::default()
            };
            SyncLog::update_many()
                .set(update)
                .filter(sync_log::Column::RootKind.eq(kind))
                .filter(sync_log::Column::RootId.eq(root_id))
                .filter(sync_log::Column::EntityKind.eq(entity_kind))
                .filter(sync_log::Column::EntityId.eq(entity_id))
                .exec(db)
                .await?;
        }
        None => {
            SyncLog::insert(sync_log::ActiveModel {
                root_kind: Set(kind),
                root_id: Set(root_id),
                entity_kind: Set(entity_kind),
                entity_id: Set(entity_id),
                row_version: Set(version),
            })
            .exec_without_returning(db)
            .await?;
        }
    }

    Ok(())
}

/// Insert a log row if missing; an existing row keeps its version.
pub(super) async fn ensure_log_row<C: ConnectionTrait>(
    db: &C,
    kind: RootKind,
    root_id: i64,
    entity_kind: LoggedEntity,
    entity_id: i64,
    version: i64,
) -> Result<()> {
    if find_log_row(db, kind, root_id, entity_kind, entity_id)
        .await?
        .is_none()
    {
        SyncLog::insert(sync_log::ActiveModel {
            root_kind: Set(kind),
            root_id: Set(root_id),
            entity_kind: Set(entity_kind),
            entity_id: Set(entity_id),
            row_version: Set(version),
        })
        .exec_without_returning(db)
        .await?;
    }
    Ok(())
}

async fn find_log_row<C: ConnectionTrait>(
    db: &C,
    kind: RootKind,
    root_id: i64,
    entity_kind: LoggedEntity,
    entity_id: i64,
) -> Result<Option<sync_log::Model>> {
    Ok(SyncLog::find()
        .filter(sync_log::Column::RootKind.eq(kind))
        .filter(sync_log::Column::RootId.eq(root_id))
        .filter(sync_log::Column::EntityKind.eq(entity_kind))
        .filter(sync_log::Column::EntityId.eq(entity_id))
        .one(db)
        .await?)
}

fn stored_kind(kind: AccountKind) -> StoredKind {
    match kind {
        AccountKind::User => StoredKind::User,
        AccountKind::Organization => StoredKind::Organization,
    }
}

/// Merge one account record.
pub(super) async fn merge_account<C: ConnectionTrait>(
    db: &C,
    response_ts: DateTime<Utc>,
    record: &AccountRecord,
    changes: &mut ChangeSet,
    versions: &mut VersionAllocator,
) -> Result<()> {
    let kind = stored_kind(record.kind);
    let existing = Account::find_by_id(record.id).one(db).await?;

    match existing {
        None => {
            Account::insert(account::ActiveModel {
                id: Set(record.id),
                kind: Set(kind),
                login: Set(record.login.clone()),
                response_ts: Set(response_ts),
                active: Set(true),
                token: Set(None),
            })
            .exec_without_returning(db)
            .await?;
            record_account_change(db, record.id, kind, changes, versions).await?;
        }
        Some(current) => {
            if response_ts <= current.response_ts {
                return Ok(());
            }

            let changed = current.login != record.login || current.kind != kind;
            let mut update = account::ActiveModel {
                response_ts: Set(response_ts),
                ..Default::default()
            };
            if changed {
                update.login = Set(record.login.clone());
                update.kind = Set(kind);
            }
            Account::update_many()
                .set(update)
                .filter(account::Column::Id.eq(record.id))
                .exec(db)
                .await?;

            if changed {
                record_account_change(db, record.id, kind, changes, versions).await?;
            }
        }
    }

    Ok(())
}

/// Mark an account change and bump every root whose pages embed it.
async fn record_account_change<C: ConnectionTrait>(
    db: &C,
    account_id: i64,
    kind: StoredKind,
    changes: &mut ChangeSet,
    versions: &mut VersionAllocator,
) -> Result<()> {
    match kind {
        StoredKind::User => changes.add_user(account_id),
        StoredKind::Organization => changes.add_organization(account_id),
    }

    let references = SyncLog::find()
        .filter(sync_log::Column::EntityKind.eq(LoggedEntity::Account))
        .filter(sync_log::Column::EntityId.eq(account_id))
        .all(db)
        .await?;

    for row in references {
        let version = versions.version_for(db, row.root_kind, row.root_id).await?;
        touch_log(
            db,
            row.root_kind,
            row.root_id,
            LoggedEntity::Account,
            account_id,
            version,
        )
        .await?;
        match row.root_kind {
            RootKind::Repository => changes.add_repository(row.root_id),
            RootKind::Organization => changes.add_organization(row.root_id),
        }
    }

    // An organization's own root entry embeds its login.
    if kind == StoredKind::Organization {
        let own_root = find_log_row(
            db,
            RootKind::Organization,
            account_id,
            LoggedEntity::Organization,
            account_id,
        )
        .await?;
        if own_root.is_some() {
            let version = versions
                .version_for(db, RootKind::Organization, account_id)
                .await?;
            touch_log(
                db,
                RootKind::Organization,
                account_id,
                LoggedEntity::Organization,
                account_id,
                version,
            )
            .await?;
        }
    }

    Ok(())
}

/// Merge one repository record.
pub(super) async fn merge_repository<C: ConnectionTrait>(
    db: &C,
    response_ts: DateTime<Utc>,
    record: &RepositoryRecord,
    changes: &mut ChangeSet,
    versions: &mut VersionAllocator,
) -> Result<()> {
    let existing = Repository::find_by_id(record.id).one(db).await?;

    let changed = match existing {
        None => {
            Repository::insert(repository::ActiveModel {
                id: Set(record.id),
                account_id: Set(record.owner.id),
                name: Set(record.name.clone()),
                full_name: Set(record.full_name.clone()),
                private: Set(record.private),
                has_issues: Set(record.has_issues),
                response_ts: Set(response_ts),
            })
            .exec_without_returning(db)
            .await?;
            true
        }
        Some(current) => {
            if response_ts <= current.response_ts {
                return Ok(());
            }

            let changed = current.account_id != record.owner.id
                || current.name != record.name
                || current.full_name != record.full_name
                || current.private != record.private
                || current.has_issues != record.has_issues;

            let mut update = repository::ActiveModel {
                response_ts: Set(response_ts),
                ..Default::default()
            };
            if changed {
                update.account_id = Set(record.owner.id);
                update.name = Set(record.name.clone());
                update.full_name = Set(record.full_name.clone());
                update.private = Set(record.private);
                update.has_issues = Set(record.has_issues);
            }
            Repository::update_many()
                .set(update)
                .filter(repository::Column::Id.eq(record.id))
                .exec(db)
                .await?;

            changed
        }
    };

    if changed {
        changes.add_repository(record.id);
        let version = versions
            .version_for(db, RootKind::Repository, record.id)
            .await?;
        touch_log(
            db,
            RootKind::Repository,
            record.id,
            LoggedEntity::Repository,
            record.id,
            version,
        )
        .await?;
        // The repository entry references its owner.
        ensure_log_row(
            db,
            RootKind::Repository,
            record.id,
            LoggedEntity::Account,
            record.owner.id,
            version,
        )
        .await?;
    }

    Ok(())
}

/// Merge one issue record (embedded labels included).
pub(super) async fn merge_issue<C: ConnectionTrait>(
    db: &C,
    repository_id: i64,
    response_ts: DateTime<Utc>,
    record: &IssueRecord,
    changes: &mut ChangeSet,
    versions: &mut VersionAllocator,
) -> Result<()> {
    let state = IssueState::from_upstream(&record.state);
    let assignee_id = record.assignee.as_ref().map(|a| a.id);
    let existing = Issue::find_by_id(record.id).one(db).await?;

    let mut changed = match existing {
        None => {
            Issue::insert(issue::ActiveModel {
                id: Set(record.id),
                repository_id: Set(repository_id),
                number: Set(record.number),
                state: Set(state),
                title: Set(record.title.clone()),
                body: Set(record.body.clone()),
                user_id: Set(record.user.id),
                assignee_id: Set(assignee_id),
                created_at: Set(record.created_at),
                updated_at: Set(record.updated_at),
                closed_at: Set(record.closed_at),
                response_ts: Set(response_ts),
            })
            .exec_without_returning(db)
            .await?;
            true
        }
        Some(current) => {
            if response_ts <= current.response_ts {
                return Ok(());
            }

            let changed = current.repository_id != repository_id
                || current.number != record.number
                || current.state != state
                || current.title != record.title
                || current.body != record.body
                || current.user_id != record.user.id
                || current.assignee_id != assignee_id
                || current.created_at != record.created_at
                || current.updated_at != record.updated_at
                || current.closed_at != record.closed_at;

            let mut update = issue::ActiveModel {
                response_ts: Set(response_ts),
                ..Default::default()
            };
            if changed {
                update.repository_id = Set(repository_id);
                update.number = Set(record.number);
                update.state = Set(state);
                update.title = Set(record.title.clone());
                update.body = Set(record.body.clone());
                update.user_id = Set(record.user.id);
                update.assignee_id = Set(assignee_id);
                update.created_at = Set(record.created_at);
                update.updated_at = Set(record.updated_at);
                update.closed_at = Set(record.closed_at);
            }
            Issue::update_many()
                .set(update)
                .filter(issue::Column::Id.eq(record.id))
                .exec(db)
                .await?;

            changed
        }
    };

    // Label attachments: compare as name → color maps.
    let have: BTreeMap<String, String> = IssueLabel::find()
        .filter(issue_label::Column::IssueId.eq(record.id))
        .all(db)
        .await?
        .into_iter()
        .map(|l| (l.name, l.color))
        .collect();
    let want: BTreeMap<String, String> = record
        .labels
        .iter()
        .map(|l| (l.name.clone(), l.color.clone()))
        .collect();

    if have != want {
        IssueLabel::delete_many()
            .filter(issue_label::Column::IssueId.eq(record.id))
            .exec(db)
            .await?;
        if !want.is_empty() {
            IssueLabel::insert_many(want.into_iter().map(|(name, color)| {
                issue_label::ActiveModel {
                    issue_id: Set(record.id),
                    name: Set(name),
                    color: Set(color),
                }
            }))
            .exec_without_returning(db)
            .await?;
        }
        changed = true;
    }

    if changed {
        changes.add_repository(repository_id);
        let version = versions
            .version_for(db, RootKind::Repository, repository_id)
            .await?;
        touch_log(
            db,
            RootKind::Repository,
            repository_id,
            LoggedEntity::Issue,
            record.id,
            version,
        )
        .await?;
        // Referenced accounts must reach the client before the issue does.
        ensure_log_row(
            db,
            RootKind::Repository,
            repository_id,
            LoggedEntity::Account,
            record.user.id,
            version,
        )
        .await?;
        if let Some(assignee) = assignee_id {
            ensure_log_row(
                db,
                RootKind::Repository,
                repository_id,
                LoggedEntity::Account,
                assignee,
                version,
            )
            .await?;
        }
    }

    Ok(())
}
