//! Relation-set diffs: membership and link tables.
//!
//! Each `set_*` operation computes the add/remove diff against current rows,
//! applies it, and reports only what actually changed. Re-running with the
//! same input is a no-op.

use std::collections::{BTreeMap, BTreeSet};

use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};

use crate::changes::ChangeSet;
use crate::entity::prelude::*;
use crate::entity::sync_log::{LoggedEntity, RootKind};
use crate::entity::{account_repository, label, organization_member, repo_assignee};
use crate::gateway::LabelRecord;
use crate::store::Result;

use super::merge::{ensure_log_row, touch_log, VersionAllocator};

/// Replace a repository's label set.
pub(super) async fn set_repository_labels<C: ConnectionTrait>(
    db: &C,
    repository_id: i64,
    labels: &[LabelRecord],
    changes: &mut ChangeSet,
    versions: &mut VersionAllocator,
) -> Result<()> {
    let have: BTreeMap<String, String> = Label::find()
        .filter(label::Column::RepositoryId.eq(repository_id))
        .all(db)
        .await?
        .into_iter()
        .map(|l| (l.name, l.color))
        .collect();
    let want: BTreeMap<String, String> = labels
        .iter()
        .map(|l| (l.name.clone(), l.color.clone()))
        .collect();

    if have == want {
        return Ok(());
    }

    Label::delete_many()
        .filter(label::Column::RepositoryId.eq(repository_id))
        .exec(db)
        .await?;
    if !want.is_empty() {
        Label::insert_many(
            want.into_iter()
                .map(|(name, color)| label::ActiveModel {
                    repository_id: Set(repository_id),
                    name: Set(name),
                    color: Set(color),
                }),
        )
        .exec_without_returning(db)
        .await?;
    }

    changes.add_repository(repository_id);
    // The repository entry embeds label summaries.
    let version = versions
        .version_for(db, RootKind::Repository, repository_id)
        .await?;
    touch_log(
        db,
        RootKind::Repository,
        repository_id,
        LoggedEntity::Repository,
        repository_id,
        version,
    )
    .await?;

    Ok(())
}

/// Replace a repository's assignable-user set.
pub(super) async fn set_repository_assignees<C: ConnectionTrait>(
    db: &C,
    repository_id: i64,
    account_ids: &[i64],
    changes: &mut ChangeSet,
    versions: &mut VersionAllocator,
) -> Result<()> {
    let have: BTreeSet<i64> = RepoAssignee::find()
        .filter(repo_assignee::Column::RepositoryId.eq(repository_id))
        .all(db)
        .await?
        .into_iter()
        .map(|a| a.account_id)
        .collect();
    let want: BTreeSet<i64> = account_ids.iter().copied().collect();

    if have == want {
        return Ok(());
    }

    let removed: Vec<i64> = have.difference(&want).copied().collect();
    let added: Vec<i64> = want.difference(&have).copied().collect();

    if !removed.is_empty() {
        RepoAssignee::delete_many()
            .filter(repo_assignee::Column::RepositoryId.eq(repository_id))
            .filter(repo_assignee::Column::AccountId.is_in(removed))
            .exec(db)
            .await?;
    }
    if !added.is_empty() {
        RepoAssignee::insert_many(added.iter().map(|&account_id| repo_assignee::ActiveModel {
            repository_id: Set(repository_id),
            account_id: Set(account_id),
        }))
        .exec_without_returning(db)
        .await?;
    }

    changes.add_repository(repository_id);
    let version = versions
        .version_for(db, RootKind::Repository, repository_id)
        .await?;
    touch_log(
        db,
        RootKind::Repository,
        repository_id,
        LoggedEntity::Repository,
        repository_id,
        version,
    )
    .await?;
    for account_id in added {
        ensure_log_row(
            db,
            RootKind::Repository,
            repository_id,
            LoggedEntity::Account,
            account_id,
            version,
        )
        .await?;
    }

    Ok(())
}

/// Replace a user's repository access links.
pub(super) async fn set_linked_repositories<C: ConnectionTrait>(
    db: &C,
    user_id: i64,
    links: &[(i64, bool)],
    changes: &mut ChangeSet,
) -> Result<()> {
    let have: BTreeMap<i64, bool> = AccountRepository::find()
        .filter(account_repository::Column::AccountId.eq(user_id))
        .all(db)
        .await?
        .into_iter()
        .map(|l| (l.repository_id, l.admin))
        .collect();
    let want: BTreeMap<i64, bool> = links.iter().copied().collect();

    if have == want {
        return Ok(());
    }

    let removed: Vec<i64> = have
        .keys()
        .filter(|id| !want.contains_key(id))
        .copied()
        .collect();
    if !removed.is_empty() {
        AccountRepository::delete_many()
            .filter(account_repository::Column::AccountId.eq(user_id))
            .filter(account_repository::Column::RepositoryId.is_in(removed))
            .exec(db)
            .await?;
    }

    let added: Vec<account_repository::ActiveModel> = want
        .iter()
        .filter(|(id, _)| !have.contains_key(id))
        .map(|(&repository_id, &admin)| account_repository::ActiveModel {
            account_id: Set(user_id),
            repository_id: Set(repository_id),
            admin: Set(admin),
        })
        .collect();
    if !added.is_empty() {
        AccountRepository::insert_many(added)
            .exec_without_returning(db)
            .await?;
    }

    for (&repository_id, &admin) in &want {
        if have.get(&repository_id).is_some_and(|&had| had != admin) {
            let update = account_repository::ActiveModel {
                admin: Set(admin),
                ..Default::default()
            };
            AccountRepository::update_many()
                .set(update)
                .filter(account_repository::Column::AccountId.eq(user_id))
                .filter(account_repository::Column::RepositoryId.eq(repository_id))
                .exec(db)
                .await?;
        }
    }

    // Access changes surface as removed/added roots at delta time; the
    // user id is what tells live sessions to re-reconcile.
    changes.add_user(user_id);
    Ok(())
}

/// Replace the set of organizations a user belongs to.
pub(super) async fn set_user_organizations<C: ConnectionTrait>(
    db: &C,
    user_id: i64,
    organization_ids: &[i64],
    changes: &mut ChangeSet,
    versions: &mut VersionAllocator,
) -> Result<()> {
    let have: BTreeSet<i64> = OrganizationMember::find()
        .filter(organization_member::Column::UserId.eq(user_id))
        .all(db)
        .await?
        .into_iter()
        .map(|m| m.organization_id)
        .collect();
    let want: BTreeSet<i64> = organization_ids.iter().copied().collect();

    if have == want {
        return Ok(());
    }

    let removed: Vec<i64> = have.difference(&want).copied().collect();
    let added: Vec<i64> = want.difference(&have).copied().collect();

    if !removed.is_empty() {
        OrganizationMember::delete_many()
            .filter(organization_member::Column::UserId.eq(user_id))
            .filter(organization_member::Column::OrganizationId.is_in(removed.clone()))
            .exec(db)
            .await?;
    }
    if !added.is_empty() {
        OrganizationMember::insert_many(added.iter().map(|&organization_id| {
            organization_member::ActiveModel {
                organization_id: Set(organization_id),
                user_id: Set(user_id),
                admin: Set(false),
            }
        }))
        .exec_without_returning(db)
        .await?;
    }

    changes.add_user(user_id);
    for &organization_id in added.iter().chain(removed.iter()) {
        changes.add_organization(organization_id);
        let version = versions
            .version_for(db, RootKind::Organization, organization_id)
            .await?;
        touch_log(
            db,
            RootKind::Organization,
            organization_id,
            LoggedEntity::Organization,
            organization_id,
            version,
        )
        .await?;
        if added.contains(&organization_id) {
            ensure_log_row(
                db,
                RootKind::Organization,
                organization_id,
                LoggedEntity::Account,
                user_id,
                version,
            )
            .await?;
        }
    }

    Ok(())
}

/// Replace an organization's member set.
pub(super) async fn set_organization_members<C: ConnectionTrait>(
    db: &C,
    organization_id: i64,
    members: &[(i64, bool)],
    changes: &mut ChangeSet,
    versions: &mut VersionAllocator,
) -> Result<()> {
    let have: BTreeMap<i64, bool> = OrganizationMember::find()
        .filter(organization_member::Column::OrganizationId.eq(organization_id))
        .all(db)
        .await?
        .into_iter()
        .map(|m| (m.user_id, m.admin))
        .collect();
    let want: BTreeMap<i64, bool> = members.iter().copied().collect();

    if have == want {
        return Ok(());
    }

    let removed: Vec<i64> = have
        .keys()
        .filter(|id| !want.contains_key(id))
        .copied()
        .collect();
    if !removed.is_empty() {
        OrganizationMember::delete_many()
            .filter(organization_member::Column::OrganizationId.eq(organization_id))
            .filter(organization_member::Column::UserId.is_in(removed.clone()))
            .exec(db)
            .await?;
    }

    let added: Vec<i64> = want
        .keys()
        .filter(|id| !have.contains_key(id))
        .copied()
        .collect();
    if !added.is_empty() {
        OrganizationMember::insert_many(added.iter().map(|&user_id| {
            organization_member::ActiveModel {
                organization_id: Set(organization_id),
                user_id: Set(user_id),
                admin: Set(want[&user_id]),
            }
        }))
        .exec_without_returning(db)
        .await?;
    }

    for (&user_id, &admin) in &want {
        if have.get(&user_id).is_some_and(|&had| had != admin) {
            let update = organization_member::ActiveModel {
                admin: Set(admin),
                ..Default::default()
            };
            OrganizationMember::update_many()
                .set(update)
                .filter(organization_member::Column::OrganizationId.eq(organization_id))
                .filter(organization_member::Column::UserId.eq(user_id))
                .exec(db)
                .await?;
        }
    }

    changes.add_organization(organization_id);
    for &user_id in added.iter().chain(removed.iter()) {
        changes.add_user(user_id);
    }

    let version = versions
        .version_for(db, RootKind::Organization, organization_id)
        .await?;
    touch_log(
        db,
        RootKind::Organization,
        organization_id,
        LoggedEntity::Organization,
        organization_id,
        version,
    )
    .await?;
    for &user_id in &added {
        ensure_log_row(
            db,
            RootKind::Organization,
            organization_id,
            LoggedEntity::Account,
            user_id,
            version,
        )
        .await?;
    }

    Ok(())
}
