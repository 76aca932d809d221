//! Delta computation for the versioned sync protocol.
//!
//! Runs entirely inside the caller's transaction. Root removals (access the
//! client lost) come first; for every accessible root whose version exceeds
//! the client's, log rows above the client version are projected in
//! dependency order and cut into fixed-size pages. Page vectors advance a
//! root only once the root's entries are fully emitted, so a client that
//! resumes from a mid-stream vector re-receives at most one root's entries.

use std::collections::{BTreeSet, HashMap};

use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};

use crate::entity::account::{AccountKind as StoredKind, Model as AccountModel};
use crate::entity::prelude::*;
use crate::entity::sync_log::{LoggedEntity, RootKind};
use crate::entity::{
    account, account_repository, issue_label, label, organization_member, repo_assignee, sync_log,
};
use crate::session::messages::{
    AccountEntry, EntryRecord, IssueEntry, LabelEntry, OrganizationEntry, RepositoryEntry,
    SyncLogEntry,
};
use crate::store::{Delta, DeltaPage, Result};
use crate::versions::VersionVector;

/// One changed root's projected entries plus its target version.
struct RootGroup {
    kind: RootKind,
    id: i64,
    latest: i64,
    entries: Vec<SyncLogEntry>,
}

pub(super) async fn compute<C: ConnectionTrait>(
    db: &C,
    user_id: i64,
    client: &VersionVector,
    page_size: usize,
) -> Result<Delta> {
    let page_size = page_size.max(1);

    let accessible_repos: BTreeSet<i64> = AccountRepository::find()
        .filter(account_repository::Column::AccountId.eq(user_id))
        .all(db)
        .await?
        .into_iter()
        .map(|l| l.repository_id)
        .collect();
    let accessible_orgs: BTreeSet<i64> = OrganizationMember::find()
        .filter(organization_member::Column::UserId.eq(user_id))
        .all(db)
        .await?
        .into_iter()
        .map(|m| m.organization_id)
        .collect();

    let removed_repositories: Vec<i64> = client
        .repositories
        .keys()
        .filter(|id| !accessible_repos.contains(id))
        .copied()
        .collect();
    let removed_organizations: Vec<i64> = client
        .organizations
        .keys()
        .filter(|id| !accessible_orgs.contains(id))
        .copied()
        .collect();

    let mut vector = client.clone();
    for &id in &removed_repositories {
        vector.remove_repository(id);
    }
    for &id in &removed_organizations {
        vector.remove_organization(id);
    }
    let vector_after_removals = vector.clone();

    // Repositories stream before organizations.
    let mut groups: Vec<RootGroup> = Vec::new();
    for &repo_id in &accessible_repos {
        let since = vector.repository(repo_id);
        let rows = log_rows_after(db, RootKind::Repository, repo_id, since).await?;
        if rows.is_empty() {
            continue;
        }
        let latest = rows.iter().map(|r| r.row_version).max().unwrap_or(since);
        let entries = project_repository_root(db, repo_id, &rows).await?;
        groups.push(RootGroup {
            kind: RootKind::Repository,
            id: repo_id,
            latest,
            entries,
        });
    }
    for &org_id in &accessible_orgs {
        let since = vector.organization(org_id);
        let rows = log_rows_after(db, RootKind::Organization, org_id, since).await?;
        if rows.is_empty() {
            continue;
        }
        let latest = rows.iter().map(|r| r.row_version).max().unwrap_or(since);
        let entries = project_organization_root(db, org_id, &rows).await?;
        groups.push(RootGroup {
            kind: RootKind::Organization,
            id: org_id,
            latest,
            entries,
        });
    }

    let total_entries: usize = groups.iter().map(|g| g.entries.len()).sum();

    let mut pages: Vec<DeltaPage> = Vec::new();
    let mut current: Vec<SyncLogEntry> = Vec::new();
    for mut group in groups {
        let count = group.entries.len();
        if count == 0 {
            // Orphan log rows with no backing data; just advance the vector.
            advance(&mut vector, &group);
            continue;
        }
        let entries = std::mem::take(&mut group.entries);
        for (index, entry) in entries.into_iter().enumerate() {
            current.push(entry);
            if index + 1 == count {
                advance(&mut vector, &group);
            }
            if current.len() == page_size {
                pages.push(DeltaPage {
                    entries: std::mem::take(&mut current),
                    versions: vector.clone(),
                });
            }
        }
    }
    if !current.is_empty() {
        pages.push(DeltaPage {
            entries: current,
            versions: vector.clone(),
        });
    }

    Ok(Delta {
        removed_repositories,
        removed_organizations,
        vector_after_removals,
        pages,
        final_vector: vector,
        total_entries,
    })
}

fn advance(vector: &mut VersionVector, group: &RootGroup) {
    match group.kind {
        RootKind::Repository => vector.set_repository(group.id, group.latest),
        RootKind::Organization => vector.set_organization(group.id, group.latest),
    }
}

/// Log rows for one root above a version, in dependency order.
async fn log_rows_after<C: ConnectionTrait>(
    db: &C,
    kind: RootKind,
    root_id: i64,
    since: i64,
) -> Result<Vec<sync_log::Model>> {
    let mut rows = SyncLog::find()
        .filter(sync_log::Column::RootKind.eq(kind))
        .filter(sync_log::Column::RootId.eq(root_id))
        .filter(sync_log::Column::RowVersion.gt(since))
        .all(db)
        .await?;

    rows.sort_by_key(|row| (row.entity_kind.rank(), row.entity_id));
    Ok(rows)
}

fn account_entry(model: &AccountModel) -> EntryRecord {
    match model.kind {
        StoredKind::User => EntryRecord::User(AccountEntry {
            id: model.id,
            login: Some(model.login.clone()),
        }),
        StoredKind::Organization => EntryRecord::Organization(OrganizationEntry {
            id: model.id,
            login: Some(model.login.clone()),
            members: Vec::new(),
        }),
    }
}

async fn load_accounts<C: ConnectionTrait>(
    db: &C,
    ids: Vec<i64>,
) -> Result<HashMap<i64, AccountModel>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    Ok(Account::find()
        .filter(account::Column::Id.is_in(ids))
        .all(db)
        .await?
        .into_iter()
        .map(|a| (a.id, a))
        .collect())
}

async fn project_repository_root<C: ConnectionTrait>(
    db: &C,
    repo_id: i64,
    rows: &[sync_log::Model],
) -> Result<Vec<SyncLogEntry>> {
    let account_ids: Vec<i64> = rows
        .iter()
        .filter(|r| r.entity_kind == LoggedEntity::Account)
        .map(|r| r.entity_id)
        .collect();
    let issue_ids: Vec<i64> = rows
        .iter()
        .filter(|r| r.entity_kind == LoggedEntity::Issue)
        .map(|r| r.entity_id)
        .collect();
    let needs_repo = rows
        .iter()
        .any(|r| r.entity_kind == LoggedEntity::Repository);

    let accounts = load_accounts(db, account_ids).await?;

    let issues: HashMap<i64, crate::entity::issue::Model> = if issue_ids.is_empty() {
        HashMap::new()
    } else {
        Issue::find()
            .filter(crate::entity::issue::Column::Id.is_in(issue_ids.clone()))
            .all(db)
            .await?
            .into_iter()
            .map(|i| (i.id, i))
            .collect()
    };

    let mut labels_by_issue: HashMap<i64, Vec<LabelEntry>> = HashMap::new();
    if !issue_ids.is_empty() {
        for attached in IssueLabel::find()
            .filter(issue_label::Column::IssueId.is_in(issue_ids))
            .all(db)
            .await?
        {
            labels_by_issue
                .entry(attached.issue_id)
                .or_default()
                .push(LabelEntry {
                    name: attached.name,
                    color: attached.color,
                });
        }
    }

    let repo_entry = if needs_repo {
        match Repository::find_by_id(repo_id).one(db).await? {
            Some(repo) => {
                let labels: Vec<LabelEntry> = Label::find()
                    .filter(label::Column::RepositoryId.eq(repo_id))
                    .all(db)
                    .await?
                    .into_iter()
                    .map(|l| LabelEntry {
                        name: l.name,
                        color: l.color,
                    })
                    .collect();
                let mut assignees: Vec<i64> = RepoAssignee::find()
                    .filter(repo_assignee::Column::RepositoryId.eq(repo_id))
                    .all(db)
                    .await?
                    .into_iter()
                    .map(|a| a.account_id)
                    .collect();
                assignees.sort_unstable();

                Some(RepositoryEntry {
                    id: repo.id,
                    name: Some(repo.name),
                    full_name: Some(repo.full_name),
                    private: repo.private,
                    owner: Some(repo.account_id),
                    assignees,
                    labels,
                })
            }
            None => None,
        }
    } else {
        None
    };

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let record = match row.entity_kind {
            LoggedEntity::Account => accounts.get(&row.entity_id).map(account_entry),
            LoggedEntity::Issue => issues.get(&row.entity_id).map(|model| {
                EntryRecord::Issue(IssueEntry {
                    id: model.id,
                    repository: model.repository_id,
                    number: model.number,
                    state: model.state.as_str().to_string(),
                    title: model.title.clone(),
                    body: model.body.clone(),
                    user: model.user_id,
                    assignee: model.assignee_id,
                    labels: labels_by_issue.get(&model.id).cloned().unwrap_or_default(),
                    created_at: model.created_at,
                    updated_at: model.updated_at,
                    closed_at: model.closed_at,
                })
            }),
            LoggedEntity::Repository => repo_entry.clone().map(EntryRecord::Repository),
            LoggedEntity::Organization => None,
        };
        if let Some(record) = record {
            entries.push(SyncLogEntry::set(record));
        }
    }

    Ok(entries)
}

async fn project_organization_root<C: ConnectionTrait>(
    db: &C,
    org_id: i64,
    rows: &[sync_log::Model],
) -> Result<Vec<SyncLogEntry>> {
    let account_ids: Vec<i64> = rows
        .iter()
        .filter(|r| r.entity_kind == LoggedEntity::Account)
        .map(|r| r.entity_id)
        .collect();
    let accounts = load_accounts(db, account_ids).await?;

    let org_model = Account::find_by_id(org_id).one(db).await?;
    let mut members: Vec<i64> = OrganizationMember::find()
        .filter(organization_member::Column::OrganizationId.eq(org_id))
        .all(db)
        .await?
        .into_iter()
        .map(|m| m.user_id)
        .collect();
    members.sort_unstable();

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let record = match row.entity_kind {
            LoggedEntity::Account => accounts.get(&row.entity_id).map(account_entry),
            LoggedEntity::Organization => org_model.as_ref().map(|org| {
                EntryRecord::Organization(OrganizationEntry {
                    id: org.id,
                    login: Some(org.login.clone()),
                    members: members.clone(),
                })
            }),
            LoggedEntity::Issue | LoggedEntity::Repository => None,
        };
        if let Some(record) = record {
            entries.push(SyncLogEntry::set(record));
        }
    }

    Ok(entries)
}
