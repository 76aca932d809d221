//! sea-orm implementation of the store contract.
//!
//! Every mutating operation runs in one transaction: the row merges, the
//! relation diffs, and the sync-log version bumps commit together or not at
//! all. Root versions are allocated at most once per operation by
//! [`merge::VersionAllocator`], so one committed mutation moves a root's
//! version by exactly one.

mod delta;
mod merge;
mod relations;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};

use crate::changes::ChangeSet;
use crate::entity::account::Model as AccountModel;
use crate::entity::cache_metadata::MetadataSlot;
use crate::entity::prelude::*;
use crate::entity::repository::Model as RepositoryModel;
use crate::entity::{account, account_repository, cache_metadata, organization_member};
use crate::gateway::{
    AccessCredential, AccountRecord, CacheMetadata, IssueRecord, LabelRecord, RepositoryRecord,
};
use crate::versions::VersionVector;

use super::{Delta, Result, Store};

/// Store implementation over a relational database.
#[derive(Clone)]
pub struct SqlStore {
    db: DatabaseConnection,
}

impl SqlStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// The underlying connection (tests, migrations).
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// First active credential among the given account ids, lowest id first.
    async fn credential_among(&self, mut ids: Vec<i64>) -> Result<Option<AccessCredential>> {
        if ids.is_empty() {
            return Ok(None);
        }
        ids.sort_unstable();

        let account = Account::find()
            .filter(account::Column::Id.is_in(ids))
            .filter(account::Column::Active.eq(true))
            .filter(account::Column::Token.is_not_null())
            .order_by_asc(account::Column::Id)
            .one(&self.db)
            .await?;

        Ok(account.and_then(|a| a.token.map(|token| AccessCredential::new(a.id, token))))
    }
}

#[async_trait]
impl Store for SqlStore {
    async fn upsert_account(
        &self,
        response_ts: DateTime<Utc>,
        record: &AccountRecord,
    ) -> Result<ChangeSet> {
        let txn = self.db.begin().await?;
        let mut changes = ChangeSet::new();
        let mut versions = merge::VersionAllocator::new();
        merge::merge_account(&txn, response_ts, record, &mut changes, &mut versions).await?;
        txn.commit().await?;
        Ok(changes)
    }

    async fn bulk_upsert_accounts(
        &self,
        response_ts: DateTime<Utc>,
        records: &[AccountRecord],
    ) -> Result<ChangeSet> {
        let txn = self.db.begin().await?;
        let mut changes = ChangeSet::new();
        let mut versions = merge::VersionAllocator::new();
        for record in records {
            merge::merge_account(&txn, response_ts, record, &mut changes, &mut versions).await?;
        }
        txn.commit().await?;
        Ok(changes)
    }

    async fn bulk_upsert_repositories(
        &self,
        response_ts: DateTime<Utc>,
        records: &[RepositoryRecord],
    ) -> Result<ChangeSet> {
        let txn = self.db.begin().await?;
        let mut changes = ChangeSet::new();
        let mut versions = merge::VersionAllocator::new();
        for record in records {
            merge::merge_repository(&txn, response_ts, record, &mut changes, &mut versions).await?;
        }
        txn.commit().await?;
        Ok(changes)
    }

    async fn bulk_upsert_issues(
        &self,
        repository_id: i64,
        response_ts: DateTime<Utc>,
        records: &[IssueRecord],
    ) -> Result<ChangeSet> {
        let txn = self.db.begin().await?;
        let mut changes = ChangeSet::new();
        let mut versions = merge::VersionAllocator::new();
        for record in records {
            merge::merge_issue(
                &txn,
                repository_id,
                response_ts,
                record,
                &mut changes,
                &mut versions,
            )
            .await?;
        }
        txn.commit().await?;
        Ok(changes)
    }

    async fn set_repository_labels(
        &self,
        repository_id: i64,
        labels: &[LabelRecord],
    ) -> Result<ChangeSet> {
        let txn = self.db.begin().await?;
        let mut changes = ChangeSet::new();
        let mut versions = merge::VersionAllocator::new();
        relations::set_repository_labels(&txn, repository_id, labels, &mut changes, &mut versions)
            .await?;
        txn.commit().await?;
        Ok(changes)
    }

    async fn set_repository_assignees(
        &self,
        repository_id: i64,
        account_ids: &[i64],
    ) -> Result<ChangeSet> {
        let txn = self.db.begin().await?;
        let mut changes = ChangeSet::new();
        let mut versions = merge::VersionAllocator::new();
        relations::set_repository_assignees(
            &txn,
            repository_id,
            account_ids,
            &mut changes,
            &mut versions,
        )
        .await?;
        txn.commit().await?;
        Ok(changes)
    }

    async fn set_linked_repositories(
        &self,
        user_id: i64,
        links: &[(i64, bool)],
    ) -> Result<ChangeSet> {
        let txn = self.db.begin().await?;
        let mut changes = ChangeSet::new();
        relations::set_linked_repositories(&txn, user_id, links, &mut changes).await?;
        txn.commit().await?;
        Ok(changes)
    }

    async fn set_user_organizations(
        &self,
        user_id: i64,
        organization_ids: &[i64],
    ) -> Result<ChangeSet> {
        let txn = self.db.begin().await?;
        let mut changes = ChangeSet::new();
        let mut versions = merge::VersionAllocator::new();
        relations::set_user_organizations(
            &txn,
            user_id,
            organization_ids,
            &mut changes,
            &mut versions,
        )
        .await?;
        txn.commit().await?;
        Ok(changes)
    }

    async fn set_organization_members(
        &self,
        organization_id: i64,
        members: &[(i64, bool)],
    ) -> Result<ChangeSet> {
        let txn = self.db.begin().await?;
        let mut changes = ChangeSet::new();
        let mut versions = merge::VersionAllocator::new();
        relations::set_organization_members(
            &txn,
            organization_id,
            members,
            &mut changes,
            &mut versions,
        )
        .await?;
        txn.commit().await?;
        Ok(changes)
    }

    async fn get_cache_metadata(
        &self,
        identity_id: i64,
        slot: MetadataSlot,
    ) -> Result<CacheMetadata> {
        let row = CacheMetadataRow::find()
            .filter(cache_metadata::Column::IdentityId.eq(identity_id))
            .filter(cache_metadata::Column::Slot.eq(slot))
            .one(&self.db)
            .await?;

        Ok(row
            .map(|row| CacheMetadata {
                etag: row.etag,
                expires_at: row.expires_at,
            })
            .unwrap_or_default())
    }

    async fn put_cache_metadata(
        &self,
        identity_id: i64,
        slot: MetadataSlot,
        metadata: &CacheMetadata,
    ) -> Result<()> {
        let model = cache_metadata::ActiveModel {
            identity_id: Set(identity_id),
            slot: Set(slot),
            etag: Set(metadata.etag.clone()),
            expires_at: Set(metadata.expires_at),
        };

        CacheMetadataRow::insert(model)
            .on_conflict(
                OnConflict::columns([
                    cache_metadata::Column::IdentityId,
                    cache_metadata::Column::Slot,
                ])
                .update_columns([
                    cache_metadata::Column::Etag,
                    cache_metadata::Column::ExpiresAt,
                ])
                .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        Ok(())
    }

    async fn load_account(&self, id: i64) -> Result<Option<AccountModel>> {
        Ok(Account::find_by_id(id).one(&self.db).await?)
    }

    async fn load_repository(&self, id: i64) -> Result<Option<RepositoryModel>> {
        Ok(Repository::find_by_id(id).one(&self.db).await?)
    }

    async fn credential_for(&self, user_id: i64) -> Result<Option<AccessCredential>> {
        let account = Account::find_by_id(user_id).one(&self.db).await?;
        Ok(account.and_then(|a| {
            if !a.active {
                return None;
            }
            a.token.map(|token| AccessCredential::new(a.id, token))
        }))
    }

    async fn member_credential(&self, organization_id: i64) -> Result<Option<AccessCredential>> {
        let member_ids: Vec<i64> = OrganizationMember::find()
            .filter(organization_member::Column::OrganizationId.eq(organization_id))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| m.user_id)
            .collect();

        self.credential_among(member_ids).await
    }

    async fn collaborator_credential(
        &self,
        repository_id: i64,
    ) -> Result<Option<AccessCredential>> {
        let linked_ids: Vec<i64> = AccountRepository::find()
            .filter(account_repository::Column::RepositoryId.eq(repository_id))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|l| l.account_id)
            .collect();

        self.credential_among(linked_ids).await
    }

    async fn set_credential(&self, user_id: i64, token: &str) -> Result<()> {
        let update = account::ActiveModel {
            token: Set(Some(token.to_string())),
            active: Set(true),
            ..Default::default()
        };
        Account::update_many()
            .set(update)
            .filter(account::Column::Id.eq(user_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn mark_account_inactive(&self, id: i64) -> Result<()> {
        let update = account::ActiveModel {
            active: Set(false),
            ..Default::default()
        };
        Account::update_many()
            .set(update)
            .filter(account::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn linked_repositories(&self, user_id: i64) -> Result<Vec<i64>> {
        let mut ids: Vec<i64> = AccountRepository::find()
            .filter(account_repository::Column::AccountId.eq(user_id))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|l| l.repository_id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn user_organizations(&self, user_id: i64) -> Result<Vec<i64>> {
        let mut ids: Vec<i64> = OrganizationMember::find()
            .filter(organization_member::Column::UserId.eq(user_id))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| m.organization_id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn organization_members(&self, organization_id: i64) -> Result<Vec<(i64, bool)>> {
        let mut members: Vec<(i64, bool)> = OrganizationMember::find()
            .filter(organization_member::Column::OrganizationId.eq(organization_id))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| (m.user_id, m.admin))
            .collect();
        members.sort_unstable();
        Ok(members)
    }

    async fn credentialed_users(&self) -> Result<Vec<i64>> {
        let mut ids: Vec<i64> = Account::find()
            .filter(account::Column::Active.eq(true))
            .filter(account::Column::Token.is_not_null())
            .all(&self.db)
            .await?
            .into_iter()
            .map(|a| a.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn compute_delta(
        &self,
        user_id: i64,
        client: &VersionVector,
        page_size: usize,
    ) -> Result<Delta> {
        // One transaction gives every page the same consistent snapshot.
        let txn = self.db.begin().await?;
        let delta = delta::compute(&txn, user_id, client, page_size).await?;
        txn.commit().await?;
        Ok(delta)
    }
}
