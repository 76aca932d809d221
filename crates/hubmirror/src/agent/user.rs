//! User agent: keeps one signed-in user's account, organization memberships,
//! and linked repositories fresh, and cascades interest to the repositories
//! and organizations it links.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::entity::account::AccountKind as StoredKind;
use crate::entity::cache_metadata::MetadataSlot;
use crate::gateway::{
    AccessCredential, AccountKind, AccountRecord, CacheMetadata, RequestPriority,
};
use crate::store::{Store, StoreError};

use super::{guard_fetch, AgentCycle, AgentKey, CycleOutcome, Shared, SlotFetch};

pub(crate) struct UserAgent {
    user_id: i64,
    cred: AccessCredential,
    profile: CacheMetadata,
    repositories: CacheMetadata,
    organizations: CacheMetadata,
    forced: BTreeSet<MetadataSlot>,
}

impl UserAgent {
    pub(crate) async fn load(shared: &Shared, user_id: i64) -> Result<Self, super::ActivationError> {
        let account = shared
            .store
            .load_account(user_id)
            .await?
            .ok_or(super::ActivationError::IdentityNotFound(user_id))?;
        if account.kind != StoredKind::User {
            return Err(super::ActivationError::IdentityNotFound(user_id));
        }

        let cred = shared
            .store
            .credential_for(user_id)
            .await?
            .ok_or(super::ActivationError::NoCredential(user_id))?;

        Ok(Self {
            user_id,
            cred,
            profile: shared
                .store
                .get_cache_metadata(user_id, MetadataSlot::Profile)
                .await?,
            repositories: shared
                .store
                .get_cache_metadata(user_id, MetadataSlot::Repositories)
                .await?,
            organizations: shared
                .store
                .get_cache_metadata(user_id, MetadataSlot::Organizations)
                .await?,
            forced: BTreeSet::new(),
        })
    }

    fn due(&self, slot: MetadataSlot, metadata: &CacheMetadata) -> bool {
        self.forced.contains(&slot) || metadata.is_stale(Utc::now())
    }
}

#[async_trait]
impl AgentCycle for UserAgent {
    async fn cycle(&mut self, shared: &Arc<Shared>) -> CycleOutcome {
        let mut outcome = CycleOutcome::new();
        let budget = shared.config.sub_resource_timeout;

        // Own account record.
        if self.due(MetadataSlot::Profile, &self.profile) {
            let fetch = shared
                .gateway
                .fetch_user(&self.cred, &self.profile, RequestPriority::Interactive);
            match guard_fetch(budget, "user profile", fetch).await {
                SlotFetch::Fresh {
                    payload,
                    metadata,
                    response_ts,
                } => match shared.store.upsert_account(response_ts, &payload).await {
                    Ok(merged) => {
                        outcome.changes.union_with(&merged);
                        self.profile = metadata;
                        self.forced.remove(&MetadataSlot::Profile);
                    }
                    Err(error) => {
                        tracing::warn!(user_id = self.user_id, %error, "account merge failed")
                    }
                },
                SlotFetch::NotModified { metadata } => {
                    self.profile = metadata;
                    self.forced.remove(&MetadataSlot::Profile);
                }
                SlotFetch::Revoked => {
                    if let Err(error) = shared.store.mark_account_inactive(self.user_id).await {
                        tracing::warn!(user_id = self.user_id, %error, "failed to suspend account");
                    }
                    outcome.suspend = true;
                    return outcome;
                }
                SlotFetch::RateLimited | SlotFetch::Skip => {}
            }
        }

        // Organization memberships gate access control: interactive priority.
        if self.due(MetadataSlot::Organizations, &self.organizations) {
            let fetch = shared.gateway.fetch_user_organizations(
                &self.cred,
                &self.organizations,
                RequestPriority::Interactive,
            );
            match guard_fetch(budget, "user organizations", fetch).await {
                SlotFetch::Fresh {
                    payload,
                    metadata,
                    response_ts,
                } => {
                    let orgs: Vec<AccountRecord> = payload
                        .into_iter()
                        .map(|m| AccountRecord {
                            kind: AccountKind::Organization,
                            ..m.organization
                        })
                        .collect();
                    let org_ids: Vec<i64> = orgs.iter().map(|o| o.id).collect();

                    let merged = async {
                        let mut merged = shared
                            .store
                            .bulk_upsert_accounts(response_ts, &orgs)
                            .await?;
                        merged.union_with(
                            &shared
                                .store
                                .set_user_organizations(self.user_id, &org_ids)
                                .await?,
                        );
                        Ok::<_, StoreError>(merged)
                    }
                    .await;

                    match merged {
                        Ok(merged) => {
                            outcome.changes.union_with(&merged);
                            self.organizations = metadata;
                            self.forced.remove(&MetadataSlot::Organizations);
                        }
                        Err(error) => {
                            tracing::warn!(user_id = self.user_id, %error, "membership merge failed")
                        }
                    }
                }
                SlotFetch::NotModified { metadata } => {
                    self.organizations = metadata;
                    self.forced.remove(&MetadataSlot::Organizations);
                }
                SlotFetch::Revoked => {
                    if let Err(error) = shared.store.mark_account_inactive(self.user_id).await {
                        tracing::warn!(user_id = self.user_id, %error, "failed to suspend account");
                    }
                    outcome.suspend = true;
                    return outcome;
                }
                SlotFetch::RateLimited | SlotFetch::Skip => {}
            }
        }

        // Linked repositories, also access control.
        if self.due(MetadataSlot::Repositories, &self.repositories) {
            let fetch = shared.gateway.fetch_user_repositories(
                &self.cred,
                &self.repositories,
                RequestPriority::Interactive,
            );
            match guard_fetch(budget, "user repositories", fetch).await {
                SlotFetch::Fresh {
                    payload,
                    metadata,
                    response_ts,
                } => {
                    // Only repositories the user can push issues to are
                    // worth mirroring.
                    let keep: Vec<_> = payload
                        .into_iter()
                        .filter(|r| r.has_issues && r.permissions.push)
                        .collect();

                    let owners: Vec<AccountRecord> = keep
                        .iter()
                        .map(|r| (r.owner.id, r.owner.clone()))
                        .collect::<BTreeMap<_, _>>()
                        .into_values()
                        .collect();
                    let links: Vec<(i64, bool)> =
                        keep.iter().map(|r| (r.id, r.permissions.admin)).collect();

                    let merged = async {
                        let mut merged = shared
                            .store
                            .bulk_upsert_accounts(response_ts, &owners)
                            .await?;
                        merged.union_with(
                            &shared
                                .store
                                .bulk_upsert_repositories(response_ts, &keep)
                                .await?,
                        );
                        merged.union_with(
                            &shared
                                .store
                                .set_linked_repositories(self.user_id, &links)
                                .await?,
                        );
                        Ok::<_, StoreError>(merged)
                    }
                    .await;

                    match merged {
                        Ok(merged) => {
                            outcome.changes.union_with(&merged);
                            self.repositories = metadata;
                            self.forced.remove(&MetadataSlot::Repositories);
                        }
                        Err(error) => {
                            tracing::warn!(user_id = self.user_id, %error, "repository merge failed")
                        }
                    }
                }
                SlotFetch::NotModified { metadata } => {
                    self.repositories = metadata;
                    self.forced.remove(&MetadataSlot::Repositories);
                }
                SlotFetch::Revoked => {
                    if let Err(error) = shared.store.mark_account_inactive(self.user_id).await {
                        tracing::warn!(user_id = self.user_id, %error, "failed to suspend account");
                    }
                    outcome.suspend = true;
                    return outcome;
                }
                SlotFetch::RateLimited | SlotFetch::Skip => {}
            }
        }

        // Cascade interest to every linked repository and member org; their
        // agents decide what, if anything, to refetch.
        match shared.store.linked_repositories(self.user_id).await {
            Ok(repo_ids) => {
                for repo_id in repo_ids {
                    if let Err(error) =
                        super::signal_interest(shared, AgentKey::Repository(repo_id)).await
                    {
                        tracing::debug!(repo_id, %error, "repository cascade skipped");
                    }
                }
            }
            Err(error) => tracing::warn!(user_id = self.user_id, %error, "link lookup failed"),
        }
        match shared.store.user_organizations(self.user_id).await {
            Ok(org_ids) => {
                for org_id in org_ids {
                    if let Err(error) =
                        super::signal_interest(shared, AgentKey::Organization(org_id)).await
                    {
                        tracing::debug!(org_id, %error, "organization cascade skipped");
                    }
                }
            }
            Err(error) => tracing::warn!(user_id = self.user_id, %error, "membership lookup failed"),
        }

        outcome
    }

    async fn persist(&self, store: &dyn Store) -> Result<(), StoreError> {
        store
            .put_cache_metadata(self.user_id, MetadataSlot::Profile, &self.profile)
            .await?;
        store
            .put_cache_metadata(self.user_id, MetadataSlot::Repositories, &self.repositories)
            .await?;
        store
            .put_cache_metadata(
                self.user_id,
                MetadataSlot::Organizations,
                &self.organizations,
            )
            .await?;
        Ok(())
    }

    fn force(&mut self, slot: MetadataSlot) {
        self.forced.insert(slot);
    }

    fn force_pending(&self) -> bool {
        !self.forced.is_empty()
    }
}
