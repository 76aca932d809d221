//! Repository agent: keeps one repository's record, labels, issues, and
//! assignable users fresh, acting through a linked user's credential.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::entity::cache_metadata::MetadataSlot;
use crate::gateway::{AccountRecord, CacheMetadata, RequestPriority};
use crate::store::{Store, StoreError};

use super::{guard_fetch, AgentCycle, CycleOutcome, Shared, SlotFetch};

pub(crate) struct RepoAgent {
    repo_id: i64,
    full_name: String,
    profile: CacheMetadata,
    labels: CacheMetadata,
    issues: CacheMetadata,
    assignees: CacheMetadata,
    forced: BTreeSet<MetadataSlot>,
}

impl RepoAgent {
    pub(crate) async fn load(shared: &Shared, repo_id: i64) -> Result<Self, super::ActivationError> {
        let repository = shared
            .store
            .load_repository(repo_id)
            .await?
            .ok_or(super::ActivationError::IdentityNotFound(repo_id))?;

        if shared
            .store
            .collaborator_credential(repo_id)
            .await?
            .is_none()
        {
            return Err(super::ActivationError::NoCredential(repo_id));
        }

        Ok(Self {
            repo_id,
            full_name: repository.full_name,
            profile: shared
                .store
                .get_cache_metadata(repo_id, MetadataSlot::Profile)
                .await?,
            labels: shared
                .store
                .get_cache_metadata(repo_id, MetadataSlot::Labels)
                .await?,
            issues: shared
                .store
                .get_cache_metadata(repo_id, MetadataSlot::Issues)
                .await?,
            assignees: shared
                .store
                .get_cache_metadata(repo_id, MetadataSlot::Assignees)
                .await?,
            forced: BTreeSet::new(),
        })
    }

    fn due(&self, slot: MetadataSlot, metadata: &CacheMetadata) -> bool {
        self.forced.contains(&slot) || metadata.is_stale(Utc::now())
    }
}

#[async_trait]
impl AgentCycle for RepoAgent {
    async fn cycle(&mut self, shared: &Arc<Shared>) -> CycleOutcome {
        let mut outcome = CycleOutcome::new();
        let budget = shared.config.sub_resource_timeout;

        // Repositories poll through some linked user's credential.
        let cred = match shared.store.collaborator_credential(self.repo_id).await {
            Ok(Some(cred)) => cred,
            Ok(None) => {
                tracing::debug!(repo_id = self.repo_id, "no collaborator credential, deactivating");
                outcome.suspend = true;
                return outcome;
            }
            Err(error) => {
                tracing::warn!(repo_id = self.repo_id, %error, "credential lookup failed");
                return outcome;
            }
        };

        // Pick up renames applied by other agents' merges.
        if let Ok(Some(repository)) = shared.store.load_repository(self.repo_id).await {
            self.full_name = repository.full_name;
        }

        // Own record.
        if self.due(MetadataSlot::Profile, &self.profile) {
            let fetch = shared.gateway.fetch_repository(
                &cred,
                &self.full_name,
                &self.profile,
                RequestPriority::Background,
            );
            match guard_fetch(budget, "repository profile", fetch).await {
                SlotFetch::Fresh {
                    payload,
                    metadata,
                    response_ts,
                } => {
                    let records = [payload];
                    let merged = async {
                        let mut merged = shared
                            .store
                            .bulk_upsert_accounts(
                                response_ts,
                                std::slice::from_ref(&records[0].owner),
                            )
                            .await?;
                        merged.union_with(
                            &shared
                                .store
                                .bulk_upsert_repositories(response_ts, &records)
                                .await?,
                        );
                        Ok::<_, StoreError>(merged)
                    }
                    .await;

                    match merged {
                        Ok(merged) => {
                            outcome.changes.union_with(&merged);
                            self.full_name = records[0].full_name.clone();
                            self.profile = metadata;
                            self.forced.remove(&MetadataSlot::Profile);
                        }
                        Err(error) => {
                            tracing::warn!(repo_id = self.repo_id, %error, "repository merge failed")
                        }
                    }
                }
                SlotFetch::NotModified { metadata } => {
                    self.profile = metadata;
                    self.forced.remove(&MetadataSlot::Profile);
                }
                SlotFetch::Revoked => {
                    suspend_credential(shared, &cred).await;
                    return outcome;
                }
                SlotFetch::RateLimited | SlotFetch::Skip => {}
            }
        }

        // Labels.
        if self.due(MetadataSlot::Labels, &self.labels) {
            let fetch = shared.gateway.fetch_repository_labels(
                &cred,
                &self.full_name,
                &self.labels,
                RequestPriority::Background,
            );
            match guard_fetch(budget, "repository labels", fetch).await {
                SlotFetch::Fresh {
                    payload, metadata, ..
                } => match shared
                    .store
                    .set_repository_labels(self.repo_id, &payload)
                    .await
                {
                    Ok(merged) => {
                        outcome.changes.union_with(&merged);
                        self.labels = metadata;
                        self.forced.remove(&MetadataSlot::Labels);
                    }
                    Err(error) => {
                        tracing::warn!(repo_id = self.repo_id, %error, "label merge failed")
                    }
                },
                SlotFetch::NotModified { metadata } => {
                    self.labels = metadata;
                    self.forced.remove(&MetadataSlot::Labels);
                }
                SlotFetch::Revoked => {
                    suspend_credential(shared, &cred).await;
                    return outcome;
                }
                SlotFetch::RateLimited | SlotFetch::Skip => {}
            }
        }

        // Issues, with their authors and assignees merged first so the delta
        // stream can order accounts ahead of the issues referencing them.
        if self.due(MetadataSlot::Issues, &self.issues) {
            let fetch = shared.gateway.fetch_repository_issues(
                &cred,
                &self.full_name,
                &self.issues,
                RequestPriority::Background,
            );
            match guard_fetch(budget, "repository issues", fetch).await {
                SlotFetch::Fresh {
                    payload,
                    metadata,
                    response_ts,
                } => {
                    let people: Vec<AccountRecord> = payload
                        .iter()
                        .flat_map(|issue| {
                            std::iter::once(&issue.user).chain(issue.assignee.as_ref())
                        })
                        .map(|account| (account.id, account.clone()))
                        .collect::<BTreeMap<_, _>>()
                        .into_values()
                        .collect();

                    let merged = async {
                        let mut merged = shared
                            .store
                            .bulk_upsert_accounts(response_ts, &people)
                            .await?;
                        merged.union_with(
                            &shared
                                .store
                                .bulk_upsert_issues(self.repo_id, response_ts, &payload)
                                .await?,
                        );
                        Ok::<_, StoreError>(merged)
                    }
                    .await;

                    match merged {
                        Ok(merged) => {
                            outcome.changes.union_with(&merged);
                            self.issues = metadata;
                            self.forced.remove(&MetadataSlot::Issues);
                        }
                        Err(error) => {
                            tracing::warn!(repo_id = self.repo_id, %error, "issue merge failed")
                        }
                    }
                }
                SlotFetch::NotModified { metadata } => {
                    self.issues = metadata;
                    self.forced.remove(&MetadataSlot::Issues);
                }
                SlotFetch::Revoked => {
                    suspend_credential(shared, &cred).await;
                    return outcome;
                }
                SlotFetch::RateLimited | SlotFetch::Skip => {}
            }
        }

        // Assignable users.
        if self.due(MetadataSlot::Assignees, &self.assignees) {
            let fetch = shared.gateway.fetch_repository_assignees(
                &cred,
                &self.full_name,
                &self.assignees,
                RequestPriority::Background,
            );
            match guard_fetch(budget, "repository assignees", fetch).await {
                SlotFetch::Fresh {
                    payload,
                    metadata,
                    response_ts,
                } => {
                    let ids: Vec<i64> = payload.iter().map(|a| a.id).collect();
                    let merged = async {
                        let mut merged = shared
                            .store
                            .bulk_upsert_accounts(response_ts, &payload)
                            .await?;
                        merged.union_with(
                            &shared
                                .store
                                .set_repository_assignees(self.repo_id, &ids)
                                .await?,
                        );
                        Ok::<_, StoreError>(merged)
                    }
                    .await;

                    match merged {
                        Ok(merged) => {
                            outcome.changes.union_with(&merged);
                            self.assignees = metadata;
                            self.forced.remove(&MetadataSlot::Assignees);
                        }
                        Err(error) => {
                            tracing::warn!(repo_id = self.repo_id, %error, "assignee merge failed")
                        }
                    }
                }
                SlotFetch::NotModified { metadata } => {
                    self.assignees = metadata;
                    self.forced.remove(&MetadataSlot::Assignees);
                }
                SlotFetch::Revoked => {
                    suspend_credential(shared, &cred).await;
                    return outcome;
                }
                SlotFetch::RateLimited | SlotFetch::Skip => {}
            }
        }

        outcome
    }

    async fn persist(&self, store: &dyn Store) -> Result<(), StoreError> {
        store
            .put_cache_metadata(self.repo_id, MetadataSlot::Profile, &self.profile)
            .await?;
        store
            .put_cache_metadata(self.repo_id, MetadataSlot::Labels, &self.labels)
            .await?;
        store
            .put_cache_metadata(self.repo_id, MetadataSlot::Issues, &self.issues)
            .await?;
        store
            .put_cache_metadata(self.repo_id, MetadataSlot::Assignees, &self.assignees)
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

/// A collaborator credential was revoked: suspend its owner, keep the repo
/// agent alive so the next cycle can act through another collaborator.
async fn suspend_credential(shared: &Arc<Shared>, cred: &crate::gateway::AccessCredential) {
    if let Err(error) = shared.store.mark_account_inactive(cred.user_id).await {
        tracing::warn!(user_id = cred.user_id, %error, "failed to suspend credential owner");
    }
}
