//! Organization agent: keeps an organization's record and membership fresh.
//!
//! Organizations have no credential of their own; each cycle acts through a
//! stored member credential. When no member with a credential remains, the
//! agent deactivates. Member and admin lists are fetched separately (the
//! upstream members endpoint carries no role information) and merged as one
//! membership set; the lists are cached in the agent so a "not modified" on
//! one role does not clobber the other's data.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entity::account::AccountKind as StoredKind;
use crate::entity::cache_metadata::MetadataSlot;
use crate::gateway::{
    AccountKind, AccountRecord, CacheMetadata, MemberRole, RequestPriority,
};
use crate::store::{Store, StoreError};

use super::{guard_fetch, AgentCycle, CycleOutcome, Shared, SlotFetch};

pub(crate) struct OrgAgent {
    org_id: i64,
    login: String,
    profile: CacheMetadata,
    members: CacheMetadata,
    admins: CacheMetadata,
    member_ids: Vec<i64>,
    admin_ids: Vec<i64>,
    forced: BTreeSet<MetadataSlot>,
}

impl OrgAgent {
    pub(crate) async fn load(shared: &Shared, org_id: i64) -> Result<Self, super::ActivationError> {
        let account = shared
            .store
            .load_account(org_id)
            .await?
            .ok_or(super::ActivationError::IdentityNotFound(org_id))?;
        if account.kind != StoredKind::Organization {
            return Err(super::ActivationError::IdentityNotFound(org_id));
        }

        if shared.store.member_credential(org_id).await?.is_none() {
            return Err(super::ActivationError::NoCredential(org_id));
        }

        // Metadata may vouch for membership this incarnation never fetched;
        // seed the cached role lists from the store so a "not modified" on
        // one role cannot erase the other's data.
        let stored = shared.store.organization_members(org_id).await?;
        let member_ids = stored
            .iter()
            .filter(|(_, admin)| !admin)
            .map(|&(id, _)| id)
            .collect();
        let admin_ids = stored
            .iter()
            .filter(|(_, admin)| *admin)
            .map(|&(id, _)| id)
            .collect();

        Ok(Self {
            org_id,
            login: account.login,
            profile: shared
                .store
                .get_cache_metadata(org_id, MetadataSlot::Profile)
                .await?,
            members: shared
                .store
                .get_cache_metadata(org_id, MetadataSlot::Members)
                .await?,
            admins: shared
                .store
                .get_cache_metadata(org_id, MetadataSlot::Admins)
                .await?,
            member_ids,
            admin_ids,
            forced: BTreeSet::new(),
        })
    }

    fn due(&self, slot: MetadataSlot, metadata: &CacheMetadata) -> bool {
        self.forced.contains(&slot) || metadata.is_stale(Utc::now())
    }

    fn membership_pairs(&self) -> Vec<(i64, bool)> {
        let mut pairs: BTreeMap<i64, bool> = self
            .member_ids
            .iter()
            .map(|&id| (id, false))
            .collect();
        for &id in &self.admin_ids {
            pairs.insert(id, true);
        }
        pairs.into_iter().collect()
    }
}

#[async_trait]
impl AgentCycle for OrgAgent {
    async fn cycle(&mut self, shared: &Arc<Shared>) -> CycleOutcome {
        let mut outcome = CycleOutcome::new();
        let budget = shared.config.sub_resource_timeout;

        // Organizations poll through some member's credential.
        let cred = match shared.store.member_credential(self.org_id).await {
            Ok(Some(cred)) => cred,
            Ok(None) => {
                tracing::debug!(org_id = self.org_id, "no member credential, deactivating");
                outcome.suspend = true;
                return outcome;
            }
            Err(error) => {
                tracing::warn!(org_id = self.org_id, %error, "credential lookup failed");
                return outcome;
            }
        };

        // The login may have been renamed by another agent's merge.
        if let Ok(Some(account)) = shared.store.load_account(self.org_id).await {
            self.login = account.login;
        }

        // Own record.
        if self.due(MetadataSlot::Profile, &self.profile) {
            let fetch = shared.gateway.fetch_organization(
                &cred,
                &self.login,
                &self.profile,
                RequestPriority::Background,
            );
            match guard_fetch(budget, "organization profile", fetch).await {
                SlotFetch::Fresh {
                    payload,
                    metadata,
                    response_ts,
                } => {
                    let record = AccountRecord {
                        kind: AccountKind::Organization,
                        ..payload
                    };
                    match shared.store.upsert_account(response_ts, &record).await {
                        Ok(merged) => {
                            outcome.changes.union_with(&merged);
                            self.profile = metadata;
                            self.forced.remove(&MetadataSlot::Profile);
                        }
                        Err(error) => {
                            tracing::warn!(org_id = self.org_id, %error, "organization merge failed")
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

        // Membership gates access control: interactive priority. Both roles
        // are refreshed together under the members slot's staleness.
        if self.due(MetadataSlot::Members, &self.members)
            || self.due(MetadataSlot::Admins, &self.admins)
        {
            let mut fresh_accounts: Vec<AccountRecord> = Vec::new();
            let mut response_ts: Option<DateTime<Utc>> = None;
            let mut members_meta = None;
            let mut admins_meta = None;
            let mut revoked = false;

            let fetch = shared.gateway.fetch_organization_members(
                &cred,
                &self.login,
                MemberRole::Member,
                &self.members,
                RequestPriority::Interactive,
            );
            match guard_fetch(budget, "organization members", fetch).await {
                SlotFetch::Fresh {
                    payload,
                    metadata,
                    response_ts: ts,
                } => {
                    self.member_ids = payload.iter().map(|a| a.id).collect();
                    fresh_accounts.extend(payload);
                    response_ts = Some(ts);
                    members_meta = Some(metadata);
                }
                SlotFetch::NotModified { metadata } => members_meta = Some(metadata),
                SlotFetch::Revoked => revoked = true,
                SlotFetch::RateLimited | SlotFetch::Skip => {}
            }

            let fetch = shared.gateway.fetch_organization_members(
                &cred,
                &self.login,
                MemberRole::Admin,
                &self.admins,
                RequestPriority::Interactive,
            );
            match guard_fetch(budget, "organization admins", fetch).await {
                SlotFetch::Fresh {
                    payload,
                    metadata,
                    response_ts: ts,
                } => {
                    self.admin_ids = payload.iter().map(|a| a.id).collect();
                    fresh_accounts.extend(payload);
                    response_ts = Some(response_ts.map_or(ts, |prev| prev.max(ts)));
                    admins_meta = Some(metadata);
                }
                SlotFetch::NotModified { metadata } => admins_meta = Some(metadata),
                SlotFetch::Revoked => revoked = true,
                SlotFetch::RateLimited | SlotFetch::Skip => {}
            }

            if revoked {
                suspend_credential(shared, &cred).await;
                return outcome;
            }

            if let Some(response_ts) = response_ts {
                // At least one role list changed: merge accounts and replace
                // the membership set from the cached role lists.
                let pairs = self.membership_pairs();
                let merged = async {
                    let mut merged = shared
                        .store
                        .bulk_upsert_accounts(response_ts, &fresh_accounts)
                        .await?;
                    merged.union_with(
                        &shared
                            .store
                            .set_organization_members(self.org_id, &pairs)
                            .await?,
                    );
                    Ok::<_, StoreError>(merged)
                }
                .await;

                match merged {
                    Ok(merged) => {
                        outcome.changes.union_with(&merged);
                        if let Some(metadata) = members_meta {
                            self.members = metadata;
                            self.forced.remove(&MetadataSlot::Members);
                        }
                        if let Some(metadata) = admins_meta {
                            self.admins = metadata;
                            self.forced.remove(&MetadataSlot::Admins);
                        }
                    }
                    Err(error) => {
                        tracing::warn!(org_id = self.org_id, %error, "membership merge failed")
                    }
                }
            } else {
                // Both roles not modified (or skipped): refresh whatever
                // metadata we did get.
                if let Some(metadata) = members_meta {
                    self.members = metadata;
                    self.forced.remove(&MetadataSlot::Members);
                }
                if let Some(metadata) = admins_meta {
                    self.admins = metadata;
                    self.forced.remove(&MetadataSlot::Admins);
                }
            }
        }

        outcome
    }

    async fn persist(&self, store: &dyn Store) -> Result<(), StoreError> {
        store
            .put_cache_metadata(self.org_id, MetadataSlot::Profile, &self.profile)
            .await?;
        store
            .put_cache_metadata(self.org_id, MetadataSlot::Members, &self.members)
            .await?;
        store
            .put_cache_metadata(self.org_id, MetadataSlot::Admins, &self.admins)
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

/// A member credential was revoked: suspend its owner, keep the org agent
/// alive so the next cycle can act through another member.
async fn suspend_credential(shared: &Arc<Shared>, cred: &crate::gateway::AccessCredential) {
    if let Err(error) = shared.store.mark_account_inactive(cred.user_id).await {
        tracing::warn!(user_id = cred.user_id, %error, "failed to suspend credential owner");
    }
}
