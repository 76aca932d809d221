//! Cascading multi-stage refresh pipeline.
//!
//! Onboarding a credential walks a fixed stage sequence:
//!
//! ```text
//! ResolveIdentity → SyncLinkedRepositories
//!                 → SyncMemberOrganizations → SyncOrganizationMembers (per org)
//! ```
//!
//! Each stage's postcondition is a durable fact in the store that the next
//! stage's precondition checks before proceeding; an unmet precondition or a
//! failed handler requeues the message (at-least-once, bounded attempts).
//! Handlers merge through the timestamp-gated store, so re-delivery never
//! duplicates rows or double-counts changes. A stage fans out its children
//! after its own postcondition commits and does not wait for them.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::gateway::{
    AccessCredential, AccountKind, AccountRecord, CacheMetadata, FetchOutcome, GatewayError,
    MemberRole, RequestPriority, UpstreamGateway,
};
use crate::notify::ChangeNotifier;
use crate::store::{Store, StoreError};

/// Attempts per message before it is dropped with an error log.
const MAX_ATTEMPTS: u32 = 5;

/// Delay before a failed message is requeued.
const REQUEUE_DELAY: Duration = Duration::from_secs(2);

/// One unit of pipeline work.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageMessage {
    /// Precondition: none. Postcondition: the credential's user row and
    /// token are saved.
    ResolveIdentity { token: String },
    /// Precondition: user and credential saved. Postcondition: the user's
    /// repositories, their owners, and the user's links are saved.
    SyncLinkedRepositories { user_id: i64 },
    /// Precondition: user and credential saved. Postcondition: the user's
    /// organizations and membership rows are saved.
    SyncMemberOrganizations { user_id: i64 },
    /// Precondition: the organization row exists. Postcondition: its member
    /// accounts and membership set are saved.
    SyncOrganizationMembers { organization_id: i64, via_user: i64 },
}

impl StageMessage {
    fn name(&self) -> &'static str {
        match self {
            StageMessage::ResolveIdentity { .. } => "resolve_identity",
            StageMessage::SyncLinkedRepositories { .. } => "sync_linked_repositories",
            StageMessage::SyncMemberOrganizations { .. } => "sync_member_organizations",
            StageMessage::SyncOrganizationMembers { .. } => "sync_organization_members",
        }
    }
}

#[derive(Debug, Error)]
enum StageError {
    /// The previous stage's postcondition is not yet visible; requeue.
    #[error("precondition not met: {0}")]
    Precondition(&'static str),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

struct Envelope {
    message: StageMessage,
    attempt: u32,
}

struct Deps {
    store: Arc<dyn Store>,
    gateway: Arc<dyn UpstreamGateway>,
    notifier: Arc<ChangeNotifier>,
}

/// Handle to the pipeline queue. Dropping every handle stops the worker once
/// the queue drains.
#[derive(Clone)]
pub struct CascadePipeline {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl CascadePipeline {
    /// Spawn the pipeline worker.
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn UpstreamGateway>,
        notifier: Arc<ChangeNotifier>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let deps = Deps {
            store,
            gateway,
            notifier,
        };
        tokio::spawn(run_worker(deps, rx, tx.clone()));
        Self { tx }
    }

    /// Enqueue a stage message.
    pub fn enqueue(&self, message: StageMessage) {
        if self
            .tx
            .send(Envelope {
                message,
                attempt: 0,
            })
            .is_err()
        {
            tracing::error!("cascade worker gone, message dropped");
        }
    }

    /// Start the full onboarding cascade for a credential.
    pub fn onboard(&self, token: impl Into<String>) {
        self.enqueue(StageMessage::ResolveIdentity {
            token: token.into(),
        });
    }
}

async fn run_worker(
    deps: Deps,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    tx: mpsc::UnboundedSender<Envelope>,
) {
    while let Some(envelope) = rx.recv().await {
        let stage = envelope.message.name();
        match handle_stage(&deps, &envelope.message).await {
            Ok(next) => {
                tracing::debug!(stage, fanout = next.len(), "stage complete");
                for message in next {
                    let _ = tx.send(Envelope {
                        message,
                        attempt: 0,
                    });
                }
            }
            Err(error) => {
                let attempt = envelope.attempt + 1;
                if attempt >= MAX_ATTEMPTS {
                    tracing::error!(stage, attempt, %error, "stage abandoned");
                    continue;
                }
                tracing::warn!(stage, attempt, %error, "stage failed, requeueing");
                let tx = tx.clone();
                let message = envelope.message;
                tokio::spawn(async move {
                    tokio::time::sleep(REQUEUE_DELAY).await;
                    let _ = tx.send(Envelope { message, attempt });
                });
            }
        }
    }
}

async fn handle_stage(deps: &Deps, message: &StageMessage) -> Result<Vec<StageMessage>, StageError> {
    match message {
        StageMessage::ResolveIdentity { token } => {
            // The user id is unknown until upstream answers.
            let cred = AccessCredential::new(0, token.clone());
            let outcome = deps
                .gateway
                .fetch_user(&cred, &CacheMetadata::default(), RequestPriority::Interactive)
                .await?;
            let FetchOutcome::Fresh {
                payload,
                response_ts,
                ..
            } = outcome
            else {
                return Ok(Vec::new());
            };

            let user_id = payload.id;
            let changes = deps.store.upsert_account(response_ts, &payload).await?;
            deps.store.set_credential(user_id, token).await?;
            deps.notifier.dispatch(changes);

            Ok(vec![
                StageMessage::SyncLinkedRepositories { user_id },
                StageMessage::SyncMemberOrganizations { user_id },
            ])
        }

        StageMessage::SyncLinkedRepositories { user_id } => {
            let cred = user_credential(deps, *user_id).await?;
            let outcome = deps
                .gateway
                .fetch_user_repositories(
                    &cred,
                    &CacheMetadata::default(),
                    RequestPriority::Interactive,
                )
                .await?;
            let FetchOutcome::Fresh {
                payload,
                response_ts,
                ..
            } = outcome
            else {
                return Ok(Vec::new());
            };

            let keep: Vec<_> = payload
                .into_iter()
                .filter(|r| r.has_issues && r.permissions.push)
                .collect();
            let owners: Vec<AccountRecord> = keep
                .iter()
                .map(|r| (r.owner.id, r.owner.clone()))
                .collect::<std::collections::BTreeMap<_, _>>()
                .into_values()
                .collect();
            let links: Vec<(i64, bool)> = keep.iter().map(|r| (r.id, r.permissions.admin)).collect();

            let mut changes = deps.store.bulk_upsert_accounts(response_ts, &owners).await?;
            changes.union_with(&deps.store.bulk_upsert_repositories(response_ts, &keep).await?);
            changes.union_with(&deps.store.set_linked_repositories(*user_id, &links).await?);
            deps.notifier.dispatch(changes);

            Ok(Vec::new())
        }

        StageMessage::SyncMemberOrganizations { user_id } => {
            let cred = user_credential(deps, *user_id).await?;
            let outcome = deps
                .gateway
                .fetch_user_organizations(
                    &cred,
                    &CacheMetadata::default(),
                    RequestPriority::Interactive,
                )
                .await?;
            let FetchOutcome::Fresh {
                payload,
                response_ts,
                ..
            } = outcome
            else {
                return Ok(Vec::new());
            };

            let orgs: Vec<AccountRecord> = payload
                .into_iter()
                .map(|m| AccountRecord {
                    kind: AccountKind::Organization,
                    ..m.organization
                })
                .collect();
            let org_ids: Vec<i64> = orgs.iter().map(|o| o.id).collect();

            let mut changes = deps.store.bulk_upsert_accounts(response_ts, &orgs).await?;
            changes.union_with(&deps.store.set_user_organizations(*user_id, &org_ids).await?);
            deps.notifier.dispatch(changes);

            Ok(org_ids
                .into_iter()
                .map(|organization_id| StageMessage::SyncOrganizationMembers {
                    organization_id,
                    via_user: *user_id,
                })
                .collect())
        }

        StageMessage::SyncOrganizationMembers {
            organization_id,
            via_user,
        } => {
            let org = deps
                .store
                .load_account(*organization_id)
                .await?
                .ok_or(StageError::Precondition("organization row missing"))?;
            let cred = user_credential(deps, *via_user).await?;

            let mut members: Vec<(i64, bool)> = Vec::new();
            let mut accounts: Vec<AccountRecord> = Vec::new();
            let mut response_ts = None;

            for role in [MemberRole::Member, MemberRole::Admin] {
                let outcome = deps
                    .gateway
                    .fetch_organization_members(
                        &cred,
                        &org.login,
                        role,
                        &CacheMetadata::default(),
                        RequestPriority::Interactive,
                    )
                    .await?;
                if let FetchOutcome::Fresh {
                    payload,
                    response_ts: ts,
                    ..
                } = outcome
                {
                    members.extend(
                        payload
                            .iter()
                            .map(|a| (a.id, matches!(role, MemberRole::Admin))),
                    );
                    accounts.extend(payload);
                    response_ts = Some(ts);
                }
            }

            let Some(response_ts) = response_ts else {
                return Ok(Vec::new());
            };

            let mut changes = deps
                .store
                .bulk_upsert_accounts(response_ts, &accounts)
                .await?;
            changes.union_with(
                &deps
                    .store
                    .set_organization_members(*organization_id, &members)
                    .await?,
            );
            deps.notifier.dispatch(changes);

            Ok(Vec::new())
        }
    }
}

/// Resolve a stage's acting credential; missing means the previous stage's
/// postcondition is not yet visible.
async fn user_credential(deps: &Deps, user_id: i64) -> Result<AccessCredential, StageError> {
    deps.store
        .load_account(user_id)
        .await?
        .ok_or(StageError::Precondition("user row missing"))?;
    deps.store
        .credential_for(user_id)
        .await?
        .ok_or(StageError::Precondition("user credential missing"))
}
