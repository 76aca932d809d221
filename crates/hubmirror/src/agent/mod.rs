//! Per-identity polling agents.
//!
//! Each active identity (user, organization, repository) is one tokio task
//! owning that identity's in-memory cache metadata and cycle flags; nothing
//! is shared across agent tasks, so no locking guards agent state. The
//! registry maps identity → mailbox: the first message lazily activates the
//! agent (after store-side checks that surface to the requester), an idle
//! window with no interest ends the task, and a later message re-activates
//! with the metadata the previous incarnation persisted.

pub mod org;
pub mod repo;
pub mod user;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::changes::ChangeSet;
use crate::config::SyncConfig;
use crate::entity::cache_metadata::MetadataSlot;
use crate::gateway::{FetchOutcome, GatewayError, UpstreamGateway};
use crate::notify::ChangeNotifier;
use crate::store::{Store, StoreError};

/// Mailbox depth per agent; senders back off when a cycle runs long.
const MAILBOX_DEPTH: usize = 16;

/// Identity key for one agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AgentKey {
    User(i64),
    Organization(i64),
    Repository(i64),
}

impl AgentKey {
    pub fn id(self) -> i64 {
        match self {
            AgentKey::User(id) | AgentKey::Organization(id) | AgentKey::Repository(id) => id,
        }
    }
}

impl fmt::Display for AgentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentKey::User(id) => write!(f, "user:{id}"),
            AgentKey::Organization(id) => write!(f, "org:{id}"),
            AgentKey::Repository(id) => write!(f, "repo:{id}"),
        }
    }
}

/// Messages an agent accepts.
#[derive(Clone, Copy, Debug)]
pub enum AgentMessage {
    /// Interest in fresh data; restarts the idle clock.
    Interest,
    /// Refetch one sub-resource next cycle regardless of freshness.
    Force(MetadataSlot),
}

/// Activation failures, surfaced to the activation requester only.
#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("identity {0} does not exist and cannot be activated")]
    IdentityNotFound(i64),
    #[error("identity {0} has no usable credential and cannot be activated")]
    NoCredential(i64),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Dependencies shared by all agents.
pub(crate) struct Shared {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) gateway: Arc<dyn UpstreamGateway>,
    pub(crate) notifier: Arc<ChangeNotifier>,
    pub(crate) config: SyncConfig,
    agents: Mutex<HashMap<AgentKey, mpsc::Sender<AgentMessage>>>,
}

impl Shared {
    fn remove_agent(&self, key: AgentKey, own_tx: &mpsc::Sender<AgentMessage>) {
        let mut agents = self.agents.lock().unwrap_or_else(|e| e.into_inner());
        if agents.get(&key).is_some_and(|cur| cur.same_channel(own_tx)) {
            agents.remove(&key);
        }
    }

    fn active_count(&self) -> usize {
        self.agents.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

type ActivationResult = std::result::Result<(), ActivationError>;

/// Deliver a message, lazily activating the agent if needed.
pub(crate) async fn send_message(
    shared: &Arc<Shared>,
    key: AgentKey,
    message: AgentMessage,
) -> ActivationResult {
    for _ in 0..3 {
        let existing = shared
            .agents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned();

        match existing {
            Some(tx) => {
                if tx.send(message).await.is_ok() {
                    return Ok(());
                }
                // The agent exited between lookup and send; drop the stale
                // handle unless someone already replaced it.
                let mut agents = shared.agents.lock().unwrap_or_else(|e| e.into_inner());
                if agents.get(&key).is_some_and(|cur| cur.same_channel(&tx)) {
                    agents.remove(&key);
                }
            }
            None => activate(shared, key).await?,
        }
    }

    tracing::warn!(%key, "message dropped after repeated activation races");
    Ok(())
}

/// Interest in an identity, activating it on first contact.
pub(crate) async fn signal_interest(shared: &Arc<Shared>, key: AgentKey) -> ActivationResult {
    send_message(shared, key, AgentMessage::Interest).await
}

/// Store-side activation checks, then task spawn. Failures surface to the
/// requester; the spawned task never sees them.
async fn activate(shared: &Arc<Shared>, key: AgentKey) -> ActivationResult {
    match key {
        AgentKey::User(id) => {
            let agent = user::UserAgent::load(shared, id).await?;
            spawn_agent(shared, key, agent);
        }
        AgentKey::Organization(id) => {
            let agent = org::OrgAgent::load(shared, id).await?;
            spawn_agent(shared, key, agent);
        }
        AgentKey::Repository(id) => {
            let agent = repo::RepoAgent::load(shared, id).await?;
            spawn_agent(shared, key, agent);
        }
    }
    Ok(())
}

fn spawn_agent<A: AgentCycle + 'static>(shared: &Arc<Shared>, key: AgentKey, agent: A) {
    let mut agents = shared.agents.lock().unwrap_or_else(|e| e.into_inner());
    if agents.contains_key(&key) {
        // Lost an activation race; the winner's task serves the key.
        return;
    }
    let (tx, rx) = mpsc::channel(MAILBOX_DEPTH);
    agents.insert(key, tx.clone());
    tokio::spawn(run_agent(agent, Arc::clone(shared), key, rx, tx));
}

/// Handle to the agent pool.
#[derive(Clone)]
pub struct AgentRegistry {
    shared: Arc<Shared>,
}

impl AgentRegistry {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn UpstreamGateway>,
        notifier: Arc<ChangeNotifier>,
        config: SyncConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                gateway,
                notifier,
                config,
                agents: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Signal interest in an identity, activating its agent on first contact.
    ///
    /// Fails only when activation fails: the identity does not exist or no
    /// usable credential resolves.
    pub async fn signal_interest(&self, key: AgentKey) -> Result<(), ActivationError> {
        signal_interest(&self.shared, key).await
    }

    /// Refetch one sub-resource on the identity's next cycle regardless of
    /// cache freshness.
    pub async fn force_refresh(
        &self,
        key: AgentKey,
        slot: MetadataSlot,
    ) -> Result<(), ActivationError> {
        send_message(&self.shared, key, AgentMessage::Force(slot)).await
    }

    /// Number of currently active agents.
    pub fn active_count(&self) -> usize {
        self.shared.active_count()
    }
}

/// What one cycle produced.
pub(crate) struct CycleOutcome {
    pub(crate) changes: ChangeSet,
    /// Deactivate now (no usable credential remains).
    pub(crate) suspend: bool,
}

impl CycleOutcome {
    pub(crate) fn new() -> Self {
        Self {
            changes: ChangeSet::new(),
            suspend: false,
        }
    }
}

/// Per-kind cycle behavior driven by the shared agent loop.
#[async_trait]
pub(crate) trait AgentCycle: Send {
    /// Run one refresh cycle. Upstream and store failures are contained
    /// inside; they never propagate out of the cycle.
    async fn cycle(&mut self, shared: &Arc<Shared>) -> CycleOutcome;

    /// Persist the agent's current cache metadata.
    async fn persist(&self, store: &dyn Store) -> Result<(), StoreError>;

    /// Request an unconditional refetch of one sub-resource.
    fn force(&mut self, slot: MetadataSlot);

    /// True while any forced refetch has not yet completed.
    fn force_pending(&self) -> bool;
}

/// The agent task: timer-driven cycles, idle shutdown, drain on exit.
async fn run_agent<A: AgentCycle>(
    mut agent: A,
    shared: Arc<Shared>,
    key: AgentKey,
    mut rx: mpsc::Receiver<AgentMessage>,
    own_tx: mpsc::Sender<AgentMessage>,
) {
    tracing::debug!(%key, "agent activated");

    let mut last_interest = tokio::time::Instant::now();
    let mut ticker = tokio::time::interval(shared.config.poll_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(AgentMessage::Interest) => {
                    last_interest = tokio::time::Instant::now();
                }
                Some(AgentMessage::Force(slot)) => {
                    agent.force(slot);
                    last_interest = tokio::time::Instant::now();
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !agent.force_pending() && last_interest.elapsed() > shared.config.idle_after {
                    tracing::debug!(%key, "no recent interest, deactivating");
                    break;
                }

                let outcome = agent.cycle(&shared).await;
                if !outcome.changes.is_empty() {
                    shared.notifier.dispatch(outcome.changes);
                }
                if let Err(error) = agent.persist(shared.store.as_ref()).await {
                    tracing::warn!(%key, %error, "failed to persist cache metadata");
                }
                if outcome.suspend {
                    tracing::debug!(%key, "suspending");
                    break;
                }
            }
        }
    }

    // Drain before exit: current metadata must reach the store so the next
    // activation resumes where this one stopped.
    if let Err(error) = agent.persist(shared.store.as_ref()).await {
        tracing::warn!(%key, %error, "failed to persist cache metadata on deactivation");
    }
    shared.remove_agent(key, &own_tx);
    tracing::debug!(%key, "agent deactivated");
}

/// Outcome of one guarded sub-resource fetch.
pub(crate) enum SlotFetch<T> {
    Fresh {
        payload: T,
        metadata: crate::gateway::CacheMetadata,
        response_ts: DateTime<Utc>,
    },
    NotModified {
        metadata: crate::gateway::CacheMetadata,
    },
    /// Budget exhausted; nothing mutated, retried next period.
    RateLimited,
    /// The acting credential was revoked upstream.
    Revoked,
    /// Transient failure or timeout; nothing mutated, retried next period.
    Skip,
}

/// Run one sub-resource fetch under the cycle's wall-clock budget, mapping
/// every failure mode to a contained outcome.
pub(crate) async fn guard_fetch<T, F>(budget: Duration, what: &str, fetch: F) -> SlotFetch<T>
where
    F: Future<Output = crate::gateway::Result<FetchOutcome<T>>>,
{
    match tokio::time::timeout(budget, fetch).await {
        Ok(Ok(FetchOutcome::Fresh {
            payload,
            metadata,
            response_ts,
        })) => SlotFetch::Fresh {
            payload,
            metadata,
            response_ts,
        },
        Ok(Ok(FetchOutcome::NotModified { metadata })) => SlotFetch::NotModified { metadata },
        Ok(Err(GatewayError::RateLimited { retry_after })) => {
            tracing::debug!(what, ?retry_after, "rate limited");
            SlotFetch::RateLimited
        }
        Ok(Err(error)) if error.is_permanent() => {
            tracing::warn!(what, %error, "credential rejected upstream");
            SlotFetch::Revoked
        }
        Ok(Err(error)) => {
            tracing::warn!(what, %error, "fetch failed, will retry next cycle");
            SlotFetch::Skip
        }
        Err(_) => {
            tracing::warn!(what, budget_secs = budget.as_secs(), "fetch timed out");
            SlotFetch::Skip
        }
    }
}
