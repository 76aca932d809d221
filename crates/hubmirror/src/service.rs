//! Engine wiring: store + gateway + notifier + agents + cascade + sessions.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::agent::{ActivationError, AgentKey, AgentRegistry};
use crate::cascade::CascadePipeline;
use crate::config::SyncConfig;
use crate::gateway::UpstreamGateway;
use crate::notify::ChangeNotifier;
use crate::session::{SessionError, SessionTransport, SyncSession};
use crate::store::Store;

/// One assembled sync engine.
///
/// Owns the change notifier, the agent registry, and the cascade pipeline;
/// hands out sessions for connected clients.
pub struct SyncService {
    store: Arc<dyn Store>,
    notifier: Arc<ChangeNotifier>,
    registry: AgentRegistry,
    cascade: CascadePipeline,
    config: SyncConfig,
}

impl SyncService {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn UpstreamGateway>,
        config: SyncConfig,
    ) -> Self {
        let notifier = Arc::new(ChangeNotifier::new());
        let registry = AgentRegistry::new(
            Arc::clone(&store),
            Arc::clone(&gateway),
            Arc::clone(&notifier),
            config.clone(),
        );
        let cascade = CascadePipeline::new(
            Arc::clone(&store),
            Arc::clone(&gateway),
            Arc::clone(&notifier),
        );

        Self {
            store,
            notifier,
            registry,
            cascade,
            config,
        }
    }

    /// Start the onboarding cascade for a fresh credential.
    pub fn onboard(&self, token: impl Into<String>) {
        self.cascade.onboard(token);
    }

    /// Signal sync interest for a user, activating their agent.
    pub async fn poll_user(&self, user_id: i64) -> Result<(), ActivationError> {
        self.registry.signal_interest(AgentKey::User(user_id)).await
    }

    /// Signal sync interest for every credentialed user.
    pub async fn poll_all_users(&self) -> Result<usize, ActivationError> {
        let users = self.store.credentialed_users().await.map_err(ActivationError::Store)?;
        let mut polled = 0;
        for user_id in users {
            match self.poll_user(user_id).await {
                Ok(()) => polled += 1,
                Err(error) => tracing::warn!(user_id, %error, "poll signal failed"),
            }
        }
        Ok(polled)
    }

    /// Serve one connected client over the given transport.
    pub fn handle_connection<T>(
        &self,
        user_id: i64,
        transport: T,
    ) -> JoinHandle<Result<(), SessionError>>
    where
        T: SessionTransport + 'static,
    {
        let session = SyncSession::new(
            user_id,
            transport,
            Arc::clone(&self.store),
            self.registry.clone(),
            &self.notifier,
            self.config.page_size,
        );
        tokio::spawn(session.run())
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn cascade(&self) -> &CascadePipeline {
        &self.cascade
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }
}
