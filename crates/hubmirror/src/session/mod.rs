//! Per-client delta-sync protocol engine.
//!
//! A session waits for the client's `hello` (its version vector), signals
//! interest so the user's agent activates, and streams the reconciliation:
//! one batch of root deletions first, then fixed-size pages of changed data
//! with running `remaining` counts. While connected it watches the change
//! notifier and re-reconciles from its current vector whenever a cycle
//! touches something the client can see. Unknown client message kinds are
//! ignored; a malformed message terminates only this session.

pub mod messages;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::agent::{AgentKey, AgentRegistry};
use crate::changes::ChangeSet;
use crate::notify::ChangeNotifier;
use crate::store::{Store, StoreError};
use crate::versions::VersionVector;

use messages::{
    ClientMessage, EntryRecord, OrganizationEntry, RepositoryEntry, ServerMessage, SyncLogEntry,
    SyncMessage,
};

/// Session failures.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Malformed client message; terminates this session only.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The peer went away. Partial pages already sent remain valid.
    #[error("transport closed")]
    TransportClosed,
}

/// An ordered, reliable, message-boundary-preserving duplex channel.
#[async_trait]
pub trait SessionTransport: Send {
    /// Next message from the peer; `None` once the connection is gone.
    async fn recv(&mut self) -> Option<String>;

    /// Send one message to the peer.
    async fn send(&mut self, text: String) -> Result<(), SessionError>;
}

/// In-process transport over paired channels (tests, embedding).
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl ChannelTransport {
    /// Two connected endpoints.
    pub fn pair() -> (ChannelTransport, ChannelTransport) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            ChannelTransport { tx: a_tx, rx: b_rx },
            ChannelTransport { tx: b_tx, rx: a_rx },
        )
    }
}

#[async_trait]
impl SessionTransport for ChannelTransport {
    async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    async fn send(&mut self, text: String) -> Result<(), SessionError> {
        self.tx
            .send(text)
            .map_err(|_| SessionError::TransportClosed)
    }
}

/// One connected client's protocol engine.
pub struct SyncSession<T> {
    user_id: i64,
    transport: T,
    store: Arc<dyn Store>,
    registry: AgentRegistry,
    changes_rx: mpsc::UnboundedReceiver<Arc<ChangeSet>>,
    notifier_open: bool,
    page_size: usize,
    /// Versions the client has durably received so far.
    versions: VersionVector,
    greeted: bool,
}

impl<T: SessionTransport> SyncSession<T> {
    pub fn new(
        user_id: i64,
        transport: T,
        store: Arc<dyn Store>,
        registry: AgentRegistry,
        notifier: &ChangeNotifier,
        page_size: usize,
    ) -> Self {
        Self {
            user_id,
            transport,
            store,
            registry,
            changes_rx: notifier.subscribe(),
            notifier_open: true,
            page_size,
            versions: VersionVector::new(),
            greeted: false,
        }
    }

    /// Drive the session until the connection closes or a protocol error.
    pub async fn run(mut self) -> Result<(), SessionError> {
        loop {
            tokio::select! {
                incoming = self.transport.recv() => {
                    let Some(text) = incoming else {
                        return Ok(());
                    };
                    match self.on_message(&text).await {
                        Ok(()) => {}
                        Err(SessionError::TransportClosed) => return Ok(()),
                        Err(error) => return Err(error),
                    }
                }
                notice = self.changes_rx.recv(), if self.greeted && self.notifier_open => {
                    match notice {
                        Some(changes) => {
                            if self.concerns(&changes) {
                                match self.stream_delta().await {
                                    Ok(()) => {}
                                    Err(SessionError::TransportClosed) => return Ok(()),
                                    Err(error) => return Err(error),
                                }
                            }
                        }
                        None => self.notifier_open = false,
                    }
                }
            }
        }
    }

    async fn on_message(&mut self, text: &str) -> Result<(), SessionError> {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Hello(hello)) => {
                self.versions = hello.versions.into();
                self.greeted = true;

                // A sync request is an interest signal for the user's agent.
                if let Err(error) = self
                    .registry
                    .signal_interest(AgentKey::User(self.user_id))
                    .await
                {
                    tracing::warn!(user_id = self.user_id, %error, "interest signal failed");
                }

                self.stream_delta().await
            }
            Ok(ClientMessage::Unknown) => Ok(()),
            Err(error) => Err(SessionError::ProtocolViolation(error.to_string())),
        }
    }

    /// Does a change set touch anything this client can see?
    fn concerns(&self, changes: &ChangeSet) -> bool {
        changes.users.contains(&self.user_id)
            || changes
                .repositories
                .iter()
                .any(|id| self.versions.repositories.contains_key(id))
            || changes
                .organizations
                .iter()
                .any(|id| self.versions.organizations.contains_key(id))
    }

    async fn stream_delta(&mut self) -> Result<(), SessionError> {
        let delta = self
            .store
            .compute_delta(self.user_id, &self.versions, self.page_size)
            .await?;
        if delta.is_empty() {
            return Ok(());
        }

        let total = delta.total_entries as i64;

        // Deletions first, so the client never applies data for an identity
        // it no longer has access to.
        if !delta.removed_repositories.is_empty() || !delta.removed_organizations.is_empty() {
            let logs: Vec<SyncLogEntry> = delta
                .removed_repositories
                .iter()
                .map(|&id| {
                    SyncLogEntry::delete(EntryRecord::Repository(RepositoryEntry::tombstone(id)))
                })
                .chain(delta.removed_organizations.iter().map(|&id| {
                    SyncLogEntry::delete(EntryRecord::Organization(OrganizationEntry::tombstone(
                        id,
                    )))
                }))
                .collect();

            self.send(&ServerMessage::Sync(SyncMessage {
                logs,
                remaining: total,
                versions: (&delta.vector_after_removals).into(),
            }))
            .await?;
            self.versions = delta.vector_after_removals.clone();
        }

        let mut sent = 0i64;
        for page in &delta.pages {
            sent += page.entries.len() as i64;
            self.send(&ServerMessage::Sync(SyncMessage {
                logs: page.entries.clone(),
                remaining: total - sent,
                versions: (&page.versions).into(),
            }))
            .await?;
            self.versions = page.versions.clone();
        }

        self.versions = delta.final_vector;
        Ok(())
    }

    async fn send(&mut self, message: &ServerMessage) -> Result<(), SessionError> {
        let text = serde_json::to_string(message)
            .map_err(|e| SessionError::ProtocolViolation(e.to_string()))?;
        self.transport.send(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_transport_delivers_in_order() {
        let (mut client, mut server) = ChannelTransport::pair();

        client.send("one".to_string()).await.expect("send");
        client.send("two".to_string()).await.expect("send");
        assert_eq!(server.recv().await.as_deref(), Some("one"));
        assert_eq!(server.recv().await.as_deref(), Some("two"));

        server.send("ack".to_string()).await.expect("send");
        assert_eq!(client.recv().await.as_deref(), Some("ack"));
    }

    #[tokio::test]
    async fn channel_transport_reports_closure() {
        let (mut client, server) = ChannelTransport::pair();
        drop(server);

        assert!(matches!(
            client.send("late".to_string()).await,
            Err(SessionError::TransportClosed)
        ));
        assert!(client.recv().await.is_none());
    }
}
