//! Hubmirror - an incremental GitHub mirror with a versioned delta-sync
//! protocol.
//!
//! The engine continuously polls a rate-limited upstream API on behalf of
//! tracked identities, merges what changed into a local store, and streams
//! the resulting changes to connected clients as an ordered, resumable delta
//! log.
//!
//! # Features
//!
//! - `sqlite` / `postgres` - database backends for the store.
//! - `migrate` - schema migrations and [`connect_and_migrate`].
//! - `github` - the live conditional-GET gateway over the GitHub REST API.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hubmirror::{connect_and_migrate, GitHubGateway, SqlStore, SyncConfig, SyncService};
//!
//! let db = connect_and_migrate("sqlite://mirror.db?mode=rwc").await?;
//! let store = Arc::new(SqlStore::new(db));
//! let gateway = Arc::new(GitHubGateway::new(10)?);
//! let service = SyncService::new(store, gateway, SyncConfig::default());
//!
//! service.onboard("ghp_...");
//! ```

pub mod agent;
pub mod cascade;
pub mod changes;
pub mod config;
pub mod db;
pub mod entity;
pub mod gateway;
pub mod notify;
pub mod service;
pub mod session;
pub mod store;
pub mod versions;

#[cfg(feature = "migrate")]
pub mod migration;

pub use agent::{ActivationError, AgentKey, AgentRegistry};
pub use cascade::{CascadePipeline, StageMessage};
pub use changes::ChangeSet;
pub use config::SyncConfig;
pub use db::connect;
#[cfg(feature = "migrate")]
pub use db::connect_and_migrate;
pub use gateway::{
    AccessCredential, CacheMetadata, FetchOutcome, GatewayError, RateBudget, RequestPriority,
    UpstreamGateway,
};
#[cfg(feature = "github")]
pub use gateway::github::GitHubGateway;
pub use notify::ChangeNotifier;
pub use service::SyncService;
pub use session::{ChannelTransport, SessionError, SessionTransport, SyncSession};
pub use store::{Delta, DeltaPage, SqlStore, Store, StoreError};
pub use versions::VersionVector;
