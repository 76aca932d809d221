//! Per-entity version vectors.
//!
//! A client holds a vector describing the snapshot it believes is current;
//! the server holds the authoritative one. Reconciliation streams the
//! difference. Entries a client omits are treated as version 0 (never seen).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Monotonically increasing per-root versions for repositories and
/// organizations.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionVector {
    pub repositories: BTreeMap<i64, i64>,
    pub organizations: BTreeMap<i64, i64>,
}

impl VersionVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Version the vector holds for a repository; 0 when unknown.
    #[inline]
    pub fn repository(&self, id: i64) -> i64 {
        self.repositories.get(&id).copied().unwrap_or(0)
    }

    /// Version the vector holds for an organization; 0 when unknown.
    #[inline]
    pub fn organization(&self, id: i64) -> i64 {
        self.organizations.get(&id).copied().unwrap_or(0)
    }

    pub fn set_repository(&mut self, id: i64, version: i64) {
        self.repositories.insert(id, version);
    }

    pub fn set_organization(&mut self, id: i64, version: i64) {
        self.organizations.insert(id, version);
    }

    pub fn remove_repository(&mut self, id: i64) {
        self.repositories.remove(&id);
    }

    pub fn remove_organization(&mut self, id: i64) {
        self.organizations.remove(&id);
    }
}
