//! Change accumulation for one refresh cycle.
//!
//! A [`ChangeSet`] collects the ids of entities whose stored rows actually
//! changed during a cycle. Merges that turn out to be no-ops contribute
//! nothing, so an agent that fetched fresh-but-identical data ends the cycle
//! with an empty set and notifies nobody.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Ids affected by one refresh cycle, deduplicated per entity kind.
///
/// Issue and label changes roll up to the repository that owns them, so the
/// set tracks only the three root kinds the sync protocol versions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// User accounts whose row or whose access links changed.
    pub users: BTreeSet<i64>,
    /// Organizations whose row or membership changed.
    pub organizations: BTreeSet<i64>,
    /// Repositories whose row or whose children changed.
    pub repositories: BTreeSet<i64>,
}

impl ChangeSet {
    /// Create an empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a changed user account.
    pub fn add_user(&mut self, id: i64) {
        self.users.insert(id);
    }

    /// Record a changed organization.
    pub fn add_organization(&mut self, id: i64) {
        self.organizations.insert(id);
    }

    /// Record a changed repository.
    pub fn add_repository(&mut self, id: i64) {
        self.repositories.insert(id);
    }

    /// Merge another change set into this one (set union per kind).
    pub fn union_with(&mut self, other: &ChangeSet) {
        self.users.extend(&other.users);
        self.organizations.extend(&other.organizations);
        self.repositories.extend(&other.repositories);
    }

    /// True when no entity of any kind was affected.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.organizations.is_empty() && self.repositories.is_empty()
    }

    /// Total number of affected ids across all kinds.
    pub fn len(&self) -> usize {
        self.users.len() + self.organizations.len() + self.repositories.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_set_is_empty() {
        let changes = ChangeSet::new();
        assert!(changes.is_empty());
        assert_eq!(changes.len(), 0);
    }

    #[test]
    fn adding_ids_marks_non_empty() {
        let mut changes = ChangeSet::new();
        changes.add_repository(7);
        assert!(!changes.is_empty());
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn duplicate_ids_are_deduplicated() {
        let mut changes = ChangeSet::new();
        changes.add_user(1);
        changes.add_user(1);
        changes.add_organization(1);
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn union_is_set_union_per_kind() {
        let mut a = ChangeSet::new();
        a.add_user(1);
        a.add_repository(10);

        let mut b = ChangeSet::new();
        b.add_user(1);
        b.add_user(2);
        b.add_organization(5);

        a.union_with(&b);
        assert_eq!(a.users, BTreeSet::from([1, 2]));
        assert_eq!(a.organizations, BTreeSet::from([5]));
        assert_eq!(a.repositories, BTreeSet::from([10]));
    }

    #[test]
    fn union_emptiness_matches_both_operands() {
        let cases = [(false, false), (false, true), (true, false), (true, true)];
        for (a_empty, b_empty) in cases {
            let mut a = ChangeSet::new();
            if !a_empty {
                a.add_user(1);
            }
            let mut b = ChangeSet::new();
            if !b_empty {
                b.add_repository(2);
            }

            let both_empty = a.is_empty() && b.is_empty();
            a.union_with(&b);
            assert_eq!(a.is_empty(), both_empty);
        }
    }

    #[test]
    fn serde_round_trip() {
        let mut changes = ChangeSet::new();
        changes.add_user(1);
        changes.add_repository(2);

        let json = serde_json::to_string(&changes).expect("serialize");
        let back: ChangeSet = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, changes);
    }
}
