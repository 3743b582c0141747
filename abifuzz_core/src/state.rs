use crate::abi::AccountRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One observable state value. The core never interprets these beyond
/// equality; numeric and opaque byte values are kept apart only so snapshots
/// canonicalize deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scalar {
    Uint(u64),
    Bytes(Vec<u8>),
}

pub type StateMap = BTreeMap<String, Scalar>;

/// Externally observable state of the program under test at one point in
/// time: a global key/value store plus one store per known account. Keys are
/// held in `BTreeMap`s so the snapshot is canonically ordered by
/// construction, regardless of the order the backend reported them in.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default)]
    pub global: StateMap,
    #[serde(default)]
    pub local: BTreeMap<String, StateMap>,
}

impl StateSnapshot {
    pub fn get_global(&self, key: &str) -> Option<&Scalar> {
        self.global.get(key)
    }

    pub fn exists_global(&self, key: &str) -> bool {
        self.global.contains_key(key)
    }

    pub fn get_local(&self, account: &AccountRef, key: &str) -> Option<&Scalar> {
        self.local.get(&account.0).and_then(|map| map.get(key))
    }

    pub fn exists_local(&self, account: &AccountRef, key: &str) -> bool {
        self.get_local(account, key).is_some()
    }
}

/// Keeps the most recent snapshot so each reload yields the (old, new)
/// transition pair the schedule consumes.
#[derive(Debug, Clone)]
pub struct StateTracker {
    current: StateSnapshot,
}

impl StateTracker {
    /// Starts tracking from the pre-campaign baseline snapshot.
    pub fn new(baseline: StateSnapshot) -> Self {
        Self { current: baseline }
    }

    /// Replaces the tracked snapshot and returns the (old, new) pair.
    pub fn advance(&mut self, fresh: StateSnapshot) -> (StateSnapshot, StateSnapshot) {
        let old = std::mem::replace(&mut self.current, fresh);
        (old, self.current.clone())
    }

    pub fn current(&self) -> &StateSnapshot {
        &self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_with(key: &str, value: u64) -> StateSnapshot {
        let mut snap = StateSnapshot::default();
        snap.global.insert(key.to_string(), Scalar::Uint(value));
        snap
    }

    #[test]
    fn accessors_distinguish_global_and_local() {
        let mut snap = snapshot_with("counter", 3);
        let mut local = StateMap::new();
        local.insert("opted_in".to_string(), Scalar::Uint(1));
        snap.local.insert("ADDR1".to_string(), local);

        assert!(snap.exists_global("counter"));
        assert_eq!(snap.get_global("counter"), Some(&Scalar::Uint(3)));
        assert!(!snap.exists_global("opted_in"));

        let account = AccountRef("ADDR1".to_string());
        assert!(snap.exists_local(&account, "opted_in"));
        assert!(!snap.exists_local(&AccountRef("ADDR2".to_string()), "opted_in"));
    }

    #[test]
    fn tracker_yields_old_new_pairs() {
        let mut tracker = StateTracker::new(snapshot_with("n", 0));
        let (old, new) = tracker.advance(snapshot_with("n", 1));
        assert_eq!(old, snapshot_with("n", 0));
        assert_eq!(new, snapshot_with("n", 1));
        assert_eq!(tracker.current(), &snapshot_with("n", 1));

        let (old, new) = tracker.advance(snapshot_with("n", 1));
        assert_eq!(old, new);
    }
}
