//! Canonical identifiers for the two feedback channels.
//!
//! Both functions are pure and stable across process restarts: an identifier
//! is the md5 digest of a canonical byte encoding, so the same coverage set
//! or transition pair always maps to the same id no matter the order the
//! backend delivered it in.

use crate::state::{Scalar, StateMap, StateSnapshot};
use std::collections::BTreeSet;
use std::fmt;

/// Identity of one coverage path (the set of program locations one call
/// executed, order-independent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathId([u8; 16]);

/// Identity of one observed (old, new) state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransitionId([u8; 16]);

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Display for TransitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Hashes a coverage line-set into its path identifier. The `BTreeSet`
/// argument is already sorted, so two calls covering the same lines in any
/// execution order collapse to the same id.
pub fn path_id(lines: &BTreeSet<u32>) -> PathId {
    let mut encoded = Vec::with_capacity(lines.len() * 4);
    for line in lines {
        encoded.extend_from_slice(&line.to_be_bytes());
    }
    PathId(md5::compute(&encoded).0)
}

/// Hashes an (old, new) snapshot pair into its transition identifier. Two
/// transitions are identical iff both snapshots match field for field after
/// canonical key ordering.
pub fn transition_id(old: &StateSnapshot, new: &StateSnapshot) -> TransitionId {
    let mut encoded = Vec::new();
    encode_snapshot(&mut encoded, old);
    encode_snapshot(&mut encoded, new);
    TransitionId(md5::compute(&encoded).0)
}

fn encode_snapshot(out: &mut Vec<u8>, snapshot: &StateSnapshot) {
    out.push(b'G');
    encode_map(out, &snapshot.global);
    out.push(b'L');
    out.extend_from_slice(&(snapshot.local.len() as u64).to_be_bytes());
    for (account, map) in &snapshot.local {
        encode_str(out, account);
        encode_map(out, map);
    }
}

fn encode_map(out: &mut Vec<u8>, map: &StateMap) {
    out.extend_from_slice(&(map.len() as u64).to_be_bytes());
    for (key, value) in map {
        encode_str(out, key);
        match value {
            Scalar::Uint(v) => {
                out.push(b'u');
                out.extend_from_slice(&v.to_be_bytes());
            }
            Scalar::Bytes(bytes) => {
                out.push(b'b');
                out.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
                out.extend_from_slice(bytes);
            }
        }
    }
}

fn encode_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u64).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Scalar;

    #[test]
    fn path_id_ignores_insertion_order() {
        let forward: BTreeSet<u32> = [1, 2, 3, 17].into_iter().collect();
        let backward: BTreeSet<u32> = [17, 3, 2, 1].into_iter().collect();
        assert_eq!(path_id(&forward), path_id(&backward));
    }

    #[test]
    fn path_id_distinguishes_different_sets() {
        let a: BTreeSet<u32> = [1, 2, 3].into_iter().collect();
        let b: BTreeSet<u32> = [1, 2, 4].into_iter().collect();
        assert_ne!(path_id(&a), path_id(&b));

        let empty = BTreeSet::new();
        assert_ne!(path_id(&a), path_id(&empty));
        assert_eq!(path_id(&empty), path_id(&empty));
    }

    fn snapshot(pairs: &[(&str, u64)]) -> StateSnapshot {
        let mut snap = StateSnapshot::default();
        for (key, value) in pairs {
            snap.global.insert(key.to_string(), Scalar::Uint(*value));
        }
        snap
    }

    #[test]
    fn transition_id_is_stable_under_key_insertion_order() {
        // Same key/value pairs built in different orders must collapse.
        let a = snapshot(&[("alpha", 1), ("beta", 2), ("gamma", 3)]);
        let b = snapshot(&[("gamma", 3), ("alpha", 1), ("beta", 2)]);
        assert_eq!(transition_id(&a, &a), transition_id(&b, &b));

        let old1 = snapshot(&[("x", 0), ("y", 1)]);
        let old2 = snapshot(&[("y", 1), ("x", 0)]);
        assert_eq!(transition_id(&old1, &a), transition_id(&old2, &b));
    }

    #[test]
    fn transition_id_distinguishes_old_from_new() {
        let before = snapshot(&[("n", 0)]);
        let after = snapshot(&[("n", 1)]);
        assert_ne!(
            transition_id(&before, &after),
            transition_id(&after, &before)
        );
        assert_ne!(
            transition_id(&before, &after),
            transition_id(&before, &before)
        );
    }

    #[test]
    fn transition_id_sees_local_state_and_scalar_kind() {
        let plain = snapshot(&[("k", 5)]);

        let mut with_local = plain.clone();
        with_local
            .local
            .entry("ADDR".to_string())
            .or_default()
            .insert("k".to_string(), Scalar::Uint(5));
        assert_ne!(
            transition_id(&plain, &plain),
            transition_id(&with_local, &with_local)
        );

        let mut bytes_variant = StateSnapshot::default();
        bytes_variant
            .global
            .insert("k".to_string(), Scalar::Bytes(5u64.to_be_bytes().to_vec()));
        assert_ne!(
            transition_id(&plain, &plain),
            transition_id(&bytes_variant, &bytes_variant)
        );
    }
}
