//! Weighted consistent-hash ring used for object placement.
//!
//! Each real node is expanded into `weight × DEFAULT_WEIGHT` virtual nodes,
//! identified by a seeded 128-bit hash of `"<ticket>-<name>"`, and the ring
//! is the sorted array of those identifiers.  Key placement is the classic
//! successor rule: the first virtual node whose identifier is ≥ the key's
//! identifier, wrapping to the smallest.
//!
//! Node and key identifiers use distinct seeds so a node name never collides
//! with the key of the same spelling.  Identifier comparison is a total
//! three-way ordering (`u128`); equal identifiers fall back to ticket number
//! and then lexical name order, giving the ring a total order even under
//! hash collisions.
//!
//! `join` and `leave` rebuild the ring and hand the affected node names plus
//! the new ring to a migration callback before the swap, so callers can move
//! keys that now land elsewhere.  On `leave`, every surviving node keeps its
//! original weight.

use thiserror::Error;
use tracing::debug;

/// Seed for virtual-node identifiers.
pub const NODE_SEED: u64 = 119;
/// Seed for key identifiers.
pub const KEY_SEED: u64 = 17;
/// Virtual nodes per unit of weight.  Large enough that key distribution
/// stays near-uniform for small rings; cheap enough to rebuild on demand.
pub const DEFAULT_WEIGHT: u32 = 2800;

#[derive(Error, Debug)]
pub enum RingError {
    #[error("a ring requires at least one node")]
    EmptyRing,
    #[error("duplicate node name: {0}")]
    DuplicateNode(String),
    #[error("unknown node name: {0}")]
    UnknownNode(String),
    #[error("cannot remove the final node of a ring")]
    LastNode,
    #[error("node weight must be non-zero")]
    ZeroWeight,
}

/// Callback invoked by `join`/`leave` with the nodes keys may move away
/// from and the ring they will move into.
pub type MigrationFn<'a> = dyn FnMut(&[&str], &Ring) + 'a;

#[derive(Debug, Clone)]
struct VirtualNode {
    id:     u128,
    /// Index into `Ring::nodes`.
    node:   usize,
    ticket: u32,
}

/// A weighted consistent-hash ring over named nodes.
#[derive(Debug, Clone)]
pub struct Ring {
    nodes:    Vec<String>,
    weights:  Vec<u32>,
    vnodes:   Vec<VirtualNode>,
}

impl Ring {
    /// Build a ring from `(name, weight)` pairs.  A weight of `w` yields
    /// `w × DEFAULT_WEIGHT` virtual nodes.
    pub fn new(members: &[(&str, u32)]) -> Result<Self, RingError> {
        if members.is_empty() {
            return Err(RingError::EmptyRing);
        }
        let mut nodes = Vec::with_capacity(members.len());
        let mut weights = Vec::with_capacity(members.len());
        for (name, weight) in members {
            if *weight == 0 {
                return Err(RingError::ZeroWeight);
            }
            if nodes.iter().any(|n: &String| n == name) {
                return Err(RingError::DuplicateNode((*name).to_owned()));
            }
            nodes.push((*name).to_owned());
            weights.push(*weight);
        }

        let mut vnodes = Vec::new();
        for (idx, name) in nodes.iter().enumerate() {
            let tickets = weights[idx] * DEFAULT_WEIGHT;
            for ticket in 0..tickets {
                let vname = format!("{ticket}-{name}");
                vnodes.push(VirtualNode {
                    id: identifier(&vname, NODE_SEED),
                    node: idx,
                    ticket,
                });
            }
        }
        // total order: id, then ticket, then lexical name
        vnodes.sort_by(|a, b| {
            a.id.cmp(&b.id)
                .then(a.ticket.cmp(&b.ticket))
                .then_with(|| nodes[a.node].cmp(&nodes[b.node]))
        });
        debug!(nodes = nodes.len(), vnodes = vnodes.len(), "ring constructed");
        Ok(Self { nodes, weights, vnodes })
    }

    /// Build a ring of `count` nodes named `"0"..count`, evenly weighted.
    pub fn uniform(count: u32) -> Result<Self, RingError> {
        let names: Vec<String> = (0..count).map(|i| i.to_string()).collect();
        let members: Vec<(&str, u32)> = names.iter().map(|n| (n.as_str(), 1)).collect();
        Self::new(&members)
    }

    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Name of the node that owns `key`.
    pub fn successor(&self, key: &str) -> &str {
        let vnode = self.successor_vnode(identifier(key, KEY_SEED));
        &self.nodes[vnode.node]
    }

    fn successor_vnode(&self, key_id: u128) -> &VirtualNode {
        // first virtual node with id >= key_id, wrapping to the start
        let idx = self.vnodes.partition_point(|v| v.id < key_id);
        &self.vnodes[idx % self.vnodes.len()]
    }

    /// Distinct node names clockwise from `key`'s successor, each exactly
    /// once.  Used to walk fallback targets in placement order.
    pub fn successors<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a str> + 'a {
        let start = self.vnodes.partition_point(|v| v.id < identifier(key, KEY_SEED));
        let total = self.vnodes.len();
        let mut seen = vec![false; self.nodes.len()];
        (0..total).filter_map(move |step| {
            let vnode = &self.vnodes[(start + step) % total];
            if seen[vnode.node] {
                None
            } else {
                seen[vnode.node] = true;
                Some(self.nodes[vnode.node].as_str())
            }
        })
    }

    /// Add a node.  `weight` of zero selects weight 1.  The migration
    /// callback receives every pre-existing node name (any of them may lose
    /// keys to the newcomer) and the post-join ring.
    pub fn join(
        &mut self,
        name: &str,
        weight: u32,
        migrate: Option<&mut MigrationFn<'_>>,
    ) -> Result<(), RingError> {
        if self.nodes.iter().any(|n| n == name) {
            return Err(RingError::DuplicateNode(name.to_owned()));
        }
        let mut members: Vec<(&str, u32)> = self
            .nodes
            .iter()
            .zip(&self.weights)
            .map(|(n, w)| (n.as_str(), *w))
            .collect();
        let weight = if weight == 0 { 1 } else { weight };
        members.push((name, weight));
        let updated = Ring::new(&members)?;
        if let Some(migrate) = migrate {
            let from: Vec<&str> = self.nodes.iter().map(String::as_str).collect();
            migrate(&from, &updated);
        }
        *self = updated;
        Ok(())
    }

    /// Remove a node.  The migration callback receives the departing node
    /// name and the post-leave ring.  Surviving nodes keep their original
    /// weights.
    pub fn leave(
        &mut self,
        name: &str,
        migrate: Option<&mut MigrationFn<'_>>,
    ) -> Result<(), RingError> {
        if !self.nodes.iter().any(|n| n == name) {
            return Err(RingError::UnknownNode(name.to_owned()));
        }
        if self.nodes.len() == 1 {
            return Err(RingError::LastNode);
        }
        let members: Vec<(&str, u32)> = self
            .nodes
            .iter()
            .zip(&self.weights)
            .filter(|(n, _)| n.as_str() != name)
            .map(|(n, w)| (n.as_str(), *w))
            .collect();
        let updated = Ring::new(&members)?;
        if let Some(migrate) = migrate {
            migrate(&[name], &updated);
        }
        *self = updated;
        Ok(())
    }
}

/// Seeded 128-bit identifier for ring placement.
fn identifier(key: &str, seed: u64) -> u128 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&seed.to_le_bytes());
    hasher.update(key.as_bytes());
    let mut id = [0u8; 16];
    hasher.finalize_xof().fill(&mut id);
    u128::from_le_bytes(id)
}

/// Polynomial string hash (Horner's rule, x = 33).
///
/// Treats each byte of the string as a coefficient of a degree-n polynomial
/// evaluated at 33; wrapping arithmetic stands in for the original's
/// overflow behavior.
pub fn polyhash(s: &str) -> u64 {
    let mut bytes = s.bytes();
    let mut h: u64 = match bytes.next() {
        Some(b) => b as u64,
        None => return 0,
    };
    for b in bytes {
        h = h.wrapping_mul(33).wrapping_add(b as u64);
    }
    h
}

/// Map `key` uniformly onto `0..range` via a 2-universal multiply-shift of
/// its polyhash.  `range` of zero yields zero.
pub fn hash_rangevalue(key: &str, range: u64) -> u64 {
    if range == 0 {
        return 0;
    }
    const A: u64 = 0x9e37_79b9_7f4a_7c15; // odd multiplier
    (A.wrapping_mul(polyhash(key)) >> 32) % range
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn successor_is_deterministic() {
        let ring = Ring::uniform(4).unwrap();
        let a = ring.successor("client|stream#1#5.9|obj.0").to_owned();
        let b = ring.successor("client|stream#1#5.9|obj.0").to_owned();
        assert_eq!(a, b);
    }

    #[test]
    fn keys_spread_across_nodes() {
        let ring = Ring::uniform(4).unwrap();
        let mut counts: HashMap<String, usize> = HashMap::new();
        for i in 0..4000 {
            let key = format!("client|stream|obj.{i}");
            *counts.entry(ring.successor(&key).to_owned()).or_default() += 1;
        }
        assert_eq!(counts.len(), 4);
        for (_, count) in counts {
            // even split would be 1000 each; allow generous skew
            assert!(count > 500, "distribution badly skewed: {count}");
        }
    }

    #[test]
    fn successors_visit_each_node_once() {
        let ring = Ring::uniform(5).unwrap();
        let visited: Vec<&str> = ring.successors("some-key").collect();
        assert_eq!(visited.len(), 5);
        let mut sorted = visited.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 5);
        // first entry matches the plain successor
        assert_eq!(visited[0], ring.successor("some-key"));
    }

    #[test]
    fn leave_preserves_surviving_weights() {
        let mut ring = Ring::new(&[("a", 2), ("b", 1), ("c", 3)]).unwrap();
        ring.leave("b", None).unwrap();
        let weights: HashMap<&str, u32> = ring
            .nodes
            .iter()
            .map(String::as_str)
            .zip(ring.weights.iter().copied())
            .collect();
        assert_eq!(weights["a"], 2);
        assert_eq!(weights["c"], 3);
    }

    #[test]
    fn leave_only_moves_departed_keys() {
        let mut ring = Ring::new(&[("a", 1), ("b", 1), ("c", 1)]).unwrap();
        let before: Vec<(String, String)> = (0..500)
            .map(|i| {
                let key = format!("obj.{i}");
                let node = ring.successor(&key).to_owned();
                (key, node)
            })
            .collect();
        ring.leave("c", None).unwrap();
        for (key, node) in before {
            if node != "c" {
                assert_eq!(ring.successor(&key), node, "stable key {key} moved");
            } else {
                assert_ne!(ring.successor(&key), "c");
            }
        }
    }

    #[test]
    fn join_invokes_migration_with_new_ring() {
        let mut ring = Ring::uniform(2).unwrap();
        let mut called = false;
        let mut cb = |from: &[&str], new_ring: &Ring| {
            called = true;
            assert_eq!(from.len(), 2);
            assert_eq!(new_ring.len(), 3);
        };
        ring.join("2", 0, Some(&mut cb)).unwrap();
        assert!(called);
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn leave_refuses_final_node() {
        let mut ring = Ring::uniform(1).unwrap();
        assert!(matches!(ring.leave("0", None), Err(RingError::LastNode)));
    }

    #[test]
    fn rejects_bad_membership() {
        assert!(matches!(Ring::new(&[]), Err(RingError::EmptyRing)));
        assert!(matches!(
            Ring::new(&[("a", 1), ("a", 1)]),
            Err(RingError::DuplicateNode(_))
        ));
        assert!(matches!(Ring::new(&[("a", 0)]), Err(RingError::ZeroWeight)));
    }

    #[test]
    fn rangevalue_stays_in_range() {
        for range in [1u64, 2, 7, 12, 255] {
            for i in 0..64 {
                let key = format!("client|stream|obj.{i}");
                assert!(hash_rangevalue(&key, range) < range);
            }
        }
        assert_eq!(hash_rangevalue("anything", 0), 0);
    }

    #[test]
    fn polyhash_matches_horner_expansion() {
        // f("ab") = 'a' * 33 + 'b'
        assert_eq!(polyhash("ab"), 97 * 33 + 98);
        assert_eq!(polyhash(""), 0);
    }
}
