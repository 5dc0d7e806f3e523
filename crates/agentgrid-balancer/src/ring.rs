//! Consistent hash ring with virtual nodes.
//!
//! Each instance id is placed on a 64-bit ring `virtual_nodes` times, at
//! `hash("{id}#{i}")`. A key is owned by the first point at or clockwise
//! of `hash(key)`, wrapping at the top.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

/// Ring position of `value`: the first 8 bytes of its SHA-256 digest, big
/// endian.
pub fn hash_key(value: &str) -> u64 {
    let digest = Sha256::digest(value.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

#[derive(Debug, Clone)]
pub struct HashRing {
    virtual_nodes: usize,
    points: BTreeMap<u64, String>,
}

impl HashRing {
    pub fn new(virtual_nodes: usize) -> Self {
        Self {
            virtual_nodes: virtual_nodes.max(1),
            points: BTreeMap::new(),
        }
    }

    /// Replace the ring contents with points for `ids`.
    pub fn rebuild<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) {
        self.points.clear();
        for id in ids {
            self.add(id);
        }
    }

    pub fn add(&mut self, id: &str) {
        for i in 0..self.virtual_nodes {
            self.points.insert(hash_key(&format!("{id}#{i}")), id.to_string());
        }
    }

    pub fn remove(&mut self, id: &str) {
        self.points.retain(|_, owner| owner != id);
    }

    /// The instance owning `key`, ignoring health.
    pub fn owner(&self, key: &str) -> Option<&str> {
        self.lookup(key, |_| true)
    }

    /// Walk clockwise from `hash(key)` and return the first owner that
    /// `accept` admits.
    pub fn lookup(&self, key: &str, accept: impl Fn(&str) -> bool) -> Option<&str> {
        let start = hash_key(key);
        self.points
            .range(start..)
            .chain(self.points.range(..start))
            .map(|(_, id)| id.as_str())
            .find(|id| accept(id))
    }

    pub fn virtual_nodes(&self) -> usize {
        self.virtual_nodes
    }

    /// Number of points on the ring.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
