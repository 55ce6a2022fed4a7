//! Memo table for reduction results keyed by unordered node pairs.
use rustc_hash::FxHashMap;

use crate::arena::{Graph, NodeId};

/// Caches beta-reduction results for the lifetime of one elimination pass.
/// A reduction is a pure function of the unordered operand pair, so keys are
/// canonicalized to (min, max) and `lookup(a, b)` and `lookup(b, a)` hit the
/// same entry. The cache holds one reference to each key node and to each
/// result; keys must stay referenced while cached, otherwise a recycled slot
/// could alias a stale entry. All held references are released in `clear`.
pub struct PairCache {
    map: FxHashMap<(NodeId, NodeId), NodeId>,
}

impl PairCache {
    pub fn new() -> Self {
        Self { map: FxHashMap::default() }
    }

    fn key(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    pub fn lookup(&self, a: NodeId, b: NodeId) -> Option<NodeId> {
        self.map.get(&Self::key(a, b)).copied()
    }

    pub fn insert(&mut self, g: &mut Graph, a: NodeId, b: NodeId, result: NodeId) {
        let key = Self::key(a, b);
        g.retain(result);
        if let Some(prev) = self.map.insert(key, result) {
            g.release(prev);
        } else {
            g.retain(key.0);
            g.retain(key.1);
        }
    }

    /// Drops every entry, releasing the references the cache holds. Must be
    /// called before the cache goes out of scope.
    pub fn clear(&mut self, g: &mut Graph) {
        for ((a, b), result) in self.map.drain() {
            g.release(a);
            g.release(b);
            g.release(result);
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for PairCache {
    fn default() -> Self {
        Self::new()
    }
}
