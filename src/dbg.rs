//! Whole-graph consistency checks, invoked under debug assertions
use rustc_hash::FxHashSet;

use crate::arena::{Graph, Node, NodeId};

/// Every live node is the canonical entry for its own structure, every
/// child reference points at a live node, and the unique table holds no
/// stale entries.
pub fn check_unique_table(g: &Graph) -> bool {
    let mut entries = 0usize;
    for (id, node) in g.iter_live() {
        if g.find(node) != Some(id) {
            return false;
        }
        entries += 1;
        for c in node.children() {
            if !g.is_live(c) || g.refs(c) == 0 {
                return false;
            }
        }
    }
    entries == g.table_len()
}

/// No live slot with a zero reference count.
pub fn check_refs_nonzero(g: &Graph) -> bool {
    g.iter_live().all(|(id, _)| g.refs(id) > 0)
}

/// After elimination, every application of a lambda reachable from the
/// roots is parameterized.
pub fn check_lambda_applies_parameterized(g: &Graph) -> bool {
    let mut seen: FxHashSet<NodeId> = FxHashSet::default();
    let mut work: Vec<NodeId> = g.roots().to_vec();
    while let Some(n) = work.pop() {
        if !seen.insert(n) {
            continue;
        }
        if let Node::Apply(fun, _) = g.node(n) {
            if matches!(g.node(*fun), Node::Lambda(..)) && !g.is_parameterized(n) {
                return false;
            }
        }
        work.extend(g.node(n).children());
    }
    true
}
