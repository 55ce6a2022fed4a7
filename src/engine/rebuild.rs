//! Substitute-and-rebuild - whole-graph reconstruction under a substitution
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::arena::{Graph, Node, NodeId};
use crate::engine::types::SubstMap;

enum Visit {
    Pre(NodeId),
    Post(NodeId),
}

/// Replaces, throughout the graph reachable from the current roots, every
/// reference to a key of `map` with its mapped value, rebuilding and
/// re-interning every affected ancestor. Each node is visited once, so the
/// pass terminates on DAGs with shared substructure and applies a
/// substitution consistently to every occurrence. Consumes the map; runs to
/// completion once started.
pub fn substitute_and_rebuild(g: &mut Graph, map: &mut SubstMap) {
    let roots: Vec<NodeId> = g.roots().to_vec();
    let mut rebuilt: FxHashMap<NodeId, NodeId> = FxHashMap::default();

    for &root in &roots {
        rebuild_from(g, root, map, &mut rebuilt);
    }

    for (index, &old) in roots.iter().enumerate() {
        let new = rebuilt[&old];
        if new != old {
            g.retain(new);
            g.set_root(index, new);
            g.release(old);
        }
    }

    for (_, n) in rebuilt.drain() {
        g.release(n);
    }
    map.drain_release(g);
}

fn rebuild_from(
    g: &mut Graph,
    root: NodeId,
    map: &SubstMap,
    rebuilt: &mut FxHashMap<NodeId, NodeId>,
) {
    let mut stack: Vec<Visit> = vec![Visit::Pre(root)];
    while let Some(visit) = stack.pop() {
        match visit {
            Visit::Pre(n) => {
                if rebuilt.contains_key(&n) {
                    continue;
                }
                stack.push(Visit::Post(n));
                if let Some(target) = map.get(n) {
                    // the substitute itself may reference other substituted
                    // nodes, rebuild it first
                    stack.push(Visit::Pre(target));
                } else {
                    for c in g.node(n).children() {
                        stack.push(Visit::Pre(c));
                    }
                }
            }
            Visit::Post(n) => {
                if rebuilt.contains_key(&n) {
                    continue;
                }
                let new = match map.get(n) {
                    Some(target) => {
                        let t = rebuilt[&target];
                        g.retain(t);
                        t
                    }
                    None => rebuild_node(g, n, rebuilt),
                };
                rebuilt.insert(n, new);
            }
        }
    }
}

/// Rebuilds one node whose children have already been rebuilt. Returns an
/// owned reference; unchanged nodes are shared, changed ones re-interned so
/// the substituted graph never duplicates a structurally identical term.
fn rebuild_node(g: &mut Graph, n: NodeId, rebuilt: &FxHashMap<NodeId, NodeId>) -> NodeId {
    let node = g.node(n).clone();
    let children = node.children();
    let mapped: SmallVec<[NodeId; 2]> = children.iter().map(|c| rebuilt[c]).collect();
    if mapped == children {
        g.retain(n);
        return n;
    }
    let new = match node {
        Node::Lambda(..) => Node::Lambda(mapped[0], mapped[1]),
        Node::Apply(..) => Node::Apply(mapped[0], mapped[1]),
        Node::Op(kind, _) => Node::Op(kind, mapped),
        leaf => leaf,
    };
    g.intern(new)
}
