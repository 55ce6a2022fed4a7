//! Beta reduction - substitutes actual arguments for bound parameters
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::arena::{Graph, Node, NodeId};
use crate::cache::PairCache;

/// Fully beta-reduces the application `app`: exposes the lambda behind the
/// function position, substitutes the actual argument for the bound
/// parameter throughout the body, and keeps reducing until no beta-redex
/// remains at the top of the produced term. Subterms that do not contain the
/// bound parameter are shared, not copied.
///
/// Returns an owned reference; the caller releases it.
pub fn beta_reduce_full(g: &mut Graph, app: NodeId, cache: &mut PairCache) -> NodeId {
    debug_assert!(matches!(g.node(app), Node::Apply(..)));
    reduce_apply(g, app, cache)
}

fn reduce_apply(g: &mut Graph, app: NodeId, cache: &mut PairCache) -> NodeId {
    let (fun, arg) = match *g.node(app) {
        Node::Apply(fun, arg) => (fun, arg),
        _ => {
            g.retain(app);
            return app;
        }
    };

    // normalize the function position first so nested applications of
    // curried lambdas expose their redex
    let fun_red = if matches!(g.node(fun), Node::Apply(..)) {
        reduce_apply(g, fun, cache)
    } else {
        g.retain(fun);
        fun
    };

    let lam = match g.node(fun_red) {
        Node::Lambda(p, b) => Some((*p, *b)),
        _ => None,
    };

    let result = if let Some((param, body)) = lam {
        if let Some(hit) = cache.lookup(fun_red, arg) {
            g.retain(hit);
            hit
        } else {
            let mut memo: FxHashMap<NodeId, NodeId> = FxHashMap::default();
            let reduced = subst(g, body, param, arg, cache, &mut memo);
            for (_, n) in memo.drain() {
                g.release(n);
            }
            cache.insert(g, fun_red, arg, reduced);
            reduced
        }
    } else {
        // opaque head, keep the application
        g.apply(fun_red, arg)
    };

    g.release(fun_red);
    result
}

/// `body` with every occurrence of `param` replaced by `arg`. The memo maps
/// already-substituted nodes to their replacements so shared substructure is
/// visited once; it holds one reference per entry, released by the caller.
fn subst(
    g: &mut Graph,
    body: NodeId,
    param: NodeId,
    arg: NodeId,
    cache: &mut PairCache,
    memo: &mut FxHashMap<NodeId, NodeId>,
) -> NodeId {
    let pid = match g.node(param) {
        Node::Param(id, _) => *id,
        _ => panic!("substitution target is not a param node"),
    };
    subst_rec(g, body, pid, param, arg, cache, memo)
}

fn subst_rec(
    g: &mut Graph,
    n: NodeId,
    pid: u32,
    param: NodeId,
    arg: NodeId,
    cache: &mut PairCache,
    memo: &mut FxHashMap<NodeId, NodeId>,
) -> NodeId {
    if n == param {
        g.retain(arg);
        return arg;
    }
    // the bound parameter does not occur below here, share as-is
    if !g.open_params(n).contains(&pid) {
        g.retain(n);
        return n;
    }
    if let Some(&done) = memo.get(&n) {
        g.retain(done);
        return done;
    }

    let node = g.node(n).clone();
    let result = match node {
        Node::Apply(f, a) => {
            let f2 = subst_rec(g, f, pid, param, arg, cache, memo);
            let a2 = subst_rec(g, a, pid, param, arg, cache, memo);
            // substitution may expose a fresh redex, keep reducing
            let r = if matches!(g.node(f2), Node::Lambda(..)) {
                let redex = g.apply(f2, a2);
                let reduced = reduce_apply(g, redex, cache);
                g.release(redex);
                reduced
            } else {
                g.apply(f2, a2)
            };
            g.release(f2);
            g.release(a2);
            r
        }
        Node::Lambda(p, b) => {
            // parameter ids are globally unique, so substituting under an
            // inner binder cannot capture
            let b2 = subst_rec(g, b, pid, param, arg, cache, memo);
            let r = g.lambda(p, b2);
            g.release(b2);
            r
        }
        Node::Op(kind, children) => {
            let mut mapped: SmallVec<[NodeId; 2]> = SmallVec::new();
            for c in &children {
                mapped.push(subst_rec(g, *c, pid, param, arg, cache, memo));
            }
            let r = g.op(kind, &mapped);
            for c in mapped {
                g.release(c);
            }
            r
        }
        Node::Param(..) | Node::Var(..) | Node::Const(..) => {
            g.retain(n);
            n
        }
    };

    g.retain(result);
    memo.insert(n, result);
    result
}
