//! Elimination driver - beta-reduces lambda applications to fixpoint
use std::time::Instant;

use log::{debug, info};
use rustc_hash::FxHashSet;

use crate::arena::{Graph, Node, NodeId};
use crate::cache::PairCache;
use crate::dbg;
use crate::engine::beta::beta_reduce_full;
use crate::engine::rebuild::substitute_and_rebuild;
use crate::engine::types::{ElimStats, SubstMap};

/// Eliminates every non-parameterized application of a lambda reachable from
/// the graph roots, mutating the graph in place. Idempotent: a second call
/// on an already-eliminated graph registers no substitutions.
///
/// NOTE: substitute-and-rebuild can create applications that can be
/// beta-reduced. This happens when an application whose function position
/// was itself an application acquires a direct lambda head, so applications
/// are beta-reduced until fixpoint.
pub fn eliminate_applies(g: &mut Graph) -> ElimStats {
    let mut stats = ElimStats::default();
    if g.lambda_count() == 0 {
        return stats;
    }

    let start = Instant::now();
    let mut cache = PairCache::new();

    loop {
        let apps = collect_applies(g);
        if apps.is_empty() {
            break;
        }
        stats.rounds += 1;

        let mut subst = SubstMap::new();
        for &app in &apps {
            let reduced = beta_reduce_full(g, app, &mut cache);
            subst.insert(g, app, reduced);
            g.release(reduced);
        }
        stats.eliminated += apps.len() as u64;
        debug!("eliminated {} applications in round {}", apps.len(), stats.rounds);

        substitute_and_rebuild(g, &mut subst);
    }

    cache.clear(g);
    stats.seconds = start.elapsed().as_secs_f64();
    info!(
        "eliminated {} function applications in {:.1} seconds",
        stats.eliminated, stats.seconds
    );

    debug_assert!(dbg::check_lambda_applies_parameterized(g));
    debug_assert!(dbg::check_unique_table(g));
    debug_assert!(dbg::check_refs_nonzero(g));
    stats
}

/// One scan of the round: every application reachable from the roots whose
/// function position is a live lambda and whose subgraph is free of open
/// parameters. Parameterized applications stay untouched until an enclosing
/// reduction closes them.
fn collect_applies(g: &Graph) -> Vec<NodeId> {
    let mut seen: FxHashSet<NodeId> = FxHashSet::default();
    let mut work: Vec<NodeId> = g.roots().to_vec();
    let mut apps = Vec::new();
    while let Some(n) = work.pop() {
        if !seen.insert(n) {
            continue;
        }
        if let Node::Apply(fun, _) = g.node(n) {
            if matches!(g.node(*fun), Node::Lambda(..)) && !g.is_parameterized(n) {
                apps.push(n);
            }
        }
        work.extend(g.node(n).children());
    }
    apps.sort_unstable();
    apps
}
