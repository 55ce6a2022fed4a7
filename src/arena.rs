//! Arena - hash-consed storage for the expression graph
use num_bigint::BigUint;
use num_traits::{One, Zero};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::{smallvec, SmallVec};
use std::cmp::Ordering;

/// Lightweight NodeId
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(pub u32);

/// Bit-vector operators. Opaque to the elimination engine: their children
/// are substituted, everything else is copied or shared unchanged.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum OpKind {
    Not,
    And,
    Eq,
    Add,
    Mul,
    Ult,
    Concat,
    /// Bit slice with upper and lower index.
    Slice(u32, u32),
    Cond,
    Read,
    Write,
}

/// Core node enum. Immutable once interned; structural identity is fixed at
/// construction and enforced by the unique table.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Node {
    /// Bound parameter (id, width). Ids are globally unique, so a parameter
    /// is bound by exactly one lambda and substitution can never capture.
    Param(u32, u32),
    /// Free bit-vector variable (id, width).
    Var(u32, u32),
    /// Bit-vector constant (width, value).
    Const(u32, BigUint),
    /// Lambda abstraction (param, body).
    Lambda(NodeId, NodeId),
    /// Function application (function, argument).
    Apply(NodeId, NodeId),
    /// Interior operator with ordered children.
    Op(OpKind, SmallVec<[NodeId; 2]>),
}

impl Node {
    pub fn children(&self) -> SmallVec<[NodeId; 2]> {
        match self {
            Node::Param(..) | Node::Var(..) | Node::Const(..) => SmallVec::new(),
            Node::Lambda(p, b) => smallvec![*p, *b],
            Node::Apply(f, a) => smallvec![*f, *a],
            Node::Op(_, children) => children.clone(),
        }
    }
}

struct Slot {
    node: Node,
    refs: u32,
    /// Sorted set of open parameter ids below this node. A node is
    /// parameterized iff this set is nonempty; a lambda removes its own
    /// parameter from the body's set.
    params: SmallVec<[u32; 2]>,
}

/// The expression graph: an arena of reference-counted slots, a unique
/// table mapping structure to the canonical live node, the registry of live
/// lambdas, and the external roots. Every node-producing operation goes
/// through [`Graph::intern`].
pub struct Graph {
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
    table: FxHashMap<Node, NodeId>,
    lambdas: FxHashSet<NodeId>,
    roots: Vec<NodeId>,
    live: usize,
    next_param: u32,
    next_var: u32,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            slots: Vec::with_capacity(1024),
            free: Vec::new(),
            table: FxHashMap::default(),
            lambdas: FxHashSet::default(),
            roots: Vec::new(),
            live: 0,
            next_param: 0,
            next_var: 0,
        }
    }

    /// Returns the canonical node for the given structural key, creating it
    /// if absent. The returned reference is owned by the caller and must be
    /// matched by exactly one `release`.
    pub fn intern(&mut self, node: Node) -> NodeId {
        if let Some(&id) = self.table.get(&node) {
            self.retain(id);
            return id;
        }
        let params = self.open_params_of(&node);
        for c in node.children() {
            debug_assert!(self.is_live(c), "interning with a released child");
            self.retain(c);
        }
        let slot = Slot { node: node.clone(), refs: 1, params };
        let id = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(slot);
                NodeId(index)
            }
            None => {
                self.slots.push(Some(slot));
                NodeId((self.slots.len() - 1) as u32)
            }
        };
        self.live += 1;
        if matches!(node, Node::Lambda(..)) {
            self.lambdas.insert(id);
        }
        self.table.insert(node, id);
        id
    }

    pub fn retain(&mut self, id: NodeId) {
        let slot = self.slot_mut(id);
        slot.refs += 1;
    }

    /// Decrements the reference count and destroys the node when it reaches
    /// zero. Destruction releases child references with an explicit work
    /// list, so arbitrarily deep chains cannot overflow the call stack.
    pub fn release(&mut self, id: NodeId) {
        let mut work: SmallVec<[NodeId; 8]> = smallvec![id];
        while let Some(id) = work.pop() {
            let slot = self.slot_mut(id);
            debug_assert!(slot.refs > 0, "reference count underflow");
            slot.refs -= 1;
            if slot.refs > 0 {
                continue;
            }
            let slot = self.slots[id.0 as usize].take().expect("release of a dead node");
            self.table.remove(&slot.node);
            self.lambdas.remove(&id);
            self.live -= 1;
            self.free.push(id.0);
            work.extend(slot.node.children());
        }
    }

    // -- constructors ------------------------------------------------------

    /// Fresh bound parameter of the given width.
    pub fn param(&mut self, width: u32) -> NodeId {
        let id = self.next_param;
        self.next_param += 1;
        self.intern(Node::Param(id, width))
    }

    /// Fresh free variable of the given width.
    pub fn var(&mut self, width: u32) -> NodeId {
        let id = self.next_var;
        self.next_var += 1;
        self.intern(Node::Var(id, width))
    }

    pub fn constant(&mut self, width: u32, value: BigUint) -> NodeId {
        self.intern(Node::Const(width, value))
    }

    pub fn zero(&mut self, width: u32) -> NodeId {
        self.constant(width, BigUint::zero())
    }

    pub fn one(&mut self, width: u32) -> NodeId {
        self.constant(width, BigUint::one())
    }

    /// All-ones constant of the given width.
    pub fn ones(&mut self, width: u32) -> NodeId {
        self.constant(width, (BigUint::one() << width) - BigUint::one())
    }

    pub fn lambda(&mut self, param: NodeId, body: NodeId) -> NodeId {
        debug_assert!(matches!(self.node(param), Node::Param(..)));
        self.intern(Node::Lambda(param, body))
    }

    pub fn apply(&mut self, fun: NodeId, arg: NodeId) -> NodeId {
        self.intern(Node::Apply(fun, arg))
    }

    pub fn op(&mut self, kind: OpKind, children: &[NodeId]) -> NodeId {
        self.intern(Node::Op(kind, SmallVec::from_slice(children)))
    }

    // -- roots -------------------------------------------------------------

    /// Registers an external root. The root holds one reference, released
    /// when the root is dropped or replaced by a rebuild.
    pub fn add_root(&mut self, id: NodeId) {
        self.retain(id);
        self.roots.push(id);
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub(crate) fn set_root(&mut self, index: usize, id: NodeId) {
        self.roots[index] = id;
    }

    /// Drops all external roots, releasing their references.
    pub fn release_roots(&mut self) {
        let roots = std::mem::take(&mut self.roots);
        for root in roots {
            self.release(root);
        }
    }

    // -- accessors ---------------------------------------------------------

    pub fn node(&self, id: NodeId) -> &Node {
        &self.slot(id).node
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        self.slots
            .get(id.0 as usize)
            .map_or(false, |slot| slot.is_some())
    }

    pub fn refs(&self, id: NodeId) -> u32 {
        self.slot(id).refs
    }

    /// Open parameter ids below this node, sorted ascending.
    pub fn open_params(&self, id: NodeId) -> &[u32] {
        &self.slot(id).params
    }

    /// True iff the node's subgraph contains a bound parameter not closed
    /// by a lambda within the same subgraph.
    pub fn is_parameterized(&self, id: NodeId) -> bool {
        !self.slot(id).params.is_empty()
    }

    /// Unique-table lookup without interning.
    pub fn find(&self, node: &Node) -> Option<NodeId> {
        self.table.get(node).copied()
    }

    pub fn live_len(&self) -> usize {
        self.live
    }

    pub fn table_len(&self) -> usize {
        self.table.len()
    }

    pub fn lambda_count(&self) -> usize {
        self.lambdas.len()
    }

    pub fn lambdas(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.lambdas.iter().copied()
    }

    pub fn iter_live(&self) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.as_ref().map(|slot| (NodeId(index as u32), &slot.node))
        })
    }

    // -- internals ---------------------------------------------------------

    fn slot(&self, id: NodeId) -> &Slot {
        self.slots[id.0 as usize]
            .as_ref()
            .expect("access to a released node")
    }

    fn slot_mut(&mut self, id: NodeId) -> &mut Slot {
        self.slots[id.0 as usize]
            .as_mut()
            .expect("access to a released node")
    }

    fn open_params_of(&self, node: &Node) -> SmallVec<[u32; 2]> {
        match node {
            Node::Param(id, _) => smallvec![*id],
            Node::Var(..) | Node::Const(..) => SmallVec::new(),
            Node::Apply(f, a) => union_params(self.open_params(*f), self.open_params(*a)),
            Node::Lambda(p, b) => {
                let pid = match self.node(*p) {
                    Node::Param(id, _) => *id,
                    _ => panic!("lambda parameter is not a param node"),
                };
                let mut set = SmallVec::from_slice(self.open_params(*b));
                set.retain(|id| *id != pid);
                set
            }
            Node::Op(_, children) => {
                let mut set: SmallVec<[u32; 2]> = SmallVec::new();
                for c in children {
                    set = union_params(&set, self.open_params(*c));
                }
                set
            }
        }
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

fn union_params(a: &[u32], b: &[u32]) -> SmallVec<[u32; 2]> {
    let mut out: SmallVec<[u32; 2]> = SmallVec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            Ordering::Less => {
                out.push(a[i]);
                i += 1;
            }
            Ordering::Greater => {
                out.push(b[j]);
                j += 1;
            }
            Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigUint;

    #[test]
    fn test_interning() {
        let mut g = Graph::new();
        let c1 = g.constant(8, BigUint::from(7u32));
        let c2 = g.constant(8, BigUint::from(7u32));
        assert_eq!(c1, c2);
        assert_eq!(g.refs(c1), 2);

        let v = g.var(8);
        let a1 = g.op(OpKind::Add, &[c1, v]);
        let a2 = g.op(OpKind::Add, &[c1, v]);
        assert_eq!(a1, a2);

        // distinct widths are distinct shapes
        let c3 = g.constant(16, BigUint::from(7u32));
        assert_ne!(c1, c3);
    }

    #[test]
    fn test_builtin_constants() {
        let mut g = Graph::new();
        let z = g.zero(8);
        let z2 = g.constant(8, BigUint::from(0u32));
        assert_eq!(z, z2);
        let ones = g.ones(8);
        let ff = g.constant(8, BigUint::from(0xffu32));
        assert_eq!(ones, ff);
        assert_ne!(g.one(8), g.one(16));
    }

    #[test]
    fn test_fresh_vars_distinct() {
        let mut g = Graph::new();
        let v1 = g.var(8);
        let v2 = g.var(8);
        assert_ne!(v1, v2);
        let p1 = g.param(8);
        let p2 = g.param(8);
        assert_ne!(p1, p2);
    }

    #[test]
    fn test_parameterized_flag() {
        let mut g = Graph::new();
        let p = g.param(8);
        assert!(g.is_parameterized(p));

        let v = g.var(8);
        assert!(!g.is_parameterized(v));

        let sum = g.op(OpKind::Add, &[p, v]);
        assert!(g.is_parameterized(sum));
        assert_eq!(g.open_params(sum), &[0]);

        // the lambda closes its own parameter
        let lam = g.lambda(p, sum);
        assert!(!g.is_parameterized(lam));
    }

    #[test]
    fn test_parameterized_nested_lambda() {
        let mut g = Graph::new();
        let x = g.param(8);
        let y = g.param(8);
        let body = g.op(OpKind::Add, &[x, y]);
        let inner = g.lambda(y, body);
        // inner still depends on x
        assert!(g.is_parameterized(inner));
        let outer = g.lambda(x, inner);
        assert!(!g.is_parameterized(outer));
    }

    #[test]
    fn test_release_removes_table_entry() {
        let mut g = Graph::new();
        let before = g.live_len();
        let c = g.constant(8, BigUint::from(5u32));
        assert_eq!(g.find(&Node::Const(8, BigUint::from(5u32))), Some(c));
        g.release(c);
        assert_eq!(g.find(&Node::Const(8, BigUint::from(5u32))), None);
        assert_eq!(g.live_len(), before);
        assert!(!g.is_live(c));
    }

    #[test]
    fn test_refcount_conservation() {
        let mut g = Graph::new();
        let keep = g.var(8);
        let live = g.live_len();
        let table = g.table_len();

        let c = g.constant(8, BigUint::from(1u32));
        let sum = g.op(OpKind::Add, &[keep, c]);
        let not = g.op(OpKind::Not, &[sum]);
        g.release(c);
        g.release(sum);
        g.release(not);

        assert_eq!(g.live_len(), live);
        assert_eq!(g.table_len(), table);
        assert!(g.is_live(keep));
        assert_eq!(g.refs(keep), 1);
    }

    #[test]
    fn test_lambda_registry() {
        let mut g = Graph::new();
        let p = g.param(8);
        let lam = g.lambda(p, p);
        assert_eq!(g.lambda_count(), 1);
        assert!(g.lambdas().any(|l| l == lam));
        g.release(p);
        g.release(lam);
        assert_eq!(g.lambda_count(), 0);
    }

    #[test]
    fn test_deep_chain_release() {
        let mut g = Graph::new();
        let mut node = g.var(1);
        for _ in 0..50_000 {
            let next = g.op(OpKind::Not, &[node]);
            g.release(node);
            node = next;
        }
        assert_eq!(g.live_len(), 50_001);
        // destruction is work-list driven, a 50k chain must not overflow
        g.release(node);
        assert_eq!(g.live_len(), 0);
        assert_eq!(g.table_len(), 0);
    }

    #[test]
    fn test_slot_reuse() {
        let mut g = Graph::new();
        let c = g.constant(8, BigUint::from(9u32));
        g.release(c);
        let v = g.var(8);
        // the freed slot is recycled
        assert_eq!(v, c);
    }
}
