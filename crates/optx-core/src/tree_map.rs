//! # Tree Enumeration Map
//!
//! Counts and rank-addresses every tree embedded in a DAG of alternatives.
//!
//! Each node wraps one source value and has an ordered list of child *slots*; every
//! slot holds the alternative nodes that may fill it. A tree picks one alternative
//! per slot, recursively, so
//!
//! ```text
//! count(leaf)  = 1
//! count(node)  = Π over slots ( Σ over alternatives count(alt) )
//! ```
//!
//! with both the sum and the product saturating at `u64::MAX`. A slot without any
//! alternative makes the product, and therefore the node, zero.
//!
//! Node 0 is the universal root. Its single slot holds the top-level alternatives:
//! values registered with [`TreeMap::insert_root`] and, at counting time, every node
//! nothing points to. The map's count is the root's count, and `0` for an empty map.
//!
//! ## Ranking
//!
//! [`TreeMap::unrank`] maps a rank in `[0, count)` to one tree. Within a node the rank
//! is decomposed in mixed radix over the slots in slot order (slot 0 is the least
//! significant digit); within a slot, the digit selects an alternative by cumulative
//! counts and the remainder recurses into it. Every tree is then rebuilt bottom-up
//! through the rehydration function `(value, children, context) -> R`.
//!
//! Once a count saturates, ranks past `u64::MAX` are unreachable and the mapping is
//! no longer a bijection.
//!
//! The map is single-threaded and does no locking.

use crate::error::{OptError, Result};
use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;

const ROOT: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CountState {
    Uncounted,
    Counting,
    Counted,
}

#[derive(Debug)]
struct Node<T> {
    id: usize,
    /// `None` only for the universal root.
    value: Option<T>,
    slots: Vec<Vec<usize>>,
    incoming: usize,
    count: u64,
    state: CountState,
}

impl<T> Node<T> {
    fn new(id: usize, value: Option<T>) -> Self {
        Self {
            id,
            value,
            slots: Vec::new(),
            incoming: 0,
            count: 0,
            state: CountState::Uncounted,
        }
    }
}

type EdgeKey = (u64, u64, usize);

pub struct TreeMap<T, R, C, F> {
    nodes: Vec<Node<T>>,
    by_value: HashMap<T, usize>,
    /// Edge identity: (hash(parent), hash(child), slot) -> (parent, child) pairs.
    edges: HashMap<EdgeKey, Vec<(usize, usize)>>,
    hasher: RandomState,
    rehydrate: F,
    dirty: bool,
    _result: PhantomData<fn(&C) -> R>,
}

impl<T, R, C, F> TreeMap<T, R, C, F>
where
    T: Eq + Hash + Clone + fmt::Debug,
    F: Fn(&T, Vec<R>, &C) -> R,
{
    pub fn new(rehydrate: F) -> Self {
        Self {
            nodes: vec![Node::new(ROOT, None)],
            by_value: HashMap::new(),
            edges: HashMap::new(),
            hasher: RandomState::new(),
            rehydrate,
            dirty: false,
            _result: PhantomData,
        }
    }

    /// Number of value nodes (the universal root not included).
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn intern(&mut self, value: T) -> usize {
        if let Some(&id) = self.by_value.get(&value) {
            return id;
        }
        let id = self.nodes.len();
        self.nodes.push(Node::new(id, Some(value.clone())));
        self.by_value.insert(value, id);
        self.dirty = true;
        id
    }

    fn ensure_slots(&mut self, node: usize, arity: usize) {
        let slots = &mut self.nodes[node].slots;
        if slots.len() < arity {
            slots.resize_with(arity, Vec::new);
            self.dirty = true;
        }
    }

    fn edge_key(&self, parent: usize, child: usize, slot: usize) -> EdgeKey {
        (
            self.hasher.hash_one(self.nodes[parent].value.as_ref()),
            self.hasher.hash_one(self.nodes[child].value.as_ref()),
            slot,
        )
    }

    /// Add `child` as an alternative for `slot` of `parent`. Repeating an edge is a
    /// no-op.
    fn link(&mut self, parent: usize, slot: usize, child: usize) {
        let key = self.edge_key(parent, child, slot);
        let bucket = self.edges.entry(key).or_default();
        if bucket.contains(&(parent, child)) {
            return;
        }
        bucket.push((parent, child));
        self.ensure_slots(parent, slot + 1);
        self.nodes[parent].slots[slot].push(child);
        self.nodes[child].incoming += 1;
        self.dirty = true;
    }

    /// Declare `value` with `arity` child slots. Slots that never receive an edge
    /// make the node's count zero.
    pub fn insert_node(&mut self, value: T, arity: usize) {
        let id = self.intern(value);
        self.ensure_slots(id, arity);
    }

    pub fn insert_edge(&mut self, parent: T, slot: usize, child: T) -> Result<()> {
        if parent == child {
            return Err(OptError::SelfLoop(format!("{parent:?} (slot {slot})")));
        }
        let parent = self.intern(parent);
        let child = self.intern(child);
        self.link(parent, slot, child);
        Ok(())
    }

    /// Register `value` as a top-level alternative.
    pub fn insert_root(&mut self, value: T) {
        let id = self.intern(value);
        self.link(ROOT, 0, id);
    }

    /// Number of trees in the map, saturating at `u64::MAX`.
    pub fn count(&mut self) -> Result<u64> {
        let orphans: Vec<usize> = self.nodes[1..]
            .iter()
            .filter(|n| n.incoming == 0)
            .map(|n| n.id)
            .collect();
        for id in orphans {
            self.link(ROOT, 0, id);
        }

        if self.dirty {
            for node in &mut self.nodes {
                node.state = CountState::Uncounted;
            }
            self.dirty = false;
        }
        for id in 1..self.nodes.len() {
            if let Err(err) = self.count_node(id) {
                self.dirty = true;
                return Err(err);
            }
        }
        if self.nodes[ROOT].slots.is_empty() {
            return Ok(0);
        }
        self.count_node(ROOT)
    }

    fn count_node(&mut self, id: usize) -> Result<u64> {
        match self.nodes[id].state {
            CountState::Counted => return Ok(self.nodes[id].count),
            CountState::Counting => {
                return Err(OptError::StructuralCycle(format!(
                    "node {} ({:?}) reached while it was being counted",
                    id, self.nodes[id].value
                )))
            }
            CountState::Uncounted => {}
        }
        self.nodes[id].state = CountState::Counting;

        let mut total: u64 = 1;
        for slot in 0..self.nodes[id].slots.len() {
            let mut alternatives: u64 = 0;
            for alt in 0..self.nodes[id].slots[slot].len() {
                let child = self.nodes[id].slots[slot][alt];
                alternatives = alternatives.saturating_add(self.count_node(child)?);
            }
            total = total.saturating_mul(alternatives);
        }

        let node = &mut self.nodes[id];
        node.count = total;
        node.state = CountState::Counted;
        Ok(total)
    }

    /// Materialize the tree with the given rank.
    pub fn unrank(&mut self, rank: u64, ctx: &C) -> Result<R> {
        let count = self.count()?;
        if rank >= count {
            return Err(OptError::RankOutOfRange { rank, count });
        }
        let (child, rest) = self.select(ROOT, 0, rank)?;
        self.unrank_node(child, rest, ctx)
    }

    /// Pick the alternative of `slot` that holds `rank` and return it with the rank
    /// left for it.
    fn select(&self, node: usize, slot: usize, mut rank: u64) -> Result<(usize, u64)> {
        for &alt in &self.nodes[node].slots[slot] {
            let count = self.nodes[alt].count;
            if rank < count {
                return Ok((alt, rank));
            }
            rank -= count;
        }
        Err(OptError::GraphCorruption(format!(
            "rank overflowed slot {slot} of tree-map node {node}"
        )))
    }

    fn unrank_node(&self, id: usize, mut rank: u64, ctx: &C) -> Result<R> {
        let node = &self.nodes[id];
        let Some(value) = node.value.as_ref() else {
            return Err(OptError::GraphCorruption("universal root unranked as a value".into()));
        };
        let mut children = Vec::with_capacity(node.slots.len());
        for (slot, alternatives) in node.slots.iter().enumerate() {
            let radix = alternatives
                .iter()
                .fold(0u64, |acc, &alt| acc.saturating_add(self.nodes[alt].count));
            if radix == 0 {
                return Err(OptError::GraphCorruption(format!(
                    "empty slot {slot} on a counted path through node {id}"
                )));
            }
            let digit = rank % radix;
            rank /= radix;
            let (child, rest) = self.select(id, slot, digit)?;
            children.push(self.unrank_node(child, rest, ctx)?);
        }
        Ok((self.rehydrate)(value, children, ctx))
    }

    /// Count of the trees rooted at `value`, as of the last [`TreeMap::count`].
    pub fn count_of(&self, value: &T) -> Option<u64> {
        let node = &self.nodes[*self.by_value.get(value)?];
        (node.state == CountState::Counted).then_some(node.count)
    }

    /// One-line description of a node: id, count and alternatives per slot.
    pub fn describe_node(&self, value: &T) -> Option<String> {
        let id = *self.by_value.get(value)?;
        Some(self.describe(id))
    }

    fn describe(&self, id: usize) -> String {
        let node = &self.nodes[id];
        let label = match &node.value {
            Some(v) => format!("{v:?}"),
            None => "<root>".to_string(),
        };
        let count = match node.state {
            CountState::Counted => node.count.to_string(),
            _ => "?".to_string(),
        };
        let slots: Vec<String> = node
            .slots
            .iter()
            .map(|alts| {
                let ids: Vec<String> = alts.iter().map(|a| format!("#{a}")).collect();
                format!("[{}]", ids.join(" | "))
            })
            .collect();
        format!(
            "#{} {} count={} in={} slots={}",
            id,
            label,
            count,
            node.incoming,
            slots.join(" ")
        )
    }
}

impl<T, R, C, F> fmt::Display for TreeMap<T, R, C, F>
where
    T: Eq + Hash + Clone + fmt::Debug,
    F: Fn(&T, Vec<R>, &C) -> R,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for id in 0..self.nodes.len() {
            writeln!(f, "{}", self.describe(id))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Tree(&'static str, Vec<Tree>);

    fn map() -> TreeMap<&'static str, Tree, (), impl Fn(&&'static str, Vec<Tree>, &()) -> Tree> {
        TreeMap::new(|v: &&'static str, children: Vec<Tree>, _: &()| Tree(*v, children))
    }

    #[test]
    fn test_empty_map() {
        let mut m = map();
        assert_eq!(m.count().unwrap(), 0);
        assert_eq!(
            m.unrank(0, &()).unwrap_err(),
            OptError::RankOutOfRange { rank: 0, count: 0 }
        );
    }

    #[test]
    fn test_single_leaf() {
        let mut m = map();
        m.insert_root("a");
        assert_eq!(m.count().unwrap(), 1);
        assert_eq!(m.unrank(0, &()).unwrap(), Tree("a", vec![]));
    }

    #[test]
    fn test_orphans_attach_to_root() {
        let mut m = map();
        m.insert_edge("p", 0, "x").unwrap();
        m.insert_node("q", 0);
        // p and q have no parent; x hangs below p.
        assert_eq!(m.count().unwrap(), 2);
        assert_eq!(m.count_of(&"p"), Some(1));
    }

    #[test]
    fn test_declared_empty_slot_is_zero() {
        let mut m = map();
        m.insert_node("p", 2);
        m.insert_edge("p", 0, "x").unwrap();
        assert_eq!(m.count().unwrap(), 0);
        assert_eq!(m.count_of(&"x"), Some(1));
    }

    #[test]
    fn test_self_loop_rejected() {
        let mut m = map();
        assert!(matches!(m.insert_edge("a", 0, "a"), Err(OptError::SelfLoop(_))));
    }

    #[test]
    fn test_describe() {
        let mut m = map();
        m.insert_edge("p", 0, "x").unwrap();
        m.insert_edge("p", 0, "y").unwrap();
        m.count().unwrap();
        let line = m.describe_node(&"p").unwrap();
        assert!(line.contains("count=2"), "{line}");
        assert!(line.contains("[#2 | #3]"), "{line}");
        assert!(m.to_string().contains("<root>"));
    }
}
