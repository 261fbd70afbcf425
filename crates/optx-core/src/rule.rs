//! # Rule System
//!
//! This module defines the rule trait and the rule registry that drive the search.
//!
//! ## Rule Types
//!
//! - **Exploration rules** (`RuleType::Transformation`): rewrite a logical operator
//!   into an equivalent logical operator (join commutativity, predicate pushdown).
//! - **Implementation rules** (`RuleType::Implementation`): map a logical operator to
//!   one or more physical operators (join → hash join).
//!
//! ## Promise and Compatibility
//!
//! Before a rule-application job is spawned for an expression the scheduler asks
//! two cheap questions:
//!
//! - [`Rule::promise`]: a local structural check. [`Promise::None`] skips the rule
//!   for this expression (it cannot apply, or applying it would be redundant); the
//!   other levels order dispatch, highest first.
//! - [`RuleRegistry::is_compatible`]: whether the rule may fire on an expression
//!   produced by a given origin rule. Each rule names the origin rules it is
//!   incompatible with, which is how rule ping-pong (A rewrites what B produced, B
//!   rewrites it back) is cut off before it reaches the memo.
//!
//! Both are pruning heuristics. The memo's deduplication is what guarantees
//! termination; promise and compatibility only save work.
//!
//! ## Rule Registry
//!
//! Rules get dense numeric ids in registration order. Ids are stable for the life of
//! the registry: retiring a rule keeps its slot, so rule ids recorded elsewhere (the
//! memo's applied-rule sets, the origin of an expression) keep their meaning. The
//! registry is built once and then shared immutably, usually behind an `Arc`.
//!
//! Rules can also be scoped to a data source (e.g. a Hive connector rule) with
//! [`RuleRegistry::register_for_source`]; [`RuleRegistry::source_mask`] selects the
//! rules that are active for a given source type.

use crate::catalog::Catalog;
use crate::error::{OptError, Result, RuleError};
use crate::expr::Operator;
use crate::memo::{GroupId, Memo, MemoExpr};
use crate::pattern::Pattern;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Classification of optimization rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RuleType {
    /// Logical → logical (exploration set).
    Transformation,
    /// Logical → physical (implementation set).
    Implementation,
}

/// Dense, stable rule identifier assigned by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RuleId(pub u16);

impl RuleId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Heuristic applicability of a rule to one expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Promise {
    /// Do not apply.
    None,
    Low,
    Medium,
    High,
}

/// Context passed to rules during promise evaluation and application.
pub struct OptContext<'a> {
    pub catalog: &'a dyn Catalog,
}

/// A child in a rule result: an existing group or a new sub-expression.
///
/// `(A ⋈ B) ⋈ C → A ⋈ (B ⋈ C)` needs a group for `B ⋈ C`; the rule returns
/// `RuleChild::NewExpr(Join, [Group(B), Group(C)])` and the scheduler inserts it with
/// the memo's insert-or-find, reusing an existing group when the shape is known.
#[derive(Debug, Clone)]
pub enum RuleChild {
    Group(GroupId),
    NewExpr(Operator, Vec<RuleChild>),
}

/// Result of applying a rule to an expression. Every result is added to the group
/// of the expression the rule was applied to.
#[derive(Debug, Clone)]
pub enum RuleResult {
    /// New expression over existing child groups.
    Substitution(Operator, Vec<GroupId>),
    /// New expression whose children may themselves be new sub-expressions.
    NewChildren(Operator, Vec<RuleChild>),
}

/// A rule transforms or implements expressions.
pub trait Rule: Send + Sync {
    /// Unique name of this rule.
    fn name(&self) -> &str;

    fn rule_type(&self) -> RuleType;

    /// Structural pattern the expression must match.
    fn pattern(&self) -> Pattern;

    fn promise(&self, _expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Promise {
        Promise::Medium
    }

    /// Names of origin rules whose output this rule must not be applied to.
    fn incompatible_with(&self) -> &[&'static str] {
        &[]
    }

    /// Apply the rule to a matching expression.
    ///
    /// An empty vector is the normal "matched but produced nothing" outcome.
    fn apply(
        &self,
        expr: &MemoExpr,
        memo: &Memo,
        ctx: &OptContext,
    ) -> std::result::Result<Vec<RuleResult>, RuleError>;
}

/// Growable bitset over rule ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    words: Vec<u64>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the id was not present.
    pub fn insert(&mut self, id: RuleId) -> bool {
        let (word, bit) = (id.index() / 64, id.index() % 64);
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        let was = self.words[word] & (1 << bit) != 0;
        self.words[word] |= 1 << bit;
        !was
    }

    pub fn remove(&mut self, id: RuleId) {
        let (word, bit) = (id.index() / 64, id.index() % 64);
        if let Some(w) = self.words.get_mut(word) {
            *w &= !(1 << bit);
        }
    }

    pub fn contains(&self, id: RuleId) -> bool {
        let (word, bit) = (id.index() / 64, id.index() % 64);
        self.words.get(word).is_some_and(|w| w & (1 << bit) != 0)
    }

    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn union(&self, other: &RuleSet) -> RuleSet {
        let len = self.words.len().max(other.words.len());
        let words = (0..len)
            .map(|i| self.words.get(i).unwrap_or(&0) | other.words.get(i).unwrap_or(&0))
            .collect();
        RuleSet { words }
    }

    pub fn intersection(&self, other: &RuleSet) -> RuleSet {
        let words = self
            .words
            .iter()
            .zip(other.words.iter())
            .map(|(a, b)| a & b)
            .collect();
        RuleSet { words }
    }

    /// Ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = RuleId> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &w)| {
            (0..64)
                .filter(move |bit| w & (1 << bit) != 0)
                .map(move |bit| RuleId((i * 64 + bit) as u16))
        })
    }
}

impl FromIterator<RuleId> for RuleSet {
    fn from_iter<I: IntoIterator<Item = RuleId>>(iter: I) -> Self {
        let mut set = RuleSet::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

enum Slot {
    Active {
        rule: Box<dyn Rule>,
        source: Option<String>,
    },
    Retired {
        name: String,
    },
}

/// Summary of one registry slot.
#[derive(Debug, Clone, Serialize)]
pub struct RuleInfo {
    pub id: RuleId,
    pub name: String,
    pub rule_type: Option<RuleType>,
    pub source: Option<String>,
    pub retired: bool,
}

/// Registry of optimization rules, indexed by stable [`RuleId`].
#[derive(Default)]
pub struct RuleRegistry {
    slots: Vec<Slot>,
    by_name: HashMap<String, RuleId>,
    exploration: RuleSet,
    implementation: RuleSet,
    base: RuleSet,
    by_source: HashMap<String, RuleSet>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule that is active for every source.
    pub fn register(&mut self, rule: Box<dyn Rule>) -> Result<RuleId> {
        self.push(rule, None)
    }

    /// Register a rule that is only active for the given source type.
    pub fn register_for_source(
        &mut self,
        source: impl Into<String>,
        rule: Box<dyn Rule>,
    ) -> Result<RuleId> {
        self.push(rule, Some(source.into()))
    }

    /// Reserve the next id for a rule that no longer exists, keeping later ids stable.
    pub fn retire(&mut self, name: impl Into<String>) -> Result<RuleId> {
        let name = name.into();
        let id = self.next_id(&name)?;
        self.by_name.insert(name.clone(), id);
        self.slots.push(Slot::Retired { name });
        Ok(id)
    }

    fn next_id(&self, name: &str) -> Result<RuleId> {
        if self.by_name.contains_key(name) {
            return Err(OptError::DuplicateRule(name.to_string()));
        }
        u16::try_from(self.slots.len())
            .map(RuleId)
            .map_err(|_| OptError::GraphCorruption("rule id space exhausted".into()))
    }

    fn push(&mut self, rule: Box<dyn Rule>, source: Option<String>) -> Result<RuleId> {
        let id = self.next_id(rule.name())?;
        match rule.rule_type() {
            RuleType::Transformation => self.exploration.insert(id),
            RuleType::Implementation => self.implementation.insert(id),
        };
        match &source {
            Some(s) => {
                self.by_source.entry(s.clone()).or_default().insert(id);
            }
            None => {
                self.base.insert(id);
            }
        }
        self.by_name.insert(rule.name().to_string(), id);
        self.slots.push(Slot::Active { rule, source });
        Ok(id)
    }

    pub fn lookup(&self, id: RuleId) -> Result<&dyn Rule> {
        match self.slots.get(id.index()) {
            Some(Slot::Active { rule, .. }) => Ok(rule.as_ref()),
            Some(Slot::Retired { name }) => Err(OptError::UnknownRule(format!(
                "{id} ({name}) is retired"
            ))),
            None => Err(OptError::UnknownRule(id.to_string())),
        }
    }

    pub fn lookup_by_name(&self, name: &str) -> Result<(RuleId, &dyn Rule)> {
        let id = *self
            .by_name
            .get(name)
            .ok_or_else(|| OptError::UnknownRule(name.to_string()))?;
        Ok((id, self.lookup(id)?))
    }

    pub fn exploration_set(&self) -> &RuleSet {
        &self.exploration
    }

    pub fn implementation_set(&self) -> &RuleSet {
        &self.implementation
    }

    /// Rules active for `source`: every unscoped rule plus the source's own rules.
    pub fn source_mask(&self, source: Option<&str>) -> RuleSet {
        match source.and_then(|s| self.by_source.get(s)) {
            Some(scoped) => self.base.union(scoped),
            None => self.base.clone(),
        }
    }

    /// Whether `rule` may be applied to an expression produced by `origin`.
    pub fn is_compatible(&self, rule: RuleId, origin: Option<RuleId>) -> bool {
        let Some(origin) = origin else {
            return true;
        };
        let (Ok(rule), Some(origin_name)) = (self.lookup(rule), self.name_of(origin)) else {
            return true;
        };
        !rule.incompatible_with().iter().any(|n| *n == origin_name)
    }

    /// Name of a registered or retired rule.
    pub fn name_of(&self, id: RuleId) -> Option<&str> {
        self.slots.get(id.index()).map(|slot| match slot {
            Slot::Active { rule, .. } => rule.name(),
            Slot::Retired { name } => name.as_str(),
        })
    }

    /// Number of ids handed out, retired ones included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Active rules in id order.
    pub fn iter(&self) -> impl Iterator<Item = (RuleId, &dyn Rule)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, slot)| match slot {
            Slot::Active { rule, .. } => Some((RuleId(i as u16), rule.as_ref())),
            Slot::Retired { .. } => None,
        })
    }

    pub fn describe(&self) -> Vec<RuleInfo> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, slot)| match slot {
                Slot::Active { rule, source } => RuleInfo {
                    id: RuleId(i as u16),
                    name: rule.name().to_string(),
                    rule_type: Some(rule.rule_type()),
                    source: source.clone(),
                    retired: false,
                },
                Slot::Retired { name } => RuleInfo {
                    id: RuleId(i as u16),
                    name: name.clone(),
                    rule_type: None,
                    source: None,
                    retired: true,
                },
            })
            .collect()
    }
}
