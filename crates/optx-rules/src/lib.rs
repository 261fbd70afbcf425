//! # Built-in Optimization Rules
//!
//! The default rule set for the Cascades search. Rules are divided into two
//! categories.
//!
//! ## Exploration Rules (Logical -> Logical)
//!
//! - **`JoinCommutativityRule`**: `A JOIN B -> B JOIN A` for inner and cross joins.
//! - **`JoinAssociativityRule`**: `(A JOIN B) JOIN C -> A JOIN (B JOIN C)` for inner
//!   joins, creating the intermediate group on the fly.
//! - **`PredicatePushdownRule`**: merges a filter into the join below it.
//! - **`ProjectionPushdownRule`**: narrows the scan below a projection.
//!
//! ## Implementation Rules (Logical -> Physical)
//!
//! - **`ImplHashJoinRule`** (build-left and build-right), **`ImplMergeJoinRule`**,
//!   **`ImplNestedLoopJoinRule`**.
//! - **`ImplSeqScanRule`**.
//! - **`ImplHashAggregateRule`**, **`ImplStreamAggregateRule`**.
//! - **`ImplSortRule`**, **`ImplFilterRule`**, **`ImplProjectRule`**, **`ImplLimitRule`**.
//!
//! ## Promise Policy
//!
//! Each rule's `promise` is a local, conservative check on the expression it would
//! fire on. `None` means the rule cannot produce anything useful there; the other
//! levels only order dispatch. See each rule's module documentation for its policy.

pub mod impl_agg;
pub mod impl_join;
pub mod impl_scan;
pub mod impl_unary;
pub mod join_associativity;
pub mod join_commutativity;
pub mod predicate_pushdown;
pub mod projection_pushdown;

use optx_core::error::Result;
use optx_core::rule::RuleRegistry;

/// Create a registry with all built-in rules.
///
/// Ids follow registration order and are stable:
///
/// | id | rule | | id | rule |
/// |----|------|-|----|------|
/// | 0 | JoinCommutativity | | 8 | ImplSeqScan |
/// | 1 | JoinAssociativity | | 9 | ImplHashAggregate |
/// | 2 | PredicatePushdown | | 10 | ImplStreamAggregate |
/// | 3 | ProjectionPushdown | | 11 | ImplSort |
/// | 4 | *retired* (JoinAssociativityLegacy) | | 12 | ImplFilter |
/// | 5 | ImplHashJoin | | 13 | ImplProject |
/// | 6 | ImplMergeJoin | | 14 | ImplLimit |
/// | 7 | ImplNestedLoopJoin | | | |
///
/// Connector-specific rules can be added to the returned registry with
/// `register_for_source`; they take the next free ids.
pub fn default_rule_registry() -> Result<RuleRegistry> {
    let mut registry = RuleRegistry::new();

    registry.register(Box::new(join_commutativity::JoinCommutativityRule))?;
    registry.register(Box::new(join_associativity::JoinAssociativityRule))?;
    registry.register(Box::new(predicate_pushdown::PredicatePushdownRule))?;
    registry.register(Box::new(projection_pushdown::ProjectionPushdownRule))?;
    registry.retire("JoinAssociativityLegacy")?;

    registry.register(Box::new(impl_join::ImplHashJoinRule))?;
    registry.register(Box::new(impl_join::ImplMergeJoinRule))?;
    registry.register(Box::new(impl_join::ImplNestedLoopJoinRule))?;
    registry.register(Box::new(impl_scan::ImplSeqScanRule))?;
    registry.register(Box::new(impl_agg::ImplHashAggregateRule))?;
    registry.register(Box::new(impl_agg::ImplStreamAggregateRule))?;
    registry.register(Box::new(impl_unary::ImplSortRule))?;
    registry.register(Box::new(impl_unary::ImplFilterRule))?;
    registry.register(Box::new(impl_unary::ImplProjectRule))?;
    registry.register(Box::new(impl_unary::ImplLimitRule))?;

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use optx_core::rule::{RuleId, RuleType};

    #[test]
    fn test_stable_ids() {
        let registry = default_rule_registry().unwrap();
        assert_eq!(registry.len(), 15);
        let expected = [
            (0, "JoinCommutativity"),
            (1, "JoinAssociativity"),
            (3, "ProjectionPushdown"),
            (5, "ImplHashJoin"),
            (8, "ImplSeqScan"),
            (14, "ImplLimit"),
        ];
        for (id, name) in expected {
            assert_eq!(registry.lookup_by_name(name).unwrap().0, RuleId(id));
        }
        assert!(registry.lookup(RuleId(4)).is_err());
        assert_eq!(registry.name_of(RuleId(4)), Some("JoinAssociativityLegacy"));
    }

    #[test]
    fn test_phase_sets() {
        let registry = default_rule_registry().unwrap();
        assert_eq!(registry.exploration_set().len(), 4);
        assert_eq!(registry.implementation_set().len(), 10);
        for (id, rule) in registry.iter() {
            let in_exploration = registry.exploration_set().contains(id);
            assert_eq!(in_exploration, rule.rule_type() == RuleType::Transformation);
        }
    }
}
