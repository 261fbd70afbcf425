//! # Error Taxonomy
//!
//! Every fallible operation in the core returns [`OptError`]. The variants fall into
//! two families:
//!
//! - **Local caller errors** (`RankOutOfRange`, `UnknownRule`, `DuplicateRule`,
//!   `SelfLoop`): reported synchronously at the call that detected them. Nothing is
//!   cancelled and no partial result is produced.
//! - **Scheduler-fatal errors** (`StructuralCycle` during a run, `Cancelled`,
//!   `ResourceExhausted`, `GraphCorruption`, `RuleFailed`): abort the whole
//!   optimization run. The memo is not usable for enumeration afterwards.
//!
//! A rule that matches but yields no expressions is *not* an error. A rule that
//! fails with [`RuleError::Recoverable`] is treated the same way (it produced
//! nothing); [`RuleError::Fatal`] becomes [`OptError::RuleFailed`].

use crate::memo::GroupId;

/// Errors raised by the memo, the scheduler, the rule registry and the tree map.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptError {
    /// A cycle was found in a structure that must be acyclic: either the tree map
    /// re-entered a node that was still being counted, or a group transitively
    /// required its own completion during scheduling.
    #[error("structural cycle detected: {0}")]
    StructuralCycle(String),

    /// `unrank` was called with a rank outside `[0, count)`.
    #[error("rank {rank} out of range: map holds {count} trees")]
    RankOutOfRange { rank: u64, count: u64 },

    /// Registry lookup miss.
    #[error("unknown rule: {0}")]
    UnknownRule(String),

    /// A rule with the same name was already registered.
    #[error("duplicate rule name: {0}")]
    DuplicateRule(String),

    /// An edge whose parent and child are the same value.
    #[error("self-loop edge on tree-map node {0}")]
    SelfLoop(String),

    /// The run-scoped cancellation token was triggered.
    #[error("optimization run cancelled")]
    Cancelled,

    /// The run created more jobs than the configured budget allows.
    #[error("job budget exhausted after {limit} jobs")]
    ResourceExhausted { limit: usize },

    /// The memo or the scheduler bookkeeping is inconsistent.
    #[error("search graph corrupted: {0}")]
    GraphCorruption(String),

    /// A rule failed with an error it did not classify as recoverable.
    #[error("rule '{rule}' failed on group {group}: {message}")]
    RuleFailed {
        rule: String,
        group: GroupId,
        message: String,
    },
}

impl OptError {
    /// Whether this error aborts a whole optimization run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OptError::StructuralCycle(_)
                | OptError::Cancelled
                | OptError::ResourceExhausted { .. }
                | OptError::GraphCorruption(_)
                | OptError::RuleFailed { .. }
        )
    }
}

/// Failure classification at the rule boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    /// The rule could not produce output for this expression; the scheduler logs it
    /// and continues as if the rule produced nothing.
    #[error("{0}")]
    Recoverable(String),
    /// The rule hit an invariant violation; the run is aborted.
    #[error("{0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, OptError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(OptError::Cancelled.is_fatal());
        assert!(OptError::ResourceExhausted { limit: 10 }.is_fatal());
        assert!(OptError::StructuralCycle("g1".into()).is_fatal());
        assert!(!OptError::RankOutOfRange { rank: 3, count: 2 }.is_fatal());
        assert!(!OptError::UnknownRule("Nope".into()).is_fatal());
    }

    #[test]
    fn test_display() {
        let err = OptError::RankOutOfRange { rank: 7, count: 6 };
        assert_eq!(err.to_string(), "rank 7 out of range: map holds 6 trees");
    }
}
