//! # optx-core: Cascades Search and Plan-Space Enumeration
//!
//! This crate implements the search core of a Cascades-style query optimizer: the
//! memo that holds the space of equivalent plans, the rule framework that grows it,
//! a concurrent job scheduler that runs the search to closure, and a generic tree
//! enumeration map that counts, ranks and samples every concrete plan in the result.
//!
//! ## Module Overview
//!
//! - **`memo`**: Groups and candidate expressions in append-only arenas, with an
//!   insert-or-find deduplication index shared by all workers.
//! - **`expr`**: Operator descriptors (logical, physical, scalar).
//! - **`rule`**: The Rule trait, promise levels, rule bitsets and the RuleRegistry.
//! - **`pattern`**: Declarative pattern matching for rule applicability checks.
//! - **`job`**: Resumable optimization jobs (group, expression, rule application).
//! - **`queue`**: The pending map and shared ready queue the workers pull from.
//! - **`scheduler`**: Worker pool, search configuration and cancellation.
//! - **`tree_map`**: Counting and unranking of all trees embedded in a DAG.
//! - **`plan`**: The plan space of a memo, built on the tree map.
//! - **`catalog`**: Catalog trait consulted by rules.
//! - **`error`**: The error taxonomy shared by all of the above.

pub mod catalog;
pub mod error;
pub mod expr;
pub mod job;
pub mod memo;
pub mod pattern;
pub mod plan;
pub mod queue;
pub mod rule;
pub mod scheduler;
pub mod tree_map;
