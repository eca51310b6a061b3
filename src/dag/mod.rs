//! Task dependency scheduling.
//!
//! This module provides the dependency graph the orchestrator walks while
//! executing a plan.
//!
//! ## Architecture
//!
//! 1. **Graph** - `TaskDag`: insertion-ordered task ids with their
//!    dependency sets, topological ordering and cycle detection
//! 2. **State** - `ExecutionState`: which tasks are resolved, feeding
//!    `TaskDag::get_ready` to discover the next executable frontier
//!
//! ## Example
//!
//! ```
//! use nugget::dag::TaskDag;
//! use std::collections::HashSet;
//!
//! let mut dag = TaskDag::new();
//! dag.add_task("a", Vec::<String>::new());
//! dag.add_task("b", ["a"]);
//! dag.add_task("c", ["a"]);
//! dag.add_task("d", ["b", "c"]);
//!
//! let completed: HashSet<String> = ["a".to_string()].into_iter().collect();
//! assert_eq!(dag.get_ready(&completed), vec!["b", "c"]);
//! ```

mod graph;
mod state;

pub use graph::TaskDag;
pub use state::{ExecutionState, ExecutionSummary, ExecutionTimer};
