//! Planning: diff computation and execution plan ordering.

pub mod diff;
pub mod plan;

pub use diff::{DiffDetail, DiffEngine, DiffResult, DiffType, ResourceDiff};
pub use plan::{ActionType, Plan, PlanEntry};
