//! Execution: concurrent plan application with retry and checkpointing.

pub mod executor;
pub mod retry;

pub use executor::{
    ActionResult, DEFAULT_PARALLELISM, ExecutionResult, PlanExecutor, ResourceOutcome,
};
pub use retry::{DEFAULT_MAX_ATTEMPTS, with_backoff};
