// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Cairn
//!
//! A declarative infrastructure composition engine with dependency-aware
//! planning and concurrent apply.
//!
//! ## Overview
//!
//! Cairn takes a stack file describing desired resources, compares it with
//! the last-known state, and drives providers to close the gap:
//!
//! - Declare resources and wire them together with `${name.attr}` output
//!   references, resolved only once the referenced resource exists
//! - Preview exactly what would change before touching anything
//! - Apply independent resources concurrently, with retry for transient
//!   provider failures and isolation of failed dependency chains
//! - Persist state atomically after every completed operation
//!
//! ## Architecture
//!
//! The engine is built around **desired state reconciliation**:
//!
//! 1. **Desired State**: Declared in `cairn.stack.yaml`
//! 2. **Last-known State**: Persisted from previous runs
//! 3. **Planner**: Diffs the two and orders the work along the dependency
//!    graph
//! 4. **Executor**: Applies the plan through provider plugins
//!
//! ## Modules
//!
//! - [`config`]: Stack file parsing, validation and input hashing
//! - [`resource`]: Resource model and deferred output references
//! - [`graph`]: Dependency graph construction and ordering
//! - [`planner`]: Diff computation and execution planning
//! - [`engine`]: Concurrent plan execution with retry
//! - [`provider`]: Provider plugin interface
//! - [`state`]: State storage backends and locking
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! stack:
//!   name: people-demo
//!
//! resources:
//!   - name: database
//!     type: gcp:firestore/Database
//!     inputs:
//!       locationId: nam5
//!   - name: person-doc
//!     type: gcp:firestore/Document
//!     inputs:
//!       database: ${database.name}
//!       collection: person
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod resource;
pub mod stack;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, InputHasher, StackConfig, StackValidator};
pub use engine::{ExecutionResult, PlanExecutor};
pub use error::{CairnError, Result};
pub use graph::DependencyGraph;
pub use planner::{DiffEngine, Plan};
pub use provider::{MemoryProvider, Provider, ProviderRegistry};
pub use resource::{Resource, ResourceSet, Value};
pub use stack::StackContext;
pub use state::{LocalStateStore, StackState, StateStore};
