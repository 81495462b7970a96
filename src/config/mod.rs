//! Configuration module for the cairn composition engine.
//!
//! This module handles all stack-file functionality:
//! - Parsing and deserializing `cairn.stack.yaml`
//! - Structural validation of declarations
//! - Computing input hashes for change detection

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::InputHasher;
pub use parser::{ConfigParser, find_config_file};
pub use spec::{ResourceConfig, StackConfig, StackMeta, StateBackend, StateConfig};
pub use validator::{StackValidator, ValidationError, ValidationResult};
