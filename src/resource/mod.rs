//! Resource model: typed desired-state declarations.
//!
//! This module provides the [`Resource`] description, the [`ResourceSet`]
//! declaration registry, and the [`Value`] input tree with deferred
//! `${resource.attribute}` output references.

mod model;
mod value;

pub use model::{Resource, ResourceSet};
pub use value::{OutputRef, Segment, Value};
