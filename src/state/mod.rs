//! State storage for last-known applied state.
//!
//! One versioned document per stack, a backend trait, and advisory locking.

mod local;
mod lock;
mod store;
mod types;

pub use local::LocalStateStore;
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use store::StateStore;
pub use types::{RunHistoryEntry, RunOperation, STATE_VERSION, StackState, StateRecord};
