//! State persistence and locking for the Tidemark sync core.
//!
//! [`StateStore`] keeps per-table sync state, schema mappings, and
//! in-flight checkpoints as atomic JSON files. [`lock`] provides the
//! single-holder sync lock with PID-based staleness detection.

pub mod error;
pub mod lock;
pub mod store;

pub use error::{Result, StateError};
pub use lock::{LockGuard, LockRecord, LockStatus};
pub use store::StateStore;
