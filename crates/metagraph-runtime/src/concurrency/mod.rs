//! Concurrency primitives for the runtime.
//!
//! - [`lock_manager::LockManager`] maps keys to long-lived mutex handles

pub mod lock_manager;

pub use lock_manager::{same_handle, LockHandle, LockManager};
