//! Synchronization and panic-handling utilities.

mod deferred;

use std::any::Any;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub use deferred::{deferred, Abandoned, Deferred, Promise};

/// Extracts the message of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

/// Locks a mutex, ignoring poisoning.
///
/// Model panics are caught before they unwind through the engine locks, so
/// the state behind a poisoned lock is still consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
