//! Synchronization primitives
//!
//! Everything in the engine locks through `parking_lot`: its mutexes do not
//! poison, and [`parking_lot::MutexGuard::unlocked`] lets the event loop run
//! callbacks with its lock released without giving up the guard.

mod condition;

pub use condition::Condition;
pub use parking_lot::{Mutex, MutexGuard};
