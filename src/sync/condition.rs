//! Sticky condition variable
//!
//! A [`Condition`] pairs a `parking_lot::Condvar` with a one-bit "signalled"
//! latch. The latch is only read or written while the caller holds the mutex
//! whose guard is passed in, so a signal raised before anybody waits is still
//! seen by the next wait. Several signals before a wait collapse into a single
//! wakeup.

use parking_lot::{Condvar, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Condition variable guarded by a single-slot "signalled" flag
#[derive(Debug, Default)]
pub struct Condition {
    cond: Condvar,
    // Protected by the caller's mutex; the atomic only makes the type Sync.
    signalled: AtomicBool,
}

impl Condition {
    /// Create a new, unsignalled condition
    pub const fn new() -> Self {
        Self {
            cond: Condvar::new(),
            signalled: AtomicBool::new(false),
        }
    }

    /// Block until the condition is signalled, then clear the flag.
    ///
    /// Returns immediately if a signal is already pending. Spurious wakeups
    /// of the underlying condvar never reach the caller.
    pub fn wait<T: ?Sized>(&self, guard: &mut MutexGuard<'_, T>) {
        while !self.signalled.load(Ordering::Relaxed) {
            self.cond.wait(guard);
        }
        self.signalled.store(false, Ordering::Relaxed);
    }

    /// Block for at most `timeout` waiting for a signal.
    ///
    /// Returns `true` and clears the flag if the condition was (or became)
    /// signalled. Returns `false` without touching the flag if the timeout
    /// elapsed first. A zero timeout only polls.
    pub fn wait_for<T: ?Sized>(&self, guard: &mut MutexGuard<'_, T>, timeout: Duration) -> bool {
        if !self.signalled.load(Ordering::Relaxed) {
            let deadline = match Instant::now().checked_add(timeout) {
                Some(deadline) => deadline,
                None => {
                    self.wait(guard);
                    return true;
                }
            };

            while !self.signalled.load(Ordering::Relaxed) {
                if self.cond.wait_until(guard, deadline).timed_out() {
                    break;
                }
            }

            if !self.signalled.load(Ordering::Relaxed) {
                return false;
            }
        }

        self.signalled.store(false, Ordering::Relaxed);
        true
    }

    /// Set the flag and wake one waiter. No-op while already signalled.
    pub fn signal<T: ?Sized>(&self, _guard: &MutexGuard<'_, T>) {
        if !self.signalled.swap(true, Ordering::Relaxed) {
            self.cond.notify_one();
        }
    }

    /// Whether a signal is pending
    pub fn is_signalled<T: ?Sized>(&self, _guard: &MutexGuard<'_, T>) -> bool {
        self.signalled.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_signal_before_wait_is_sticky() {
        let lock = Mutex::new(());
        let cond = Condition::new();

        let mut guard = lock.lock();
        cond.signal(&guard);
        assert!(cond.is_signalled(&guard));

        // Does not block
        cond.wait(&mut guard);
        assert!(!cond.is_signalled(&guard));
    }

    #[test]
    fn test_signals_collapse_into_one_wakeup() {
        let lock = Mutex::new(());
        let cond = Condition::new();

        let mut guard = lock.lock();
        cond.signal(&guard);
        cond.signal(&guard);
        cond.signal(&guard);

        assert!(cond.wait_for(&mut guard, Duration::ZERO));
        assert!(!cond.wait_for(&mut guard, Duration::from_millis(20)));
    }

    #[test]
    fn test_timed_wait_elapses_without_consuming() {
        let lock = Mutex::new(());
        let cond = Condition::new();

        let mut guard = lock.lock();
        let start = Instant::now();
        assert!(!cond.wait_for(&mut guard, Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(!cond.is_signalled(&guard));
    }

    #[test]
    fn test_cross_thread_signal_wakes_waiter() {
        let shared = Arc::new((Mutex::new(0u32), Condition::new()));

        let producer = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                let mut value = shared.0.lock();
                *value = 42;
                shared.1.signal(&value);
            })
        };

        let mut value = shared.0.lock();
        assert!(shared.1.wait_for(&mut value, Duration::from_secs(5)));
        assert_eq!(*value, 42);
        drop(value);

        producer.join().unwrap();
    }
}
