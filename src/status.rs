//! Status signals shared between the callback context and the control loop.
//!
//! [`StatusFlags`] replaces process-wide globals with one object that both
//! sides borrow. Writers use `Release` stores and readers `Acquire` loads, so
//! everything the callback context did before raising a flag is visible to
//! the control loop once it observes the flag.
//!
//! With the `std` feature the flags also carry a condition variable: every
//! write wakes waiters, and [`StatusFlags::wait_until`] sleeps instead of
//! spinning, re-checking at least once per poll interval.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

#[cfg(feature = "std")]
use std::sync::{Condvar, Mutex, PoisonError};
#[cfg(feature = "std")]
use std::time::{Duration, Instant};

/// Point-in-time copy of the three flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlagSnapshot {
    /// The session reached a terminal state.
    pub finished: bool,
    /// The subscription request completed and the session is ready.
    pub subscribed: bool,
    /// The disconnect request completed (successfully or not).
    pub disconnected: bool,
}

/// The `finished` / `subscribed` / `disconnected` signals of one session.
///
/// `finished` and `disconnected` are monotonic. `subscribed` is cleared
/// only when the connection is lost and the session starts reconnecting.
#[derive(Default)]
pub struct StatusFlags {
    finished: AtomicBool,
    subscribed: AtomicBool,
    disconnected: AtomicBool,
    times_ready: AtomicU32,
    #[cfg(feature = "std")]
    signal: Signal,
}

#[cfg(feature = "std")]
#[derive(Default)]
struct Signal {
    lock: Mutex<()>,
    changed: Condvar,
}

#[cfg(feature = "std")]
impl Signal {
    fn notify(&self) {
        // Taking the lock orders the notification after any waiter's check.
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.changed.notify_all();
    }
}

impl StatusFlags {
    /// All flags cleared.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the session reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Whether the session is currently subscribed and ready.
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    /// Whether the disconnect request completed.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    /// How many times `subscribed` went from clear to set.
    pub fn times_ready(&self) -> u32 {
        self.times_ready.load(Ordering::Acquire)
    }

    /// Reads all three flags.
    pub fn snapshot(&self) -> FlagSnapshot {
        FlagSnapshot {
            finished: self.is_finished(),
            subscribed: self.is_subscribed(),
            disconnected: self.is_disconnected(),
        }
    }

    /// Raises `finished`. Never cleared afterwards.
    pub fn set_finished(&self) {
        self.finished.store(true, Ordering::Release);
        self.notify();
    }

    /// Raises `subscribed`.
    pub fn set_subscribed(&self) {
        if !self.subscribed.swap(true, Ordering::AcqRel) {
            self.times_ready.fetch_add(1, Ordering::AcqRel);
        }
        self.notify();
    }

    /// Clears `subscribed` after a connection loss.
    pub fn clear_subscribed(&self) {
        self.subscribed.store(false, Ordering::Release);
        self.notify();
    }

    /// Raises `disconnected`. Never cleared afterwards.
    pub fn set_disconnected(&self) {
        self.disconnected.store(true, Ordering::Release);
        self.notify();
    }

    #[cfg(feature = "std")]
    fn notify(&self) {
        self.signal.notify();
    }

    #[cfg(not(feature = "std"))]
    fn notify(&self) {}

    /// Blocks until `condition` holds, re-checking at least every `poll`.
    #[cfg(feature = "std")]
    pub fn wait_until<F>(&self, condition: F, poll: Duration)
    where
        F: Fn(&FlagSnapshot) -> bool,
    {
        let mut guard = self.signal.lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !condition(&self.snapshot()) {
            guard = match self.signal.changed.wait_timeout(guard, poll) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Like [`wait_until`](Self::wait_until) but gives up after `timeout`.
    ///
    /// Returns whether the condition held before the deadline.
    #[cfg(feature = "std")]
    pub fn wait_until_timeout<F>(&self, condition: F, poll: Duration, timeout: Duration) -> bool
    where
        F: Fn(&FlagSnapshot) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut guard = self.signal.lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if condition(&self.snapshot()) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let wait = poll.min(deadline - now);
            guard = match self.signal.changed.wait_timeout(guard, wait) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

impl fmt::Debug for StatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("StatusFlags")
            .field("finished", &snapshot.finished)
            .field("subscribed", &snapshot.subscribed)
            .field("disconnected", &snapshot.disconnected)
            .field("times_ready", &self.times_ready())
            .finish()
    }
}
