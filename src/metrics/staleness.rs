//! Reference-counted instrument reclamation.
//!
//! Every user-facing instrument handle holds one reference on its
//! handler. When the count falls to zero the handler fires its staleness
//! callbacks, either synchronously inside the zeroing release or after a
//! grace period that lets transient churn re-acquire first.

use crate::core::Clock;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// When reclamation fires relative to the zeroing release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalenessMode {
    /// Fire callbacks inside the `release` that zeroed the count.
    Immediate,
    /// Fire during a later reap pass once the delay has elapsed without a
    /// re-acquire.
    Delayed(Duration),
}

struct StalenessInner {
    count: usize,
    stale_deadline: Option<u64>,
    callbacks: Vec<Box<dyn FnOnce() + Send>>,
}

/// Reference counter that notifies when an instrument becomes unused.
pub struct StalenessHandler {
    mode: StalenessMode,
    clock: Arc<dyn Clock>,
    inner: Mutex<StalenessInner>,
}

impl std::fmt::Debug for StalenessHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("StalenessHandler")
            .field("mode", &self.mode)
            .field("count", &inner.count)
            .field("stale_deadline", &inner.stale_deadline)
            .finish()
    }
}

impl StalenessHandler {
    /// Create a handler with no references held.
    pub fn new(mode: StalenessMode, clock: Arc<dyn Clock>) -> Self {
        Self {
            mode,
            clock,
            inner: Mutex::new(StalenessInner {
                count: 0,
                stale_deadline: None,
                callbacks: Vec::new(),
            }),
        }
    }

    /// Register a callback fired once when the instrument goes stale.
    pub fn on_stale(&self, callback: impl FnOnce() + Send + 'static) {
        self.inner.lock().callbacks.push(Box::new(callback));
    }

    /// Take a reference. Cancels any pending staleness.
    pub fn acquire(&self) {
        let mut inner = self.inner.lock();
        inner.count += 1;
        inner.stale_deadline = None;
    }

    /// Drop a reference. A positive-to-zero transition triggers
    /// reclamation per the configured mode.
    pub fn release(&self) {
        let callbacks = {
            let mut inner = self.inner.lock();
            inner.count = inner.count.saturating_sub(1);
            if inner.count > 0 {
                return;
            }
            match self.mode {
                StalenessMode::Immediate => std::mem::take(&mut inner.callbacks),
                StalenessMode::Delayed(delay) => {
                    inner.stale_deadline = Some(self.clock.now() + delay.as_nanos() as u64);
                    return;
                },
            }
        };
        for callback in callbacks {
            callback();
        }
    }

    /// Fire delayed callbacks whose deadline has passed. Returns true if
    /// the instrument was reclaimed.
    pub fn reap(&self, now: u64) -> bool {
        let callbacks = {
            let mut inner = self.inner.lock();
            match inner.stale_deadline {
                Some(deadline) if inner.count == 0 && deadline <= now => {
                    inner.stale_deadline = None;
                    std::mem::take(&mut inner.callbacks)
                },
                _ => return false,
            }
        };
        let reclaimed = !callbacks.is_empty();
        for callback in callbacks {
            callback();
        }
        reclaimed
    }

    /// Current reference count.
    pub fn count(&self) -> usize {
        self.inner.lock().count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fired_counter(handler: &StalenessHandler) -> Arc<AtomicUsize> {
        let fired = Arc::new(AtomicUsize::new(0));
        let probe = Arc::clone(&fired);
        handler.on_stale(move || {
            probe.fetch_add(1, Ordering::SeqCst);
        });
        fired
    }

    #[test]
    fn test_immediate_fires_on_zero() {
        let clock = Arc::new(ManualClock::default());
        let handler = StalenessHandler::new(StalenessMode::Immediate, clock);
        let fired = fired_counter(&handler);

        handler.acquire();
        handler.acquire();
        handler.release();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        handler.release();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callbacks_fire_exactly_once() {
        let clock = Arc::new(ManualClock::default());
        let handler = StalenessHandler::new(StalenessMode::Immediate, clock);
        let fired = fired_counter(&handler);

        handler.acquire();
        handler.release();
        // A later churn cycle finds no callbacks left.
        handler.acquire();
        handler.release();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delayed_waits_for_deadline() {
        let clock = Arc::new(ManualClock::starting_at(1_000));
        let handler =
            StalenessHandler::new(StalenessMode::Delayed(Duration::from_nanos(500)), clock.clone());
        let fired = fired_counter(&handler);

        handler.acquire();
        handler.release();
        assert!(!handler.reap(clock.now()));
        clock.advance(500);
        assert!(handler.reap(clock.now()));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reacquire_cancels_pending_staleness() {
        let clock = Arc::new(ManualClock::starting_at(1_000));
        let handler =
            StalenessHandler::new(StalenessMode::Delayed(Duration::from_nanos(500)), clock.clone());
        let fired = fired_counter(&handler);

        handler.acquire();
        handler.release();
        handler.acquire();
        clock.advance(10_000);
        assert!(!handler.reap(clock.now()));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
