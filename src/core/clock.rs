//! Monotonic nanosecond timestamp source.
//!
//! All pipeline timestamps are unix nanoseconds taken from a [`Clock`].
//! The system clock anchors a monotonic `Instant` against wall time once,
//! so timestamps never go backwards even if the wall clock is adjusted.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Source of unix-epoch nanosecond timestamps.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current unix timestamp in nanoseconds.
    fn now(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> u64 {
        (**self).now()
    }
}

/// Wall-anchored monotonic clock.
#[derive(Debug)]
pub struct SystemClock {
    anchor: Instant,
    epoch_nanos: u64,
}

impl SystemClock {
    /// Create a clock anchored at the current wall time.
    pub fn new() -> Self {
        let epoch_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self {
            anchor: Instant::now(),
            epoch_nanos,
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        self.epoch_nanos + self.anchor.elapsed().as_nanos() as u64
    }
}

/// Manually advanced clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    /// Create a manual clock starting at the given timestamp.
    pub fn starting_at(nanos: u64) -> Self {
        Self {
            nanos: AtomicU64::new(nanos),
        }
    }

    /// Set the absolute timestamp.
    pub fn set(&self, nanos: u64) {
        self.nanos.store(nanos, Ordering::SeqCst);
    }

    /// Advance the clock by the given number of nanoseconds.
    pub fn advance(&self, nanos: u64) {
        self.nanos.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }
}
