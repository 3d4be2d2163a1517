//! Fixed-window outcome counters for circuit breaker statistics
//!
//! Counters accumulate for one window and are zeroed at each boundary.
//! This is a fixed window, not a sliding one: a breach is judged against
//! everything recorded since the last reset.

use crate::Outcome;
use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome counters for the current window
#[derive(Debug, Default)]
pub struct WindowCounters {
    timeouts: AtomicU64,
    failures: AtomicU64,
    successes: AtomicU64,
    short_circuits: AtomicU64,
}

impl WindowCounters {
    /// Create a zeroed counter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one outcome
    pub fn record(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Success => &self.successes,
            Outcome::Failure => &self.failures,
            Outcome::Timeout => &self.timeouts,
            Outcome::ShortCircuit => &self.short_circuits,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Read all counters at once
    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            timeouts: self.timeouts.load(Ordering::SeqCst),
            failures: self.failures.load(Ordering::SeqCst),
            successes: self.successes.load(Ordering::SeqCst),
            short_circuits: self.short_circuits.load(Ordering::SeqCst),
        }
    }

    /// Zero every counter and return what they held
    pub fn reset(&self) -> WindowSnapshot {
        WindowSnapshot {
            timeouts: self.timeouts.swap(0, Ordering::SeqCst),
            failures: self.failures.swap(0, Ordering::SeqCst),
            successes: self.successes.swap(0, Ordering::SeqCst),
            short_circuits: self.short_circuits.swap(0, Ordering::SeqCst),
        }
    }
}

/// Point-in-time copy of the window counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub timeouts: u64,
    pub failures: u64,
    pub successes: u64,
    pub short_circuits: u64,
}

impl WindowSnapshot {
    /// Timeouts plus failures
    pub fn error_count(&self) -> u64 {
        self.timeouts + self.failures
    }

    /// Executed calls; short-circuits are not part of the volume
    pub fn total_count(&self) -> u64 {
        self.error_count() + self.successes
    }

    /// Error percentage over executed calls (0.0 when nothing ran)
    pub fn error_percentage(&self) -> f64 {
        self.error_count() as f64 / self.total_count().max(1) as f64 * 100.0
    }

    /// Whether this window breaches the given thresholds
    ///
    /// Both comparisons are strict: the volume must exceed
    /// `volume_threshold` and the error rate must exceed `error_threshold`.
    pub fn breaches(&self, volume_threshold: u64, error_threshold: f64) -> bool {
        self.total_count() > volume_threshold && self.error_percentage() > error_threshold
    }
}
