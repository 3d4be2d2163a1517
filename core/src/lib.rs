//! Context Breaker - async circuit breaker around a shared context
//!
//! This crate provides a circuit breaker that owns one shared context
//! (a connection, a client session, ...) and passes it to every command:
//! - State machine for the breaker lifecycle (Open → HalfOpen → HalfOpenVerify → Closed)
//! - Fixed-window outcome counters with volume and error-rate thresholds
//! - Per-command timeouts
//! - Periodic context probes while open, with optional jitter
//! - Fallbacks for rejected, timed out, and failed calls
//!
//! A breaker starts open and becomes usable once its context builder
//! succeeds. The first call after that verifies the context; success closes
//! the circuit, failure releases the context and reopens it.
//!
//! # Example
//!
//! ```rust
//! use context_breaker::{CircuitBreaker, Fallback};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let circuit = CircuitBreaker::builder("inventory")
//!     .context_builder(|| async { Ok::<_, std::io::Error>("connection".to_string()) })
//!     .timeout(Duration::from_millis(200))
//!     .volume_threshold(10)
//!     .error_threshold(50.0)
//!     .on_state_change(|name, state| println!("Circuit {} is now {}", name, state))
//!     .build();
//!
//! // Execute with circuit protection
//! let stock = circuit
//!     .run(
//!         |conn| async move { Ok::<_, std::io::Error>(format!("stock via {}", conn)) },
//!         Fallback::value("cached stock".to_string()),
//!     )
//!     .await;
//! assert!(stock.is_ok());
//!
//! circuit.destroy();
//! # }
//! ```

pub mod builder;
pub mod callbacks;
pub mod circuit;
pub mod errors;
pub mod fallback;
pub mod window;

pub use builder::CircuitBuilder;
pub use callbacks::Callbacks;
pub use circuit::{CircuitBreaker, Config, ContextBuilderFn, ContextCleanerFn, NextTryFn};
pub use errors::{BoxError, CircuitError, ErrorKind};
pub use fallback::{AsyncFallbackFn, Fallback, FallbackContext, FallbackFn};
pub use window::{WindowCounters, WindowSnapshot};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// No usable context; calls short-circuit while probes rebuild it
    Open,
    /// Context built, waiting for the first call to verify it
    HalfOpen,
    /// Verification call in flight; other calls short-circuit
    HalfOpenVerify,
    /// Normal operation
    Closed,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Open => "Open",
            State::HalfOpen => "HalfOpen",
            State::HalfOpenVerify => "HalfOpenVerify",
            State::Closed => "Closed",
        }
    }

    /// Parse a state machine state name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Open" => Some(State::Open),
            "HalfOpen" => Some(State::HalfOpen),
            "HalfOpenVerify" => Some(State::HalfOpenVerify),
            "Closed" => Some(State::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single call, as counted by the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    Timeout,
    ShortCircuit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names_round_trip() {
        for state in [
            State::Open,
            State::HalfOpen,
            State::HalfOpenVerify,
            State::Closed,
        ] {
            assert_eq!(State::from_name(state.as_str()), Some(state));
        }
        assert_eq!(State::from_name("Unknown"), None);
    }
}
