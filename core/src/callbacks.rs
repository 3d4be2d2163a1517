//! Callback system for circuit breaker notifications
//!
//! Every callback is optional and fire-and-forget. The breaker never
//! waits on them and nothing it does depends on them being set.

use crate::{State, fallback::FallbackContext};
use std::sync::Arc;

pub type NameCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;
pub type StateCallback = Arc<dyn Fn(&str, State) + Send + Sync>;
pub type FallbackCallback = Arc<dyn Fn(&FallbackContext) + Send + Sync>;

/// Callbacks for circuit breaker events
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_context_built: Option<NameCallback>,
    pub on_context_build_failed: Option<ErrorCallback>,
    pub on_context_cleaned: Option<NameCallback>,
    pub on_context_clean_failed: Option<ErrorCallback>,
    pub on_state_change: Option<StateCallback>,
    pub on_fallback: Option<FallbackCallback>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger_context_built(&self, circuit: &str) {
        if let Some(ref callback) = self.on_context_built {
            callback(circuit);
        }
    }

    pub fn trigger_context_build_failed(&self, circuit: &str, error: &str) {
        if let Some(ref callback) = self.on_context_build_failed {
            callback(circuit, error);
        }
    }

    pub fn trigger_context_cleaned(&self, circuit: &str) {
        if let Some(ref callback) = self.on_context_cleaned {
            callback(circuit);
        }
    }

    pub fn trigger_context_clean_failed(&self, circuit: &str, error: &str) {
        if let Some(ref callback) = self.on_context_clean_failed {
            callback(circuit, error);
        }
    }

    pub fn trigger_state_change(&self, circuit: &str, state: State) {
        if let Some(ref callback) = self.on_state_change {
            callback(circuit, state);
        }
    }

    pub fn trigger_fallback(&self, ctx: &FallbackContext) {
        if let Some(ref callback) = self.on_fallback {
            callback(ctx);
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_context_built", &self.on_context_built.is_some())
            .field(
                "on_context_build_failed",
                &self.on_context_build_failed.is_some(),
            )
            .field("on_context_cleaned", &self.on_context_cleaned.is_some())
            .field(
                "on_context_clean_failed",
                &self.on_context_clean_failed.is_some(),
            )
            .field("on_state_change", &self.on_state_change.is_some())
            .field("on_fallback", &self.on_fallback.is_some())
            .finish()
    }
}
