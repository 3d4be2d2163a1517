//! Builder API for ergonomic circuit breaker configuration

use crate::{
    State,
    callbacks::Callbacks,
    circuit::{
        CircuitBreaker, Config, ContextBuilderFn, ContextCleanerFn, Hooks, NextTryFn, noop_cleaner,
    },
    errors::BoxError,
    fallback::FallbackContext,
};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating circuit breakers with fluent API
///
/// `C` is the type of the shared context. A fresh builder has a no-op
/// context builder producing `()`; [`CircuitBuilder::context_builder`]
/// replaces it and changes `C`.
pub struct CircuitBuilder<C = ()> {
    name: String,
    config: Config,
    context_builder: ContextBuilderFn<C>,
    context_cleaner: Option<ContextCleanerFn<C>>,
    next_try: Option<NextTryFn>,
    callbacks: Callbacks,
}

impl CircuitBuilder<()> {
    /// Create a new builder for a circuit with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Config::default(),
            context_builder: Arc::new(|| -> BoxFuture<'static, Result<(), BoxError>> {
                Box::pin(async { Ok::<(), BoxError>(()) })
            }),
            context_cleaner: None,
            next_try: None,
            callbacks: Callbacks::new(),
        }
    }
}

impl<C: Send + Sync + 'static> CircuitBuilder<C> {
    /// Set the statistics window length
    pub fn window(mut self, window: Duration) -> Self {
        self.config.window = window.max(Duration::from_millis(1));
        self
    }

    /// Set the statistics window length in milliseconds
    pub fn window_ms(self, ms: u64) -> Self {
        self.window(Duration::from_millis(ms))
    }

    /// Set the per-command timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the per-command timeout in milliseconds
    pub fn timeout_ms(self, ms: u64) -> Self {
        self.timeout(Duration::from_millis(ms))
    }

    /// Set the error percentage (0-100) that must be exceeded to open the circuit
    pub fn error_threshold(mut self, percentage: f64) -> Self {
        self.config.error_threshold = percentage.clamp(0.0, 100.0);
        self
    }

    /// Set the number of calls per window that must be exceeded before the
    /// error percentage is considered
    pub fn volume_threshold(mut self, calls: u64) -> Self {
        self.config.volume_threshold = calls;
        self
    }

    /// Set a constant delay between context probes
    pub fn next_try(mut self, delay: Duration) -> Self {
        self.config.next_try = delay;
        self.next_try = None;
        self
    }

    /// Set a constant delay between context probes in milliseconds
    pub fn next_try_ms(self, ms: u64) -> Self {
        self.next_try(Duration::from_millis(ms))
    }

    /// Compute the delay before each context probe
    ///
    /// Called again for every probe, so it can implement backoff.
    pub fn next_try_timeout<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Duration + Send + Sync + 'static,
    {
        self.next_try = Some(Arc::new(f));
        self
    }

    /// Set the jitter factor for probe delays (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: delay * (1 - jitter + rand * jitter)
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.config.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Set the function that builds the shared context
    ///
    /// Replaces the context type, so any cleaner set before this call is
    /// dropped: set the cleaner afterwards.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use context_breaker::CircuitBreaker;
    /// use std::sync::Arc;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let circuit = CircuitBreaker::builder("db")
    ///     .context_builder(|| async { Ok::<_, std::io::Error>(vec![1u8, 2, 3]) })
    ///     .context_cleaner(|buffer: Arc<Vec<u8>>| async move {
    ///         println!("releasing {} bytes", buffer.len());
    ///         Ok::<_, std::io::Error>(())
    ///     })
    ///     .build();
    /// # circuit.destroy();
    /// # }
    /// ```
    pub fn context_builder<D, F, Fut, Er>(self, f: F) -> CircuitBuilder<D>
    where
        D: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<D, Er>> + Send + 'static,
        Er: Into<BoxError>,
    {
        let context_builder: ContextBuilderFn<D> =
            Arc::new(move || -> BoxFuture<'static, Result<D, BoxError>> {
                let building = f();
                Box::pin(async move { building.await.map_err(Into::into) })
            });

        CircuitBuilder {
            name: self.name,
            config: self.config,
            context_builder,
            context_cleaner: None,
            next_try: self.next_try,
            callbacks: self.callbacks,
        }
    }

    /// Set the function that releases the shared context
    ///
    /// Cleanup runs in the background; its outcome is only reported
    /// through the `on_context_cleaned` / `on_context_clean_failed`
    /// callbacks.
    pub fn context_cleaner<F, Fut, Er>(mut self, f: F) -> Self
    where
        F: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Er>> + Send + 'static,
        Er: Into<BoxError>,
    {
        self.context_cleaner = Some(Arc::new(
            move |context: Arc<C>| -> BoxFuture<'static, Result<(), BoxError>> {
                let cleaning = f(context);
                Box::pin(async move { cleaning.await.map_err(Into::into) })
            },
        ));
        self
    }

    /// Set callback for when a context has been built
    pub fn on_context_built<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_context_built = Some(Arc::new(f));
        self
    }

    /// Set callback for when a context build fails (circuit name, error)
    pub fn on_context_build_failed<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.callbacks.on_context_build_failed = Some(Arc::new(f));
        self
    }

    /// Set callback for when a context has been released
    pub fn on_context_cleaned<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_context_cleaned = Some(Arc::new(f));
        self
    }

    /// Set callback for when releasing a context fails (circuit name, error)
    pub fn on_context_clean_failed<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.callbacks.on_context_clean_failed = Some(Arc::new(f));
        self
    }

    /// Set callback for every state transition
    pub fn on_state_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, State) + Send + Sync + 'static,
    {
        self.callbacks.on_state_change = Some(Arc::new(f));
        self
    }

    /// Set callback for when a call resolves through its fallback
    pub fn on_fallback<F>(mut self, f: F) -> Self
    where
        F: Fn(&FallbackContext) + Send + Sync + 'static,
    {
        self.callbacks.on_fallback = Some(Arc::new(f));
        self
    }

    /// Build the circuit breaker
    ///
    /// The breaker starts open and immediately begins building its context
    /// in the background.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn build(self) -> CircuitBreaker<C> {
        let hooks = Hooks {
            builder: self.context_builder,
            cleaner: self.context_cleaner.unwrap_or_else(noop_cleaner),
            next_try: self.next_try,
        };

        CircuitBreaker::from_parts(
            self.name,
            self.config,
            hooks,
            self.callbacks,
            tokio::runtime::Handle::current(),
        )
    }
}
