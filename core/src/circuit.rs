//! Circuit breaker implementation using state machines
//!
//! The breaker owns one shared context (a connection, a session, ...) and
//! three timing loops: the window ticker, the context probe, and the
//! per-command timeout.
//!
//! ```text
//!            build ok                 first run
//!   Open ─────────────> HalfOpen ─────────────> HalfOpenVerify
//!    ▲ ▲                                          │        │
//!    │ └──────────── verification failed ─────────┘        │ verified
//!    │                                                     ▼
//!    └────────────────── breach ──────────────────────── Closed
//! ```
//!
//! All transitions happen under a single lock and yield a list of effects
//! (notifications, context release, probe scheduling) that run after the
//! lock is dropped. The lock is never held across an `.await`.

use crate::{
    Outcome,
    callbacks::Callbacks,
    errors::{BoxError, CircuitError},
    fallback::{Fallback, FallbackContext},
    window::{WindowCounters, WindowSnapshot},
};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use state_machines::state_machine;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Length of one statistics window
    pub window: Duration,

    /// Time a command may run before it counts as timed out
    pub timeout: Duration,

    /// Error percentage (0-100) that must be exceeded to open the circuit
    pub error_threshold: f64,

    /// Executed calls per window that must be exceeded before a breach can trip
    pub volume_threshold: u64,

    /// Delay between context probes while open, unless a probe schedule
    /// function is supplied
    pub next_try: Duration,

    /// Jitter factor for the probe delay (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: delay * (1 - jitter + rand * jitter)
    pub jitter_factor: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(10_000),
            timeout: Duration::from_millis(300),
            error_threshold: 50.0,
            volume_threshold: 5,
            next_try: Duration::from_millis(5_000),
            jitter_factor: 0.0,
        }
    }
}

/// Produces a fresh shared context
pub type ContextBuilderFn<C> = Arc<dyn Fn() -> BoxFuture<'static, Result<C, BoxError>> + Send + Sync>;

/// Releases a shared context
pub type ContextCleanerFn<C> =
    Arc<dyn Fn(Arc<C>) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Returns the delay until the next context probe
pub type NextTryFn = Arc<dyn Fn() -> Duration + Send + Sync>;

pub(crate) fn noop_cleaner<C: Send + Sync + 'static>() -> ContextCleanerFn<C> {
    Arc::new(|_context: Arc<C>| -> BoxFuture<'static, Result<(), BoxError>> {
        Box::pin(async { Ok::<(), BoxError>(()) })
    })
}

/// External hooks around the shared context
pub(crate) struct Hooks<C> {
    pub builder: ContextBuilderFn<C>,
    pub cleaner: ContextCleanerFn<C>,
    pub next_try: Option<NextTryFn>,
}

/// Circuit breaker context - shared data across all states
#[derive(Clone)]
pub struct CircuitContext {
    pub name: String,
    pub config: Config,
    pub window: Arc<WindowCounters>,
}

impl Default for CircuitContext {
    fn default() -> Self {
        Self {
            name: String::new(),
            config: Config::default(),
            window: Arc::new(WindowCounters::new()),
        }
    }
}

impl std::fmt::Debug for CircuitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitContext")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("window", &self.window.snapshot())
            .finish()
    }
}

// Define the circuit breaker state machine with dynamic mode
state_machine! {
    name: Circuit,
    context: CircuitContext,
    dynamic: true,

    initial: Open,
    states: [
        Open,
        HalfOpen,
        HalfOpenVerify,
        Closed,
    ],
    events {
        context_built {
            transition: { from: Open, to: HalfOpen }
        }
        begin_verify {
            transition: { from: HalfOpen, to: HalfOpenVerify }
        }
        verified {
            transition: { from: HalfOpenVerify, to: Closed }
        }
        reject {
            transition: { from: HalfOpenVerify, to: Open }
        }
        trip {
            guards: [breached],
            transition: { from: Closed, to: Open }
        }
    }
}

impl Circuit<Closed> {
    /// Check whether the current window exceeds both thresholds
    fn breached(&self, ctx: &CircuitContext) -> bool {
        ctx.window
            .snapshot()
            .breaches(ctx.config.volume_threshold, ctx.config.error_threshold)
    }
}

/// Side effects produced by a transition, applied outside the lock
enum Effect<C> {
    StateChanged(crate::State),
    ContextBuilt,
    ContextBuildFailed(String),
    Release(Arc<C>),
    ScheduleProbe,
}

/// What dispatch decided for a single `run` call
enum Admission<C> {
    Execute { context: Arc<C>, verifying: bool },
    Reject(crate::State),
}

/// Mutable breaker state, guarded by one lock
struct Core<C> {
    machine: DynamicCircuit,
    context: Option<Arc<C>>,
    trying: bool,
    ticker: Option<JoinHandle<()>>,
    probe: Option<JoinHandle<()>>,
}

impl<C> Core<C> {
    fn state(&self) -> crate::State {
        let name = self.machine.current_state();
        match crate::State::from_name(name) {
            Some(state) => state,
            None => {
                debug_assert!(false, "state machine reported unknown state {name}");
                tracing::error!(state = name, "unknown circuit state, treating as open");
                crate::State::Open
            }
        }
    }
}

/// Reopens the circuit if a verification command never settles
///
/// Armed when `run` starts a verification; the future being dropped or the
/// command panicking leaves it armed.
struct VerificationGuard<'a, C: Send + Sync + 'static> {
    inner: &'a Arc<Inner<C>>,
    armed: bool,
}

impl<C: Send + Sync + 'static> Drop for VerificationGuard<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.abandon_verification();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

struct Inner<C> {
    name: String,
    config: Config,
    window: Arc<WindowCounters>,
    hooks: Hooks<C>,
    callbacks: Callbacks,
    runtime: Handle,
    destroyed: AtomicBool,
    core: Mutex<Core<C>>,
}

impl<C: Send + Sync + 'static> Inner<C> {
    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Run a notification unless listeners have been detached
    fn notify(&self, f: impl FnOnce(&Callbacks)) {
        if !self.is_destroyed() {
            f(&self.callbacks);
        }
    }

    fn apply(self: &Arc<Self>, effects: Vec<Effect<C>>) {
        for effect in effects {
            match effect {
                Effect::StateChanged(state) => {
                    self.notify(|cb| cb.trigger_state_change(&self.name, state));
                }
                Effect::ContextBuilt => {
                    self.notify(|cb| cb.trigger_context_built(&self.name));
                }
                Effect::ContextBuildFailed(error) => {
                    self.notify(|cb| cb.trigger_context_build_failed(&self.name, &error));
                }
                Effect::Release(context) => self.spawn_cleanup(context),
                Effect::ScheduleProbe => self.schedule_probe(),
            }
        }
    }

    /// Bookkeeping for every entry into Open: drop the context, zero the
    /// window, start probing
    fn enter_open(&self, core: &mut Core<C>, effects: &mut Vec<Effect<C>>) {
        self.window.reset();
        if let Some(context) = core.context.take() {
            effects.push(Effect::Release(context));
        }
        effects.push(Effect::StateChanged(crate::State::Open));
        effects.push(Effect::ScheduleProbe);
    }

    /// Trip the circuit if the window is in breach. Caller holds the lock.
    fn evaluate_breach(&self, core: &mut Core<C>, effects: &mut Vec<Effect<C>>) -> bool {
        let snapshot = self.window.snapshot();
        if core.machine.handle(CircuitEvent::Trip).is_err() {
            return false;
        }
        tracing::warn!(
            circuit = %self.name,
            errors = snapshot.error_count(),
            total = snapshot.total_count(),
            "error threshold breached, opening circuit"
        );
        self.enter_open(core, effects);
        true
    }

    fn admit(&self) -> (Admission<C>, Vec<Effect<C>>) {
        let mut effects = Vec::new();
        let mut core = self.core.lock();

        if self.is_destroyed() {
            return (Admission::Reject(core.state()), effects);
        }

        let state = core.state();
        let admission = match (state, core.context.clone()) {
            (crate::State::Closed, Some(context)) => Admission::Execute {
                context,
                verifying: false,
            },
            (crate::State::HalfOpen, Some(context)) => {
                if core.machine.handle(CircuitEvent::BeginVerify).is_ok() {
                    tracing::debug!(circuit = %self.name, "running verification command");
                    effects.push(Effect::StateChanged(crate::State::HalfOpenVerify));
                    Admission::Execute {
                        context,
                        verifying: true,
                    }
                } else {
                    Admission::Reject(state)
                }
            }
            _ => {
                self.window.record(Outcome::ShortCircuit);
                Admission::Reject(state)
            }
        };

        (admission, effects)
    }

    /// Record a command outcome and drive the transitions it causes
    fn settle(self: &Arc<Self>, outcome: Outcome, verifying: bool) -> crate::State {
        let mut effects = Vec::new();
        let state = {
            let mut core = self.core.lock();
            self.window.record(outcome);

            if !self.is_destroyed() {
                if verifying {
                    if outcome == Outcome::Success {
                        if core.machine.handle(CircuitEvent::Verified).is_ok() {
                            tracing::info!(circuit = %self.name, "verification succeeded, circuit closed");
                            effects.push(Effect::StateChanged(crate::State::Closed));
                        }
                    } else if core.machine.handle(CircuitEvent::Reject).is_ok() {
                        tracing::warn!(
                            circuit = %self.name,
                            outcome = ?outcome,
                            "verification failed, reopening circuit"
                        );
                        self.enter_open(&mut core, &mut effects);
                    }
                } else if outcome != Outcome::Success && core.state() == crate::State::Closed {
                    self.evaluate_breach(&mut core, &mut effects);
                }
            }

            core.state()
        };
        self.apply(effects);
        state
    }

    /// Verification ended without an outcome (cancelled or panicked)
    fn abandon_verification(self: &Arc<Self>) {
        let mut effects = Vec::new();
        {
            let mut core = self.core.lock();
            if self.is_destroyed() {
                return;
            }
            if core.machine.handle(CircuitEvent::Reject).is_ok() {
                tracing::warn!(circuit = %self.name, "verification abandoned, reopening circuit");
                self.enter_open(&mut core, &mut effects);
            }
        }
        self.apply(effects);
    }

    fn on_window_tick(self: &Arc<Self>) {
        let mut effects = Vec::new();
        {
            let mut core = self.core.lock();
            if self.is_destroyed() {
                return;
            }
            if core.state() == crate::State::Closed {
                self.evaluate_breach(&mut core, &mut effects);
            }
            let previous = self.window.reset();
            tracing::trace!(circuit = %self.name, window = ?previous, "window reset");
        }
        self.apply(effects);
    }

    /// Single-flight context build, only while open
    async fn try_build_context(self: &Arc<Self>) {
        {
            let mut core = self.core.lock();
            if self.is_destroyed() || core.trying || core.state() != crate::State::Open {
                return;
            }
            core.trying = true;
        }

        tracing::debug!(circuit = %self.name, "building context");
        let building = AssertUnwindSafe(async { (self.hooks.builder)().await });
        let result = match building.catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(BoxError::from(format!(
                "context builder panicked: {}",
                panic_message(&*panic)
            ))),
        };

        let mut effects = Vec::new();
        {
            let mut core = self.core.lock();
            core.trying = false;
            match result {
                Ok(context) => {
                    let context = Arc::new(context);
                    if self.is_destroyed() {
                        effects.push(Effect::Release(context));
                    } else if core.machine.handle(CircuitEvent::ContextBuilt).is_ok() {
                        core.context = Some(context);
                        tracing::info!(circuit = %self.name, "context built, circuit half-open");
                        effects.push(Effect::ContextBuilt);
                        effects.push(Effect::StateChanged(crate::State::HalfOpen));
                    } else {
                        effects.push(Effect::Release(context));
                    }
                }
                Err(error) => {
                    tracing::warn!(circuit = %self.name, error = %error, "context build failed");
                    effects.push(Effect::ContextBuildFailed(error.to_string()));
                }
            }
        }
        self.apply(effects);
    }

    fn next_try_delay(&self) -> Duration {
        let base = match &self.hooks.next_try {
            Some(next_try) => next_try(),
            None => self.config.next_try,
        };

        // Apply jitter using chrono-machines if jitter_factor > 0
        if self.config.jitter_factor > 0.0 {
            let base_ms = base.as_millis() as u64;
            let policy = chrono_machines::Policy {
                max_attempts: 1,
                base_delay_ms: base_ms,
                multiplier: 1.0,
                max_delay_ms: base_ms,
            };
            let delay_ms = policy.calculate_delay(1, self.config.jitter_factor);
            Duration::from_secs_f64((delay_ms as f64) / 1000.0)
        } else {
            base
        }
    }

    fn probe_wanted(&self, core: &Core<C>) -> bool {
        !self.is_destroyed() && core.probe.is_none() && core.state() == crate::State::Open
    }

    /// Arm the probe timer. No-op unless open with no probe pending.
    fn schedule_probe(self: &Arc<Self>) {
        if !self.probe_wanted(&self.core.lock()) {
            return;
        }

        // user schedule runs outside the lock
        let delay = self.next_try_delay();

        let mut core = self.core.lock();
        if !self.probe_wanted(&core) {
            return;
        }
        tracing::debug!(
            circuit = %self.name,
            delay_ms = delay.as_millis() as u64,
            "scheduling context probe"
        );

        let weak = Arc::downgrade(self);
        core.probe = Some(self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.core.lock().probe = None;
            inner.try_build_context().await;
            inner.schedule_probe();
        }));
    }

    fn start_ticker(self: &Arc<Self>) {
        let period = self.config.window;
        let weak = Arc::downgrade(self);
        let ticker = self.runtime.spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.on_window_tick();
            }
        });
        self.core.lock().ticker = Some(ticker);
    }

    /// Hand a context to the cleaner without waiting for it
    fn spawn_cleanup(self: &Arc<Self>, context: Arc<C>) {
        let cleaner = Arc::clone(&self.hooks.cleaner);
        let name = self.name.clone();
        let weak: Weak<Self> = Arc::downgrade(self);
        self.runtime.spawn(async move {
            let result = cleaner(context).await;
            let inner = weak.upgrade();
            match result {
                Ok(()) => {
                    tracing::debug!(circuit = %name, "context cleaned");
                    if let Some(inner) = inner {
                        inner.notify(|cb| cb.trigger_context_cleaned(&name));
                    }
                }
                Err(error) => {
                    tracing::warn!(circuit = %name, error = %error, "context cleanup failed");
                    if let Some(inner) = inner {
                        inner.notify(|cb| cb.trigger_context_clean_failed(&name, &error.to_string()));
                    }
                }
            }
        });
    }

    async fn fall_back<T, E>(
        &self,
        state: crate::State,
        error: CircuitError<E>,
        fallback: Fallback<T, E>,
    ) -> Result<T, CircuitError<E>>
    where
        E: std::fmt::Display,
    {
        if !fallback.is_none() {
            let ctx = FallbackContext {
                circuit_name: self.name.clone(),
                state,
                error_kind: error.kind(),
                message: error.to_string(),
            };
            tracing::debug!(
                circuit = %self.name,
                kind = ?ctx.error_kind,
                error = %ctx.message,
                "resolving with fallback"
            );
            self.notify(|cb| cb.trigger_fallback(&ctx));
        }
        fallback.resolve(error).await
    }
}

impl<C> Drop for Inner<C> {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        if let Some(ticker) = core.ticker.take() {
            ticker.abort();
        }
        if let Some(probe) = core.probe.take() {
            probe.abort();
        }
        if let Some(context) = core.context.take() {
            let cleanup = (self.hooks.cleaner)(context);
            drop(self.runtime.spawn(cleanup));
        }
    }
}

/// Circuit breaker public API
///
/// Cloning yields another handle to the same breaker.
pub struct CircuitBreaker<C = ()> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl CircuitBreaker<()> {
    /// Create a new circuit breaker builder
    pub fn builder(name: impl Into<String>) -> crate::builder::CircuitBuilder<()> {
        crate::builder::CircuitBuilder::new(name)
    }
}

impl<C: Send + Sync + 'static> CircuitBreaker<C> {
    /// Create a circuit breaker from its parts (used by builder)
    ///
    /// Starts open, kicks off the first context build and the window ticker.
    pub(crate) fn from_parts(
        name: String,
        config: Config,
        hooks: Hooks<C>,
        callbacks: Callbacks,
        runtime: Handle,
    ) -> Self {
        let window = Arc::new(WindowCounters::new());
        let context = CircuitContext {
            name: name.clone(),
            config: config.clone(),
            window: Arc::clone(&window),
        };

        let inner = Arc::new(Inner {
            name,
            config,
            window,
            hooks,
            callbacks,
            runtime,
            destroyed: AtomicBool::new(false),
            core: Mutex::new(Core {
                machine: DynamicCircuit::new(context),
                context: None,
                trying: false,
                ticker: None,
                probe: None,
            }),
        });

        inner.start_ticker();

        let weak = Arc::downgrade(&inner);
        inner.runtime.spawn(async move {
            if let Some(inner) = weak.upgrade() {
                inner.try_build_context().await;
                inner.schedule_probe();
            }
        });

        tracing::debug!(circuit = %inner.name, "circuit created");
        Self { inner }
    }

    /// Execute a command with circuit breaker protection
    ///
    /// The command receives the shared context and must not keep it past
    /// the call. When the circuit is not closed, the command times out, or
    /// it fails, the call resolves through `fallback`.
    ///
    /// Dropping the returned future or panicking inside a verification
    /// command counts as a failed verification: the circuit reopens.
    pub async fn run<F, Fut, T, E>(
        &self,
        command: F,
        fallback: Fallback<T, E>,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce(Arc<C>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let inner = &self.inner;
        let (admission, effects) = inner.admit();
        inner.apply(effects);

        let (context, verifying) = match admission {
            Admission::Execute { context, verifying } => (context, verifying),
            Admission::Reject(state) => {
                tracing::debug!(circuit = %inner.name, state = %state, "short-circuiting call");
                let error = CircuitError::Open {
                    circuit: inner.name.clone(),
                };
                return inner.fall_back(state, error, fallback).await;
            }
        };

        let mut verification = VerificationGuard {
            inner,
            armed: verifying,
        };
        let (result, outcome) = match tokio::time::timeout(inner.config.timeout, command(context)).await {
            Ok(Ok(value)) => (Ok(value), Outcome::Success),
            Ok(Err(error)) => (Err(CircuitError::Execution(error)), Outcome::Failure),
            Err(_elapsed) => {
                tracing::debug!(
                    circuit = %inner.name,
                    timeout_ms = inner.config.timeout.as_millis() as u64,
                    "command timed out"
                );
                let error = CircuitError::Timeout {
                    circuit: inner.name.clone(),
                    timeout: inner.config.timeout,
                };
                (Err(error), Outcome::Timeout)
            }
        };

        verification.armed = false;
        let state = inner.settle(outcome, verifying);
        match result {
            Ok(value) => Ok(value),
            Err(error) => inner.fall_back(state, error, fallback).await,
        }
    }

    /// Stop both timers, detach listeners and release the context
    ///
    /// Cleanup is started but not awaited. Calling this more than once is
    /// a no-op.
    pub fn destroy(&self) {
        let context = {
            let mut core = self.inner.core.lock();
            if self.inner.destroyed.swap(true, Ordering::SeqCst) {
                return;
            }
            if let Some(ticker) = core.ticker.take() {
                ticker.abort();
            }
            if let Some(probe) = core.probe.take() {
                probe.abort();
            }
            core.context.take()
        };

        tracing::info!(circuit = %self.inner.name, "circuit destroyed");
        if let Some(context) = context {
            self.inner.spawn_cleanup(context);
        }
    }

    /// Circuit name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Configuration the circuit was built with
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Current state
    pub fn state(&self) -> crate::State {
        self.inner.core.lock().state()
    }

    /// Get current state name
    pub fn state_name(&self) -> &'static str {
        self.state().as_str()
    }

    /// Check if circuit is open
    pub fn is_open(&self) -> bool {
        self.state() == crate::State::Open
    }

    /// Check if circuit is closed
    pub fn is_closed(&self) -> bool {
        self.state() == crate::State::Closed
    }

    /// Whether a shared context is currently held
    pub fn has_context(&self) -> bool {
        self.inner.core.lock().context.is_some()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }

    /// Counters for the current window
    pub fn stats(&self) -> WindowSnapshot {
        self.inner.window.snapshot()
    }
}

impl<C> std::fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .field("destroyed", &self.inner.destroyed.load(Ordering::SeqCst))
            .finish()
    }
}
