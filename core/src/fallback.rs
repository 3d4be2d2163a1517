//! Fallback resolution for rejected, timed out, and failed calls

use crate::{
    State,
    errors::{CircuitError, ErrorKind},
};
use futures::future::BoxFuture;
use std::future::Future;

/// Type alias for fallback function
pub type FallbackFn<T, E> = Box<dyn FnOnce(CircuitError<E>) -> Result<T, E> + Send>;

/// Fallback function that resolves asynchronously
pub type AsyncFallbackFn<T, E> =
    Box<dyn FnOnce(CircuitError<E>) -> BoxFuture<'static, Result<T, E>> + Send>;

/// What a call resolves to when it does not produce its own value
///
/// Every error kind (open circuit, timeout, command failure) goes through
/// the same fallback. Only [`Fallback::Call`] and [`Fallback::CallAsync`]
/// can tell them apart, by inspecting the error they receive.
pub enum Fallback<T, E> {
    /// Propagate the triggering error to the caller
    None,
    /// Resolve with a fixed value
    Value(T),
    /// Compute the result from the triggering error
    Call(FallbackFn<T, E>),
    /// Compute the result asynchronously from the triggering error
    CallAsync(AsyncFallbackFn<T, E>),
}

impl<T, E> Default for Fallback<T, E> {
    fn default() -> Self {
        Fallback::None
    }
}

impl<T, E> Fallback<T, E> {
    /// No fallback: errors propagate
    pub fn none() -> Self {
        Fallback::None
    }

    /// Resolve with `value` whenever the call cannot produce its own result
    pub fn value(value: T) -> Self {
        Fallback::Value(value)
    }

    /// Resolve by calling `f` with the triggering error
    ///
    /// An `Err` returned by `f` reaches the caller as
    /// [`CircuitError::Execution`].
    pub fn call<F>(f: F) -> Self
    where
        F: FnOnce(CircuitError<E>) -> Result<T, E> + Send + 'static,
    {
        Fallback::Call(Box::new(f))
    }

    /// Resolve by awaiting the future `f` returns for the triggering error
    ///
    /// Use this when the fallback itself does I/O, such as reading a cache.
    pub fn call_async<F, Fut>(f: F) -> Self
    where
        F: FnOnce(CircuitError<E>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Fallback::CallAsync(Box::new(move |error| -> BoxFuture<'static, Result<T, E>> {
            Box::pin(f(error))
        }))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Fallback::None)
    }

    pub(crate) async fn resolve(self, error: CircuitError<E>) -> Result<T, CircuitError<E>> {
        match self {
            Fallback::None => Err(error),
            Fallback::Value(value) => Ok(value),
            Fallback::Call(f) => f(error).map_err(CircuitError::Execution),
            Fallback::CallAsync(f) => f(error).await.map_err(CircuitError::Execution),
        }
    }
}

impl<T, E> From<FallbackFn<T, E>> for Fallback<T, E> {
    fn from(f: FallbackFn<T, E>) -> Self {
        Fallback::Call(f)
    }
}

impl<T, E> std::fmt::Debug for Fallback<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fallback::None => f.write_str("Fallback::None"),
            Fallback::Value(_) => f.write_str("Fallback::Value(..)"),
            Fallback::Call(_) => f.write_str("Fallback::Call(..)"),
            Fallback::CallAsync(_) => f.write_str("Fallback::CallAsync(..)"),
        }
    }
}

/// Context handed to the `on_fallback` notification
#[derive(Debug, Clone)]
pub struct FallbackContext {
    /// Circuit name
    pub circuit_name: String,
    /// Circuit state when the fallback was chosen
    pub state: State,
    /// Which kind of error triggered the fallback
    pub error_kind: ErrorKind,
    /// Rendered triggering error
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> CircuitError<String> {
        CircuitError::Open {
            circuit: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_none_propagates_error() {
        let result = Fallback::<u32, String>::none().resolve(open()).await;
        assert!(matches!(result, Err(CircuitError::Open { .. })));
    }

    #[tokio::test]
    async fn test_value_resolves() {
        let result = Fallback::<u32, String>::value(7).resolve(open()).await;
        assert_eq!(result.ok(), Some(7));
    }

    #[tokio::test]
    async fn test_call_receives_error() {
        let fallback = Fallback::<&str, String>::call(|err| match err.kind() {
            ErrorKind::Open => Ok("cached"),
            _ => Ok("other"),
        });
        assert_eq!(fallback.resolve(open()).await.ok(), Some("cached"));
    }

    #[tokio::test]
    async fn test_call_error_propagates_as_execution() {
        let fallback = Fallback::<u32, String>::call(|_| Err("fallback error".to_string()));
        match fallback.resolve(open()).await {
            Err(CircuitError::Execution(e)) => assert_eq!(e, "fallback error"),
            other => panic!("Expected CircuitError::Execution, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_call_async_awaits_result() {
        let fallback = Fallback::<String, String>::call_async(|err| async move {
            tokio::task::yield_now().await;
            Ok(format!("cached after {:?}", err.kind()))
        });
        assert_eq!(
            fallback.resolve(open()).await.ok().as_deref(),
            Some("cached after Open")
        );
    }

    #[tokio::test]
    async fn test_call_async_error_propagates_as_execution() {
        let fallback =
            Fallback::<u32, String>::call_async(|_| async { Err("cache miss".to_string()) });
        assert!(matches!(
            fallback.resolve(open()).await,
            Err(CircuitError::Execution(e)) if e == "cache miss"
        ));
    }

    #[test]
    fn test_default_is_none() {
        assert!(Fallback::<u32, String>::default().is_none());
    }
}
