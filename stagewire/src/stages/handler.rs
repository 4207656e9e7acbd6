//! Stage handler trait and closure adapters.

use crate::core::Value;
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;

/// The work a stage performs.
///
/// Returning `Ok(Some(value))` makes `value` the stage's output; `Ok(None)`
/// passes the input through unchanged; `Err` reports a failure.
#[async_trait]
pub trait Handler<T: Value>: Send + Sync {
    /// Processes one input.
    async fn call(&self, input: T) -> anyhow::Result<Option<T>>;
}

/// Conversion of a closure's return value into a stage result.
///
/// Implemented for `Option<T>` (a value or pass-through), `()` (always
/// pass-through) and `Result<R, E>` for any convertible `R` and any error
/// convertible into [`anyhow::Error`].
pub trait IntoOutput<T> {
    /// Performs the conversion.
    fn into_output(self) -> anyhow::Result<Option<T>>;
}

impl<T> IntoOutput<T> for Option<T> {
    fn into_output(self) -> anyhow::Result<Option<T>> {
        Ok(self)
    }
}

impl<T> IntoOutput<T> for () {
    fn into_output(self) -> anyhow::Result<Option<T>> {
        Ok(None)
    }
}

impl<T, R, E> IntoOutput<T> for Result<R, E>
where
    R: IntoOutput<T>,
    E: Into<anyhow::Error>,
{
    fn into_output(self) -> anyhow::Result<Option<T>> {
        self.map_err(Into::into)?.into_output()
    }
}

/// An async closure-based handler.
pub struct AsyncFnHandler<F, Fut> {
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncFnHandler<F, Fut> {
    /// Creates a new async closure handler.
    pub fn new(func: F) -> Self {
        Self {
            func,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F, Fut> Handler<T> for AsyncFnHandler<F, Fut>
where
    T: Value,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoOutput<T>,
{
    async fn call(&self, input: T) -> anyhow::Result<Option<T>> {
        (self.func)(input).await.into_output()
    }
}

/// A synchronous closure-based handler.
pub struct SyncFnHandler<F, R> {
    func: F,
    _phantom: PhantomData<fn() -> R>,
}

impl<F, R> SyncFnHandler<F, R> {
    /// Creates a new synchronous closure handler.
    pub fn new(func: F) -> Self {
        Self {
            func,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F, R> Handler<T> for SyncFnHandler<F, R>
where
    T: Value,
    F: Fn(T) -> R + Send + Sync + 'static,
    R: IntoOutput<T> + 'static,
{
    async fn call(&self, input: T) -> anyhow::Result<Option<T>> {
        (self.func)(input).into_output()
    }
}
