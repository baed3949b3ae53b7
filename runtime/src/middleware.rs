//! # Middleware
//!
//! Middleware wraps the store's base dispatch. Each handler receives the
//! action and a [`Next`] continuation for the rest of the chain, and may:
//!
//! * pass the action on unchanged, or a transformed one,
//! * short-circuit by returning an action without calling `next`,
//! * rewrite the action coming back up,
//! * fail, which fails the whole dispatch.
//!
//! The chain is folded right to left, so the first middleware registered is
//! the outermost one.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tessera_core::{Action, BoxFuture, StoreError};

/// Future returned by every dispatch entry point.
pub type Dispatch = BoxFuture<'static, Result<Action, StoreError>>;

/// A callable dispatch stage.
pub type DispatchFn = Arc<dyn Fn(Action) -> Dispatch + Send + Sync>;

/// The remainder of the chain, ending at the base dispatch.
#[derive(Clone)]
pub struct Next {
    inner: DispatchFn,
}

impl Next {
    pub fn new(inner: DispatchFn) -> Self {
        Self { inner }
    }

    pub fn run(&self, action: Action) -> Dispatch {
        (self.inner)(action)
    }
}

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, action: Action, next: Next) -> Result<Action, StoreError>;
}

#[async_trait]
impl<F, Fut> Middleware for F
where
    F: Fn(Action, Next) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Action, StoreError>> + Send,
{
    async fn handle(&self, action: Action, next: Next) -> Result<Action, StoreError> {
        (self)(action, next).await
    }
}

/// Wrap `base` in `middlewares`, first element outermost.
pub fn compose(middlewares: &[Arc<dyn Middleware>], base: DispatchFn) -> DispatchFn {
    middlewares.iter().rev().fold(base, |next, middleware| {
        let middleware = middleware.clone();
        Arc::new(move |action: Action| -> Dispatch {
            let middleware = middleware.clone();
            let next = Next::new(next.clone());
            Box::pin(async move { middleware.handle(action, next).await })
        })
    })
}

/// Logs every action passing through, with its outcome and latency.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceActions;

#[async_trait]
impl Middleware for TraceActions {
    async fn handle(&self, action: Action, next: Next) -> Result<Action, StoreError> {
        let label = action.type_label();
        let started = Instant::now();
        tracing::debug!(tessera.action = %label, "dispatching");

        let result = next.run(action).await;
        let elapsed_us = started.elapsed().as_micros() as u64;
        match &result {
            Ok(returned) => tracing::info!(
                tessera.action = %label,
                tessera.returned = %returned,
                elapsed_us,
                "dispatched"
            ),
            Err(err) => tracing::warn!(
                tessera.action = %label,
                elapsed_us,
                error = %err,
                "dispatch failed"
            ),
        }
        result
    }
}
