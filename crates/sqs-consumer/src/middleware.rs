//! Handler composition (spec §4.E): a middleware is `(next) -> wrapped`, and a
//! chain of middlewares wraps a terminal handler so the first middleware sees
//! the request first, matching the decorator pattern of an HTTP stack.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;

use crate::message::Request;
use crate::response::ResponseHandle;

/// A typed message handler. Implementations MUST call exactly one of
/// [`ResponseHandle::handled`], [`ResponseHandle::retry`],
/// [`ResponseHandle::dead_letter`] before returning; returning without doing
/// so is not an error the core detects, it relies on broker-driven
/// redelivery once the message's visibility timeout expires (spec §4.F).
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, response: &ResponseHandle, request: Request);
}

/// Adapts a plain async closure into a [`Handler`], so callers can register
/// `async fn(&ResponseHandle, Request)` without implementing the trait by hand.
pub struct HandlerFn<F>(F);

impl<F, Fut> HandlerFn<F>
where
    F: Fn(&ResponseHandle, Request) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(&ResponseHandle, Request) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn handle(&self, response: &ResponseHandle, request: Request) {
        (self.0)(response, request).await
    }
}

/// A middleware wraps a terminal (or already-wrapped) handler into a new one.
pub trait Middleware: Send + Sync {
    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler>;
}

/// Builds the composed handler for a queue: `mws[0] ∘ mws[1] ∘ … ∘ terminal`.
/// Computed once at queue start per message type and reused across messages.
#[derive(Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, middleware: impl Middleware + 'static) {
        self.middlewares.push(Arc::new(middleware));
    }

    /// Composes the chain around `terminal`, with `middlewares[0]` seeing the
    /// request first.
    pub fn build(&self, terminal: Arc<dyn Handler>) -> Arc<dyn Handler> {
        self.middlewares
            .iter()
            .rev()
            .fold(terminal, |next, mw| mw.wrap(next))
    }
}

/// Recovers a handler that panics: catches the unwind, calls `retry()` on the
/// response handle (tolerating `InvalidState` as a no-op if the handler
/// already transitioned), and returns normally so one bad message cannot take
/// a worker down with it.
pub struct Recoverer;

impl Middleware for Recoverer {
    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler> {
        Arc::new(RecovererHandler { next })
    }
}

struct RecovererHandler {
    next: Arc<dyn Handler>,
}

#[async_trait]
impl Handler for RecovererHandler {
    async fn handle(&self, response: &ResponseHandle, request: Request) {
        let outcome = AssertUnwindSafe(self.next.handle(response, request))
            .catch_unwind()
            .await;

        if outcome.is_err() {
            tracing::error!(message_id = response.message_id(), "handler panicked, recovering as retry");
            if let Err(err) = response.retry().await {
                tracing::debug!(error = %err, "recoverer retry() was a no-op, handler already transitioned");
            }
        }
    }
}

/// Logs `{duration, result, message_id, message_type}` at info level after the
/// wrapped handler returns. Has no effect on the outcome.
pub struct Logger;

impl Middleware for Logger {
    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler> {
        Arc::new(LoggerHandler { next })
    }
}

struct LoggerHandler {
    next: Arc<dyn Handler>,
}

#[async_trait]
impl Handler for LoggerHandler {
    async fn handle(&self, response: &ResponseHandle, request: Request) {
        let start = Instant::now();
        let message_id = request.message_id.clone();
        let message_type = request.message_type.clone();

        self.next.handle(response, request).await;

        tracing::info!(
            duration_ms = start.elapsed().as_millis() as u64,
            result = ?response.result(),
            message_id = %message_id,
            message_type = %message_type,
            "handled message"
        );
    }
}
