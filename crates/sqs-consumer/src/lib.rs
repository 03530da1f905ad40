//! Concurrent consume pipeline for SQS-like at-least-once message queues.
//!
//! A [`Consumer`] registers one or more queues, each with typed handlers
//! dispatched by a `MessageType` attribute, optional [`Middleware`], a
//! bounded [`retry`] schedule, and an optional dead-letter queue. Handlers
//! reach a terminal [`response::Outcome`] through the [`ResponseHandle`]
//! they're given: [`ResponseHandle::handled`] deletes the message,
//! [`ResponseHandle::retry`] hands it to the retry engine, and
//! [`ResponseHandle::dead_letter`] forwards it straight to the DLQ.
//!
//! ```ignore
//! let broker = Arc::new(AwsSqsBroker::new("eu-west-1", None).await?);
//! let mut consumer = Consumer::new(broker);
//! consumer.consume("orders", |queue| {
//!     queue.with_retry_policy([Duration::from_secs(1), Duration::from_secs(30)]);
//!     queue.with_dead_letter_queue("orders-dlq");
//!     queue.use_middleware(Recoverer);
//!     queue.use_middleware(Logger);
//!     queue.with_handler("order.created", |response, request| async move {
//!         if let Err(err) = handle_order_created(&request).await {
//!             tracing::warn!(%err, "order.created failed");
//!             response.retry().await.ok();
//!             return;
//!         }
//!         response.handled().await.ok();
//!     });
//! });
//! let (mut events, startup_failures) = consumer.listen().await;
//! ```

mod broker;
mod consumer;
mod dispatcher;
mod error;
mod event;
mod message;
mod middleware;
mod queue;
mod response;
mod retry;

pub use broker::{BrokerClient, BrokerMessage, MESSAGE_TYPE_ATTR, RETRY_COUNT_ATTR};
#[cfg(feature = "aws")]
pub use broker::AwsSqsBroker;
pub use consumer::{Consumer, ResultStream};
pub use error::ConsumerError;
pub use event::Event;
pub use message::Request;
pub use middleware::{Handler, HandlerFn, Logger, Middleware, MiddlewareChain, Recoverer};
pub use queue::{QueueConfigBuilder, DEFAULT_CHANNEL_SIZE};
pub use response::{Outcome, ResponseHandle};
