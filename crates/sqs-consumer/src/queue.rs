//! The per-queue worker (spec §4.B): owns the ingress buffer and effect
//! channels, and runs the five persistent loops (poll, dispatch, delete,
//! dead-letter, retry) for the lifetime of the process.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::broker::{BrokerClient, BrokerMessage};
use crate::dispatcher::Dispatcher;
use crate::error::ConsumerError;
use crate::event::Event;
use crate::message::Request;
use crate::middleware::{Handler, HandlerFn, Middleware, MiddlewareChain};
use crate::response::{DeleteJob, QueueEffects, ResponseHandle};
use crate::retry::{RetryDecision, RetryEngine, ceil_seconds};

/// Default bound on the ingress buffer. Chosen so a burst of a full
/// `ReceiveMessage` batch (10 messages, the SQS maximum) fits without the
/// poll loop immediately blocking on the next receive.
pub const DEFAULT_CHANNEL_SIZE: usize = 32;

/// Long-poll wait time, in seconds, used by the poll loop.
const POLL_WAIT_SECONDS: u32 = 15;

/// Maximum messages requested per `Receive` call.
const POLL_BATCH_SIZE: u32 = 10;

/// Frozen, builder-populated configuration for one queue (spec §3).
///
/// Once [`crate::consumer::Consumer::consume`] returns, the configuration is
/// immutable for the lifetime of the queue.
pub(crate) struct QueueConfig {
    pub(crate) channel_size: usize,
    pub(crate) dead_letter_queue: Option<String>,
    pub(crate) retry_schedule: Vec<Duration>,
    pub(crate) handlers: HashMap<String, Arc<dyn Handler>>,
    pub(crate) middleware: MiddlewareChain,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            channel_size: DEFAULT_CHANNEL_SIZE,
            dead_letter_queue: None,
            retry_schedule: Vec::new(),
            handlers: HashMap::new(),
            middleware: MiddlewareChain::new(),
        }
    }
}

/// Builder passed to the `configure` callback in
/// [`crate::consumer::Consumer::consume`].
#[derive(Default)]
pub struct QueueConfigBuilder {
    config: QueueConfig,
}

impl QueueConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound on the ingress buffer (must be at least 1). Backpressures the
    /// poll loop once the dispatch loop falls behind.
    pub fn with_channel_size(&mut self, size: usize) -> &mut Self {
        self.config.channel_size = size.max(1);
        self
    }

    pub fn with_dead_letter_queue(&mut self, queue_name: impl Into<String>) -> &mut Self {
        self.config.dead_letter_queue = Some(queue_name.into());
        self
    }

    /// Sets the ordered backoff schedule. An empty schedule means the first
    /// `Retry()` immediately promotes to the dead-letter queue.
    pub fn with_retry_policy(&mut self, schedule: impl IntoIterator<Item = Duration>) -> &mut Self {
        self.config.retry_schedule = schedule.into_iter().collect();
        self
    }

    /// Registers a handler for `message_type`. Accepts any
    /// `async fn(&ResponseHandle, Request)`-shaped closure; no need to
    /// implement [`Handler`] directly.
    pub fn with_handler<F, Fut>(&mut self, message_type: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&ResponseHandle, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.config
            .handlers
            .insert(message_type.into(), Arc::new(HandlerFn::new(handler)));
        self
    }

    pub fn use_middleware(&mut self, middleware: impl Middleware + 'static) -> &mut Self {
        self.config.middleware.push(middleware);
        self
    }

    pub(crate) fn build(self) -> QueueConfig {
        self.config
    }
}

pub(crate) struct Queue {
    name: String,
    broker: Arc<dyn BrokerClient>,
    config: QueueConfig,
}

impl Queue {
    pub(crate) fn new(name: String, broker: Arc<dyn BrokerClient>, config: QueueConfig) -> Self {
        Self {
            name,
            broker,
            config,
        }
    }

    /// Resolves URLs and spawns the five worker loops. A failure resolving the
    /// main queue URL is fatal for this queue and reported to the caller; a
    /// failure resolving the DLQ is reported on the result stream but the
    /// queue still starts (the DLQ becomes unconfigured until fixed).
    pub(crate) async fn start(self, events: mpsc::Sender<Event>) -> Result<(), ConsumerError> {
        let queue_url = self
            .broker
            .resolve_url(&self.name)
            .await
            .map_err(|source| ConsumerError::UnresolvedQueue {
                queue: self.name.clone(),
                source,
            })?;

        let dlq_url = match &self.config.dead_letter_queue {
            Some(dlq_name) => match self.broker.resolve_url(dlq_name).await {
                Ok(url) => Some(url),
                Err(source) => {
                    let _ = events
                        .send(Event::error(ConsumerError::UnresolvedQueue {
                            queue: dlq_name.clone(),
                            source,
                        }))
                        .await;
                    None
                }
            },
            None => None,
        };

        let (ingress_tx, ingress_rx) = mpsc::channel::<BrokerMessage>(self.config.channel_size);
        let (delete_tx, delete_rx) = mpsc::channel::<DeleteJob>(1);
        let (retry_tx, retry_rx) = mpsc::channel::<BrokerMessage>(1);
        let (dead_letter_tx, dead_letter_rx) = mpsc::channel::<BrokerMessage>(1);

        let effects = Arc::new(QueueEffects {
            queue_url: queue_url.clone(),
            delete_tx,
            retry_tx,
            dead_letter_tx,
        });

        let max_attempts = self.config.retry_schedule.len() as u32;
        let chained_handlers: HashMap<String, Arc<dyn Handler>> = self
            .config
            .handlers
            .iter()
            .map(|(message_type, terminal)| {
                (
                    message_type.clone(),
                    self.config.middleware.build(Arc::clone(terminal)),
                )
            })
            .collect();
        let dispatcher = Arc::new(Dispatcher::new(chained_handlers, Arc::clone(&effects), max_attempts));

        tracing::info!(queue = %self.name, %queue_url, dlq = ?dlq_url, "queue started");

        tokio::spawn(Self::poll_loop(
            Arc::clone(&self.broker),
            queue_url.clone(),
            ingress_tx,
            events.clone(),
        ));
        tokio::spawn(Self::dispatch_loop(ingress_rx, dispatcher, events.clone()));
        tokio::spawn(Self::delete_loop(Arc::clone(&self.broker), delete_rx, events.clone()));
        tokio::spawn(Self::dead_letter_loop(
            Arc::clone(&self.broker),
            dead_letter_rx,
            queue_url.clone(),
            dlq_url.clone(),
            events.clone(),
        ));
        tokio::spawn(Self::retry_loop(
            self.broker,
            retry_rx,
            RetryEngine::new(self.config.retry_schedule),
            queue_url,
            dlq_url,
            events,
        ));

        Ok(())
    }

    async fn poll_loop(
        broker: Arc<dyn BrokerClient>,
        queue_url: String,
        ingress: mpsc::Sender<BrokerMessage>,
        events: mpsc::Sender<Event>,
    ) {
        loop {
            match broker
                .receive(&queue_url, POLL_WAIT_SECONDS, POLL_BATCH_SIZE)
                .await
            {
                Ok(messages) => {
                    for message in messages {
                        if ingress.send(message).await.is_err() {
                            // Dispatch loop is gone; nothing left to do.
                            return;
                        }
                    }
                }
                Err(source) => {
                    let _ = events
                        .send(Event::error(ConsumerError::Transport {
                            queue: queue_url.clone(),
                            source,
                        }))
                        .await;
                }
            }
        }
    }

    async fn dispatch_loop(
        mut ingress: mpsc::Receiver<BrokerMessage>,
        dispatcher: Arc<Dispatcher>,
        events: mpsc::Sender<Event>,
    ) {
        while let Some(message) = ingress.recv().await {
            let dispatcher = Arc::clone(&dispatcher);
            let events = events.clone();
            // A slow handler must not block the loop from draining the next message.
            tokio::spawn(async move {
                dispatcher.dispatch(message, &events).await;
            });
        }
    }

    async fn delete_loop(
        broker: Arc<dyn BrokerClient>,
        mut rx: mpsc::Receiver<DeleteJob>,
        events: mpsc::Sender<Event>,
    ) {
        while let Some(job) = rx.recv().await {
            if let Err(source) = broker.delete(&job.queue_url, &job.receipt_handle).await {
                let _ = events
                    .send(Event::error(ConsumerError::Transport {
                        queue: job.queue_url.clone(),
                        source,
                    }))
                    .await;
            }
        }
    }

    async fn dead_letter_loop(
        broker: Arc<dyn BrokerClient>,
        mut rx: mpsc::Receiver<BrokerMessage>,
        queue_url: String,
        dlq_url: Option<String>,
        events: mpsc::Sender<Event>,
    ) {
        while let Some(message) = rx.recv().await {
            let Some(dlq_url) = dlq_url.as_deref() else {
                // A direct DeadLetter() verdict with no DLQ configured is a
                // configuration error; the original is left in place for the
                // broker's visibility timeout to redeliver it, rather than
                // silently dropping data (spec §9 open-question decision).
                let _ = events
                    .send(Event::error(ConsumerError::MissingDeadLetterQueue {
                        queue: queue_url.clone(),
                        message_id: message.id.clone(),
                    }))
                    .await;
                continue;
            };
            promote_to_dead_letter(&broker, dlq_url, &queue_url, message, &events).await;
        }
    }

    async fn retry_loop(
        broker: Arc<dyn BrokerClient>,
        mut rx: mpsc::Receiver<BrokerMessage>,
        engine: RetryEngine,
        queue_url: String,
        dlq_url: Option<String>,
        events: mpsc::Sender<Event>,
    ) {
        while let Some(message) = rx.recv().await {
            match engine.decide(message) {
                RetryDecision::Resend { message, delay } => {
                    let send_result = broker
                        .send(
                            &queue_url,
                            &message.body,
                            message.attributes.clone(),
                            ceil_seconds(delay),
                        )
                        .await;
                    match send_result {
                        Ok(()) => {
                            if let Err(source) =
                                broker.delete(&queue_url, &message.receipt_handle).await
                            {
                                let _ = events
                                    .send(Event::error(ConsumerError::Transport {
                                        queue: queue_url.clone(),
                                        source,
                                    }))
                                    .await;
                            }
                        }
                        Err(source) => {
                            let _ = events
                                .send(Event::error(ConsumerError::Transport {
                                    queue: queue_url.clone(),
                                    source,
                                }))
                                .await;
                        }
                    }
                }
                RetryDecision::Exhausted { message } => match dlq_url.as_deref() {
                    Some(dlq_url) => {
                        promote_to_dead_letter(&broker, dlq_url, &queue_url, message, &events).await;
                    }
                    None => {
                        // §4.D's explicit policy differs from a direct DeadLetter()
                        // verdict: retry exhaustion with no DLQ configured still
                        // deletes the original, to avoid requeuing it forever.
                        let _ = events
                            .send(Event::error(ConsumerError::MissingDeadLetterQueue {
                                queue: queue_url.clone(),
                                message_id: message.id.clone(),
                            }))
                            .await;
                        if let Err(source) =
                            broker.delete(&queue_url, &message.receipt_handle).await
                        {
                            let _ = events
                                .send(Event::error(ConsumerError::Transport {
                                    queue: queue_url.clone(),
                                    source,
                                }))
                                .await;
                        }
                    }
                },
            }
        }
    }
}

/// Sends `message` to `dlq_url` and, on success, deletes it from the source
/// queue — shared by direct `DeadLetter()` verdicts and retry exhaustion.
async fn promote_to_dead_letter(
    broker: &Arc<dyn BrokerClient>,
    dlq_url: &str,
    queue_url: &str,
    message: BrokerMessage,
    events: &mpsc::Sender<Event>,
) {
    match broker
        .send(dlq_url, &message.body, message.attributes.clone(), 0)
        .await
    {
        Ok(()) => {
            if let Err(source) = broker.delete(queue_url, &message.receipt_handle).await {
                let _ = events
                    .send(Event::error(ConsumerError::Transport {
                        queue: queue_url.to_string(),
                        source,
                    }))
                    .await;
            }
        }
        Err(source) => {
            let _ = events
                .send(Event::error(ConsumerError::Transport {
                    queue: dlq_url.to_string(),
                    source,
                }))
                .await;
        }
    }
}
