//! Public entry point (spec §3, §6): register queues, then start every
//! queue's worker loops and fan their events into one result stream.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::broker::BrokerClient;
use crate::error::ConsumerError;
use crate::event::Event;
use crate::queue::{Queue, QueueConfig, QueueConfigBuilder};

/// The aggregated stream of [`Event`]s across every registered queue.
///
/// Draining it is optional; the pipeline does not rely on a consumer
/// reading it to make progress. It exists for observability and for tests
/// that assert on dispatch behavior.
pub type ResultStream = mpsc::Receiver<Event>;

/// Bound on the aggregated result stream. Generous relative to per-queue
/// effect channels since this one fans in from every queue at once.
const RESULT_STREAM_BUFFER: usize = 256;

/// Registers queues against a shared [`BrokerClient`] and starts their
/// worker loops on [`Consumer::listen`].
///
/// A `Consumer` is single-use: call [`Self::consume`] for every queue you
/// want handled, then [`Self::listen`] exactly once. The loops it starts run
/// for the lifetime of the process; there is no shutdown API (spec §5).
pub struct Consumer {
    broker: Arc<dyn BrokerClient>,
    queues: Vec<(String, QueueConfig)>,
}

impl Consumer {
    pub fn new(broker: Arc<dyn BrokerClient>) -> Self {
        Self {
            broker,
            queues: Vec::new(),
        }
    }

    /// Registers `queue_name` for consumption. `configure` receives a builder
    /// to register handlers, middleware, the retry schedule, and an optional
    /// dead-letter queue. Calling this twice for the same name registers two
    /// independent `Queue`s against the same name (last handler registration
    /// per message type wins only within a single builder call).
    pub fn consume(&mut self, queue_name: impl Into<String>, configure: impl FnOnce(&mut QueueConfigBuilder)) -> &mut Self {
        let mut builder = QueueConfigBuilder::new();
        configure(&mut builder);
        self.queues.push((queue_name.into(), builder.build()));
        self
    }

    /// Resolves and starts every registered queue's worker loops.
    ///
    /// Every queue is attempted; a resolution failure on one queue is
    /// collected rather than short-circuiting the others, so one
    /// misconfigured queue name doesn't prevent the rest from consuming.
    /// Returns the aggregated result stream and the list of per-queue
    /// startup failures (empty if every queue started).
    pub async fn listen(self) -> (ResultStream, Vec<ConsumerError>) {
        let (events_tx, events_rx) = mpsc::channel(RESULT_STREAM_BUFFER);
        let mut startup_failures = Vec::new();

        for (name, config) in self.queues {
            let queue = Queue::new(name, Arc::clone(&self.broker), config);
            if let Err(err) = queue.start(events_tx.clone()).await {
                tracing::error!(error = %err, "queue failed to start");
                startup_failures.push(err);
            }
        }

        (events_rx, startup_failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerMessage, MESSAGE_TYPE_ATTR, RETRY_COUNT_ATTR};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Debug, Clone)]
    struct SentMessage {
        queue_url: String,
        body: String,
        retry_count: Option<String>,
        delay_seconds: u32,
    }

    /// An in-memory broker fake. Messages queued in `inbox` are handed out
    /// once per `receive` call (drained, like a real queue hiding in-flight
    /// messages); `deletes` and `sent` record every effect so scenario tests
    /// can assert on them directly.
    #[derive(Default)]
    struct FakeBroker {
        resolvable: Vec<&'static str>,
        inbox: StdMutex<HashMap<String, Vec<BrokerMessage>>>,
        deletes: StdMutex<Vec<(String, String)>>,
        sent: StdMutex<Vec<SentMessage>>,
    }

    impl FakeBroker {
        fn new(resolvable: Vec<&'static str>) -> Self {
            Self {
                resolvable,
                ..Default::default()
            }
        }

        fn deliver(&self, queue_name: &str, message: BrokerMessage) {
            let url = format!("https://queue/{queue_name}");
            self.inbox.lock().unwrap().entry(url).or_default().push(message);
        }
    }

    #[async_trait]
    impl BrokerClient for FakeBroker {
        async fn resolve_url(&self, queue_name: &str) -> anyhow::Result<String> {
            if self.resolvable.contains(&queue_name) {
                Ok(format!("https://queue/{queue_name}"))
            } else {
                Err(anyhow::anyhow!("no such queue: {queue_name}"))
            }
        }

        async fn receive(
            &self,
            queue_url: &str,
            _wait_seconds: u32,
            _max_messages: u32,
        ) -> anyhow::Result<Vec<BrokerMessage>> {
            let messages = {
                let mut inbox = self.inbox.lock().unwrap();
                inbox.get_mut(queue_url).map(std::mem::take).unwrap_or_default()
            };
            if messages.is_empty() {
                // Avoid a hot spin in the poll loop between deliveries.
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            Ok(messages)
        }

        async fn delete(&self, queue_url: &str, receipt_handle: &str) -> anyhow::Result<()> {
            self.deletes
                .lock()
                .unwrap()
                .push((queue_url.to_string(), receipt_handle.to_string()));
            Ok(())
        }

        async fn send(
            &self,
            queue_url: &str,
            body: &str,
            attributes: HashMap<String, String>,
            delay_seconds: u32,
        ) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(SentMessage {
                queue_url: queue_url.to_string(),
                body: body.to_string(),
                retry_count: attributes.get(RETRY_COUNT_ATTR).cloned(),
                delay_seconds,
            });
            Ok(())
        }
    }

    fn message(id: &str, message_type: Option<&str>, retry_count: Option<u32>) -> BrokerMessage {
        let mut attributes = HashMap::new();
        if let Some(t) = message_type {
            attributes.insert(MESSAGE_TYPE_ATTR.to_string(), t.to_string());
        }
        if let Some(n) = retry_count {
            attributes.insert(RETRY_COUNT_ATTR.to_string(), n.to_string());
        }
        BrokerMessage {
            id: id.to_string(),
            receipt_handle: format!("{id}-receipt"),
            body: "{}".to_string(),
            attributes,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(40)).await;
    }

    #[tokio::test]
    async fn unresolvable_queue_is_reported_without_blocking_other_queues() {
        let broker = Arc::new(FakeBroker::new(vec!["good"]));

        let mut consumer = Consumer::new(broker);
        consumer.consume("good", |_| {});
        consumer.consume("missing", |_| {});

        let (_events, failures) = consumer.listen().await;
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], ConsumerError::UnresolvedQueue { .. }));
    }

    /// S1 — happy path: a handled message is deleted once and nothing is sent.
    #[tokio::test]
    async fn s1_handled_message_is_deleted() {
        let broker = Arc::new(FakeBroker::new(vec!["orders"]));
        broker.deliver("orders", message("m1", Some("t"), None));

        let mut consumer = Consumer::new(Arc::clone(&broker) as Arc<dyn BrokerClient>);
        consumer.consume("orders", |queue| {
            queue.with_handler("t", |response, _request| async move {
                response.handled().await.unwrap();
            });
        });
        let (_events, failures) = consumer.listen().await;
        assert!(failures.is_empty());
        settle().await;

        let deletes = broker.deletes.lock().unwrap();
        assert_eq!(*deletes, vec![("https://queue/orders".to_string(), "m1-receipt".to_string())]);
        assert!(broker.sent.lock().unwrap().is_empty());
    }

    /// S2 — unknown MessageType: the message is deleted, no handler runs.
    #[tokio::test]
    async fn s2_unknown_type_is_deleted_without_dispatch() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let broker = Arc::new(FakeBroker::new(vec!["orders"]));
        broker.deliver("orders", message("m2", Some("other"), None));

        let invocations = Arc::new(AtomicUsize::new(0));
        let invocations_clone = Arc::clone(&invocations);
        let mut consumer = Consumer::new(Arc::clone(&broker) as Arc<dyn BrokerClient>);
        consumer.consume("orders", move |queue| {
            let invocations = Arc::clone(&invocations_clone);
            queue.with_handler("t", move |response, _request| {
                let invocations = Arc::clone(&invocations);
                async move {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    response.handled().await.unwrap();
                }
            });
        });
        let (_events, _failures) = consumer.listen().await;
        settle().await;

        assert_eq!(invocations.load(Ordering::SeqCst), 0);
        let deletes = broker.deletes.lock().unwrap();
        assert_eq!(*deletes, vec![("https://queue/orders".to_string(), "m2-receipt".to_string())]);
    }

    /// S4 — direct dead_letter(): send to DLQ then delete the original.
    #[tokio::test]
    async fn s4_dead_letter_sends_then_deletes() {
        let broker = Arc::new(FakeBroker::new(vec!["orders", "orders-dlq"]));
        broker.deliver("orders", message("m4", Some("t"), None));

        let mut consumer = Consumer::new(Arc::clone(&broker) as Arc<dyn BrokerClient>);
        consumer.consume("orders", |queue| {
            queue.with_dead_letter_queue("orders-dlq");
            queue.with_handler("t", |response, _request| async move {
                response.dead_letter().await.unwrap();
            });
        });
        let (_events, failures) = consumer.listen().await;
        assert!(failures.is_empty());
        settle().await;

        let sent = broker.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].queue_url, "https://queue/orders-dlq");
        assert_eq!(sent[0].body, "{}");
        let deletes = broker.deletes.lock().unwrap();
        assert_eq!(*deletes, vec![("https://queue/orders".to_string(), "m4-receipt".to_string())]);
    }

    /// S5 — handler panic with Recoverer installed is converted to a retry,
    /// which resends with the schedule's first delay and deletes the original.
    #[tokio::test]
    async fn s5_handler_panic_is_recovered_as_retry() {
        let broker = Arc::new(FakeBroker::new(vec!["orders"]));
        broker.deliver("orders", message("m5", Some("t"), None));

        let mut consumer = Consumer::new(Arc::clone(&broker) as Arc<dyn BrokerClient>);
        consumer.consume("orders", |queue| {
            queue.with_retry_policy([Duration::from_secs(1), Duration::from_secs(2)]);
            queue.use_middleware(crate::middleware::Recoverer);
            queue.with_handler("t", |_response, _request| async move {
                panic!("boom");
            });
        });
        let (_events, failures) = consumer.listen().await;
        assert!(failures.is_empty());
        settle().await;

        let sent = broker.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].retry_count.as_deref(), Some("1"));
        assert_eq!(sent[0].delay_seconds, 1);
        let deletes = broker.deletes.lock().unwrap();
        assert_eq!(*deletes, vec![("https://queue/orders".to_string(), "m5-receipt".to_string())]);
    }

    /// S3 (boundary case) — an empty retry schedule promotes straight to the DLQ.
    #[tokio::test]
    async fn empty_retry_schedule_promotes_immediately() {
        let broker = Arc::new(FakeBroker::new(vec!["orders", "orders-dlq"]));
        broker.deliver("orders", message("m6", Some("t"), None));

        let mut consumer = Consumer::new(Arc::clone(&broker) as Arc<dyn BrokerClient>);
        consumer.consume("orders", |queue| {
            queue.with_dead_letter_queue("orders-dlq");
            queue.with_handler("t", |response, _request| async move {
                response.retry().await.unwrap();
            });
        });
        let (_events, _failures) = consumer.listen().await;
        settle().await;

        let sent = broker.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].queue_url, "https://queue/orders-dlq");
    }
}
