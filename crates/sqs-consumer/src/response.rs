//! The per-message one-shot outcome state machine (spec §4.C).

use std::sync::Arc;
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::broker::BrokerMessage;
use crate::error::ConsumerError;

/// The terminal verdict a handler reaches for a message, or the absence of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Unhandled,
    Handled,
    Retry,
    DeadLetter,
}

/// Per-queue channel senders a [`ResponseHandle`] dispatches its verdict to.
///
/// Holding only the senders (not the owning `Queue`) keeps the back-reference
/// a plain borrow in spirit: the `Queue` outlives every handle it issues, and
/// handles never escape the dispatch task that owns them.
pub(crate) struct QueueEffects {
    pub(crate) queue_url: String,
    pub(crate) delete_tx: mpsc::Sender<DeleteJob>,
    pub(crate) retry_tx: mpsc::Sender<BrokerMessage>,
    pub(crate) dead_letter_tx: mpsc::Sender<BrokerMessage>,
}

/// A pending delete, queued by a `Handled()` verdict.
pub(crate) struct DeleteJob {
    pub(crate) queue_url: String,
    pub(crate) receipt_handle: String,
}

/// The one-shot outcome handle exposed to handlers through the middleware chain.
///
/// Exactly one of [`Self::handled`], [`Self::retry`], [`Self::dead_letter`] may
/// succeed; any further call returns [`ConsumerError::InvalidState`] without
/// side effect. The state transition is committed before the corresponding
/// effect is enqueued, so a re-entrant call from the same handler fails fast
/// regardless of whether the effect loop has observed the previous call yet.
pub struct ResponseHandle {
    message: BrokerMessage,
    effects: Arc<QueueEffects>,
    state: Mutex<Outcome>,
}

impl ResponseHandle {
    pub(crate) fn new(message: BrokerMessage, effects: Arc<QueueEffects>) -> Self {
        Self {
            message,
            effects,
            state: Mutex::new(Outcome::Unhandled),
        }
    }

    /// The current outcome. Safe to call at any time, including after a
    /// terminal verdict has been reached.
    pub fn result(&self) -> Outcome {
        *self.state.lock().expect("response state poisoned")
    }

    /// Commits `to` as the terminal outcome, or fails if one was already set.
    fn transition(&self, to: Outcome) -> Result<(), ConsumerError> {
        let mut guard = self.state.lock().expect("response state poisoned");
        if *guard != Outcome::Unhandled {
            return Err(ConsumerError::InvalidState { current: *guard });
        }
        *guard = to;
        Ok(())
    }

    /// The message was processed successfully: delete it from the source queue.
    pub async fn handled(&self) -> Result<(), ConsumerError> {
        self.transition(Outcome::Handled)?;
        let job = DeleteJob {
            queue_url: self.effects.queue_url.clone(),
            receipt_handle: self.message.receipt_handle.clone(),
        };
        let _ = self.effects.delete_tx.send(job).await;
        Ok(())
    }

    /// The message should be retried: hand it to the retry engine, which
    /// consults the backoff schedule and promotes to the dead-letter queue
    /// once attempts are exhausted.
    pub async fn retry(&self) -> Result<(), ConsumerError> {
        self.transition(Outcome::Retry)?;
        let _ = self.effects.retry_tx.send(self.message.clone()).await;
        Ok(())
    }

    /// The message cannot be processed: forward it to the dead-letter queue.
    ///
    /// Unlike retry exhaustion (spec §4.D), a direct `DeadLetter()` verdict on
    /// a queue with no DLQ configured does *not* delete the original message;
    /// it is reported as a configuration error and left for the broker's
    /// visibility timeout to redeliver, so the misconfiguration surfaces
    /// rather than silently dropping data.
    pub async fn dead_letter(&self) -> Result<(), ConsumerError> {
        self.transition(Outcome::DeadLetter)?;
        let _ = self.effects.dead_letter_tx.send(self.message.clone()).await;
        Ok(())
    }

    pub fn message_id(&self) -> &str {
        &self.message.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle_with_channels() -> (
        ResponseHandle,
        mpsc::Receiver<DeleteJob>,
        mpsc::Receiver<BrokerMessage>,
        mpsc::Receiver<BrokerMessage>,
    ) {
        let (delete_tx, delete_rx) = mpsc::channel(4);
        let (retry_tx, retry_rx) = mpsc::channel(4);
        let (dead_letter_tx, dead_letter_rx) = mpsc::channel(4);
        let effects = Arc::new(QueueEffects {
            queue_url: "https://queue/test".to_string(),
            delete_tx,
            retry_tx,
            dead_letter_tx,
        });
        let message = BrokerMessage {
            id: "m1".to_string(),
            receipt_handle: "r1".to_string(),
            body: "{}".to_string(),
            attributes: Default::default(),
        };
        (
            ResponseHandle::new(message, effects),
            delete_rx,
            retry_rx,
            dead_letter_rx,
        )
    }

    #[tokio::test]
    async fn handled_enqueues_delete_and_sets_state() {
        let (handle, mut delete_rx, _retry_rx, _dlq_rx) = handle_with_channels();
        handle.handled().await.unwrap();
        assert_eq!(handle.result(), Outcome::Handled);
        let job = delete_rx.recv().await.unwrap();
        assert_eq!(job.receipt_handle, "r1");
    }

    #[tokio::test]
    async fn second_verdict_is_invalid_state_and_has_no_effect() {
        let (handle, mut delete_rx, mut retry_rx, _dlq_rx) = handle_with_channels();
        handle.handled().await.unwrap();
        let err = handle.retry().await.unwrap_err();
        assert!(matches!(err, ConsumerError::InvalidState { current: Outcome::Handled }));
        assert_eq!(handle.result(), Outcome::Handled);
        // Exactly one delete was enqueued, and no retry followed the failed second verdict.
        assert!(delete_rx.recv().await.is_some());
        assert!(retry_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn retry_enqueues_message_unchanged() {
        let (handle, _delete_rx, mut retry_rx, _dlq_rx) = handle_with_channels();
        handle.retry().await.unwrap();
        assert_eq!(handle.result(), Outcome::Retry);
        let msg = retry_rx.recv().await.unwrap();
        assert_eq!(msg.id, "m1");
    }

    #[tokio::test]
    async fn dead_letter_enqueues_message() {
        let (handle, _delete_rx, _retry_rx, mut dlq_rx) = handle_with_channels();
        handle.dead_letter().await.unwrap();
        assert_eq!(handle.result(), Outcome::DeadLetter);
        assert!(dlq_rx.recv().await.is_some());
    }
}
