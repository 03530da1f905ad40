use crate::response::Outcome;

/// Errors surfaced by the consume pipeline.
///
/// Nothing here is fatal to the [`crate::Consumer`](crate::consumer::Consumer) except
/// [`ConsumerError::UnresolvedQueue`], which is returned from `listen` before a queue's
/// loops ever start. Every other variant is reported on the result stream and the
/// pipeline keeps running (see spec §7).
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    /// The queue name could not be resolved to a broker URL at start.
    #[error("failed to resolve queue {queue}: {source}")]
    UnresolvedQueue {
        queue: String,
        #[source]
        source: anyhow::Error,
    },

    /// A handler returned a `DeadLetter` verdict (directly, or via retry
    /// exhaustion) but the queue has no dead-letter queue configured.
    #[error("message {message_id} on queue {queue} was dead-lettered but no DLQ is configured")]
    MissingDeadLetterQueue { queue: String, message_id: String },

    /// A broker call (receive/delete/send) failed. The queue keeps running;
    /// the underlying message is unaffected and will be redelivered per the
    /// broker's visibility timeout.
    #[error("broker call failed for queue {queue}: {source}")]
    Transport {
        queue: String,
        #[source]
        source: anyhow::Error,
    },

    /// A second terminal verdict was attempted on a [`ResponseHandle`](crate::response::ResponseHandle)
    /// that had already transitioned away from `Unhandled`.
    #[error("response already handled with outcome {current:?}")]
    InvalidState { current: Outcome },
}
