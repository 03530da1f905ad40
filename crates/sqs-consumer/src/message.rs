//! The immutable view handed to handlers (spec §3).

use tokio_util::sync::CancellationToken;

/// Immutable request view passed to handlers.
///
/// `attempt` is 1 on first delivery and increments with each retry;
/// `max_attempts` is the length of the queue's retry schedule (0 if no
/// retries are configured). `cancellation` is a token handlers *may* observe;
/// the core never cancels it itself (spec §5).
#[derive(Debug, Clone)]
pub struct Request {
    pub message_id: String,
    pub message_type: String,
    pub body: String,
    pub attempt: u32,
    pub max_attempts: u32,
    pub cancellation: CancellationToken,
}
