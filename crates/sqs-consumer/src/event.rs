//! The events surfaced on the consumer's aggregated result stream (spec §3, §6).

use std::sync::Arc;

use crate::error::ConsumerError;
use crate::message::Request;
use crate::response::ResponseHandle;

/// One entry on the [`crate::consumer::ResultStream`](crate::consumer::ResultStream).
///
/// Either a transient transport/configuration error with no associated
/// message, or an observation of a message that was handed to a handler.
/// Draining this stream is useful for observability; it is not required for
/// correctness.
pub enum Event {
    Observed {
        request: Request,
        response: Arc<ResponseHandle>,
    },
    Error(ConsumerError),
}

impl Event {
    pub fn error(err: ConsumerError) -> Self {
        Event::Error(err)
    }
}
