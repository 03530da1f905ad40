//! Per-message orchestration (spec §4.F): looks up the handler for a
//! message's `MessageType`, builds the `Request`/`ResponseHandle` pair, and
//! invokes the chained handler.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::broker::BrokerMessage;
use crate::event::Event;
use crate::message::Request;
use crate::middleware::Handler;
use crate::response::{DeleteJob, QueueEffects, ResponseHandle};

pub(crate) struct Dispatcher {
    chained_handlers: HashMap<String, Arc<dyn Handler>>,
    effects: Arc<QueueEffects>,
    max_attempts: u32,
}

impl Dispatcher {
    pub(crate) fn new(
        chained_handlers: HashMap<String, Arc<dyn Handler>>,
        effects: Arc<QueueEffects>,
        max_attempts: u32,
    ) -> Self {
        Self {
            chained_handlers,
            effects,
            max_attempts,
        }
    }

    /// Dispatches one message pulled from the ingress buffer. Messages with no
    /// `MessageType` attribute, or one with no registered handler, are deleted
    /// without invoking any handler (spec: such messages are not the
    /// handler's responsibility and would otherwise cycle forever).
    pub(crate) async fn dispatch(&self, message: BrokerMessage, events: &mpsc::Sender<Event>) {
        let message_type = match message.message_type() {
            Some(t) => t.to_string(),
            None => {
                tracing::warn!(message_id = %message.id, "message has no MessageType attribute, deleting");
                self.drop_unroutable(message).await;
                return;
            }
        };

        let Some(handler) = self.chained_handlers.get(&message_type).cloned() else {
            tracing::warn!(
                message_id = %message.id,
                message_type = %message_type,
                "no handler registered for message type, deleting"
            );
            self.drop_unroutable(message).await;
            return;
        };

        let attempt = message.retry_count() + 1;
        let request = Request {
            message_id: message.id.clone(),
            message_type,
            body: message.body.clone(),
            attempt,
            max_attempts: self.max_attempts,
            cancellation: CancellationToken::new(),
        };
        let response = Arc::new(ResponseHandle::new(message, Arc::clone(&self.effects)));

        let _ = events
            .send(Event::Observed {
                request: request.clone(),
                response: Arc::clone(&response),
            })
            .await;

        handler.handle(&response, request).await;
    }

    async fn drop_unroutable(&self, message: BrokerMessage) {
        let job = DeleteJob {
            queue_url: self.effects.queue_url.clone(),
            receipt_handle: message.receipt_handle,
        };
        let _ = self.effects.delete_tx.send(job).await;
    }
}
