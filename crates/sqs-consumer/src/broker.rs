//! The narrow capability the consume pipeline depends on (spec §4.A / §6).
//!
//! Every other component is written against [`BrokerClient`] and is oblivious
//! to the underlying SDK; tests substitute an in-memory fake, production code
//! uses [`AwsSqsBroker`] (behind the `aws` feature).

use std::collections::HashMap;

use async_trait::async_trait;

/// The `MessageType` attribute key reserved for dispatch.
pub const MESSAGE_TYPE_ATTR: &str = "MessageType";

/// The `RetryCount` attribute key reserved for the retry engine.
pub const RETRY_COUNT_ATTR: &str = "RetryCount";

/// A message as received from the broker: body, receipt handle, and attributes.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub id: String,
    pub receipt_handle: String,
    pub body: String,
    pub attributes: HashMap<String, String>,
}

impl BrokerMessage {
    pub fn message_type(&self) -> Option<&str> {
        self.attributes.get(MESSAGE_TYPE_ATTR).map(String::as_str)
    }

    /// Parses the `RetryCount` attribute, defaulting to 0 when absent or malformed.
    pub fn retry_count(&self) -> u32 {
        self.attributes
            .get(RETRY_COUNT_ATTR)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }
}

/// Narrow capability consumed by the core: resolve a queue name, long-poll
/// receive, delete by receipt, and send-with-attributes-and-delay.
///
/// Implementations must be safe for concurrent use; the core holds a single
/// shared `Arc<dyn BrokerClient>` across every Queue's worker loops.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Resolves a queue name to a broker URL. Called once per queue at start.
    async fn resolve_url(&self, queue_name: &str) -> anyhow::Result<String>;

    /// Long-polls for up to `max_messages` messages, waiting up to `wait_seconds`
    /// for at least one to arrive. An empty result is a normal outcome.
    async fn receive(
        &self,
        queue_url: &str,
        wait_seconds: u32,
        max_messages: u32,
    ) -> anyhow::Result<Vec<BrokerMessage>>;

    /// Deletes a message by receipt handle. Idempotent at the broker: deleting
    /// the same receipt twice both succeed.
    async fn delete(&self, queue_url: &str, receipt_handle: &str) -> anyhow::Result<()>;

    /// Sends a message with attributes, delayed by `delay_seconds`. Used by the
    /// retry engine (with delay) and dead-letter promotion (delay 0).
    async fn send(
        &self,
        queue_url: &str,
        body: &str,
        attributes: HashMap<String, String>,
        delay_seconds: u32,
    ) -> anyhow::Result<()>;
}

#[cfg(feature = "aws")]
mod aws_impl {
    use super::*;
    use anyhow::Context;
    use aws_sdk_sqs::Client;
    use aws_sdk_sqs::config::Region;
    use aws_sdk_sqs::types::MessageAttributeValue;

    /// [`BrokerClient`] backed by `aws-sdk-sqs`.
    ///
    /// Mirrors the construction pattern of the teacher's `SqsConsumer`/`SqsProducer`:
    /// region plus an optional endpoint override so local development can point
    /// at LocalStack or a similar emulator.
    pub struct AwsSqsBroker {
        client: Client,
    }

    impl AwsSqsBroker {
        pub async fn new(region: &str, endpoint_url: Option<&str>) -> anyhow::Result<Self> {
            let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
                .region(Region::new(region.to_string()));

            if let Some(endpoint) = endpoint_url {
                config_loader = config_loader.endpoint_url(endpoint);
            }

            let sdk_config = config_loader.load().await;
            Ok(Self {
                client: Client::new(&sdk_config),
            })
        }

        /// Returns a reference to the underlying SQS client (useful for health checks).
        pub fn client(&self) -> &Client {
            &self.client
        }
    }

    #[async_trait]
    impl BrokerClient for AwsSqsBroker {
        async fn resolve_url(&self, queue_name: &str) -> anyhow::Result<String> {
            let output = self
                .client
                .get_queue_url()
                .queue_name(queue_name)
                .send()
                .await
                .with_context(|| format!("SQS GetQueueUrl failed for {queue_name}"))?;

            output
                .queue_url
                .ok_or_else(|| anyhow::anyhow!("GetQueueUrl returned no URL for {queue_name}"))
        }

        async fn receive(
            &self,
            queue_url: &str,
            wait_seconds: u32,
            max_messages: u32,
        ) -> anyhow::Result<Vec<BrokerMessage>> {
            let output = self
                .client
                .receive_message()
                .queue_url(queue_url)
                .wait_time_seconds(wait_seconds as i32)
                .max_number_of_messages(max_messages as i32)
                .message_attribute_names("All")
                .send()
                .await
                .context("SQS ReceiveMessage failed")?;

            let messages = output
                .messages
                .unwrap_or_default()
                .into_iter()
                .filter_map(|m| {
                    let id = m.message_id?;
                    let receipt_handle = m.receipt_handle?;
                    let body = m.body.unwrap_or_default();
                    let attributes = m
                        .message_attributes
                        .unwrap_or_default()
                        .into_iter()
                        .filter_map(|(k, v)| v.string_value.map(|s| (k, s)))
                        .collect();

                    Some(BrokerMessage {
                        id,
                        receipt_handle,
                        body,
                        attributes,
                    })
                })
                .collect();

            Ok(messages)
        }

        async fn delete(&self, queue_url: &str, receipt_handle: &str) -> anyhow::Result<()> {
            self.client
                .delete_message()
                .queue_url(queue_url)
                .receipt_handle(receipt_handle)
                .send()
                .await
                .context("SQS DeleteMessage failed")?;

            Ok(())
        }

        async fn send(
            &self,
            queue_url: &str,
            body: &str,
            attributes: HashMap<String, String>,
            delay_seconds: u32,
        ) -> anyhow::Result<()> {
            let mut request = self
                .client
                .send_message()
                .queue_url(queue_url)
                .message_body(body)
                .delay_seconds(delay_seconds as i32);

            for (key, value) in attributes {
                let attr = MessageAttributeValue::builder()
                    .data_type("String")
                    .string_value(value)
                    .build()
                    .context("failed to build message attribute")?;
                request = request.message_attributes(key, attr);
            }

            request.send().await.context("SQS SendMessage failed")?;

            Ok(())
        }
    }
}

#[cfg(feature = "aws")]
pub use aws_impl::AwsSqsBroker;
