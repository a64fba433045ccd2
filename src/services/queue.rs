use async_trait::async_trait;
use aws_sdk_sqs::Client;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::Message;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Failed to receive messages: {0}")]
    Receive(String),

    #[error("Failed to delete message: {0}")]
    Acknowledge(String),

    #[error("Failed to release message: {0}")]
    Release(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: String,
    /// Opaque handle needed to delete or release the message
    pub receipt_handle: String,
    pub body: String,
}

#[async_trait]
pub trait NotificationQueue: Send + Sync {
    /// One long-poll receive. An empty vec means the wait elapsed with nothing queued.
    async fn receive(&self, max_messages: i32, wait_seconds: i32)
    -> Result<Vec<QueueMessage>, QueueError>;

    /// Delete a handled message
    async fn acknowledge(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Make a message visible again immediately so it is redelivered
    async fn release(&self, receipt_handle: &str) -> Result<(), QueueError>;
}

/// Messages without a receipt handle can be neither deleted nor released
fn into_queue_messages(messages: Vec<Message>) -> Vec<QueueMessage> {
    messages
        .into_iter()
        .filter_map(|m| match m.receipt_handle {
            Some(receipt_handle) => Some(QueueMessage {
                message_id: m.message_id.unwrap_or_default(),
                receipt_handle,
                body: m.body.unwrap_or_default(),
            }),
            None => {
                tracing::warn!(
                    message_id = ?m.message_id,
                    "Message without receipt handle skipped"
                );
                None
            }
        })
        .collect()
}

pub struct SqsNotificationQueue {
    client: Client,
    queue_url: String,
}

impl SqsNotificationQueue {
    pub fn new(client: Client, queue_url: String) -> Self {
        Self { client, queue_url }
    }
}

#[async_trait]
impl NotificationQueue for SqsNotificationQueue {
    async fn receive(
        &self,
        max_messages: i32,
        wait_seconds: i32,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let out = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages)
            .wait_time_seconds(wait_seconds)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(|e| QueueError::Receive(DisplayErrorContext(&e).to_string()))?;

        let messages = into_queue_messages(out.messages.unwrap_or_default());
        Ok(messages)
    }

    async fn acknowledge(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Acknowledge(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }

    async fn release(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(0)
            .send()
            .await
            .map_err(|e| QueueError::Release(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }
}
