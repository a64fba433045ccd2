use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

use crate::config::AckPolicy;
use crate::models::{MessageOutcome, NotificationEvent, PollSummary};
use crate::services::dispatcher::TaskDispatcher;
use crate::services::queue::{NotificationQueue, QueueError, QueueMessage};
use crate::utils::keys::{decode_notification_key, processed_key};

const S3_EVENT_SOURCE: &str = "aws:s3";

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Invalid notification JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Notification record missing {0}")]
    MissingField(&'static str),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Records", default)]
    records: Vec<EventRecord>,
    /// SNS fan-out wraps the store payload as a JSON string
    #[serde(rename = "Message")]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventRecord {
    #[serde(rename = "eventSource", default)]
    event_source: String,
    #[serde(rename = "eventName", default)]
    event_name: String,
    s3: Option<S3Entity>,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    bucket: Option<BucketEntity>,
    object: Option<ObjectEntity>,
}

#[derive(Debug, Deserialize)]
struct BucketEntity {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ObjectEntity {
    key: String,
}

/// Extract store-change events from a message body. Records from other
/// sources are skipped; a body without records (e.g. `s3:TestEvent`) yields
/// an empty list.
pub fn parse_notification(body: &str) -> Result<Vec<NotificationEvent>, NotificationError> {
    let envelope: Envelope = serde_json::from_str(body)?;
    if envelope.records.is_empty() {
        if let Some(inner) = envelope.message.as_deref() {
            return parse_notification(inner);
        }
    }

    let mut events = Vec::new();
    for record in envelope.records {
        if record.event_source != S3_EVENT_SOURCE {
            continue;
        }
        let s3 = record.s3.ok_or(NotificationError::MissingField("s3"))?;
        let bucket = s3.bucket.ok_or(NotificationError::MissingField("s3.bucket"))?;
        let object = s3.object.ok_or(NotificationError::MissingField("s3.object"))?;
        events.push(NotificationEvent {
            bucket: bucket.name,
            key: decode_notification_key(&object.key),
            event_name: record.event_name,
        });
    }
    Ok(events)
}

pub struct NotificationPoller {
    queue: Arc<dyn NotificationQueue>,
    dispatcher: Arc<dyn TaskDispatcher>,
    max_messages: i32,
    wait_seconds: i32,
    ack_policy: AckPolicy,
}

impl NotificationPoller {
    pub fn new(
        queue: Arc<dyn NotificationQueue>,
        dispatcher: Arc<dyn TaskDispatcher>,
        max_messages: i32,
        wait_seconds: i32,
        ack_policy: AckPolicy,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            max_messages,
            wait_seconds,
            ack_policy,
        }
    }

    /// One long-poll cycle
    pub async fn poll_once(&self) -> Result<PollSummary, QueueError> {
        let messages = self
            .queue
            .receive(self.max_messages, self.wait_seconds)
            .await?;

        let mut summary = PollSummary {
            total_messages: messages.len(),
            ..PollSummary::default()
        };

        for message in messages {
            let outcome = self.handle_message(message).await;
            summary.messages_processed += outcome.dispatched;
            if outcome.acknowledged {
                summary.messages_acknowledged += 1;
            }
            if outcome.error.is_some() {
                summary.messages_failed += 1;
            }
            summary.messages.push(outcome);
        }

        if summary.total_messages > 0 {
            tracing::info!(
                total = summary.total_messages,
                dispatched = summary.messages_processed,
                acknowledged = summary.messages_acknowledged,
                failed = summary.messages_failed,
                "Poll cycle finished"
            );
        }
        Ok(summary)
    }

    async fn handle_message(&self, message: QueueMessage) -> MessageOutcome {
        let mut outcome = MessageOutcome {
            message_id: message.message_id.clone(),
            ..MessageOutcome::default()
        };

        match parse_notification(&message.body) {
            Ok(events) => {
                for event in events {
                    // Converted output lands in the same bucket
                    if processed_key(&event.key).is_none() {
                        tracing::debug!(key = %event.key, "Ignoring non-raw key");
                        continue;
                    }
                    match self.dispatcher.dispatch(&event.bucket, &event.key).await {
                        Ok(task_id) => {
                            tracing::info!(
                                message_id = %message.message_id,
                                task_id = %task_id,
                                bucket = %event.bucket,
                                key = %event.key,
                                event = %event.event_name,
                                "Conversion dispatched"
                            );
                            outcome.dispatched += 1;
                        }
                        Err(e) => {
                            tracing::error!(
                                message_id = %message.message_id,
                                key = %event.key,
                                error = %e,
                                "Dispatch failed"
                            );
                            outcome.error = Some(e.to_string());
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    message_id = %message.message_id,
                    error = %e,
                    "Malformed notification"
                );
                outcome.error = Some(e.to_string());
            }
        }

        let should_ack = outcome.error.is_none() || self.ack_policy == AckPolicy::Always;

        if should_ack {
            match self.queue.acknowledge(&message.receipt_handle).await {
                Ok(()) => outcome.acknowledged = true,
                Err(e) => {
                    tracing::error!(
                        message_id = %message.message_id,
                        error = %e,
                        "Acknowledge failed"
                    );
                    outcome.error.get_or_insert_with(|| e.to_string());
                }
            }
        } else if let Err(e) = self.queue.release(&message.receipt_handle).await {
            // Visibility timeout still brings it back
            tracing::warn!(message_id = %message.message_id, error = %e, "Release failed");
        }

        outcome
    }
}
