//! Queue consumer for S3 event notifications
//!
//! One poll receives a batch of messages, extracts every `aws:s3` record from
//! each body and dispatches one orchestration run per record. A message is
//! deleted once handled, unless a dispatch failed transiently (pool full or
//! shut down); then it stays on the queue for redelivery. Run outcomes never
//! affect deletion.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use super::models::FileNotification;
use super::worker::TaskDispatcher;
use crate::queue::config::QueueConfig;
use crate::queue::{MessageSource, QueueError, QueueMessage};

const S3_EVENT_SOURCE: &str = "aws:s3";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSummary {
    /// Notifications handed to the dispatcher
    pub processed: usize,
    /// Messages received
    pub total: usize,
    /// The received messages, as delivered
    pub raw_messages: Vec<QueueMessage>,
}

#[derive(Deserialize)]
struct EventEnvelope {
    #[serde(rename = "Records", default)]
    records: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct EventRecord {
    #[serde(rename = "eventSource", default)]
    event_source: Option<String>,
    s3: S3Entity,
}

#[derive(Deserialize)]
struct S3Entity {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Deserialize)]
struct S3Object {
    key: String,
    #[serde(rename = "versionId", default)]
    version_id: Option<String>,
    #[serde(rename = "eTag", default)]
    e_tag: Option<String>,
}

/// Extract file notifications from an S3 event message body.
///
/// Records from other event sources, or missing bucket/key, are skipped.
pub fn parse_notifications(body: &str) -> Result<Vec<FileNotification>, serde_json::Error> {
    let envelope: EventEnvelope = serde_json::from_str(body)?;

    let notifications = envelope
        .records
        .into_iter()
        .filter_map(|value| serde_json::from_value::<EventRecord>(value).ok())
        .filter(|record| record.event_source.as_deref() == Some(S3_EVENT_SOURCE))
        .map(|record| {
            let object = record.s3.object;
            FileNotification {
                bucket: record.s3.bucket.name,
                key: decode_object_key(&object.key),
                user_id: None,
                version: object
                    .version_id
                    .or(object.e_tag)
                    .filter(|v| !v.is_empty()),
            }
        })
        .collect();

    Ok(notifications)
}

/// Object keys in S3 events are URL-encoded with `+` for spaces
pub fn decode_object_key(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    String::from_utf8_lossy(&urlencoding::decode_binary(spaced.as_bytes())).into_owned()
}

pub struct QueueConsumer {
    source: Arc<dyn MessageSource>,
    dispatcher: Arc<dyn TaskDispatcher>,
    max_messages: i32,
    wait: Duration,
}

impl QueueConsumer {
    pub fn new(
        source: Arc<dyn MessageSource>,
        dispatcher: Arc<dyn TaskDispatcher>,
        config: &QueueConfig,
    ) -> Self {
        Self {
            source,
            dispatcher,
            max_messages: config.max_messages,
            wait: Duration::from_secs(config.wait_time_secs.max(0) as u64),
        }
    }

    /// Receive one batch and dispatch every notification it carries
    #[instrument(skip(self))]
    pub async fn poll_once(&self) -> Result<PollSummary, QueueError> {
        let messages = self.source.receive(self.max_messages, self.wait).await?;

        if messages.is_empty() {
            debug!("No messages received");
            return Ok(PollSummary::default());
        }

        let mut summary = PollSummary {
            total: messages.len(),
            ..PollSummary::default()
        };

        for message in &messages {
            let retain = self.handle_message(message, &mut summary);

            if retain {
                warn!(
                    message_id = message.message_id.as_deref().unwrap_or_default(),
                    "Leaving message for redelivery"
                );
                continue;
            }

            if let Err(e) = self.source.delete(&message.receipt_handle).await {
                error!(
                    message_id = message.message_id.as_deref().unwrap_or_default(),
                    error = %e,
                    "Failed to delete message"
                );
            }
        }

        info!(
            processed = summary.processed,
            total = summary.total,
            "Poll complete"
        );

        summary.raw_messages = messages;

        Ok(summary)
    }

    /// Dispatch a message's notifications; `true` when it must stay on the queue
    fn handle_message(&self, message: &QueueMessage, summary: &mut PollSummary) -> bool {
        let message_id = message.message_id.as_deref().unwrap_or_default();

        let notifications = match parse_notifications(&message.body) {
            Ok(notifications) => notifications,
            Err(e) => {
                warn!(message_id, error = %e, "Discarding message with invalid JSON body");
                return false;
            },
        };

        if notifications.is_empty() {
            info!(message_id, "Discarding message without S3 records");
            return false;
        }

        let mut retain = false;

        for notification in notifications {
            let bucket = notification.bucket.clone();
            let key = notification.key.clone();

            match self.dispatcher.dispatch(notification) {
                Ok(()) => {
                    summary.processed += 1;
                    debug!(message_id, bucket = %bucket, key = %key, "Dispatched notification");
                },
                Err(e) if e.is_transient() => {
                    warn!(message_id, bucket = %bucket, key = %key, error = %e, "Dispatch failed");
                    retain = true;
                },
                Err(e) => {
                    error!(message_id, bucket = %bucket, key = %key, error = %e, "Dispatch rejected");
                },
            }
        }

        retain
    }
}
