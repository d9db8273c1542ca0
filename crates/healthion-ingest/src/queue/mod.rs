//! Message source for S3 event notifications
//!
//! [`MessageSource`] is the seam the consumer polls through; [`SqsQueue`] is
//! the production implementation.

use async_trait::async_trait;
use aws_sdk_sqs::{error::DisplayErrorContext, Client};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::aws::AwsSettings;

pub mod config;

/// Queue failures (message source unavailable or rejecting requests)
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue receive failed: {0}")]
    Receive(String),

    #[error("Queue delete failed for receipt {receipt_handle}: {message}")]
    Delete {
        receipt_handle: String,
        message: String,
    },
}

/// A message as received from the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub message_id: Option<String>,
    pub receipt_handle: String,
    pub body: String,
}

#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Long-poll for up to `max_messages`, waiting at most `wait` for the first
    async fn receive(
        &self,
        max_messages: i32,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Acknowledge a message so it is not redelivered
    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError>;
}

/// SQS-backed message source
#[derive(Clone)]
pub struct SqsQueue {
    client: Client,
    queue_url: String,
}

impl SqsQueue {
    pub async fn new(
        aws: &AwsSettings,
        endpoint: Option<&str>,
        queue_url: impl Into<String>,
    ) -> Self {
        let sdk_config = crate::aws::load_sdk_config(aws).await;
        let mut builder = aws_sdk_sqs::config::Builder::from(&sdk_config);

        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: Client::from_conf(builder.build()),
            queue_url: queue_url.into(),
        }
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

#[async_trait]
impl MessageSource for SqsQueue {
    #[instrument(skip(self), fields(queue_url = %self.queue_url))]
    async fn receive(
        &self,
        max_messages: i32,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let wait_secs = i32::try_from(wait.as_secs()).unwrap_or(config::MAX_WAIT_TIME_SECS);

        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages)
            .wait_time_seconds(wait_secs.min(config::MAX_WAIT_TIME_SECS))
            .send()
            .await
            .map_err(|e| QueueError::Receive(DisplayErrorContext(e).to_string()))?;

        let messages: Vec<QueueMessage> = output
            .messages()
            .iter()
            .filter_map(|message| {
                let receipt_handle = message.receipt_handle()?.to_string();
                Some(QueueMessage {
                    message_id: message.message_id().map(str::to_string),
                    receipt_handle,
                    body: message.body().unwrap_or_default().to_string(),
                })
            })
            .collect();

        debug!(count = messages.len(), "Received messages");

        Ok(messages)
    }

    #[instrument(skip(self, receipt_handle))]
    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Delete {
                receipt_handle: receipt_handle.to_string(),
                message: DisplayErrorContext(e).to_string(),
            })?;

        Ok(())
    }
}
