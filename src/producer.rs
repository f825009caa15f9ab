//! Publishes replies to request/reply callers

use anyhow::{Context, Result};
use async_nats::{Client, Subject};
use serde::Serialize;
use tracing::debug;

/// Publisher of JSON replies
#[derive(Clone)]
pub struct ReplyPublisher {
    client: Client,
}

impl ReplyPublisher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Serialize `reply` and publish it to the caller's reply subject
    pub async fn reply<T: Serialize>(&self, subject: Subject, reply: &T) -> Result<()> {
        let payload = serde_json::to_vec(reply).context("Failed to serialize reply")?;
        let size = payload.len();

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .with_context(|| format!("Failed to publish reply to {}", subject))?;

        debug!(subject = %subject, bytes = size, "Published reply");
        Ok(())
    }
}
