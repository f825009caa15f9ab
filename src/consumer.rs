//! NATS subscriptions for incoming requests and session events

use anyhow::{Context, Result};
use async_nats::{Client, Message, Subject, Subscriber};
use futures::StreamExt;
use tracing::{info, warn};

/// A request message together with the subject its reply goes to
pub struct IncomingRequest {
    pub message: Message,
    pub reply: Subject,
}

/// Subscription to one subject
pub struct RequestConsumer {
    subject: String,
    subscriber: Subscriber,
}

impl RequestConsumer {
    /// Subscribe to `subject`
    pub async fn subscribe(client: &Client, subject: &str) -> Result<Self> {
        let subscriber = client
            .subscribe(subject.to_string())
            .await
            .with_context(|| format!("Failed to subscribe to {}", subject))?;
        info!(subject = %subject, "Subscribed");

        Ok(Self {
            subject: subject.to_string(),
            subscriber,
        })
    }

    /// Next message of any kind; `None` once the subscription closes
    pub async fn next_message(&mut self) -> Option<Message> {
        self.subscriber.next().await
    }

    /// Next message that expects a reply.
    ///
    /// Messages published without a reply subject cannot be answered and are
    /// dropped here.
    pub async fn next_request(&mut self) -> Option<IncomingRequest> {
        while let Some(message) = self.subscriber.next().await {
            match message.reply.clone() {
                Some(reply) => return Some(IncomingRequest { message, reply }),
                None => warn!(subject = %self.subject, "Request without reply subject dropped"),
            }
        }
        None
    }
}
