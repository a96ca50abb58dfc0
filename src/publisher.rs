//! Domain event publishing
//!
//! Events are published after the transaction that produced them commits. Delivery is
//! best-effort: a failed publish is logged and never undoes the committed change.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::events::DomainEvent;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode event")]
    Encode(#[from] serde_json::Error),

    #[error("failed to publish event: {0}")]
    Transport(String),
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError>;
}

/// Publishes JSON payloads on the event's NATS subject.
#[derive(Clone, Debug)]
pub struct NatsPublisher {
    client: async_nats::Client,
}

impl NatsPublisher {
    pub fn new(client: async_nats::Client) -> Self { Self { client } }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(event)?;
        self.client
            .publish(event.subject().to_string(), payload.into())
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))
    }
}

/// Used when no broker is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_string(event)?;
        info!(subject = event.subject(), %payload, "domain event");
        Ok(())
    }
}

pub async fn publish_all(publisher: &dyn EventPublisher, events: Vec<DomainEvent>) {
    for event in events {
        if let Err(error) = publisher.publish(&event).await {
            warn!(subject = event.subject(), %error, "dropping domain event");
        }
    }
}
