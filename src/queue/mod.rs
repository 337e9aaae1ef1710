// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Job queue access
//!
//! The worker consumes an at-least-once queue with leases: a received message is
//! hidden from other consumers until its lease expires or it is deleted. Anything
//! not deleted comes back, which is the only retry mechanism the pipeline has.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub use crate::transport::TransportError;
use crate::transport::Endpoint;
pub use http::HttpQueueClient;
pub use memory::MemoryQueue;

/// Opaque receipt for a leased message, required to delete it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseHandle(String);

impl LeaseHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message body together with its lease
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub payload: Vec<u8>,
    pub lease: LeaseHandle,
}

/// String attributes sent alongside a message body
pub type MessageAttributes = BTreeMap<String, String>;

/// Attributes stamped on every enqueued job: `uploaded` in epoch milliseconds
pub fn upload_attributes() -> MessageAttributes {
    let mut attributes = MessageAttributes::new();
    attributes.insert(
        "uploaded".to_string(),
        Utc::now().timestamp_millis().to_string(),
    );
    attributes
}

// Trait to abstract the queue service for testing
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Lease at most one message, waiting up to `wait` for one to arrive
    async fn receive(
        &self,
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<ReceivedMessage>, TransportError>;

    /// Acknowledge a leased message so it is never redelivered
    async fn delete(&self, lease: &LeaseHandle) -> Result<(), TransportError>;

    /// Enqueue a new message
    async fn send(
        &self,
        payload: Vec<u8>,
        attributes: MessageAttributes,
    ) -> Result<(), TransportError>;
}

/// Build a queue client for a configured endpoint
pub fn connect_queue(
    endpoint: &str,
    request_timeout: Duration,
) -> Result<Arc<dyn QueueClient>, TransportError> {
    match endpoint.parse::<Endpoint>()? {
        Endpoint::Memory => {
            info!("📬 Using in-process memory queue");
            Ok(Arc::new(MemoryQueue::new()))
        }
        Endpoint::Http(base) => {
            info!("📬 Using HTTP queue at {}", base);
            Ok(Arc::new(HttpQueueClient::new(base, request_timeout)?))
        }
        Endpoint::Directory(_) => Err(TransportError::UnsupportedEndpoint(endpoint.to_string())),
    }
}
