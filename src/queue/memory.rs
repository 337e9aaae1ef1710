// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! In-process leasing queue
//!
//! Behaves like a hosted at-least-once queue: receiving hides a message for the
//! lease duration, deleting needs the current unexpired lease, and an expired lease
//! makes the message visible again. Used for development runs and tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::time::{timeout, Instant};
use tracing::debug;
use uuid::Uuid;

use super::{LeaseHandle, MessageAttributes, QueueClient, ReceivedMessage, TransportError};

/// Longest single sleep while waiting, so expiring leases are noticed
const WAIT_SLICE: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
struct StoredMessage {
    payload: Vec<u8>,
    attributes: MessageAttributes,
    receive_count: u32,
    lease: Option<String>,
    invisible_until: Option<Instant>,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.invisible_until.map_or(true, |until| until <= now)
    }
}

/// Counters for the memory queue
#[derive(Debug, Clone, Default)]
pub struct MemoryQueueStats {
    pub sent: u64,
    pub received: u64,
    pub redelivered: u64,
    pub deleted: u64,
}

#[derive(Clone)]
pub struct MemoryQueue {
    messages: Arc<RwLock<VecDeque<StoredMessage>>>,
    stats: Arc<RwLock<MemoryQueueStats>>,
    arrivals: Arc<Notify>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            messages: Arc::new(RwLock::new(VecDeque::new())),
            stats: Arc::new(RwLock::new(MemoryQueueStats::default())),
            arrivals: Arc::new(Notify::new()),
        }
    }

    /// Messages not yet deleted, leased or not
    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }

    /// Messages currently held under an unexpired lease
    pub async fn in_flight(&self) -> usize {
        let now = Instant::now();
        self.messages
            .read()
            .await
            .iter()
            .filter(|m| !m.is_visible(now))
            .count()
    }

    pub async fn stats(&self) -> MemoryQueueStats {
        self.stats.read().await.clone()
    }

    /// Attributes of every stored message, oldest first
    pub async fn attributes(&self) -> Vec<MessageAttributes> {
        self.messages
            .read()
            .await
            .iter()
            .map(|m| m.attributes.clone())
            .collect()
    }

    async fn try_lease(&self, lease: Duration) -> Option<ReceivedMessage> {
        let now = Instant::now();
        let mut messages = self.messages.write().await;
        let message = messages.iter_mut().find(|m| m.is_visible(now))?;

        let handle = Uuid::new_v4().to_string();
        message.lease = Some(handle.clone());
        message.invisible_until = Some(now + lease);
        message.receive_count += 1;
        let redelivery = message.receive_count > 1;
        let payload = message.payload.clone();
        drop(messages);

        let mut stats = self.stats.write().await;
        stats.received += 1;
        if redelivery {
            stats.redelivered += 1;
        }

        Some(ReceivedMessage {
            payload,
            lease: LeaseHandle::new(handle),
        })
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueClient for MemoryQueue {
    async fn receive(
        &self,
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<ReceivedMessage>, TransportError> {
        let deadline = Instant::now() + wait;

        loop {
            if let Some(message) = self.try_lease(lease).await {
                debug!("📨 Leased message {}", message.lease);
                return Ok(Some(message));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let _ = timeout((deadline - now).min(WAIT_SLICE), self.arrivals.notified()).await;
        }
    }

    async fn delete(&self, lease: &LeaseHandle) -> Result<(), TransportError> {
        let now = Instant::now();
        let mut messages = self.messages.write().await;
        // Only the current, unexpired lease may delete
        let position = messages
            .iter()
            .position(|m| m.lease.as_deref() == Some(lease.as_str()) && !m.is_visible(now))
            .ok_or_else(|| TransportError::UnknownLease(lease.to_string()))?;
        messages.remove(position);
        drop(messages);

        self.stats.write().await.deleted += 1;
        Ok(())
    }

    async fn send(
        &self,
        payload: Vec<u8>,
        attributes: MessageAttributes,
    ) -> Result<(), TransportError> {
        self.messages.write().await.push_back(StoredMessage {
            payload,
            attributes,
            receive_count: 0,
            lease: None,
            invisible_until: None,
        });
        self.stats.write().await.sent += 1;
        self.arrivals.notify_one();
        Ok(())
    }
}
