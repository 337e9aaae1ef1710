// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! JSON-over-HTTP queue adapter
//!
//! Protocol, relative to the configured base URL:
//! - `POST receive` with `{"wait_seconds", "lease_seconds"}` answers
//!   `200 {"payload", "lease"}` or `204` when the queue is empty
//! - `DELETE leases/{lease}` acknowledges; `404` means the lease is unknown
//! - `POST messages` with `{"payload", "attributes"}` enqueues

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{LeaseHandle, MessageAttributes, QueueClient, ReceivedMessage, TransportError};
use crate::transport::join_url;

/// Extra time allowed on top of the long-poll wait
const RECEIVE_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct ReceiveRequest {
    wait_seconds: u64,
    lease_seconds: u64,
}

#[derive(Debug, Deserialize)]
struct ReceiveResponse {
    payload: String,
    lease: String,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    payload: &'a str,
    attributes: &'a MessageAttributes,
}

pub struct HttpQueueClient {
    client: Client,
    base: Url,
    request_timeout: Duration,
}

impl HttpQueueClient {
    pub fn new(base: Url, request_timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(concat!("fontdetective-worker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::unreachable(base.as_str(), e))?;

        Ok(Self {
            client,
            base,
            request_timeout,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn check_status(status: StatusCode, url: &Url) -> Result<(), TransportError> {
        if status.is_success() {
            Ok(())
        } else {
            Err(TransportError::HttpStatus {
                status: status.as_u16(),
                endpoint: url.to_string(),
            })
        }
    }
}

#[async_trait]
impl QueueClient for HttpQueueClient {
    async fn receive(
        &self,
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<ReceivedMessage>, TransportError> {
        let url = join_url(&self.base, &["receive"])?;
        let response = self
            .client
            .post(url.clone())
            .timeout(wait + RECEIVE_GRACE)
            .json(&ReceiveRequest {
                wait_seconds: wait.as_secs(),
                lease_seconds: lease.as_secs(),
            })
            .send()
            .await
            .map_err(|e| TransportError::unreachable(url.as_str(), e))?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        Self::check_status(response.status(), &url)?;

        let body: ReceiveResponse = response
            .json()
            .await
            .map_err(|e| TransportError::unreachable(url.as_str(), e))?;
        debug!("📨 Leased message {} from {}", body.lease, self.base);

        Ok(Some(ReceivedMessage {
            payload: body.payload.into_bytes(),
            lease: LeaseHandle::new(body.lease),
        }))
    }

    async fn delete(&self, lease: &LeaseHandle) -> Result<(), TransportError> {
        let url = join_url(&self.base, &["leases", lease.as_str()])?;
        let response = self
            .client
            .delete(url.clone())
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| TransportError::unreachable(url.as_str(), e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(TransportError::UnknownLease(lease.to_string()));
        }
        Self::check_status(response.status(), &url)
    }

    async fn send(
        &self,
        payload: Vec<u8>,
        attributes: MessageAttributes,
    ) -> Result<(), TransportError> {
        let url = join_url(&self.base, &["messages"])?;
        let payload = String::from_utf8(payload).map_err(|e| {
            TransportError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;

        let response = self
            .client
            .post(url.clone())
            .timeout(self.request_timeout)
            .json(&SendRequest {
                payload: &payload,
                attributes: &attributes,
            })
            .send()
            .await
            .map_err(|e| TransportError::unreachable(url.as_str(), e))?;

        Self::check_status(response.status(), &url)
    }
}
