//! Client side of the rendezvous mailbox service.
//!
//! The mailbox is a TTL key-value store with three operations: claim or
//! look up the room host, deposit a signal for a device, and destructively
//! drain the signals addressed to us. Everything after the direct transport
//! opens bypasses it entirely.

use std::future::Future;

use thiserror::Error;

use nearcast_shared::protocol::{JoinInfo, Signal};
use nearcast_shared::types::{DeviceId, RoomId};

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("mailbox request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("mailbox returned status {0}")]
    Status(u16),

    #[error("mailbox response decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// The mailbox surface consumed by a room session.
///
/// `drain_signals` is a destructive read: a signal returned once is never
/// returned again. Signals may be lost (TTL expiry) or arrive out of order;
/// consumers tolerate both.
pub trait Mailbox: Send + Sync + 'static {
    /// Ask who hosts `room`, atomically claiming host status if nobody does.
    fn join(
        &self,
        room: &RoomId,
        device: &DeviceId,
    ) -> impl Future<Output = Result<JoinInfo, MailboxError>> + Send;

    /// Deposit a signal for `to`.
    fn post_signal(
        &self,
        room: &RoomId,
        to: &DeviceId,
        signal: &Signal,
    ) -> impl Future<Output = Result<(), MailboxError>> + Send;

    /// Drain all pending signals addressed to `device`, consuming them.
    fn drain_signals(
        &self,
        room: &RoomId,
        device: &DeviceId,
    ) -> impl Future<Output = Result<Vec<Signal>, MailboxError>> + Send;
}

/// HTTP mailbox client against the nearcast-server surface.
#[derive(Debug, Clone)]
pub struct HttpMailbox {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMailbox {
    /// `base_url` is the service root, e.g. `http://relay.example:8080`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

impl Mailbox for HttpMailbox {
    async fn join(&self, room: &RoomId, device: &DeviceId) -> Result<JoinInfo, MailboxError> {
        let url = format!("{}/api/join/{}/{}", self.base_url, room, device);
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(MailboxError::Status(resp.status().as_u16()));
        }
        Ok(resp.json().await?)
    }

    async fn post_signal(
        &self,
        room: &RoomId,
        to: &DeviceId,
        signal: &Signal,
    ) -> Result<(), MailboxError> {
        let url = format!("{}/api/signal/{}/{}", self.base_url, room, to);
        let resp = self.client.post(url).json(signal).send().await?;
        if !resp.status().is_success() {
            return Err(MailboxError::Status(resp.status().as_u16()));
        }
        Ok(())
    }

    async fn drain_signals(
        &self,
        room: &RoomId,
        device: &DeviceId,
    ) -> Result<Vec<Signal>, MailboxError> {
        let url = format!("{}/api/signals/{}/{}", self.base_url, room, device);
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(MailboxError::Status(resp.status().as_u16()));
        }
        Ok(resp.json().await?)
    }
}
