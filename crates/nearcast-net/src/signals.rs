//! Signal deposit and drain on top of a [`Mailbox`].
//!
//! Mailbox I/O is deliberately lossy at this layer: deposits are
//! fire-and-forget and drain errors yield an empty batch. A lost signal is
//! repaired by renegotiation, not by signal-level retry, so failures are
//! logged and swallowed rather than surfaced.

use tracing::{debug, warn};

use nearcast_shared::protocol::{Signal, SignalKind};
use nearcast_shared::types::{DeviceId, RoomId};

use crate::mailbox::Mailbox;

pub struct SignalChannel<M: Mailbox> {
    mailbox: M,
    room: RoomId,
    local: DeviceId,
}

impl<M: Mailbox> SignalChannel<M> {
    pub fn new(mailbox: M, room: RoomId, local: DeviceId) -> Self {
        Self {
            mailbox,
            room,
            local,
        }
    }

    /// Deposit a signal for `to`, tagged with the local device as sender.
    /// Failures are logged and swallowed.
    pub async fn send(&self, to: &DeviceId, kind: SignalKind, data: serde_json::Value) {
        let signal = Signal {
            from: self.local.clone(),
            kind,
            data,
        };

        debug!(to = %to.short(), kind = ?kind, "Depositing signal");

        if let Err(e) = self.mailbox.post_signal(&self.room, to, &signal).await {
            warn!(to = %to.short(), error = %e, "Failed to deposit signal");
        }
    }

    /// Drain all signals addressed to the local device. Each returned signal
    /// is delivered at most once; a drain failure yields an empty batch and
    /// the next poll cycle retries implicitly.
    pub async fn receive(&self) -> Vec<Signal> {
        match self.mailbox.drain_signals(&self.room, &self.local).await {
            Ok(signals) => {
                if !signals.is_empty() {
                    debug!(count = signals.len(), room = %self.room, "Drained signals");
                }
                signals
            }
            Err(e) => {
                warn!(room = %self.room, error = %e, "Signal drain failed");
                Vec::new()
            }
        }
    }
}
