//! Best-effort outbound path for probe telemetry.
//!
//! Producers never wait on the socket: messages are queued on the live
//! connection's bounded channel and written by the connection task. With no
//! live connection, or a full queue, the message is dropped.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::bridge::protocol::{Message, Operate};

/// Cloneable handle for sending messages to the agent.
///
/// Holds the currently published connection queue, if any. Safe to use from
/// any thread concurrently with the connection task.
#[derive(Clone, Default)]
pub struct OutboundSender {
    slot: Arc<RwLock<Option<mpsc::Sender<Message>>>>,
}

impl OutboundSender {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Publish the queue of a newly established connection.
    pub(crate) fn attach(&self, tx: mpsc::Sender<Message>) {
        *self.write_slot() = Some(tx);
    }

    pub(crate) fn detach(&self) {
        self.write_slot().take();
    }

    pub fn is_connected(&self) -> bool {
        self.read_slot().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Queue `payload` for the agent under `operate`.
    ///
    /// Never blocks and never reports failure: when disconnected or
    /// backlogged the message is silently dropped.
    pub fn write<T: Serialize + ?Sized>(&self, operate: Operate, payload: &T) {
        let Some(tx) = self.read_slot().clone() else {
            tracing::trace!(%operate, "Not connected, dropping outbound message");
            return;
        };

        let message = match Message::with_payload(operate, payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(%operate, error = %e, "Failed to serialize outbound payload");
                return;
            }
        };

        match tx.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(%operate, "Outbound queue full, dropping message");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::trace!(%operate, "Connection closing, dropping outbound message");
            }
        }
    }

    fn read_slot(&self) -> RwLockReadGuard<'_, Option<mpsc::Sender<Message>>> {
        self.slot.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_slot(&self) -> RwLockWriteGuard<'_, Option<mpsc::Sender<Message>>> {
        self.slot.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::Heartbeat;
    use serde_json::json;

    #[test]
    fn write_without_connection_is_silent() {
        let sender = OutboundSender::new();
        assert!(!sender.is_connected());
        sender.write(Operate::Heartbeat, &Heartbeat::default());
    }

    #[test]
    fn write_queues_on_attached_connection() {
        let sender = OutboundSender::new();
        let (tx, mut rx) = mpsc::channel(4);
        sender.attach(tx);

        sender.write(Operate::Heartbeat, &json!({"filter": "f-1"}));

        let message = rx.try_recv().unwrap();
        assert_eq!(message.operate, Operate::Heartbeat);
        assert_eq!(message.data, json!({"filter": "f-1"}));
    }

    #[test]
    fn detached_sender_drops_messages() {
        let sender = OutboundSender::new();
        let (tx, mut rx) = mpsc::channel(4);
        sender.attach(tx);
        sender.detach();

        sender.write(Operate::Detect, &json!(null));

        assert!(!sender.is_connected());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        let sender = OutboundSender::new();
        let (tx, mut rx) = mpsc::channel(1);
        sender.attach(tx);

        sender.write(Operate::Heartbeat, &json!({"n": 1}));
        sender.write(Operate::Heartbeat, &json!({"n": 2}));

        assert_eq!(rx.try_recv().unwrap().data, json!({"n": 1}));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_receiver_reads_as_disconnected() {
        let sender = OutboundSender::new();
        let (tx, rx) = mpsc::channel(1);
        sender.attach(tx);
        drop(rx);

        assert!(!sender.is_connected());
        sender.write(Operate::Heartbeat, &json!({}));
    }
}
