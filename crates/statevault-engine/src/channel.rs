// ABOUTME: Cross-instance broadcast channel: fire-and-forget pub/sub that never echoes to the sender.
// ABOUTME: LocalHub implements an in-process topic over tokio broadcast; NullChannel is the single-instance no-op.

use async_trait::async_trait;
use statevault_core::message::SyncMessage;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use ulid::Ulid;

/// Errors that can occur when broadcasting. Delivery is fire-and-forget, so
/// failures only surface when the underlying transport is gone entirely.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("sync channel closed")]
    Closed,
}

/// A same-origin publish/subscribe primitive for coordinating live
/// instances. Messages are unordered across senders, effectively FIFO within
/// one sender, and never delivered back to the instance that sent them.
#[async_trait]
pub trait SyncChannel: Send + Sync {
    /// Publish a message to all other live instances. No-op if nobody is
    /// listening.
    async fn broadcast(&self, message: &SyncMessage) -> Result<(), ChannelError>;

    /// Subscribe to messages from other instances. Messages sent through
    /// this channel handle are filtered out.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<SyncMessage>;
}

#[derive(Clone)]
struct Envelope {
    origin: Ulid,
    message: SyncMessage,
}

/// An in-process broadcast topic. Every [`LocalChannel`] connected through
/// the same hub sees every other channel's messages but never its own.
pub struct LocalHub {
    tx: broadcast::Sender<Envelope>,
}

impl LocalHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    /// Connect a new instance to this hub, with a fresh origin identity.
    pub fn connect(&self) -> LocalChannel {
        LocalChannel {
            origin: Ulid::new(),
            tx: self.tx.clone(),
        }
    }
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One instance's handle on a [`LocalHub`] topic.
pub struct LocalChannel {
    origin: Ulid,
    tx: broadcast::Sender<Envelope>,
}

#[async_trait]
impl SyncChannel for LocalChannel {
    async fn broadcast(&self, message: &SyncMessage) -> Result<(), ChannelError> {
        // send only fails with zero subscribers, which is fine
        let _ = self.tx.send(Envelope {
            origin: self.origin,
            message: message.clone(),
        });
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<SyncMessage> {
        let mut rx = self.tx.subscribe();
        let origin = self.origin;
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        if envelope.origin == origin {
                            continue;
                        }
                        if out_tx.send(envelope.message).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("sync channel lagged, dropped {skipped} messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        out_rx
    }
}

/// A channel that drops every broadcast and never delivers anything, for
/// applications running a single instance.
#[derive(Default)]
pub struct NullChannel {
    // Senders are kept alive so subscribers pend forever instead of closing.
    keepalive: std::sync::Mutex<Vec<mpsc::UnboundedSender<SyncMessage>>>,
}

impl NullChannel {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SyncChannel for NullChannel {
    async fn broadcast(&self, _message: &SyncMessage) -> Result<(), ChannelError> {
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<SyncMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.keepalive.lock().unwrap().push(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;

    fn update(store: &str) -> SyncMessage {
        SyncMessage::StateUpdate {
            store_name: store.to_string(),
            data: json!({"n": 1}),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn messages_reach_other_instances() {
        let hub = LocalHub::new();
        let a = hub.connect();
        let b = hub.connect();

        let mut b_rx = b.subscribe();
        a.broadcast(&update("counter")).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), b_rx.recv())
            .await
            .expect("should receive within timeout")
            .expect("channel should be open");
        match received {
            SyncMessage::StateUpdate { store_name, .. } => assert_eq!(store_name, "counter"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn sender_never_receives_its_own_messages() {
        let hub = LocalHub::new();
        let a = hub.connect();
        let b = hub.connect();

        let mut a_rx = a.subscribe();
        let mut b_rx = b.subscribe();

        a.broadcast(&update("counter")).await.unwrap();

        // b sees it...
        tokio::time::timeout(Duration::from_secs(1), b_rx.recv())
            .await
            .expect("b should receive")
            .expect("open");

        // ...a does not.
        let echo = tokio::time::timeout(Duration::from_millis(100), a_rx.recv()).await;
        assert!(echo.is_err(), "sender must not receive its own broadcast");
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_fine() {
        let hub = LocalHub::new();
        let a = hub.connect();
        a.broadcast(&update("counter")).await.unwrap();
    }

    #[tokio::test]
    async fn null_channel_delivers_nothing() {
        let channel = NullChannel::new();
        let mut rx = channel.subscribe();
        channel.broadcast(&update("counter")).await.unwrap();

        let received = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(received.is_err(), "null channel must stay silent");
    }
}
