use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

/// Per-connection delivery failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The recipient no longer exists; its record should be expired.
    #[error("connection is gone")]
    Gone,

    /// Delivery failed this time; the connection may still be alive.
    #[error("transient delivery failure: {0}")]
    Transient(String),
}

/// A push-capable endpoint that can send bytes to one connection.
#[async_trait]
pub trait PushEndpoint: Send + Sync {
    async fn post_to_connection(&self, handle: &str, payload: &[u8]) -> Result<(), DeliveryError>;
}

/// Push endpoint for sockets served by this process.
///
/// Each WebSocket task registers the sending half of its outbound channel;
/// a missing or closed channel means the socket is gone.
pub struct LocalPushEndpoint {
    senders: RwLock<HashMap<String, mpsc::UnboundedSender<Vec<u8>>>>,
}

impl LocalPushEndpoint {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn register(&self, handle: &str, tx: mpsc::UnboundedSender<Vec<u8>>) {
        self.senders.write().await.insert(handle.to_string(), tx);
    }

    pub async fn unregister(&self, handle: &str) {
        self.senders.write().await.remove(handle);
    }
}

impl Default for LocalPushEndpoint {
    fn default() -> Self {
        Self {
            senders: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl PushEndpoint for LocalPushEndpoint {
    async fn post_to_connection(&self, handle: &str, payload: &[u8]) -> Result<(), DeliveryError> {
        let senders = self.senders.read().await;
        let tx = senders.get(handle).ok_or(DeliveryError::Gone)?;
        tx.send(payload.to_vec()).map_err(|_| DeliveryError::Gone)
    }
}
