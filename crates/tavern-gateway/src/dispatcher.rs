use crate::connection::ConnectionRegistry;
use crate::push::{DeliveryError, PushEndpoint};
use std::sync::Arc;
use tavern_core::Payload;
use tracing::{debug, info, warn};

/// Per-publish delivery counts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub gone: usize,
    pub failed: usize,
}

/// Fans a message out to every live connection of a session.
///
/// Delivery is at-most-once per call and never fails the caller: gone
/// connections are expired, transient failures are logged.
pub struct BroadcastDispatcher {
    connections: Arc<dyn ConnectionRegistry>,
    push: Arc<dyn PushEndpoint>,
}

impl BroadcastDispatcher {
    pub fn new(connections: Arc<dyn ConnectionRegistry>, push: Arc<dyn PushEndpoint>) -> Self {
        Self { connections, push }
    }

    pub async fn publish(&self, session_id: &str, message: impl Into<Payload>) -> PublishReport {
        let payload = message.into().to_bytes();
        let mut report = PublishReport::default();

        let handles = match self.connections.active_connections(session_id).await {
            Ok(handles) => handles,
            Err(e) => {
                warn!(session_id, error = %e, "Failed to resolve connections for publish");
                return report;
            }
        };

        for handle in handles {
            match self.push.post_to_connection(&handle, &payload).await {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::Gone) => {
                    info!(session_id, connection_id = %handle, "Connection gone, expiring");
                    if let Err(e) = self.connections.expire(&handle).await {
                        warn!(connection_id = %handle, error = %e, "Failed to expire connection");
                    }
                    report.gone += 1;
                }
                Err(DeliveryError::Transient(reason)) => {
                    warn!(session_id, connection_id = %handle, error = %reason, "Delivery failed");
                    report.failed += 1;
                }
            }
        }

        debug!(
            session_id,
            delivered = report.delivered,
            gone = report.gone,
            failed = report.failed,
            "Published"
        );
        report
    }
}
