use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tavern_core::{TavernError, TavernResult};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Default lifetime of a connection record.
pub const DEFAULT_CONNECTION_TTL_SECS: i64 = 360_000;

/// One client attachment to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub handle: String,
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
}

impl ConnectionRecord {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Maps connection handles to their owning session.
///
/// Records are expired logically and reclaimed by [`ConnectionRegistry::sweep`],
/// so a scan racing with a detach never reads a half-removed record.
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// Upserts the record for `handle` with a fresh TTL.
    async fn attach(&self, session_id: &str, handle: &str) -> TavernResult<()>;

    /// Marks the record expired now. Fails with `NotFound` for unknown handles.
    async fn detach(&self, handle: &str) -> TavernResult<()>;

    /// Every unexpired handle of the session, evaluated at call time.
    async fn active_connections(&self, session_id: &str) -> TavernResult<Vec<String>>;

    /// Marks the record expired now. Idempotent; unknown handles are ignored.
    async fn expire(&self, handle: &str) -> TavernResult<()>;

    /// Expires every record of the session and returns how many were live.
    async fn expire_session(&self, session_id: &str) -> TavernResult<usize>;

    /// Hard-deletes expired records and returns how many were removed.
    async fn sweep(&self) -> TavernResult<usize>;
}

/// In-process registry.
pub struct MemoryConnectionRegistry {
    records: RwLock<HashMap<String, ConnectionRecord>>,
    ttl: Duration,
}

impl MemoryConnectionRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for MemoryConnectionRegistry {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_CONNECTION_TTL_SECS))
    }
}

#[async_trait]
impl ConnectionRegistry for MemoryConnectionRegistry {
    async fn attach(&self, session_id: &str, handle: &str) -> TavernResult<()> {
        let record = ConnectionRecord {
            handle: handle.to_string(),
            session_id: session_id.to_string(),
            expires_at: Utc::now() + self.ttl,
        };
        self.records.write().await.insert(handle.to_string(), record);
        info!(session_id, connection_id = handle, "Connection attached");
        Ok(())
    }

    async fn detach(&self, handle: &str) -> TavernResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(handle)
            .ok_or_else(|| TavernError::NotFound(format!("connection {handle}")))?;
        record.expires_at = Utc::now();
        info!(session_id = %record.session_id, connection_id = handle, "Connection detached");
        Ok(())
    }

    async fn active_connections(&self, session_id: &str) -> TavernResult<Vec<String>> {
        let now = Utc::now();
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.session_id == session_id && r.is_active(now))
            .map(|r| r.handle.clone())
            .collect())
    }

    async fn expire(&self, handle: &str) -> TavernResult<()> {
        let now = Utc::now();
        if let Some(record) = self.records.write().await.get_mut(handle) {
            if record.is_active(now) {
                record.expires_at = now;
                debug!(connection_id = handle, "Connection expired");
            }
        }
        Ok(())
    }

    async fn expire_session(&self, session_id: &str) -> TavernResult<usize> {
        let now = Utc::now();
        let mut expired = 0;
        for record in self.records.write().await.values_mut() {
            if record.session_id == session_id && record.is_active(now) {
                record.expires_at = now;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn sweep(&self) -> TavernResult<usize> {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.is_active(now));
        Ok(before - records.len())
    }
}
