use crate::session::{Admission, Session};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use tavern_core::{ChatTurn, DialogueEntry, Participant, TavernError, TavernResult};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Owner of session records.
///
/// Every mutation is keyed by session id and fails with
/// [`TavernError::NotFound`] when the session does not exist; only
/// [`SessionStore::create_if_absent`] creates records. Expired records behave
/// as absent.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str) -> TavernResult<Option<Session>>;

    /// Stores `session` unless a live record with the same id exists. Returns the
    /// record now stored and whether this call wrote it.
    async fn create_if_absent(&self, session: Session) -> TavernResult<(Session, bool)>;

    /// Atomically checks and sets the processing flag.
    async fn try_begin_processing(&self, session_id: &str, lease: Duration)
        -> TavernResult<Admission>;

    /// Releases the flag held under `token`. Returns false, leaving the flag
    /// untouched, when another action has since taken the lease over.
    async fn finish_processing(&self, session_id: &str, token: Uuid) -> TavernResult<bool>;

    /// Merges participants and bios into the stored roster. Names already on the
    /// roster and bios already stored are left untouched.
    async fn update_roster(
        &self,
        session_id: &str,
        roster: &[Participant],
        bios: &HashMap<String, String>,
    ) -> TavernResult<()>;

    /// Appends to the transcript and the generator history.
    async fn append_transcript(
        &self,
        session_id: &str,
        dialogue: &[DialogueEntry],
        turns: &[ChatTurn],
    ) -> TavernResult<()>;

    /// Removes the record. Returns whether a record was removed.
    async fn delete(&self, session_id: &str) -> TavernResult<bool>;

    async fn list(&self) -> TavernResult<Vec<String>>;

    /// Hard-deletes expired records, returning how many were removed.
    async fn sweep_expired(&self) -> TavernResult<usize>;
}

fn not_found(session_id: &str) -> TavernError {
    TavernError::NotFound(format!("session {session_id}"))
}

// ---------------------------------------------------------------------------
// MemorySessionStore
// ---------------------------------------------------------------------------

/// Process-local session store. Suitable for tests and single-node deployments
/// that accept losing sessions on restart.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn modify<T: Send>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut Session) -> T + Send,
    ) -> TavernResult<T> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(session) if !session.is_expired(Utc::now()) => Ok(f(session)),
            _ => Err(not_found(session_id)),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session_id: &str) -> TavernResult<Option<Session>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .filter(|s| !s.is_expired(Utc::now()))
            .cloned())
    }

    async fn create_if_absent(&self, session: Session) -> TavernResult<(Session, bool)> {
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(&session.session_id) {
            if !existing.is_expired(Utc::now()) {
                return Ok((existing.clone(), false));
            }
        }
        sessions.insert(session.session_id.clone(), session.clone());
        Ok((session, true))
    }

    async fn try_begin_processing(
        &self,
        session_id: &str,
        lease: Duration,
    ) -> TavernResult<Admission> {
        self.modify(session_id, |s| s.begin_processing(Utc::now(), lease))
            .await
    }

    async fn finish_processing(&self, session_id: &str, token: Uuid) -> TavernResult<bool> {
        self.modify(session_id, |s| s.finish_processing(token)).await
    }

    async fn update_roster(
        &self,
        session_id: &str,
        roster: &[Participant],
        bios: &HashMap<String, String>,
    ) -> TavernResult<()> {
        self.modify(session_id, |s| s.merge_roster(roster, bios))
            .await
    }

    async fn append_transcript(
        &self,
        session_id: &str,
        dialogue: &[DialogueEntry],
        turns: &[ChatTurn],
    ) -> TavernResult<()> {
        self.modify(session_id, |s| s.append_transcript(dialogue, turns))
            .await
    }

    async fn delete(&self, session_id: &str) -> TavernResult<bool> {
        Ok(self.sessions.write().await.remove(session_id).is_some())
    }

    async fn list(&self) -> TavernResult<Vec<String>> {
        let now = Utc::now();
        let sessions = self.sessions.read().await;
        Ok(sessions
            .values()
            .filter(|s| !s.is_expired(now))
            .map(|s| s.session_id.clone())
            .collect())
    }

    async fn sweep_expired(&self) -> TavernResult<usize> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now));
        Ok(before - sessions.len())
    }
}

// ---------------------------------------------------------------------------
// FileSessionStore
// ---------------------------------------------------------------------------

/// File-based session store (one JSON file per session).
///
/// Session ids are caller-chosen, so file names are the hex encoding of the id.
/// Writes go through a temporary file and a rename, and every read-modify-write
/// cycle runs under one store-wide lock.
pub struct FileSessionStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSessionStore {
    pub async fn new(dir: PathBuf) -> TavernResult<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", hex::encode(session_id)))
    }

    async fn read(&self, session_id: &str) -> TavernResult<Option<Session>> {
        let path = self.session_path(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(&path).await?;
        let session: Session = serde_json::from_str(&data)
            .map_err(|e| TavernError::Store(format!("Failed to parse session: {e}")))?;
        Ok(Some(session))
    }

    async fn write(&self, session: &Session) -> TavernResult<()> {
        let path = self.session_path(&session.session_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(session)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn modify<T: Send>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut Session) -> T + Send,
    ) -> TavernResult<T> {
        let _guard = self.write_lock.lock().await;
        let mut session = match self.read(session_id).await? {
            Some(s) if !s.is_expired(Utc::now()) => s,
            _ => return Err(not_found(session_id)),
        };
        let out = f(&mut session);
        self.write(&session).await?;
        Ok(out)
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get(&self, session_id: &str) -> TavernResult<Option<Session>> {
        Ok(self
            .read(session_id)
            .await?
            .filter(|s| !s.is_expired(Utc::now())))
    }

    async fn create_if_absent(&self, session: Session) -> TavernResult<(Session, bool)> {
        let _guard = self.write_lock.lock().await;
        if let Some(existing) = self.read(&session.session_id).await? {
            if !existing.is_expired(Utc::now()) {
                return Ok((existing, false));
            }
        }
        self.write(&session).await?;
        debug!(session_id = %session.session_id, "Session file created");
        Ok((session, true))
    }

    async fn try_begin_processing(
        &self,
        session_id: &str,
        lease: Duration,
    ) -> TavernResult<Admission> {
        self.modify(session_id, |s| s.begin_processing(Utc::now(), lease))
            .await
    }

    async fn finish_processing(&self, session_id: &str, token: Uuid) -> TavernResult<bool> {
        self.modify(session_id, |s| s.finish_processing(token)).await
    }

    async fn update_roster(
        &self,
        session_id: &str,
        roster: &[Participant],
        bios: &HashMap<String, String>,
    ) -> TavernResult<()> {
        self.modify(session_id, |s| s.merge_roster(roster, bios))
            .await
    }

    async fn append_transcript(
        &self,
        session_id: &str,
        dialogue: &[DialogueEntry],
        turns: &[ChatTurn],
    ) -> TavernResult<()> {
        self.modify(session_id, |s| s.append_transcript(dialogue, turns))
            .await
    }

    async fn delete(&self, session_id: &str) -> TavernResult<bool> {
        let _guard = self.write_lock.lock().await;
        let path = self.session_path(session_id);
        if path.exists() {
            tokio::fs::remove_file(path).await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn list(&self) -> TavernResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(stem) = name.strip_suffix(".json") {
                    if let Some(id) = hex::decode(stem)
                        .ok()
                        .and_then(|bytes| String::from_utf8(bytes).ok())
                    {
                        ids.push(id);
                    }
                }
            }
        }
        Ok(ids)
    }

    async fn sweep_expired(&self) -> TavernResult<usize> {
        let now = Utc::now();
        let mut removed = 0;
        for id in self.list().await? {
            let _guard = self.write_lock.lock().await;
            if let Some(session) = self.read(&id).await? {
                if session.is_expired(now) {
                    tokio::fs::remove_file(self.session_path(&id)).await?;
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            info!(removed, "Expired session files removed");
        }
        Ok(removed)
    }
}
