//! Test doubles shared by the gateway integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use chrono::Duration;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tavern_agent::{ConversationBackend, GenerationGateway, StreamEvent};
use tavern_core::{ChatTurn, DialogueEntry, Participant, TavernError, TavernResult};
use tavern_gateway::{
    DeliveryError, MemoryConnectionRegistry, OrchestratorConfig, PushEndpoint,
    SessionOrchestrator,
};
use tavern_session::{Admission, MemorySessionStore, Session, SessionStore};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;

/// What the scripted backend observed.
#[derive(Default)]
pub struct BackendLog {
    pub opened: AtomicUsize,
    pub bio_runs: AtomicUsize,
    pub action_runs: AtomicUsize,
    pub closed: Mutex<Vec<String>>,
    pub appended: Mutex<Vec<(String, String)>>,
}

/// Generator double: bio runs answer with markdown blocks for the requested
/// participants, action runs stream a fixed reply word by word.
pub struct ScriptedBackend {
    pub log: Arc<BackendLog>,
    action_reply: Result<String, String>,
    bio_reply: Option<String>,
    started: Arc<Notify>,
    gate: Option<Arc<Notify>>,
    gates: std::sync::Mutex<VecDeque<Arc<Notify>>>,
}

impl ScriptedBackend {
    pub fn new(reply: &str) -> Self {
        Self {
            log: Arc::new(BackendLog::default()),
            action_reply: Ok(reply.to_string()),
            bio_reply: None,
            started: Arc::new(Notify::new()),
            gate: None,
            gates: std::sync::Mutex::new(VecDeque::new()),
        }
    }

    /// Action runs fail with `message`.
    pub fn failing(mut self, message: &str) -> Self {
        self.action_reply = Err(message.to_string());
        self
    }

    /// Bio runs answer with `text` instead of generated markdown.
    pub fn with_bio_reply(mut self, text: &str) -> Self {
        self.bio_reply = Some(text.to_string());
        self
    }

    /// Action runs signal `started`, then hold until `gate` is notified.
    pub fn gated(mut self, started: Arc<Notify>, gate: Arc<Notify>) -> Self {
        self.started = started;
        self.gate = Some(gate);
        self
    }

    /// Each action run signals `started`, then holds on its own gate, taken
    /// from `gates` in order.
    pub fn gated_in_turn(mut self, started: Arc<Notify>, gates: Vec<Arc<Notify>>) -> Self {
        self.started = started;
        self.gates = std::sync::Mutex::new(gates.into());
        self
    }
}

pub fn markdown_bios(participants: &[Participant]) -> String {
    participants
        .iter()
        .map(|p| {
            format!(
                "=====================\n# {name} - {role}\n{name} is a {role}.\n---------------------",
                name = p.name,
                role = p.role
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl ConversationBackend for ScriptedBackend {
    async fn open_conversation(&self) -> TavernResult<String> {
        let n = self.log.opened.fetch_add(1, Ordering::SeqCst);
        Ok(format!("thread_{n}"))
    }

    async fn append_user_turn(&self, conversation: &str, content: &str) -> TavernResult<()> {
        self.log
            .appended
            .lock()
            .await
            .push((conversation.to_string(), content.to_string()));
        Ok(())
    }

    async fn run_stream(
        &self,
        conversation: &str,
        instructions: Option<&str>,
    ) -> TavernResult<(mpsc::Receiver<StreamEvent>, JoinHandle<TavernResult<String>>)> {
        let (tx, rx) = mpsc::channel(64);

        if instructions.is_some() {
            self.log.bio_runs.fetch_add(1, Ordering::SeqCst);
            let text = match &self.bio_reply {
                Some(text) => text.clone(),
                None => {
                    let appended = self.log.appended.lock().await;
                    let request = appended
                        .iter()
                        .rev()
                        .find(|(conv, _)| conv == conversation)
                        .map(|(_, content)| content.clone())
                        .unwrap_or_default();
                    let participants: Vec<Participant> =
                        serde_json::from_str(&request).unwrap_or_default();
                    markdown_bios(&participants)
                }
            };
            let handle = tokio::spawn(async move {
                let _ = tx.send(StreamEvent::TextDelta { text: text.clone() }).await;
                let _ = tx.send(StreamEvent::Done).await;
                Ok(text)
            });
            return Ok((rx, handle));
        }

        self.log.action_runs.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        let gate = self
            .gates
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.gate.clone());
        let reply = self.action_reply.clone();
        let handle = tokio::spawn(async move {
            if let Some(gate) = gate {
                gate.notified().await;
            }
            match reply {
                Ok(text) => {
                    for word in text.split_inclusive(' ') {
                        let _ = tx
                            .send(StreamEvent::TextDelta {
                                text: word.to_string(),
                            })
                            .await;
                    }
                    let _ = tx.send(StreamEvent::Done).await;
                    Ok(text)
                }
                Err(message) => {
                    let _ = tx
                        .send(StreamEvent::Error {
                            message: message.clone(),
                        })
                        .await;
                    Err(TavernError::Generation(message))
                }
            }
        });
        Ok((rx, handle))
    }

    async fn list_messages(&self, _conversation: &str) -> TavernResult<Vec<ChatTurn>> {
        Ok(Vec::new())
    }

    async fn close_conversation(&self, conversation: &str) -> TavernResult<()> {
        self.log.closed.lock().await.push(conversation.to_string());
        Ok(())
    }
}

/// Push endpoint that records deliveries; handles marked gone fail terminally.
#[derive(Default)]
pub struct RecordingPush {
    pub gone: Mutex<HashSet<String>>,
    pub delivered: Mutex<Vec<(String, String)>>,
}

impl RecordingPush {
    pub async fn mark_gone(&self, handle: &str) {
        self.gone.lock().await.insert(handle.to_string());
    }

    pub async fn messages_for(&self, handle: &str) -> Vec<String> {
        self.delivered
            .lock()
            .await
            .iter()
            .filter(|(h, _)| h == handle)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl PushEndpoint for RecordingPush {
    async fn post_to_connection(&self, handle: &str, payload: &[u8]) -> Result<(), DeliveryError> {
        if self.gone.lock().await.contains(handle) {
            return Err(DeliveryError::Gone);
        }
        self.delivered.lock().await.push((
            handle.to_string(),
            String::from_utf8_lossy(payload).into_owned(),
        ));
        Ok(())
    }
}

pub struct Harness {
    pub orchestrator: Arc<SessionOrchestrator>,
    pub sessions: Arc<MemorySessionStore>,
    pub registry: Arc<MemoryConnectionRegistry>,
    pub push: Arc<RecordingPush>,
    pub log: Arc<BackendLog>,
}

pub fn harness(backend: ScriptedBackend) -> Harness {
    harness_with_config(backend, OrchestratorConfig::default())
}

pub fn harness_with_config(backend: ScriptedBackend, config: OrchestratorConfig) -> Harness {
    let log = backend.log.clone();
    let sessions = Arc::new(MemorySessionStore::new());
    let registry = Arc::new(MemoryConnectionRegistry::default());
    let push = Arc::new(RecordingPush::default());
    let generator = Arc::new(GenerationGateway::from_backend(Box::new(backend)));

    let store: Arc<dyn SessionStore> = sessions.clone();
    let orchestrator = Arc::new(SessionOrchestrator::new(
        store,
        registry.clone(),
        generator,
        push.clone(),
        config,
    ));

    Harness {
        orchestrator,
        sessions,
        registry,
        push,
        log,
    }
}

/// Session store whose backing storage is unreachable. Every call fails with
/// [`TavernError::Store`] carrying [`STORE_FAILURE`].
pub struct FailingSessionStore;

pub const STORE_FAILURE: &str = "connection refused by sessions-table.internal:8000";

fn store_down<T>() -> TavernResult<T> {
    Err(TavernError::Store(STORE_FAILURE.to_string()))
}

#[async_trait]
impl SessionStore for FailingSessionStore {
    async fn get(&self, _session_id: &str) -> TavernResult<Option<Session>> {
        store_down()
    }

    async fn create_if_absent(&self, _session: Session) -> TavernResult<(Session, bool)> {
        store_down()
    }

    async fn try_begin_processing(
        &self,
        _session_id: &str,
        _lease: Duration,
    ) -> TavernResult<Admission> {
        store_down()
    }

    async fn finish_processing(
        &self,
        _session_id: &str,
        _token: uuid::Uuid,
    ) -> TavernResult<bool> {
        store_down()
    }

    async fn update_roster(
        &self,
        _session_id: &str,
        _roster: &[Participant],
        _bios: &HashMap<String, String>,
    ) -> TavernResult<()> {
        store_down()
    }

    async fn append_transcript(
        &self,
        _session_id: &str,
        _dialogue: &[DialogueEntry],
        _turns: &[ChatTurn],
    ) -> TavernResult<()> {
        store_down()
    }

    async fn delete(&self, _session_id: &str) -> TavernResult<bool> {
        store_down()
    }

    async fn list(&self) -> TavernResult<Vec<String>> {
        store_down()
    }

    async fn sweep_expired(&self) -> TavernResult<usize> {
        store_down()
    }
}

/// Orchestrator over a [`FailingSessionStore`].
pub fn failing_store_orchestrator(backend: ScriptedBackend) -> Arc<SessionOrchestrator> {
    Arc::new(SessionOrchestrator::new(
        Arc::new(FailingSessionStore),
        Arc::new(MemoryConnectionRegistry::default()),
        Arc::new(GenerationGateway::from_backend(Box::new(backend))),
        Arc::new(RecordingPush::default()),
        OrchestratorConfig::default(),
    ))
}

pub fn seth_and_hank() -> Vec<Participant> {
    vec![
        Participant::new("Seth", "Wizard"),
        Participant::new("Hank", "Warrior"),
    ]
}

pub fn participants_only(users: Vec<Participant>) -> tavern_core::Action {
    tavern_core::Action {
        users: Some(users),
        ..Default::default()
    }
}

pub fn speech(user: &str, msg: &str) -> tavern_core::Action {
    tavern_core::Action {
        user: Some(user.to_string()),
        msg: Some(msg.to_string()),
        ..Default::default()
    }
}
