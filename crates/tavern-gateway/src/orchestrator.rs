use crate::connection::ConnectionRegistry;
use crate::dispatcher::BroadcastDispatcher;
use crate::push::PushEndpoint;
use crate::response::{CoreResponse, SessionSnapshot};
use chrono::Duration;
use std::sync::Arc;
use tavern_agent::GenerationGateway;
use tavern_core::{
    random_apology, Action, ChatTurn, DialogueEntry, TavernError, TavernResult, WAIT_MESSAGE,
};
use tavern_session::{Admission, Session, SessionStore};
use tracing::{error, info, warn};

/// Published before bios of newly joined participants are generated.
pub const JOIN_ANNOUNCEMENT: &str = "I see new members have joined our party:";
/// Published between the bios of new participants and the action's outcome.
pub const SEGUE: &str = "Now as for that action...";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Speaker name recorded for generated turns.
    pub narrator_name: String,
    /// Age after which a processing flag is considered abandoned.
    pub processing_lease: Duration,
    /// Lifetime of a newly created session.
    pub session_ttl: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            narrator_name: "Dungeon Master".to_string(),
            processing_lease: Duration::seconds(300),
            session_ttl: Duration::days(7),
        }
    }
}

/// Coordinates the session store, connection registry, generator and
/// dispatcher for every inbound operation. Holds no session state itself.
pub struct SessionOrchestrator {
    sessions: Arc<dyn SessionStore>,
    connections: Arc<dyn ConnectionRegistry>,
    generator: Arc<GenerationGateway>,
    dispatcher: BroadcastDispatcher,
    config: OrchestratorConfig,
}

impl SessionOrchestrator {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        connections: Arc<dyn ConnectionRegistry>,
        generator: Arc<GenerationGateway>,
        push: Arc<dyn PushEndpoint>,
        config: OrchestratorConfig,
    ) -> Self {
        let dispatcher = BroadcastDispatcher::new(connections.clone(), push);
        Self {
            sessions,
            connections,
            generator,
            dispatcher,
            config,
        }
    }

    pub fn dispatcher(&self) -> &BroadcastDispatcher {
        &self.dispatcher
    }

    pub fn connections(&self) -> &Arc<dyn ConnectionRegistry> {
        &self.connections
    }

    /// Returns the session, creating it with a fresh conversation if needed.
    ///
    /// Concurrent creators race on a conditional write; the loser closes the
    /// conversation it opened and adopts the stored session.
    pub async fn get_or_create(&self, session_id: &str) -> TavernResult<Session> {
        if let Some(session) = self.sessions.get(session_id).await? {
            return Ok(session);
        }

        let thread_id = self.generator.open_conversation().await?;
        let candidate = Session::new(session_id, thread_id.clone(), self.config.session_ttl);
        let (session, created) = self.sessions.create_if_absent(candidate).await?;
        if created {
            info!(session_id, thread_id = %thread_id, "Session created");
        } else {
            info!(session_id, "Session created concurrently, discarding duplicate conversation");
            self.generator.close_conversation(&thread_id).await;
        }
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> CoreResponse {
        match self.sessions.get(session_id).await {
            Ok(Some(session)) => CoreResponse::json(200, &SessionSnapshot::from(&session)),
            Ok(None) => {
                warn!(session_id, "Session not found");
                CoreResponse::error(404, "Session not found")
            }
            Err(e) => {
                error!(session_id, error = %e, "Error retrieving session");
                CoreResponse::error(500, "Internal error")
            }
        }
    }

    /// Runs one inbound action through admission, roster update, generation
    /// and persistence.
    pub async fn handle_action(&self, session_id: &str, action: &Action) -> CoreResponse {
        if action.is_empty() {
            return CoreResponse::from(&TavernError::InvalidAction(
                "Action must carry participants or a message".into(),
            ));
        }

        let session = match self.get_or_create(session_id).await {
            Ok(session) => session,
            Err(e) if e.is_infrastructure() => {
                error!(session_id, error = %e, "Session store unavailable");
                return CoreResponse::from(&e);
            }
            Err(e) => {
                error!(session_id, error = %e, "Failed to open session");
                return apology();
            }
        };

        let token = match self
            .sessions
            .try_begin_processing(session_id, self.config.processing_lease)
            .await
        {
            Ok(Admission::Admitted(token)) => token,
            Ok(Admission::InFlight) => {
                info!(session_id, "Generation in flight, asking caller to wait");
                return CoreResponse::text(200, WAIT_MESSAGE);
            }
            Err(e @ TavernError::NotFound(_)) => {
                warn!(session_id, "Session vanished before admission");
                return CoreResponse::from(&e);
            }
            Err(e) => {
                error!(session_id, error = %e, "Admission failed");
                return CoreResponse::error(503, "Service unavailable");
            }
        };

        let result = self.run_admitted(session, action).await;

        match self.sessions.finish_processing(session_id, token).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(session_id, "Processing lease was taken over, leaving flag in place")
            }
            Err(e) => warn!(session_id, error = %e, "Failed to clear processing flag"),
        }

        match result {
            Ok(response) => response,
            Err(e) => {
                error!(session_id, error = %e, "Error handling action");
                apology()
            }
        }
    }

    async fn run_admitted(&self, session: Session, action: &Action) -> TavernResult<CoreResponse> {
        // Re-read under the processing flag.
        let session = self
            .sessions
            .get(&session.session_id)
            .await?
            .ok_or_else(|| TavernError::NotFound(format!("session {}", session.session_id)))?;
        let session = &session;
        let session_id = session.session_id.as_str();
        let dispatcher = &self.dispatcher;

        if let Some(echo) = action.echo_text() {
            dispatcher.publish(session_id, echo).await;
        }

        let mut bios_text = None;
        let mut joined = None;
        if let Some(requested) = action.participants() {
            let fresh = session.new_participants(requested);
            if fresh.is_empty() {
                bios_text = Some(session.bios_text());
            } else {
                dispatcher.publish(session_id, JOIN_ANNOUNCEMENT).await;
                let bios = self
                    .generator
                    .generate_bios(&session.thread_id, &fresh, |token| async move {
                        dispatcher.publish(session_id, token).await;
                    })
                    .await?;
                self.sessions
                    .update_roster(session_id, &fresh, &bios.to_map())
                    .await?;
                info!(session_id, joined = fresh.len(), "Roster updated");

                let text = bios.text();
                bios_text = Some(text.clone());
                joined = Some(text);
            }
        }

        let Some((speaker, text)) = action.speaker_and_text() else {
            return Ok(CoreResponse::text(
                200,
                bios_text.unwrap_or_else(|| session.bios_text()),
            ));
        };

        if joined.is_some() {
            dispatcher.publish(session_id, SEGUE).await;
        }

        let user_entry = DialogueEntry::new(speaker, text);
        let mut dialogue = vec![user_entry.clone()];
        let mut turns = vec![ChatTurn::new("user", format!("{speaker}: {text}"))];

        let reply = match self.generate(session, &user_entry).await {
            Ok(reply) => {
                let narrator = self.config.narrator_name.as_str();
                dialogue.push(DialogueEntry::new(narrator, normalize_quotes(&reply)));
                turns.push(ChatTurn::new(narrator, reply.clone()));
                reply
            }
            Err(e) => {
                error!(session_id, error = %e, "Generation failed");
                random_apology().to_string()
            }
        };

        self.sessions
            .append_transcript(session_id, &dialogue, &turns)
            .await?;

        let body = match joined {
            Some(bios) => format!("{JOIN_ANNOUNCEMENT}\n\n{bios}\n\n{SEGUE}\n\n{reply}"),
            None => reply,
        };
        Ok(CoreResponse::quoted(&body))
    }

    async fn generate(&self, session: &Session, entry: &DialogueEntry) -> TavernResult<String> {
        let session_id = session.session_id.as_str();
        let dispatcher = &self.dispatcher;

        let turn = serde_json::to_string(entry)?;
        self.generator
            .append_user_turn(&session.thread_id, &turn)
            .await?;
        self.generator
            .run_and_stream(&session.thread_id, None, |token| async move {
                dispatcher.publish(session_id, token).await;
            })
            .await
    }

    /// Deletes the session, its conversation and its connection records.
    pub async fn delete_session(&self, session_id: &str) -> CoreResponse {
        let session = match self.sessions.get(session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                warn!(session_id, "Session not found for deletion");
                return CoreResponse::error(404, "Session not found");
            }
            Err(e) => {
                error!(session_id, error = %e, "Error retrieving session for deletion");
                return CoreResponse::error(500, "Internal error");
            }
        };

        self.generator.close_conversation(&session.thread_id).await;

        if let Err(e) = self.sessions.delete(session_id).await {
            error!(session_id, error = %e, "Error deleting session");
            return CoreResponse::error(500, "Internal error");
        }
        match self.connections.expire_session(session_id).await {
            Ok(expired) => info!(session_id, expired, "Session deleted"),
            Err(e) => warn!(session_id, error = %e, "Failed to expire session connections"),
        }

        CoreResponse::json(
            200,
            &serde_json::json!({ "message": "Session deleted successfully" }),
        )
    }

    pub async fn attach(&self, session_id: &str, connection_id: &str) -> TavernResult<()> {
        self.connections.attach(session_id, connection_id).await
    }

    pub async fn detach(&self, connection_id: &str) -> TavernResult<()> {
        self.connections.detach(connection_id).await
    }

    /// Reclaims expired connection records and sessions.
    pub async fn sweep(&self) -> TavernResult<(usize, usize)> {
        let connections = self.connections.sweep().await?;
        let sessions = self.sessions.sweep_expired().await?;
        if connections > 0 || sessions > 0 {
            info!(connections, sessions, "Swept expired records");
        }
        Ok((connections, sessions))
    }
}

fn apology() -> CoreResponse {
    CoreResponse::json(200, &serde_json::json!({ "error": random_apology() }))
}

fn normalize_quotes(text: &str) -> String {
    text.replace(&['\u{2018}', '\u{2019}'][..], "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_quotes() {
        assert_eq!(
            normalize_quotes("The orc\u{2019}s \u{2018}shield\u{2019}"),
            "The orc's 'shield'"
        );
    }
}
