use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tavern_core::{ChatTurn, DialogueEntry, Participant};
use uuid::Uuid;

/// Outcome of the single-flight admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The caller now holds the processing flag and must release it with
    /// this lease token.
    Admitted(Uuid),
    /// Another generation is believed to be running for this session.
    InFlight,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }
}

/// Server-held state of one collaborative session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    /// Roster in join order, unique by name.
    #[serde(default)]
    pub user_set: Vec<Participant>,
    /// Generated bio per participant name.
    #[serde(default)]
    pub user_bios: HashMap<String, String>,
    /// Transcript, append-only.
    #[serde(default)]
    pub dialogue: Vec<DialogueEntry>,
    /// Generator-facing turn history, append-only.
    #[serde(default)]
    pub chat_history: Vec<ChatTurn>,
    /// Handle of the external generator conversation.
    pub thread_id: String,
    #[serde(default)]
    pub processing: bool,
    #[serde(default)]
    pub processing_since: Option<DateTime<Utc>>,
    /// Lease held by the admitted action, if any.
    #[serde(default)]
    pub processing_token: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Creates an empty session bound to an already opened conversation.
    pub fn new(session_id: impl Into<String>, thread_id: impl Into<String>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_set: Vec::new(),
            user_bios: HashMap::new(),
            dialogue: Vec::new(),
            chat_history: Vec::new(),
            thread_id: thread_id.into(),
            processing: false,
            processing_since: None,
            processing_token: None,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Compare-and-set on the processing flag. A flag older than `lease` is
    /// considered abandoned and is taken over under a new token.
    pub fn begin_processing(&mut self, now: DateTime<Utc>, lease: Duration) -> Admission {
        if self.processing {
            let stale = self
                .processing_since
                .map_or(true, |since| now - since >= lease);
            if !stale {
                return Admission::InFlight;
            }
        }
        let token = Uuid::new_v4();
        self.processing = true;
        self.processing_since = Some(now);
        self.processing_token = Some(token);
        Admission::Admitted(token)
    }

    /// Clears the flag if `token` still holds the lease. Returns false when the
    /// lease was taken over, leaving the new holder's flag in place.
    pub fn finish_processing(&mut self, token: Uuid) -> bool {
        if self.processing_token != Some(token) {
            return false;
        }
        self.processing = false;
        self.processing_since = None;
        self.processing_token = None;
        true
    }

    /// Participants from `requested` whose names are not on the roster yet,
    /// deduplicated by name in request order.
    pub fn new_participants(&self, requested: &[Participant]) -> Vec<Participant> {
        let mut seen: HashSet<&str> = self.user_set.iter().map(|p| p.name.as_str()).collect();
        let mut fresh = Vec::new();
        for participant in requested {
            if seen.insert(participant.name.as_str()) {
                fresh.push(participant.clone());
            }
        }
        fresh
    }

    /// Adds participants not yet on the roster and stores their bios. Bios for
    /// names that were not added here are ignored; existing bios are never
    /// replaced.
    pub fn merge_roster(&mut self, additions: &[Participant], bios: &HashMap<String, String>) {
        let fresh = self.new_participants(additions);
        for participant in &fresh {
            if let Some(bio) = bios.get(&participant.name) {
                self.user_bios
                    .entry(participant.name.clone())
                    .or_insert_with(|| bio.clone());
            }
        }
        self.user_set.extend(fresh);
        self.updated_at = Utc::now();
    }

    pub fn append_transcript(&mut self, dialogue: &[DialogueEntry], turns: &[ChatTurn]) {
        self.dialogue.extend_from_slice(dialogue);
        self.chat_history.extend_from_slice(turns);
        self.updated_at = Utc::now();
    }

    /// Every stored bio, newline-joined in roster order.
    pub fn bios_text(&self) -> String {
        self.user_set
            .iter()
            .filter_map(|p| self.user_bios.get(&p.name))
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
