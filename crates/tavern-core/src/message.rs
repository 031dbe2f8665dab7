use serde::{Deserialize, Serialize};

/// A player in a session. Names are unique within a session's roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Display name, used as the roster key.
    pub name: String,
    /// Free-form role, e.g. "Wizard".
    pub role: String,
}

impl Participant {
    /// Creates a participant.
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
        }
    }
}

/// One speaker/text pair of the session transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueEntry {
    /// Who spoke: a participant name or the narrator.
    pub user: String,
    /// What was said.
    pub msg: String,
}

impl DialogueEntry {
    /// Creates a transcript entry.
    pub fn new(user: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            msg: msg.into(),
        }
    }
}

/// One turn of the history sent to (or received from) the generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// `user` for player turns, the narrator name for generated turns.
    pub role: String,
    /// Turn content.
    pub content: String,
}

impl ChatTurn {
    /// Creates a history turn.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// An inbound action against a session.
///
/// Every field is optional: an action may introduce participants, carry a
/// speaker's message, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Participants to add to the roster.
    #[serde(default, alias = "participants", skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<Participant>>,
    /// The speaking participant.
    #[serde(default, alias = "speaker", skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// The message body.
    #[serde(default, alias = "text", skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl Action {
    /// Parses a push-transport frame. Frames that are not an action object are
    /// treated as a bare message body.
    pub fn from_frame(frame: &str) -> Self {
        match serde_json::from_str::<Action>(frame) {
            Ok(action) => action,
            Err(_) => Action {
                msg: Some(frame.to_string()),
                ..Action::default()
            },
        }
    }

    /// Participants introduced by this action, if any.
    pub fn participants(&self) -> Option<&[Participant]> {
        self.users.as_deref().filter(|users| !users.is_empty())
    }

    /// The message body, ignoring blank text.
    pub fn text(&self) -> Option<&str> {
        non_blank(self.msg.as_deref())
    }

    /// The speaker, ignoring blank names.
    pub fn speaker(&self) -> Option<&str> {
        non_blank(self.user.as_deref())
    }

    /// Speaker and message together; both are required to run a generation.
    pub fn speaker_and_text(&self) -> Option<(&str, &str)> {
        Some((self.speaker()?, self.text()?))
    }

    /// True when the action carries nothing the orchestrator can act on.
    pub fn is_empty(&self) -> bool {
        self.participants().is_none() && self.text().is_none()
    }

    /// The text echoed to every connection before generation starts.
    pub fn echo_text(&self) -> Option<String> {
        let text = self.text()?;
        Some(match self.speaker() {
            Some(speaker) => format!("\n\n {speaker}: {text} \n\n"),
            None => text.to_string(),
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
