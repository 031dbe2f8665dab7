use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tavern_core::{ChatTurn, DialogueEntry, Participant, TavernError};
use tavern_session::Session;
use tracing::warn;

const JSON: &str = "application/json";
const TEXT: &str = "text/plain; charset=utf-8";

/// Transport-neutral result of one orchestrator operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreResponse {
    pub status_code: u16,
    pub body: String,
    pub headers: BTreeMap<String, String>,
}

impl CoreResponse {
    fn with_type(status_code: u16, body: String, content_type: &str) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(header::CONTENT_TYPE.as_str().to_string(), content_type.to_string());
        Self {
            status_code,
            body,
            headers,
        }
    }

    pub fn json<T: Serialize>(status_code: u16, value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self::with_type(status_code, body, JSON),
            Err(e) => {
                warn!(error = %e, "Failed to encode response body");
                Self::error(500, "Internal error")
            }
        }
    }

    /// `{"error": message}` with the given status.
    pub fn error(status_code: u16, message: &str) -> Self {
        let body = serde_json::json!({ "error": message }).to_string();
        Self::with_type(status_code, body, JSON)
    }

    pub fn text(status_code: u16, body: impl Into<String>) -> Self {
        Self::with_type(status_code, body.into(), TEXT)
    }

    /// A generated text sent as a JSON string literal.
    pub fn quoted(text: &str) -> Self {
        Self::json(200, &text)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Maps request-level failures to their transport status. The body never
/// carries infrastructure error text.
impl From<&TavernError> for CoreResponse {
    fn from(error: &TavernError) -> Self {
        match error {
            TavernError::NotFound(_) => Self::error(404, "Session not found"),
            TavernError::MethodNotAllowed(_) => Self::error(405, "Method not allowed"),
            TavernError::InvalidAction(detail) => Self::error(400, detail),
            e if e.is_infrastructure() => Self::error(503, "Service unavailable"),
            _ => Self::error(500, "Internal error"),
        }
    }
}

impl IntoResponse for CoreResponse {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, self.body).into_response();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::from_str(value),
            ) {
                response.headers_mut().insert(name, value);
            }
        }
        response
    }
}

/// Read view of a session returned by `GET`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot<'a> {
    pub users: &'a [Participant],
    pub dialogue: &'a [DialogueEntry],
    pub chat_history: &'a [ChatTurn],
    pub user_bios: &'a HashMap<String, String>,
}

impl<'a> From<&'a Session> for SessionSnapshot<'a> {
    fn from(session: &'a Session) -> Self {
        Self {
            users: &session.user_set,
            dialogue: &session.dialogue,
            chat_history: &session.chat_history,
            user_bios: &session.user_bios,
        }
    }
}
