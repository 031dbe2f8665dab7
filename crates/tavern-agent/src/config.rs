use serde::{Deserialize, Serialize};
use std::time::Duration;

/// System prompt used by the chat backend when none is configured.
pub const DEFAULT_INSTRUCTIONS: &str = "You are a Dungeon Master for a modified Dungeons and Dragons \
single session campaign. If supplied a list of players and their roles, supply brief descriptive \
character bios in a fantasy RPG setting that align with each player's role. If supplied an action \
by a user, generate a random dice roll that defines the success or failure of the action, and \
describe the outcome with any state changes.";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorProvider {
    /// Server-side conversations through the OpenAI Assistants threads API.
    #[default]
    Assistants,
    /// Chat-completions API; the conversation is kept in process.
    Chat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub provider: GeneratorProvider,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default)]
    pub api_key: String,
    pub api_base_url: Option<String>,
    /// Assistant that runs on each thread (assistants provider only).
    pub assistant_id: Option<String>,
    /// System prompt (chat provider only).
    pub instructions: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Bound on each non-streaming API call and on connection set-up.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_model_id() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_request_timeout() -> u64 {
    15
}

impl ModelConfig {
    pub fn base_url(&self) -> &str {
        self.api_base_url
            .as_deref()
            .unwrap_or("https://api.openai.com")
            .trim_end_matches('/')
    }

    pub fn system_prompt(&self) -> &str {
        self.instructions.as_deref().unwrap_or(DEFAULT_INSTRUCTIONS)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// HTTP client whose connection set-up is bounded by the request timeout.
    pub(crate) fn http_client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .connect_timeout(self.request_timeout())
            .build()
            .unwrap_or_default()
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: GeneratorProvider::default(),
            model_id: default_model_id(),
            api_key: String::new(),
            api_base_url: None,
            assistant_id: None,
            instructions: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}
