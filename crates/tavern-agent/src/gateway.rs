use crate::backends::assistants::AssistantsBackend;
use crate::backends::chat::ChatBackend;
use crate::backends::ConversationBackend;
use crate::bios::{BioResponse, BIO_INSTRUCTIONS};
use crate::config::{GeneratorProvider, ModelConfig};
use crate::stream::StreamEvent;
use std::future::Future;
use std::time::Duration;
use tavern_core::{ChatTurn, Participant, TavernError, TavernResult};
use tokio::task::AbortHandle;
use tracing::{info, warn};

/// Front door to the external text generator.
///
/// Dispatches to a [`ConversationBackend`] and normalises its failures: every
/// error raised while running is reported as [`TavernError::Generation`] or
/// [`TavernError::Timeout`].
pub struct GenerationGateway {
    backend: Box<dyn ConversationBackend>,
    timeout: Option<Duration>,
}

impl GenerationGateway {
    pub fn new(config: ModelConfig) -> Self {
        let backend: Box<dyn ConversationBackend> = match config.provider {
            GeneratorProvider::Assistants => Box::new(AssistantsBackend::new(config)),
            GeneratorProvider::Chat => Box::new(ChatBackend::new(config)),
        };
        Self::from_backend(backend)
    }

    /// Create from a pre-built backend (for custom providers and tests).
    pub fn from_backend(backend: Box<dyn ConversationBackend>) -> Self {
        Self {
            backend,
            timeout: None,
        }
    }

    /// Bounds every run; an elapsed run fails with [`TavernError::Timeout`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub async fn open_conversation(&self) -> TavernResult<String> {
        let handle = self.backend.open_conversation().await?;
        info!(conversation = %handle, "Conversation opened");
        Ok(handle)
    }

    pub async fn append_user_turn(&self, conversation: &str, content: &str) -> TavernResult<()> {
        self.backend.append_user_turn(conversation, content).await
    }

    /// Runs the generator over the conversation, invoking `on_token` for each
    /// text chunk as it arrives, and returns the full text of the new turn.
    pub async fn run_and_stream<F, Fut>(
        &self,
        conversation: &str,
        instructions: Option<&str>,
        on_token: F,
    ) -> TavernResult<String>
    where
        F: FnMut(String) -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        let run = self.stream_run(conversation, instructions, on_token);
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(conversation, timeout_secs = limit.as_secs(), "Generation timed out");
                    return Err(TavernError::Timeout(limit.as_secs()));
                }
            },
            None => run.await,
        };

        result.map_err(|e| match e {
            TavernError::Generation(_) | TavernError::Timeout(_) => e,
            other => TavernError::Generation(other.to_string()),
        })
    }

    async fn stream_run<F, Fut>(
        &self,
        conversation: &str,
        instructions: Option<&str>,
        mut on_token: F,
    ) -> TavernResult<String>
    where
        F: FnMut(String) -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        let (mut rx, handle) = self.backend.run_stream(conversation, instructions).await?;
        let _abort = AbortOnDrop(handle.abort_handle());

        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::TextDelta { text } => on_token(text).await,
                StreamEvent::Error { message } => {
                    warn!(conversation, error = %message, "Generator reported an error");
                }
                StreamEvent::Done => {}
            }
        }

        handle
            .await
            .map_err(|e| TavernError::Generation(format!("generation task failed: {e}")))?
    }

    pub async fn list_messages(&self, conversation: &str) -> TavernResult<Vec<ChatTurn>> {
        self.backend.list_messages(conversation).await
    }

    /// Closes the conversation. Failures are logged and otherwise ignored.
    pub async fn close_conversation(&self, conversation: &str) {
        match self.backend.close_conversation(conversation).await {
            Ok(()) => info!(conversation, "Conversation closed"),
            Err(e) => warn!(conversation, error = %e, "Failed to close conversation"),
        }
    }

    /// Requests bios for exactly `participants`, streaming tokens as they are
    /// generated.
    pub async fn generate_bios<F, Fut>(
        &self,
        conversation: &str,
        participants: &[Participant],
        on_token: F,
    ) -> TavernResult<BioResponse>
    where
        F: FnMut(String) -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        if participants.is_empty() {
            warn!(conversation, "No participants provided for bio generation");
            return Ok(BioResponse::Markdown(Vec::new()));
        }
        info!(conversation, count = participants.len(), "Generating character bios");

        let request = serde_json::to_string(participants)?;
        self.backend
            .append_user_turn(conversation, &request)
            .await
            .map_err(|e| TavernError::Generation(e.to_string()))?;
        let text = self
            .run_and_stream(conversation, Some(BIO_INSTRUCTIONS), on_token)
            .await?;

        let bios = BioResponse::parse(&text);
        if let BioResponse::Raw(_) = bios {
            warn!(conversation, "Bio reply matched no known schema, keeping raw text");
        }
        Ok(bios)
    }
}

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
