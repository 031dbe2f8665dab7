pub mod assistants;
pub mod chat;

use crate::stream::StreamEvent;
use async_trait::async_trait;
use tavern_core::{ChatTurn, TavernResult};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A stateful conversation with an external text generator.
///
/// The backend owns the conversation history: callers append user turns and
/// then ask for a run, which produces the next generator turn.
///
/// To add a new provider:
/// 1. Create a new module in `backends/`
/// 2. Implement `ConversationBackend` for your struct
/// 3. Add the variant to `GeneratorProvider` in `config.rs`
/// 4. Wire it up in `GenerationGateway::new()` in `gateway.rs`
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    /// Opens a new conversation and returns its opaque handle.
    async fn open_conversation(&self) -> TavernResult<String>;

    /// Appends a user turn to the conversation.
    async fn append_user_turn(&self, conversation: &str, content: &str) -> TavernResult<()>;

    /// Starts a run over the conversation.
    ///
    /// Returns a receiver for stream events and a join handle that resolves to
    /// the final text of the generated turn. The generated turn becomes part of
    /// the conversation once the run succeeds.
    async fn run_stream(
        &self,
        conversation: &str,
        instructions: Option<&str>,
    ) -> TavernResult<(mpsc::Receiver<StreamEvent>, JoinHandle<TavernResult<String>>)>;

    /// Lists the conversation's turns, oldest first.
    async fn list_messages(&self, conversation: &str) -> TavernResult<Vec<ChatTurn>>;

    /// Closes the conversation on the generator side.
    async fn close_conversation(&self, conversation: &str) -> TavernResult<()>;
}
