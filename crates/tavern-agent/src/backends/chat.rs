use super::ConversationBackend;
use crate::config::ModelConfig;
use crate::sse::{SseDecoder, SseFrame};
use crate::stream::StreamEvent;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tavern_core::{ChatTurn, TavernError, TavernResult};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

/// OpenAI-compatible chat completions backend.
///
/// Chat completions are stateless, so each conversation is kept in process
/// and replayed on every run. Works with any provider that implements the
/// chat completions API (OpenAI, OpenRouter, Groq, Ollama).
pub struct ChatBackend {
    config: ModelConfig,
    http: reqwest::Client,
    conversations: Arc<RwLock<HashMap<String, Vec<ChatTurn>>>>,
}

impl ChatBackend {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http: config.http_client(),
            config,
            conversations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn build_messages(
        &self,
        instructions: Option<&str>,
        turns: &[ChatTurn],
    ) -> Vec<serde_json::Value> {
        let mut system = self.config.system_prompt().to_string();
        if let Some(extra) = instructions {
            system.push_str("\n\n");
            system.push_str(extra);
        }

        let mut api_messages = vec![serde_json::json!({
            "role": "system",
            "content": system
        })];

        for turn in turns {
            api_messages.push(serde_json::json!({
                "role": if turn.role == "assistant" { "assistant" } else { "user" },
                "content": turn.content
            }));
        }

        api_messages
    }

    fn add_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
    }

    async fn turns(&self, conversation: &str) -> TavernResult<Vec<ChatTurn>> {
        self.conversations
            .read()
            .await
            .get(conversation)
            .cloned()
            .ok_or_else(|| TavernError::Generation(format!("unknown conversation {conversation}")))
    }
}

#[async_trait]
impl ConversationBackend for ChatBackend {
    async fn open_conversation(&self) -> TavernResult<String> {
        let handle = format!("conv_{}", uuid::Uuid::new_v4().simple());
        self.conversations
            .write()
            .await
            .insert(handle.clone(), Vec::new());
        Ok(handle)
    }

    async fn append_user_turn(&self, conversation: &str, content: &str) -> TavernResult<()> {
        let mut conversations = self.conversations.write().await;
        let turns = conversations.get_mut(conversation).ok_or_else(|| {
            TavernError::Generation(format!("unknown conversation {conversation}"))
        })?;
        turns.push(ChatTurn::new("user", content));
        Ok(())
    }

    async fn run_stream(
        &self,
        conversation: &str,
        instructions: Option<&str>,
    ) -> TavernResult<(mpsc::Receiver<StreamEvent>, JoinHandle<TavernResult<String>>)> {
        let url = format!("{}/v1/chat/completions", self.config.base_url());
        let turns = self.turns(conversation).await?;
        let body = serde_json::json!({
            "model": self.config.model_id,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": self.build_messages(instructions, &turns),
            "stream": true,
        });

        let resp = self
            .add_headers(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| TavernError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let error_body = resp
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(TavernError::Http(format!(
                "Chat completions error {status}: {error_body}"
            )));
        }

        let (tx, rx) = mpsc::channel::<StreamEvent>(256);
        let byte_stream = resp.bytes_stream();
        let conversations = self.conversations.clone();
        let conversation = conversation.to_string();

        let handle = tokio::spawn(async move {
            let mut stream = byte_stream;
            let mut decoder = SseDecoder::new();
            let mut full_text = String::new();

            while let Some(chunk_result) = stream.next().await {
                let chunk = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let message = format!("Stream read error: {e}");
                        let _ = tx
                            .send(StreamEvent::Error {
                                message: message.clone(),
                            })
                            .await;
                        return Err(TavernError::Http(message));
                    }
                };
                forward_frames(&tx, &mut full_text, decoder.push(&chunk)).await?;
            }
            forward_frames(&tx, &mut full_text, decoder.finish().into_iter().collect()).await?;

            if let Some(turns) = conversations.write().await.get_mut(&conversation) {
                turns.push(ChatTurn::new("assistant", full_text.clone()));
            }
            Ok(full_text)
        });

        Ok((rx, handle))
    }

    async fn list_messages(&self, conversation: &str) -> TavernResult<Vec<ChatTurn>> {
        self.turns(conversation).await
    }

    async fn close_conversation(&self, conversation: &str) -> TavernResult<()> {
        self.conversations.write().await.remove(conversation);
        Ok(())
    }
}

enum ChatChunk {
    Text(String),
    Done,
    Failed(String),
    Skip,
}

fn parse_chat_frame(data: &str) -> ChatChunk {
    if data == "[DONE]" {
        return ChatChunk::Done;
    }
    let event: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(_) => return ChatChunk::Skip,
    };

    if let Some(error) = event.get("error") {
        let message = error["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return ChatChunk::Failed(message);
    }

    match event["choices"][0]["delta"]["content"].as_str() {
        Some(content) if !content.is_empty() => ChatChunk::Text(content.to_string()),
        _ => ChatChunk::Skip,
    }
}

async fn forward_frames(
    tx: &mpsc::Sender<StreamEvent>,
    full_text: &mut String,
    frames: Vec<SseFrame>,
) -> TavernResult<()> {
    for frame in frames {
        match parse_chat_frame(&frame.data) {
            ChatChunk::Text(text) => {
                full_text.push_str(&text);
                let _ = tx.send(StreamEvent::TextDelta { text }).await;
            }
            ChatChunk::Done => {
                let _ = tx.send(StreamEvent::Done).await;
            }
            ChatChunk::Failed(message) => {
                let _ = tx
                    .send(StreamEvent::Error {
                        message: message.clone(),
                    })
                    .await;
                return Err(TavernError::Generation(message));
            }
            ChatChunk::Skip => {}
        }
    }
    Ok(())
}
