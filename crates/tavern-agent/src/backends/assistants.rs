use super::ConversationBackend;
use crate::config::ModelConfig;
use crate::sse::{SseDecoder, SseFrame};
use crate::stream::StreamEvent;
use async_trait::async_trait;
use futures_util::StreamExt;
use tavern_core::{ChatTurn, TavernError, TavernResult};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// OpenAI Assistants backend.
///
/// Each conversation is a server-side thread; runs execute the configured
/// assistant over the thread and stream back `thread.*` events.
pub struct AssistantsBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl AssistantsBackend {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http: config.http_client(),
            config,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/v1{}", self.config.base_url(), path);
        self.http
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn send_json(&self, request: reqwest::RequestBuilder) -> TavernResult<serde_json::Value> {
        let resp = request
            .timeout(self.config.request_timeout())
            .send()
            .await
            .map_err(|e| TavernError::Http(e.to_string()))?;

        let status = resp.status();
        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| TavernError::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(TavernError::Http(format!(
                "Assistants API error {status}: {resp_body}"
            )));
        }
        Ok(resp_body)
    }
}

#[async_trait]
impl ConversationBackend for AssistantsBackend {
    async fn open_conversation(&self) -> TavernResult<String> {
        let body = self
            .send_json(
                self.request(reqwest::Method::POST, "/threads")
                    .json(&serde_json::json!({})),
            )
            .await?;
        body["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| TavernError::Generation("thread response has no id".into()))
    }

    async fn append_user_turn(&self, conversation: &str, content: &str) -> TavernResult<()> {
        self.send_json(
            self.request(
                reqwest::Method::POST,
                &format!("/threads/{conversation}/messages"),
            )
            .json(&serde_json::json!({
                "role": "user",
                "content": content
            })),
        )
        .await?;
        Ok(())
    }

    async fn run_stream(
        &self,
        conversation: &str,
        instructions: Option<&str>,
    ) -> TavernResult<(mpsc::Receiver<StreamEvent>, JoinHandle<TavernResult<String>>)> {
        let assistant_id = self.config.assistant_id.as_deref().ok_or_else(|| {
            TavernError::Config("assistant_id is required for the assistants provider".into())
        })?;

        let mut body = serde_json::json!({
            "assistant_id": assistant_id,
            "stream": true,
        });
        if let Some(extra) = instructions {
            body["additional_instructions"] = serde_json::json!(extra);
        }

        let resp = self
            .request(
                reqwest::Method::POST,
                &format!("/threads/{conversation}/runs"),
            )
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
                "Assistants API error {status}: {error_body}"
            )));
        }

        let (tx, rx) = mpsc::channel::<StreamEvent>(256);
        let byte_stream = resp.bytes_stream();

        let handle = tokio::spawn(async move {
            let mut stream = byte_stream;
            let mut decoder = SseDecoder::new();
            let mut run = RunState::default();

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
                run.apply(&tx, decoder.push(&chunk)).await?;
            }
            run.apply(&tx, decoder.finish().into_iter().collect())
                .await?;

            Ok(run.completed.unwrap_or(run.streamed))
        });

        Ok((rx, handle))
    }

    async fn list_messages(&self, conversation: &str) -> TavernResult<Vec<ChatTurn>> {
        let body = self
            .send_json(self.request(
                reqwest::Method::GET,
                &format!("/threads/{conversation}/messages?order=asc&limit=100"),
            ))
            .await?;

        let turns = body["data"]
            .as_array()
            .map(|messages| {
                messages
                    .iter()
                    .map(|m| {
                        ChatTurn::new(
                            m["role"].as_str().unwrap_or("assistant"),
                            text_values(&m["content"]),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(turns)
    }

    async fn close_conversation(&self, conversation: &str) -> TavernResult<()> {
        self.send_json(self.request(
            reqwest::Method::DELETE,
            &format!("/threads/{conversation}"),
        ))
        .await?;
        Ok(())
    }
}

/// Accumulated view of one streamed run.
#[derive(Default)]
struct RunState {
    streamed: String,
    completed: Option<String>,
}

impl RunState {
    async fn apply(
        &mut self,
        tx: &mpsc::Sender<StreamEvent>,
        frames: Vec<SseFrame>,
    ) -> TavernResult<()> {
        for frame in frames {
            if frame.data == "[DONE]" {
                let _ = tx.send(StreamEvent::Done).await;
                continue;
            }
            let event = frame.event.as_deref().unwrap_or_default();
            let data: serde_json::Value = match serde_json::from_str(&frame.data) {
                Ok(v) => v,
                Err(_) => continue,
            };

            match event {
                "thread.message.delta" => {
                    let text = text_values(&data["delta"]["content"]);
                    if !text.is_empty() {
                        self.streamed.push_str(&text);
                        let _ = tx.send(StreamEvent::TextDelta { text }).await;
                    }
                }
                "thread.message.completed" => {
                    self.completed = Some(text_values(&data["content"]));
                }
                "thread.run.failed" | "thread.run.cancelled" | "thread.run.expired" => {
                    let message = data["last_error"]["message"]
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| event.to_string());
                    return Err(fail(tx, message).await);
                }
                "error" => {
                    let message = data["message"]
                        .as_str()
                        .or_else(|| data["error"]["message"].as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| data.to_string());
                    return Err(fail(tx, message).await);
                }
                _ => {}
            }
        }
        Ok(())
    }
}

async fn fail(tx: &mpsc::Sender<StreamEvent>, message: String) -> TavernError {
    let _ = tx
        .send(StreamEvent::Error {
            message: message.clone(),
        })
        .await;
    TavernError::Generation(message)
}

/// Concatenates the text parts of an Assistants `content` array.
fn text_values(content: &serde_json::Value) -> String {
    content
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part["text"]["value"].as_str())
                .collect::<String>()
        })
        .unwrap_or_default()
}
