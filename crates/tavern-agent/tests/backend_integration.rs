//! Integration tests for tavern-agent: both HTTP backends against a mock
//! generator, the gateway's failure normalisation, and bio generation.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tavern_agent::{
    BioResponse, ConversationBackend, GenerationGateway, GeneratorProvider, ModelConfig,
    StreamEvent,
};
use tavern_core::{ChatTurn, Participant, TavernError, TavernResult};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn assistants_config(server: &MockServer) -> ModelConfig {
    ModelConfig {
        provider: GeneratorProvider::Assistants,
        api_key: "sk-test".into(),
        api_base_url: Some(server.uri()),
        assistant_id: Some("asst_dm".into()),
        ..Default::default()
    }
}

fn chat_config(server: &MockServer) -> ModelConfig {
    ModelConfig {
        provider: GeneratorProvider::Chat,
        api_key: "sk-test".into(),
        api_base_url: Some(server.uri()),
        ..Default::default()
    }
}

fn sse(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/event-stream")
}

/// Collects streamed tokens through a channel.
fn token_sink() -> (
    impl FnMut(String) -> std::future::Ready<()> + Send,
    mpsc::UnboundedReceiver<String>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = move |token: String| {
        let _ = tx.send(token);
        std::future::ready(())
    };
    (sink, rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(token) = rx.try_recv() {
        out.push(token);
    }
    out
}

async fn mount_thread(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/threads"))
        .and(header("OpenAI-Beta", "assistants=v2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "thread_abc"})))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/threads/thread_abc/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "msg_1"})))
        .mount(server)
        .await;
}

const RUN_STREAM: &str = "event: thread.run.created\n\
data: {\"id\":\"run_1\",\"status\":\"queued\"}\n\n\
event: thread.message.delta\n\
data: {\"delta\":{\"content\":[{\"index\":0,\"type\":\"text\",\"text\":{\"value\":\"Seth rolls a 3. \"}}]}}\n\n\
event: thread.message.delta\n\
data: {\"delta\":{\"content\":[{\"index\":0,\"type\":\"text\",\"text\":{\"value\":\"The orc deflects it.\"}}]}}\n\n\
event: thread.message.completed\n\
data: {\"content\":[{\"type\":\"text\",\"text\":{\"value\":\"Seth rolls a 3. The orc deflects it.\"}}]}\n\n\
event: done\n\
data: [DONE]\n\n";

// ---------------------------------------------------------------------------
// Assistants backend
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_assistants_run_streams_tokens_and_returns_final_text() {
    let server = MockServer::start().await;
    mount_thread(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/threads/thread_abc/runs"))
        .and(body_partial_json(json!({"assistant_id": "asst_dm", "stream": true})))
        .respond_with(sse(RUN_STREAM))
        .mount(&server)
        .await;

    let gateway = GenerationGateway::new(assistants_config(&server));
    let conv = gateway.open_conversation().await.unwrap();
    assert_eq!(conv, "thread_abc");

    gateway
        .append_user_turn(&conv, r#"{"user":"Seth","msg":"I cast a fireball at the orc."}"#)
        .await
        .unwrap();

    let (sink, mut rx) = token_sink();
    let text = gateway.run_and_stream(&conv, None, sink).await.unwrap();
    assert_eq!(text, "Seth rolls a 3. The orc deflects it.");
    assert_eq!(
        drain(&mut rx),
        vec!["Seth rolls a 3. ".to_string(), "The orc deflects it.".to_string()]
    );
}

#[tokio::test]
async fn test_assistants_failed_run_is_generation_error() {
    let server = MockServer::start().await;
    mount_thread(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/threads/thread_abc/runs"))
        .respond_with(sse(
            "event: thread.run.failed\ndata: {\"last_error\":{\"message\":\"quota exceeded\"}}\n\n",
        ))
        .mount(&server)
        .await;

    let gateway = GenerationGateway::new(assistants_config(&server));
    let (sink, _rx) = token_sink();
    let err = gateway
        .run_and_stream("thread_abc", None, sink)
        .await
        .unwrap_err();
    assert!(matches!(err, TavernError::Generation(ref m) if m.contains("quota exceeded")));
}

#[tokio::test]
async fn test_assistants_http_error_is_generation_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/threads/thread_abc/runs"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let gateway = GenerationGateway::new(assistants_config(&server));
    let (sink, _rx) = token_sink();
    let err = gateway
        .run_and_stream("thread_abc", None, sink)
        .await
        .unwrap_err();
    assert!(matches!(err, TavernError::Generation(_)));
}

#[tokio::test]
async fn test_assistants_requires_assistant_id() {
    let server = MockServer::start().await;
    let config = ModelConfig {
        assistant_id: None,
        ..assistants_config(&server)
    };
    let gateway = GenerationGateway::new(config);
    let (sink, _rx) = token_sink();
    let err = gateway
        .run_and_stream("thread_abc", None, sink)
        .await
        .unwrap_err();
    assert!(matches!(err, TavernError::Generation(ref m) if m.contains("assistant_id")));
}

#[tokio::test]
async fn test_assistants_append_is_bounded_by_request_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/threads/thread_abc/messages"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": "msg_1"}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let config = ModelConfig {
        request_timeout_secs: 1,
        ..assistants_config(&server)
    };
    let gateway = GenerationGateway::new(config);
    let started = std::time::Instant::now();
    let err = gateway
        .append_user_turn("thread_abc", "hello")
        .await
        .unwrap_err();
    assert!(matches!(err, TavernError::Http(_)));
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn test_assistants_list_messages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/threads/thread_abc/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"role": "user", "content": [{"type": "text", "text": {"value": "hi"}}]},
                {"role": "assistant", "content": [{"type": "text", "text": {"value": "Welcome."}}]}
            ]
        })))
        .mount(&server)
        .await;

    let gateway = GenerationGateway::new(assistants_config(&server));
    let turns = gateway.list_messages("thread_abc").await.unwrap();
    assert_eq!(
        turns,
        vec![ChatTurn::new("user", "hi"), ChatTurn::new("assistant", "Welcome.")]
    );
}

#[tokio::test]
async fn test_close_conversation_is_best_effort() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v1/threads/thread_abc"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": {"message": "No thread"}})))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = GenerationGateway::new(assistants_config(&server));
    // Returns unit even though the generator refused.
    gateway.close_conversation("thread_abc").await;
}

#[tokio::test]
async fn test_generate_bios_sends_participants_and_parses_markdown() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/threads/thread_abc/messages"))
        .and(body_partial_json(json!({
            "role": "user",
            "content": r#"[{"name":"Seth","role":"Wizard"}]"#
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "msg_1"})))
        .expect(1)
        .mount(&server)
        .await;
    let bio = "=====================\\n# Seth - Wizard\\nA reclusive wizard.\\n---------------------";
    Mock::given(method("POST"))
        .and(path("/v1/threads/thread_abc/runs"))
        .respond_with(sse(&format!(
            "event: thread.message.delta\ndata: {{\"delta\":{{\"content\":[{{\"type\":\"text\",\"text\":{{\"value\":\"{bio}\"}}}}]}}}}\n\ndata: [DONE]\n\n"
        )))
        .mount(&server)
        .await;

    let gateway = GenerationGateway::new(assistants_config(&server));
    let (sink, mut rx) = token_sink();
    let bios = gateway
        .generate_bios("thread_abc", &[Participant::new("Seth", "Wizard")], sink)
        .await
        .unwrap();

    assert!(matches!(bios, BioResponse::Markdown(_)));
    assert_eq!(bios.to_map()["Seth"], "# Seth - Wizard\nA reclusive wizard.");
    assert_eq!(drain(&mut rx).len(), 1);
}

// ---------------------------------------------------------------------------
// Chat completions backend
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_chat_backend_keeps_conversation_locally() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(sse(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n\
             data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"You enter \"}}]}\n\n\
             data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"the tavern.\"}}]}\n\n\
             data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n\
             data: [DONE]\n\n",
        ))
        .mount(&server)
        .await;

    let gateway = GenerationGateway::new(chat_config(&server));
    let conv = gateway.open_conversation().await.unwrap();
    gateway.append_user_turn(&conv, "hello").await.unwrap();

    let (sink, mut rx) = token_sink();
    let text = gateway.run_and_stream(&conv, None, sink).await.unwrap();
    assert_eq!(text, "You enter the tavern.");
    assert_eq!(drain(&mut rx).concat(), "You enter the tavern.");

    let turns = gateway.list_messages(&conv).await.unwrap();
    assert_eq!(
        turns,
        vec![
            ChatTurn::new("user", "hello"),
            ChatTurn::new("assistant", "You enter the tavern.")
        ]
    );
}

#[tokio::test]
async fn test_chat_backend_unknown_conversation() {
    let server = MockServer::start().await;
    let gateway = GenerationGateway::new(chat_config(&server));
    let (sink, _rx) = token_sink();
    let err = gateway
        .run_and_stream("conv_missing", None, sink)
        .await
        .unwrap_err();
    assert!(matches!(err, TavernError::Generation(_)));
}

// ---------------------------------------------------------------------------
// Gateway behaviour with a scripted backend
// ---------------------------------------------------------------------------

/// Backend whose runs never finish.
struct StalledBackend;

#[async_trait]
impl ConversationBackend for StalledBackend {
    async fn open_conversation(&self) -> TavernResult<String> {
        Ok("stalled".into())
    }

    async fn append_user_turn(&self, _conversation: &str, _content: &str) -> TavernResult<()> {
        Ok(())
    }

    async fn run_stream(
        &self,
        _conversation: &str,
        _instructions: Option<&str>,
    ) -> TavernResult<(mpsc::Receiver<StreamEvent>, JoinHandle<TavernResult<String>>)> {
        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(async move {
            let _ = tx
                .send(StreamEvent::TextDelta {
                    text: "The dice tumble".into(),
                })
                .await;
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("never".to_string())
        });
        Ok((rx, handle))
    }

    async fn list_messages(&self, _conversation: &str) -> TavernResult<Vec<ChatTurn>> {
        Ok(Vec::new())
    }

    async fn close_conversation(&self, _conversation: &str) -> TavernResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_run_times_out() {
    let gateway = GenerationGateway::from_backend(Box::new(StalledBackend))
        .with_timeout(Duration::from_millis(100));
    let (sink, mut rx) = token_sink();
    let err = gateway.run_and_stream("stalled", None, sink).await.unwrap_err();
    assert!(matches!(err, TavernError::Timeout(_)));
    assert_eq!(drain(&mut rx), vec!["The dice tumble".to_string()]);
}

#[tokio::test]
async fn test_generate_bios_with_no_participants_skips_generator() {
    let gateway = GenerationGateway::from_backend(Box::new(StalledBackend))
        .with_timeout(Duration::from_millis(100));
    let (sink, _rx) = token_sink();
    let bios = gateway.generate_bios("stalled", &[], sink).await.unwrap();
    assert!(bios.bios().is_empty());
}

#[test]
fn test_model_config_from_toml() {
    let config: ModelConfig = toml::from_str(
        r#"
        provider = "chat"
        model_id = "gpt-4o"
        api_key = "sk-test"
        "#,
    )
    .unwrap();
    assert_eq!(config.provider, GeneratorProvider::Chat);
    assert_eq!(config.model_id, "gpt-4o");
    assert_eq!(config.max_tokens, 2048);
    assert!(config.assistant_id.is_none());
}
