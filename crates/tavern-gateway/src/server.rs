use crate::middleware::cors_layer;
use crate::orchestrator::SessionOrchestrator;
use crate::push::LocalPushEndpoint;
use crate::response::CoreResponse;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::Method,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tavern_core::{Action, TavernError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Shared application state.
pub struct AppState {
    pub orchestrator: Arc<SessionOrchestrator>,
    pub push: Arc<LocalPushEndpoint>,
}

/// The HTTP + WebSocket front end.
pub struct GatewayServer;

impl GatewayServer {
    /// Build the router. `push` must be the endpoint the orchestrator's
    /// dispatcher delivers through, so sockets accepted here receive broadcasts.
    pub fn build(orchestrator: Arc<SessionOrchestrator>, push: Arc<LocalPushEndpoint>) -> Router {
        let state = Arc::new(AppState { orchestrator, push });

        Router::new()
            .route("/health", get(health_handler))
            .route(
                "/sessions/{id}",
                get(get_session_handler)
                    .post(post_action_handler)
                    .delete(delete_session_handler)
                    .fallback(method_not_allowed),
            )
            .route("/ws/{id}", get(ws_handler))
            .layer(cors_layer())
            .with_state(state)
    }
}

/// Periodically reclaims expired connection records and sessions.
pub fn spawn_sweeper(orchestrator: Arc<SessionOrchestrator>, every: Duration) -> JoinHandle<()> {
    let every = every.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = orchestrator.sweep().await {
                warn!(error = %e, "Sweep failed");
            }
        }
    })
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok", "service": "tavern"}))
}

async fn get_session_handler(
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> CoreResponse {
    info!(session_id = %session_id, "Handling GET request");
    state.orchestrator.get_session(&session_id).await
}

async fn post_action_handler(
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
    body: String,
) -> CoreResponse {
    info!(session_id = %session_id, "Handling POST request");
    let action: Action = match serde_json::from_str(&body) {
        Ok(action) => action,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Malformed action body");
            return CoreResponse::from(&TavernError::InvalidAction(format!(
                "Invalid action body: {e}"
            )));
        }
    };
    run_action(state.orchestrator.clone(), session_id, action).await
}

async fn delete_session_handler(
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> CoreResponse {
    info!(session_id = %session_id, "Handling DELETE request");
    state.orchestrator.delete_session(&session_id).await
}

async fn method_not_allowed(method: Method) -> CoreResponse {
    warn!(method = %method, "Unsupported HTTP method");
    CoreResponse::from(&TavernError::MethodNotAllowed(method.to_string()))
}

/// Runs the action on its own task so a dropped client does not cancel the
/// transcript write.
async fn run_action(
    orchestrator: Arc<SessionOrchestrator>,
    session_id: String,
    action: Action,
) -> CoreResponse {
    let task =
        tokio::spawn(async move { orchestrator.handle_action(&session_id, &action).await });
    match task.await {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "Action task failed");
            CoreResponse::error(500, "Internal error")
        }
    }
}

/// Waits for whichever task finishes first and aborts the other.
async fn join_first(mut first: JoinHandle<()>, mut second: JoinHandle<()>) {
    tokio::select! {
        _ = &mut first => second.abort(),
        _ = &mut second => first.abort(),
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, state))
}

async fn handle_socket(socket: WebSocket, session_id: String, state: Arc<AppState>) {
    let connection_id = Uuid::new_v4().to_string();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel for sending messages back to the WebSocket
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    state.push.register(&connection_id, tx.clone()).await;

    if let Err(e) = state.orchestrator.attach(&session_id, &connection_id).await {
        error!(session_id = %session_id, error = %e, "Failed to attach connection");
        state.push.unregister(&connection_id).await;
        return;
    }
    info!(
        connection_id = %connection_id,
        session_id = %session_id,
        "WebSocket connected"
    );

    // Task: forward messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Task: receive actions; each runs on its own task and answers the sender only
    let orchestrator = state.orchestrator.clone();
    let frame_session = session_id.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let action = Action::from_frame(text.as_str());
                    let orchestrator = orchestrator.clone();
                    let session_id = frame_session.clone();
                    let reply = tx.clone();
                    tokio::spawn(async move {
                        let response = orchestrator.handle_action(&session_id, &action).await;
                        let _ = reply.send(response.body.into_bytes());
                    });
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    join_first(send_task, recv_task).await;

    state.push.unregister(&connection_id).await;
    if let Err(e) = state.orchestrator.detach(&connection_id).await {
        warn!(connection_id = %connection_id, error = %e, "Failed to detach connection");
    }
    info!(connection_id = %connection_id, "WebSocket disconnected");
}
