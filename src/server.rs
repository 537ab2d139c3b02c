//! HTTP API: chat (blocking and SSE streaming), session management, and
//! catalog stats. Streaming frames are the JSON `StatusUpdate` protocol;
//! client disconnects cancel the in-flight agent run cooperatively.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::header::{AUTHORIZATION, CONTENT_TYPE},
    http::{HeaderValue, Method, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::agent::{Agent, Cancelled};
use crate::builder::FlowBuilder;
use crate::catalog::CatalogStore;
use crate::planner::{self, QueryPlanner};
use crate::query::is_platform_query;
use crate::responder::GeneralResponder;
use crate::sessions::{SessionMessage, SessionStore};
use crate::types::{reply_frames, StatusUpdate};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub catalog: CatalogStore,
    pub sessions: SessionStore,
    pub planner: Arc<QueryPlanner>,
    pub agent: Arc<Agent>,
    pub responder: Arc<GeneralResponder>,
    pub builder: Arc<FlowBuilder>,
    pub history_limit: usize,
}

// ---------------------------------------------------------------------------
// Request/response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub build_flow_mode: bool,
}

struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn bad_request(detail: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.to_string(),
        }
    }

    fn not_found(detail: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            detail: detail.to_string(),
        }
    }

    fn internal(detail: String) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(json!({"detail": self.detail}))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    // Wildcard headers cannot be combined with credentials, so list the
    // ones browsers actually send.
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/chat", post(chat_handler))
        .route("/chat/stream", post(chat_stream_handler))
        .route("/reset", post(reset_handler))
        .route("/sessions", get(list_sessions_handler))
        .route(
            "/sessions/:session_id",
            get(get_session_handler).delete(delete_session_handler),
        )
        .route("/stats", get(stats_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(state: AppState, bind: &str, port: u16, origins: &[String]) -> anyhow::Result<()> {
    let app = build_router(state, origins);

    let ip: std::net::IpAddr = bind
        .parse()
        .unwrap_or_else(|_| std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
    let addr = std::net::SocketAddr::new(ip, port);
    info!("Flowmate assistant listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Chat pipeline (shared by /chat and /chat/stream)
// ---------------------------------------------------------------------------

async fn send_status(tx: &Option<mpsc::Sender<StatusUpdate>>, update: StatusUpdate) {
    if let Some(tx) = tx {
        let _ = tx.send(update).await;
    }
}

/// Route a chat message and produce the assistant reply. Interactions
/// are logged to the session store on success.
pub async fn run_chat_pipeline(
    state: &AppState,
    message: &str,
    session_id: Option<&str>,
    build_flow_mode: bool,
    status_tx: Option<mpsc::Sender<StatusUpdate>>,
    cancel: CancellationToken,
) -> anyhow::Result<String> {
    let history: Vec<SessionMessage> = match session_id {
        Some(id) => state.sessions.recent_messages(id, state.history_limit),
        None => Vec::new(),
    };
    let history_texts: Vec<String> = history.iter().map(|m| m.message.clone()).collect();

    let reply = if !is_platform_query(message, &history_texts) {
        info!("Detected general query - using lightweight responder");
        send_status(&status_tx, StatusUpdate::status("Answering directly...")).await;
        state.responder.respond(message, &history).await?
    } else if build_flow_mode {
        send_status(&status_tx, StatusUpdate::status("Starting Flow Builder...")).await;
        send_status(
            &status_tx,
            StatusUpdate::status("Analyzing your flow request..."),
        )
        .await;

        // Fold recent conversation into the request so follow-up guides
        // respect the ongoing context.
        let contextual_request = if history.is_empty() {
            message.to_string()
        } else {
            let formatted: Vec<String> = history
                .iter()
                .map(|m| format!("{}: {}", m.role.to_uppercase(), m.message))
                .collect();
            format!(
                "Continue assisting the user based on this conversation history:\n{}\n\nLatest user request: {}\nProvide an updated or additional flow guide that respects the ongoing context.",
                formatted.join("\n"),
                message
            )
        };

        let result = state.builder.build_flow(&contextual_request, None).await;
        result.render_reply()
    } else {
        send_status(&status_tx, StatusUpdate::status("Starting...")).await;
        send_status(&status_tx, StatusUpdate::status("Processing query...")).await;

        let plan = state.planner.analyze(message).await;
        let enhanced_input = format!(
            "{}\n{}\n\nUSER QUERY: {}",
            planner::format_for_agent(&plan),
            "=".repeat(60),
            message
        );
        state
            .agent
            .run(&enhanced_input, &history, status_tx.clone(), cancel)
            .await?
    };

    if let Some(id) = session_id {
        if let Err(e) = state.sessions.log_interaction(id, message, &reply) {
            warn!("Could not log interaction: {}", e);
        }
    }

    Ok(reply)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn root_handler() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "message": "Flowmate assistant API is running"
    }))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "message": "Service is operational"
    }))
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let message = request.message.trim().to_string();
    if message.is_empty() {
        return Err(ApiError::bad_request("Message cannot be empty"));
    }

    let reply = run_chat_pipeline(
        &state,
        &message,
        request.session_id.as_deref(),
        request.build_flow_mode,
        None,
        CancellationToken::new(),
    )
    .await
    .map_err(|e| {
        error!("Chat error: {}", e);
        ApiError::internal(format!(
            "An error occurred while processing your request: {}",
            e
        ))
    })?;

    Ok(Json(json!({"reply": reply})))
}

/// Cancels the agent run when the SSE stream is dropped (client
/// disconnect) or finishes.
struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

async fn chat_stream_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let message = request.message.trim().to_string();
    if message.is_empty() {
        return Err(ApiError::bad_request("Message cannot be empty"));
    }

    let (tx, rx) = mpsc::channel::<StatusUpdate>(64);
    let cancel = CancellationToken::new();

    {
        let state = state.clone();
        let message = message.clone();
        let session_id = request.session_id.clone();
        let build_flow_mode = request.build_flow_mode;
        let cancel = cancel.clone();
        let tx_worker = tx.clone();

        tokio::spawn(async move {
            let result = run_chat_pipeline(
                &state,
                &message,
                session_id.as_deref(),
                build_flow_mode,
                Some(tx_worker.clone()),
                cancel.clone(),
            )
            .await;

            match result {
                Ok(reply) => {
                    for frame in reply_frames(&reply) {
                        if tx_worker.send(frame).await.is_err() {
                            break;
                        }
                    }
                }
                Err(e) if e.downcast_ref::<Cancelled>().is_some() || cancel.is_cancelled() => {
                    info!("Agent execution stopped after cancellation");
                    let _ = tx_worker
                        .send(StatusUpdate::Cancelled {
                            message: "Request cancelled".to_string(),
                        })
                        .await;
                }
                Err(e) => {
                    error!("Streaming chat error: {}", e);
                    let _ = tx_worker
                        .send(StatusUpdate::Error {
                            message: e.to_string(),
                        })
                        .await;
                }
            }
        });
    }

    let guard = CancelOnDrop(cancel);
    let stream = futures::stream::unfold(
        (rx, guard, false),
        |(mut rx, guard, finished)| async move {
            if finished {
                return None;
            }
            let update = rx.recv().await?;
            let terminal = update.is_terminal();
            let event = Event::default().data(serde_json::to_string(&update).ok()?);
            Some((Ok::<_, Infallible>(event), (rx, guard, terminal)))
        },
    );

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn reset_handler(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .sessions
        .delete_all()
        .map_err(|e| ApiError::internal(format!("Error clearing history: {}", e)))?;
    Ok(Json(json!({
        "status": "success",
        "message": "Conversation history has been cleared"
    })))
}

async fn list_sessions_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({"sessions": state.sessions.list()}))
}

async fn get_session_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.sessions.load(&session_id) {
        Some(data) => Ok(Json(serde_json::to_value(data).map_err(|e| {
            ApiError::internal(format!("Error serializing session: {}", e))
        })?)),
        None => Err(ApiError::not_found("Session not found")),
    }
}

async fn delete_session_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .sessions
        .delete(&session_id)
        .map_err(|e| ApiError::internal(format!("Error deleting session: {}", e)))?;
    Ok(Json(json!({
        "status": "success",
        "message": format!("Session {} deleted", session_id)
    })))
}

async fn stats_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = state
        .catalog
        .stats()
        .await
        .map_err(|e| ApiError::internal(format!("Error retrieving stats: {}", e)))?;
    Ok(Json(json!({
        "total_pieces": stats.total_pieces,
        "total_actions": stats.total_actions,
        "total_triggers": stats.total_triggers,
        "generated_at": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_support::store_with_sample_data;
    use crate::index::{DocIndex, EmbeddingService};
    use crate::tools::web_search::SearchBackend;
    use crate::traits::{ModelProvider, ProviderResponse};
    use async_trait::async_trait;
    use serde_json::Value;
    use tempfile::TempDir;

    struct FixedProvider(&'static str);

    #[async_trait]
    impl ModelProvider for FixedProvider {
        async fn chat(
            &self,
            _model: &str,
            _messages: &[Value],
            _tools: &[Value],
        ) -> anyhow::Result<ProviderResponse> {
            Ok(ProviderResponse {
                content: Some(self.0.to_string()),
                tool_calls: Vec::new(),
                usage: None,
            })
        }
    }

    struct NoSearch;

    #[async_trait]
    impl SearchBackend for NoSearch {
        async fn search(&self, _query: &str) -> anyhow::Result<String> {
            Ok(String::new())
        }
    }

    async fn test_state(reply: &'static str) -> (TempDir, AppState) {
        let dir = TempDir::new().unwrap();
        let catalog = store_with_sample_data().await;
        let provider: Arc<dyn ModelProvider> = Arc::new(FixedProvider(reply));
        let index = DocIndex::new(catalog.pool().clone(), EmbeddingService::new());
        let sessions = SessionStore::new(dir.path());

        let state = AppState {
            catalog: catalog.clone(),
            sessions,
            planner: Arc::new(QueryPlanner::new(provider.clone(), "fast".into(), 8)),
            agent: Arc::new(Agent::new(provider.clone(), vec![], "primary".into())),
            responder: Arc::new(GeneralResponder::new(provider.clone(), "fast".into())),
            builder: Arc::new(FlowBuilder::new(
                provider,
                catalog,
                index,
                Arc::new(NoSearch),
                "fast".into(),
                "smart".into(),
                true,
            )),
            history_limit: 8,
        };
        (dir, state)
    }

    #[tokio::test]
    async fn general_query_bypasses_agent_and_logs() {
        let (_dir, state) = test_state("The capital of France is Paris.").await;
        let reply = run_chat_pipeline(
            &state,
            "what's the capital of France?",
            Some("s1"),
            false,
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(reply.contains("Paris"));

        let session = state.sessions.load("s1").unwrap();
        assert_eq!(session.messages.len(), 2);
    }

    #[tokio::test]
    async fn platform_query_runs_agent_with_plan() {
        let (_dir, state) = test_state("Gmail is available with a Send Email action.").await;
        let reply = run_chat_pipeline(
            &state,
            "is the gmail piece available as an integration?",
            None,
            false,
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(reply.contains("Gmail is available"));
    }

    #[tokio::test]
    async fn stream_pipeline_emits_status_frames() {
        let (_dir, state) = test_state("All set.").await;
        let (tx, mut rx) = mpsc::channel(32);
        run_chat_pipeline(
            &state,
            "is the gmail piece available as an integration?",
            None,
            false,
            Some(tx),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let mut saw_status = false;
        while let Ok(frame) = rx.try_recv() {
            if matches!(frame, StatusUpdate::Status { .. }) {
                saw_status = true;
            }
        }
        assert!(saw_status);
    }

    #[tokio::test]
    async fn router_builds_with_configured_origins() {
        let (_dir, state) = test_state("ok").await;
        let origins = vec![
            "http://localhost:5173".to_string(),
            "not a header value\n".to_string(),
        ];
        // Invalid origins are skipped, not fatal.
        let _router = build_router(state, &origins);
    }
}
