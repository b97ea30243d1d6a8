use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use polaris_core::conversation::ChatMessage;
use polaris_core::ids::{ConversationId, ProjectId};

use crate::dispatch::{Dispatcher, ProjectCreated};
use crate::error::DispatchError;

const MESSAGE_PAGE: usize = 50;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 9191,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/messages", post(send_message))
        .route("/api/messages/cancel", post(cancel_messages))
        .route("/api/projects", post(create_project))
        .route("/api/conversations", post(create_conversation))
        .route("/api/conversations/{id}/messages", get(list_messages))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and start serving. Returns a handle holding the bound port.
pub async fn start(config: ServerConfig, dispatcher: Arc<Dispatcher>) -> Result<ServerHandle, std::io::Error> {
    let router = build_router(AppState { dispatcher });
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(host = %config.host, port = local_addr.port(), "Polaris server started");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "server stopped");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        server,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Wait until the server task ends.
    pub async fn wait(self) {
        if let Err(e) = self.server.await {
            tracing::error!(error = %e, "server task failed");
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest {
    conversation_id: String,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelRequest {
    project_id: String,
}

#[derive(Deserialize)]
struct CreateProjectRequest {
    prompt: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateConversationRequest {
    project_id: String,
    #[serde(default)]
    title: Option<String>,
}

async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<Value>, DispatchError> {
    let receipt = state
        .dispatcher
        .send_message(&ConversationId::from_raw(req.conversation_id), &req.message)
        .await?;
    Ok(Json(json!({
        "success": true,
        "messageId": receipt.message_id,
    })))
}

async fn cancel_messages(
    State(state): State<AppState>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<Value>, DispatchError> {
    let report = state
        .dispatcher
        .cancel_all(&ProjectId::from_raw(req.project_id))
        .await?;
    Ok(Json(json!({
        "success": true,
        "cancelled": report.cancelled,
        "messageIds": report.message_ids,
    })))
}

async fn create_project(
    State(state): State<AppState>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<ProjectCreated>), DispatchError> {
    let created = state.dispatcher.create_project_with_prompt(&req.prompt).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn create_conversation(
    State(state): State<AppState>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<Value>), DispatchError> {
    let conversation = state
        .dispatcher
        .create_conversation(&ProjectId::from_raw(req.project_id), req.title.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "conversationId": conversation.id }))))
}

async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ChatMessage>>, DispatchError> {
    let messages = state
        .dispatcher
        .recent_messages(&ConversationId::from_raw(id), MESSAGE_PAGE)
        .await?;
    Ok(Json(messages))
}

/// Health check HTTP endpoint.
async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use polaris_core::conversation::DEFAULT_CONVERSATION_TITLE;
    use polaris_core::security::InternalKey;
    use polaris_engine::{JobConfig, MessageJob, StepJournal};
    use polaris_llm::mock::{MockProvider, MockResponse};
    use polaris_store::{ConversationStore, Database, SystemStore};
    use tokio::sync::broadcast;

    use crate::bus::LocalJobBus;

    const KEY: &str = "server-test-key";

    struct TestServer {
        base: String,
        store: Arc<SystemStore>,
        client: reqwest::Client,
    }

    async fn spawn_server(agent: Vec<MockResponse>, titles: Vec<MockResponse>) -> TestServer {
        let store = Arc::new(SystemStore::new(
            Database::in_memory().unwrap(),
            Some(InternalKey::new(KEY)),
        ));
        let (tx, _) = broadcast::channel(256);
        let journal: Arc<dyn StepJournal> = Arc::new(store.jobs());
        let job = Arc::new(MessageJob::new(
            store.clone(),
            store.clone(),
            Arc::new(MockProvider::new(agent)),
            Arc::new(MockProvider::new(titles)),
            journal,
            Some(InternalKey::new(KEY)),
            JobConfig::default(),
            tx,
        ));
        let bus = Arc::new(LocalJobBus::new(job, store.jobs()));
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), bus, Some(InternalKey::new(KEY))));

        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0, // Random port
        };
        let handle = start(config, dispatcher).await.unwrap();
        assert!(handle.port > 0);

        TestServer {
            base: format!("http://127.0.0.1:{}", handle.port),
            store,
            client: reqwest::Client::new(),
        }
    }

    impl TestServer {
        async fn post(&self, path: &str, body: Value) -> (u16, Value) {
            let resp = self
                .client
                .post(format!("{}{path}", self.base))
                .json(&body)
                .send()
                .await
                .unwrap();
            let status = resp.status().as_u16();
            (status, resp.json().await.unwrap_or(Value::Null))
        }

        async fn messages(&self, conversation_id: &str) -> Vec<Value> {
            let url = format!("{}/api/conversations/{conversation_id}/messages", self.base);
            self.client.get(url).send().await.unwrap().json().await.unwrap()
        }

        /// Poll until the message leaves `processing`.
        async fn settled(&self, conversation_id: &str, message_id: &str) -> Value {
            tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    let found = self
                        .messages(conversation_id)
                        .await
                        .into_iter()
                        .find(|m| m["id"] == message_id);
                    if let Some(m) = found {
                        if m["status"] != "processing" {
                            return m;
                        }
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .unwrap()
        }
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let server = spawn_server(vec![], vec![]).await;
        let resp = reqwest::get(format!("{}/health", server.base)).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn project_prompt_runs_to_completion() {
        let server = spawn_server(
            vec![
                MockResponse::tool_call(
                    "createFiles",
                    json!({"parentId": "", "files": [{"name": "index.js", "content": "console.log(1)"}]}),
                ),
                MockResponse::text("Created index.js."),
            ],
            vec![MockResponse::text("Index file")],
        )
        .await;

        let (status, created) = server
            .post("/api/projects", json!({"prompt": "Create index.js printing 1"}))
            .await;
        assert_eq!(status, 201);
        let conversation_id = created["conversationId"].as_str().unwrap().to_string();
        let message_id = created["messageId"].as_str().unwrap().to_string();

        let placeholder = server.settled(&conversation_id, &message_id).await;
        assert_eq!(placeholder["status"], "completed");
        assert_eq!(placeholder["content"], "Created index.js.");

        let key = InternalKey::new(KEY);
        let conv = server
            .store
            .get_conversation(&key, &ConversationId::from_raw(conversation_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conv.title, "Index file");
        assert_ne!(conv.title, DEFAULT_CONVERSATION_TITLE);
    }

    #[tokio::test]
    async fn send_message_errors_map_to_status_codes() {
        let server = spawn_server(vec![], vec![]).await;

        let (status, body) = server
            .post("/api/messages", json!({"conversationId": "conv_missing", "message": "hi"}))
            .await;
        assert_eq!(status, 404);
        assert_eq!(body["error"], "Conversation not found");

        let (status, created) = server
            .post("/api/conversations", json!({"projectId": "proj_missing"}))
            .await;
        assert_eq!(status, 404);
        assert!(created["error"].is_string());
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let server = spawn_server(vec![], vec![]).await;
        let key = InternalKey::new(KEY);
        let (_, conv) = server
            .store
            .create_project_with_conversation(&key, "demo", "chat")
            .await
            .unwrap();

        let (status, body) = server
            .post("/api/messages", json!({"conversationId": conv.id.as_str(), "message": "  "}))
            .await;
        assert_eq!(status, 400);
        assert_eq!(body["error"], "Message cannot be empty");
    }

    #[tokio::test]
    async fn cancel_endpoint_reports_cancelled_ids() {
        let server = spawn_server(
            vec![MockResponse::delayed(Duration::from_millis(300), MockResponse::text("late"))],
            vec![],
        )
        .await;
        let key = InternalKey::new(KEY);
        let (project, conv) = server
            .store
            .create_project_with_conversation(&key, "demo", "chat")
            .await
            .unwrap();

        let (status, sent) = server
            .post("/api/messages", json!({"conversationId": conv.id.as_str(), "message": "hi"}))
            .await;
        assert_eq!(status, 200);
        assert_eq!(sent["success"], true);
        let message_id = sent["messageId"].as_str().unwrap().to_string();

        let (status, report) = server
            .post("/api/messages/cancel", json!({"projectId": project.id.as_str()}))
            .await;
        assert_eq!(status, 200);
        assert_eq!(report["cancelled"], true);
        assert_eq!(report["messageIds"], json!([message_id.clone()]));

        let placeholder = server.settled(conv.id.as_str(), &message_id).await;
        assert_eq!(placeholder["status"], "cancelled");

        let (_, report) = server
            .post("/api/messages/cancel", json!({"projectId": project.id.as_str()}))
            .await;
        assert_eq!(report["cancelled"], false);
    }

    #[tokio::test]
    async fn new_conversation_gets_default_title() {
        let server = spawn_server(vec![], vec![]).await;
        let key = InternalKey::new(KEY);
        let (project, _) = server
            .store
            .create_project_with_conversation(&key, "demo", "chat")
            .await
            .unwrap();

        let (status, body) = server
            .post("/api/conversations", json!({"projectId": project.id.as_str()}))
            .await;
        assert_eq!(status, 201);
        let id = ConversationId::from_raw(body["conversationId"].as_str().unwrap());
        let conv = server.store.get_conversation(&key, &id).await.unwrap().unwrap();
        assert_eq!(conv.title, DEFAULT_CONVERSATION_TITLE);
        assert!(server.messages(id.as_str()).await.is_empty());
    }
}
