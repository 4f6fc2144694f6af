//! HTTP transport.
//!
//! Exposes the operation surface as a JSON API suitable for MCP-style
//! integrations. The core stays synchronous in spirit: handlers validate
//! input, delegate into the library, and map the closed error-kind set onto
//! HTTP statuses.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/tools/search` | Ranked full-text search |
//! | `POST` | `/tools/read_doc` | Whole-document read with metadata |
//! | `POST` | `/tools/list_tasks` | Task listing with status filter |
//! | `POST` | `/tools/get_plan` | Plan read with metadata |
//! | `POST` | `/tools/create_doc` | Create a document |
//! | `POST` | `/tools/update_doc` | Overwrite a document |
//! | `POST` | `/tools/create_task` | Create an auto-numbered task |
//! | `POST` | `/tools/update_task_status` | Rewrite a task's status line |
//! | `POST` | `/tools/create_plan` | Create or update a plan |
//! | `POST` | `/tools/log_session` | Append to today's session log |
//! | `POST` | `/tools/init_project` | Scaffold a project |
//! | `POST` | `/tools/reindex` | Full index rebuild |
//! | `POST` | `/tools/register_webhook` | Register a webhook subscription |
//! | `POST` | `/tools/unregister_webhook` | Remove a subscription |
//! | `GET`  | `/tools/list_webhooks` | List subscriptions (no secrets) |
//! | `GET`  | `/resources/projects` | Projects overview (markdown) |
//! | `GET`  | `/resources/projects/{name}` | Project detail (markdown) |
//! | `GET`  | `/resources/projects/{name}/{folder}/{file}` | File read (markdown) |
//! | `GET`  | `/prompts/project_briefing/{project}` | Briefing document |
//! | `GET`  | `/prompts/session_start/{project}` | Session-start document |
//! | `GET`  | `/health` | Health check (unauthenticated) |
//!
//! When `VIBE_AUTH_TOKEN` is configured, every route except `/health`
//! requires `Authorization: Bearer <token>`; the comparison is constant
//! time.

use axum::{
    extract::{Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::Error;
use crate::indexer::{spawn_sync_loop, Indexer};
use crate::reader;
use crate::resources;
use crate::search;
use crate::store::IndexStore;
use crate::webhooks::WebhookDispatcher;
use crate::writer::Writer;
use crate::{prompts, webhooks};

/// Grace period for in-flight webhook deliveries on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Owns every component; handed to the router by reference. No global
/// mutable state anywhere: configuration is immutable and shared via `Arc`.
pub struct Server {
    pub config: Arc<Config>,
    pub store: Arc<IndexStore>,
    pub indexer: Arc<Indexer>,
    pub writer: Arc<Writer>,
    pub dispatcher: Option<Arc<WebhookDispatcher>>,
}

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    store: Arc<IndexStore>,
    writer: Arc<Writer>,
    dispatcher: Option<Arc<WebhookDispatcher>>,
}

impl Server {
    /// Wire up the component graph for a configuration. Must run inside a
    /// tokio runtime (the dispatcher spawns its worker pool).
    pub async fn build(config: Config) -> crate::error::Result<Server> {
        let config = Arc::new(config);
        let store = Arc::new(IndexStore::open(&config.db_path).await?);
        let indexer = Arc::new(Indexer::new(config.root.clone(), Arc::clone(&store)));
        let dispatcher = if config.webhooks_enabled {
            Some(WebhookDispatcher::new(Arc::clone(&store))?)
        } else {
            None
        };
        let writer = Arc::new(Writer::new(
            Arc::clone(&config),
            Arc::clone(&indexer),
            dispatcher.clone(),
        ));

        Ok(Server {
            config,
            store,
            indexer,
            writer,
            dispatcher,
        })
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            config: Arc::clone(&self.config),
            store: Arc::clone(&self.store),
            writer: Arc::clone(&self.writer),
            dispatcher: self.dispatcher.clone(),
        };

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let api = Router::new()
            .route("/tools/search", post(handle_search))
            .route("/tools/read_doc", post(handle_read_doc))
            .route("/tools/list_tasks", post(handle_list_tasks))
            .route("/tools/get_plan", post(handle_get_plan))
            .route("/tools/create_doc", post(handle_create_doc))
            .route("/tools/update_doc", post(handle_update_doc))
            .route("/tools/create_task", post(handle_create_task))
            .route("/tools/update_task_status", post(handle_update_task_status))
            .route("/tools/create_plan", post(handle_create_plan))
            .route("/tools/log_session", post(handle_log_session))
            .route("/tools/init_project", post(handle_init_project))
            .route("/tools/reindex", post(handle_reindex))
            .route("/tools/register_webhook", post(handle_register_webhook))
            .route("/tools/unregister_webhook", post(handle_unregister_webhook))
            .route("/tools/list_webhooks", get(handle_list_webhooks))
            .route("/resources/projects", get(handle_projects_resource))
            .route("/resources/projects/{name}", get(handle_project_detail))
            .route(
                "/resources/projects/{name}/{folder}/{file}",
                get(handle_file_resource),
            )
            .route(
                "/prompts/project_briefing/{project}",
                get(handle_project_briefing),
            )
            .route("/prompts/session_start/{project}", get(handle_session_start))
            .layer(middleware::from_fn_with_state(state.clone(), require_auth));

        Router::new()
            .merge(api)
            .route("/health", get(handle_health))
            .layer(cors)
            .with_state(state)
    }

    /// Serve until interrupted, then drain webhook deliveries.
    pub async fn run(self) -> anyhow::Result<()> {
        self.indexer.ensure_indexed().await?;

        let sync_task = self
            .config
            .sync_interval
            .map(|interval| spawn_sync_loop(Arc::clone(&self.indexer), interval));

        let addr = format!("0.0.0.0:{}", self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        println!("vibe-mcp listening on http://{}", addr);
        println!("  root: {}", self.config.root.display());
        println!("  db:   {}", self.config.db_path.display());

        let app = self.router();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        if let Some(task) = sync_task {
            task.abort();
        }
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.shutdown(SHUTDOWN_GRACE).await;
        }
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

// ---- auth ----

type HmacSha256 = Hmac<Sha256>;

/// Constant-time equality: both values are MACed under the same key and the
/// tags compared via `verify_slice`.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut first =
        HmacSha256::new_from_slice(b"vibe-auth-compare").expect("HMAC can take key of any size");
    first.update(a);
    let tag = first.finalize().into_bytes();

    let mut second =
        HmacSha256::new_from_slice(b"vibe-auth-compare").expect("HMAC can take key of any size");
    second.update(b);
    second.verify_slice(&tag).is_ok()
}

async fn require_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(expected) = &state.config.auth_token else {
        return next.run(req).await;
    };

    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => {
            next.run(req).await
        }
        _ => AppError {
            status: StatusCode::UNAUTHORIZED,
            code: "permission_denied".to_string(),
            message: "missing or invalid bearer token".to_string(),
        }
        .into_response(),
    }
}

// ---- error mapping ----

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> AppError {
        let status = match &err {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::AlreadyExists(_) | Error::Conflict(_) => StatusCode::CONFLICT,
            Error::InvalidArgument(_) | Error::InvalidPath(_) | Error::Unsafe(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::LimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Error::Corrupt(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

fn webhooks_disabled() -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "invalid_argument".to_string(),
        message: "webhooks are disabled on this server".to_string(),
    }
}

// ---- read tools ----

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<search::SearchResult>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let results = search::search(&state.store, &req.query, req.project.as_deref(), req.limit)
        .await?;
    Ok(Json(SearchResponse { results }))
}

#[derive(Deserialize)]
struct ReadDocRequest {
    project: String,
    folder: String,
    filename: String,
}

async fn handle_read_doc(
    State(state): State<AppState>,
    Json(req): Json<ReadDocRequest>,
) -> Result<Json<reader::DocContent>, AppError> {
    let doc = reader::read_doc(&state.config, &req.project, &req.folder, &req.filename)?;
    Ok(Json(doc))
}

#[derive(Deserialize)]
struct ListTasksRequest {
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Serialize)]
struct ListTasksResponse {
    tasks: Vec<reader::TaskRow>,
}

async fn handle_list_tasks(
    State(state): State<AppState>,
    Json(req): Json<ListTasksRequest>,
) -> Result<Json<ListTasksResponse>, AppError> {
    let tasks =
        reader::list_tasks(&state.store, req.project.as_deref(), req.status.as_deref()).await?;
    Ok(Json(ListTasksResponse { tasks }))
}

#[derive(Deserialize)]
struct GetPlanRequest {
    project: String,
    #[serde(default)]
    filename: Option<String>,
}

async fn handle_get_plan(
    State(state): State<AppState>,
    Json(req): Json<GetPlanRequest>,
) -> Result<Json<reader::DocContent>, AppError> {
    let doc = reader::get_plan(&state.config, &req.project, req.filename.as_deref())?;
    Ok(Json(doc))
}

// ---- write tools ----

#[derive(Deserialize)]
struct CreateDocRequest {
    project: String,
    folder: String,
    filename: String,
    content: String,
}

async fn handle_create_doc(
    State(state): State<AppState>,
    Json(req): Json<CreateDocRequest>,
) -> Result<Json<crate::writer::CreatedDoc>, AppError> {
    let result = state
        .writer
        .create_doc(&req.project, &req.folder, &req.filename, &req.content)
        .await?;
    Ok(Json(result))
}

#[derive(Deserialize)]
struct UpdateDocRequest {
    project: String,
    path: String,
    content: String,
}

async fn handle_update_doc(
    State(state): State<AppState>,
    Json(req): Json<UpdateDocRequest>,
) -> Result<Json<crate::writer::UpdatedDoc>, AppError> {
    let result = state
        .writer
        .update_doc(&req.project, &req.path, &req.content)
        .await?;
    Ok(Json(result))
}

#[derive(Deserialize)]
struct CreateTaskRequest {
    project: String,
    title: String,
    objective: String,
    #[serde(default)]
    steps: Vec<String>,
    #[serde(default)]
    feature: Option<String>,
}

async fn handle_create_task(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Json<crate::writer::CreatedTask>, AppError> {
    let result = state
        .writer
        .create_task(
            &req.project,
            &req.title,
            &req.objective,
            &req.steps,
            req.feature.as_deref(),
        )
        .await?;
    Ok(Json(result))
}

#[derive(Deserialize)]
struct UpdateTaskStatusRequest {
    project: String,
    task_file: String,
    status: String,
}

async fn handle_update_task_status(
    State(state): State<AppState>,
    Json(req): Json<UpdateTaskStatusRequest>,
) -> Result<Json<crate::writer::StatusChange>, AppError> {
    let result = state
        .writer
        .update_task_status(&req.project, &req.task_file, &req.status)
        .await?;
    Ok(Json(result))
}

#[derive(Deserialize)]
struct CreatePlanRequest {
    project: String,
    content: String,
    #[serde(default)]
    filename: Option<String>,
}

async fn handle_create_plan(
    State(state): State<AppState>,
    Json(req): Json<CreatePlanRequest>,
) -> Result<Json<crate::writer::PlanWrite>, AppError> {
    let result = state
        .writer
        .create_plan(&req.project, &req.content, req.filename.as_deref())
        .await?;
    Ok(Json(result))
}

#[derive(Deserialize)]
struct LogSessionRequest {
    project: String,
    content: String,
}

async fn handle_log_session(
    State(state): State<AppState>,
    Json(req): Json<LogSessionRequest>,
) -> Result<Json<crate::writer::SessionWrite>, AppError> {
    let result = state.writer.log_session(&req.project, &req.content).await?;
    Ok(Json(result))
}

#[derive(Deserialize)]
struct InitProjectRequest {
    project: String,
}

async fn handle_init_project(
    State(state): State<AppState>,
    Json(req): Json<InitProjectRequest>,
) -> Result<Json<crate::writer::InitializedProject>, AppError> {
    let result = state.writer.init_project(&req.project).await?;
    Ok(Json(result))
}

async fn handle_reindex(
    State(state): State<AppState>,
) -> Result<Json<crate::writer::ReindexReport>, AppError> {
    let result = state.writer.reindex().await?;
    Ok(Json(result))
}

// ---- webhook tools ----

#[derive(Deserialize)]
struct RegisterWebhookRequest {
    url: String,
    secret: String,
    event_types: Vec<String>,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

async fn handle_register_webhook(
    State(state): State<AppState>,
    Json(req): Json<RegisterWebhookRequest>,
) -> Result<Json<webhooks::Registration>, AppError> {
    let Some(dispatcher) = &state.dispatcher else {
        return Err(webhooks_disabled());
    };
    if state.config.read_only {
        return Err(Error::PermissionDenied("server is in read-only mode".to_string()).into());
    }
    let result = dispatcher
        .register(
            &req.url,
            &req.secret,
            &req.event_types,
            req.project.as_deref(),
            req.description.as_deref(),
        )
        .await?;
    Ok(Json(result))
}

#[derive(Deserialize)]
struct UnregisterWebhookRequest {
    subscription_id: i64,
}

async fn handle_unregister_webhook(
    State(state): State<AppState>,
    Json(req): Json<UnregisterWebhookRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Some(dispatcher) = &state.dispatcher else {
        return Err(webhooks_disabled());
    };
    if state.config.read_only {
        return Err(Error::PermissionDenied("server is in read-only mode".to_string()).into());
    }
    dispatcher.unregister(req.subscription_id).await?;
    Ok(Json(serde_json::json!({
        "status": "unregistered",
        "subscription_id": req.subscription_id,
    })))
}

#[derive(Deserialize)]
struct ListWebhooksQuery {
    #[serde(default)]
    project: Option<String>,
}

#[derive(Serialize)]
struct ListWebhooksResponse {
    subscriptions: Vec<webhooks::SubscriptionInfo>,
}

async fn handle_list_webhooks(
    State(state): State<AppState>,
    Query(query): Query<ListWebhooksQuery>,
) -> Result<Json<ListWebhooksResponse>, AppError> {
    let subscriptions = match &state.dispatcher {
        Some(dispatcher) => dispatcher.list(query.project.as_deref()).await?,
        None => Vec::new(),
    };
    Ok(Json(ListWebhooksResponse { subscriptions }))
}

// ---- resources and prompts ----

async fn handle_projects_resource(State(state): State<AppState>) -> Result<String, AppError> {
    Ok(resources::projects_overview(&state.store).await?)
}

async fn handle_project_detail(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<String, AppError> {
    Ok(resources::project_detail(&state.store, &name).await?)
}

async fn handle_file_resource(
    State(state): State<AppState>,
    Path((name, folder, file)): Path<(String, String, String)>,
) -> Result<String, AppError> {
    Ok(resources::file_resource(&state.config, &name, &folder, &file)?)
}

async fn handle_project_briefing(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> Result<String, AppError> {
    Ok(prompts::project_briefing(&state.config, &state.store, &project).await?)
}

async fn handle_session_start(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> Result<String, AppError> {
    Ok(prompts::session_start(&state.config, &state.store, &project).await?)
}

// ---- health ----

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_comparison_matches_equality() {
        assert!(constant_time_eq(b"same-token-value", b"same-token-value"));
        assert!(!constant_time_eq(b"same-token-value", b"other-token-value"));
        assert!(!constant_time_eq(b"short", b"longer-value"));
    }
}
