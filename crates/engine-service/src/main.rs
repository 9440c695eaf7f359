//! `orch-service`: HTTP control plane, file-editor surface, and agent tool
//! bridge for the orchestration engine (spec §6).

use axum::{
    extract::{Path as AxumPath, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use futures::stream::StreamExt;
use orch_engine::prelude::*;
use orch_engine::tool_bridge::{RpcRequest, RpcResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address to bind the service to
    #[arg(long, env = "ORCH_ADDR", default_value = "0.0.0.0:8080")]
    addr: String,
    /// Root directory workspaces are provisioned under
    #[arg(long, env = "ORCH_WORKSPACE_BASE_DIR", default_value = "/tmp/orchestration_workspaces")]
    workspace_base_dir: PathBuf,
}

struct AppState {
    config: Arc<EngineConfig>,
    model_client: Arc<dyn ModelClient>,
    workspace_manager: Arc<WorkspaceManager>,
    stream_hub: Arc<StreamHub>,
    editor_service: Arc<EditorService>,
    tool_bridge: Arc<ToolBridge>,
    /// External persistence collaborator for workflow metadata (spec §3,
    /// §6.5); not yet consulted for path resolution below, where every
    /// workflow gets a lazily-created default root under
    /// `workspace_base_dir`, but kept wired for git-backed workflow lookups.
    #[allow(dead_code)]
    store: Arc<dyn Store>,
    workspace_base_dir: PathBuf,
    executions: parking_lot::Mutex<HashMap<String, (Execution, CancellationToken)>>,
}

type SharedState = Arc<AppState>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("orch_service=info,tower_http=info"));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let args = Args::parse();
    let config = Arc::new(EngineConfig::from_env());

    info!(addr = %args.addr, workspace_base_dir = %args.workspace_base_dir.display(), "starting service");

    let state = build_state(config, args.workspace_base_dir);

    let app = Router::new()
        .route("/healthz", get(handle_healthz))
        .route("/api/orchestration/execute-design", post(handle_execute_design))
        .route("/api/orchestration/execute-design/stream", post(handle_execute_design_stream))
        .route("/api/orchestration/{pattern}/stream", post(handle_pattern_stream))
        .route("/api/orchestration/cancel", post(handle_cancel))
        .route("/api/orchestration/{execution_id}/log", get(handle_log))
        .route("/api/file-editor/browse", post(handle_browse))
        .route("/api/file-editor/tree", post(handle_tree))
        .route("/api/file-editor/read", post(handle_read))
        .route("/api/file-editor/create-change", post(handle_create_change))
        .route("/api/file-editor/changes", post(handle_changes))
        .route("/api/file-editor/approve", post(handle_approve))
        .route("/api/file-editor/reject", post(handle_reject))
        .route("/api/file-editor/rollback", post(handle_rollback))
        .route("/api/file-editor/search", post(handle_search))
        .route("/mcp", post(handle_mcp))
        .route("/sse", get(handle_sse))
        .route("/admin/clear-caches", post(handle_clear_caches))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&args.addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_state(config: Arc<EngineConfig>, workspace_base_dir: PathBuf) -> SharedState {
    let model_client: Arc<dyn ModelClient> = Arc::new(orch_engine::model_client::MockModelClient::new());
    let workspace_manager = Arc::new(WorkspaceManager::new(workspace_base_dir.clone(), config.workspace_grace));
    let stream_hub = Arc::new(StreamHub::new(config.stream_ring_buffer));
    let editor_service = Arc::new(EditorService::new(config.clone()));
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());

    let root_base = workspace_base_dir.clone();
    let default_root_by_workflow = Arc::new(move |workflow_id: &str| -> Option<PathBuf> { Some(root_base.join(workflow_id)) });
    let tool_bridge = Arc::new(ToolBridge::new(
        editor_service.clone(),
        default_root_by_workflow,
        config.tool_call_semaphore,
        config.internal_service_token.clone(),
        config.tool_call_timeout,
    ));

    Arc::new(AppState {
        config,
        model_client,
        workspace_manager,
        stream_hub,
        editor_service,
        tool_bridge,
        store,
        workspace_base_dir,
        executions: parking_lot::Mutex::new(HashMap::new()),
    })
}

async fn handle_healthz() -> &'static str {
    "ok"
}

/// Every `/api/*` endpoint requires this shared secret in
/// `Authorization: Bearer <token>`, the same internal service token
/// `ToolBridge` presents when it calls into `/mcp` (spec §6.2). Empty
/// disables the check, matching `querymt-service`'s optional `auth_key`.
fn require_internal_token(headers: &HeaderMap, config: &EngineConfig) -> Result<(), ApiError> {
    if config.internal_service_token.is_empty() {
        return Ok(());
    }
    let auth_header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| ApiError(EngineError::AccessDenied("missing authorization".to_string())))?;
    let auth_str = auth_header
        .to_str()
        .map_err(|_| ApiError(EngineError::AccessDenied("invalid authorization header".to_string())))?;
    if !auth_str.starts_with("Bearer ") || &auth_str[7..] != config.internal_service_token {
        return Err(ApiError(EngineError::AccessDenied("invalid internal service token".to_string())));
    }
    Ok(())
}

#[derive(Deserialize)]
struct ExecuteDesignRequest {
    execution_id: Option<String>,
    design: Design,
    user_prompt: String,
    #[serde(default)]
    workflow_id: Option<String>,
}

#[derive(Serialize)]
struct ExecuteDesignResponse {
    execution_id: String,
    status: ExecutionStatus,
}

/// Register an execution, spawn its run on the background, and return the
/// execution id plus a `CancellationToken` the caller already holds in
/// `state.executions`. Callers that want to stream must `subscribe()` to
/// the `StreamHub` *before* calling this, so no early events are missed.
fn spawn_execution(state: &SharedState, execution_id: String, design: Design, user_prompt: String, workflow_id: Option<String>) {
    let cancel_token = CancellationToken::new();
    state.executions.lock().insert(
        execution_id.clone(),
        (Execution::new(&execution_id, design.id.clone(), workflow_id), cancel_token.clone()),
    );

    let scheduler = DesignScheduler::new(state.model_client.clone(), state.workspace_manager.clone(), state.stream_hub.clone())
        .with_agent_turn_timeout(state.config.agent_turn_timeout)
        .with_block_timeout(state.config.block_timeout)
        .with_execution_timeout(state.config.execution_timeout);
    let exec_id = execution_id;
    let background_state = state.clone();

    tokio::spawn(async move {
        match scheduler.run(&exec_id, &design, &user_prompt, Vec::new(), cancel_token).await {
            Ok(execution) => {
                let status = execution.status;
                if let Some(entry) = background_state.executions.lock().get_mut(&exec_id) {
                    entry.0 = execution;
                }
                info!(execution_id = %exec_id, status = ?status, "execution finished");
            }
            Err(e) => {
                warn!(execution_id = %exec_id, error = %e, "execution failed to run");
            }
        }
    });
}

async fn handle_execute_design(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(req): Json<ExecuteDesignRequest>,
) -> Result<Json<ExecuteDesignResponse>, ApiError> {
    require_internal_token(&headers, &state.config)?;
    req.design.validate()?;
    let execution_id = req.execution_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    spawn_execution(&state, execution_id.clone(), req.design, req.user_prompt, req.workflow_id);
    Ok(Json(ExecuteDesignResponse { execution_id, status: ExecutionStatus::Running }))
}

async fn handle_execute_design_stream(State(state): State<SharedState>, headers: HeaderMap, Json(req): Json<ExecuteDesignRequest>) -> Result<Response, ApiError> {
    require_internal_token(&headers, &state.config)?;
    req.design.validate()?;
    let execution_id = req.execution_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let (snapshot, receiver) = state.stream_hub.subscribe(&execution_id);
    spawn_execution(&state, execution_id, req.design, req.user_prompt, req.workflow_id);
    Ok(sse_response(snapshot, receiver))
}

/// Request body for the single-block pattern convenience endpoints
/// (`POST /api/orchestration/{pattern}/stream`).
#[derive(Deserialize)]
struct PatternStreamRequest {
    task: String,
    agents: Vec<AgentSpec>,
    #[serde(default)]
    git_repo: Option<String>,
    #[serde(default)]
    isolate_agent_workspaces: bool,
    #[serde(default)]
    rounds: Option<u32>,
    #[serde(default)]
    aggregator: Option<String>,
    #[serde(default)]
    execution_id: Option<String>,
    #[serde(default)]
    workflow_id: Option<String>,
}

fn block_type_from_pattern(pattern: &str) -> Result<BlockType, ApiError> {
    match pattern {
        "sequential" => Ok(BlockType::Sequential),
        "parallel" => Ok(BlockType::Parallel),
        "hierarchical" => Ok(BlockType::Hierarchical),
        "debate" => Ok(BlockType::Debate),
        "routing" => Ok(BlockType::Routing),
        other => Err(ApiError(EngineError::InvalidInput(format!("unknown orchestration pattern {other}")))),
    }
}

async fn handle_pattern_stream(
    State(state): State<SharedState>,
    headers: HeaderMap,
    AxumPath(pattern): AxumPath<String>,
    Json(req): Json<PatternStreamRequest>,
) -> Result<Response, ApiError> {
    require_internal_token(&headers, &state.config)?;
    let block_type = block_type_from_pattern(&pattern)?;
    let execution_id = req.execution_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let block_id = "block-1".to_string();

    let design = Design {
        id: execution_id.clone(),
        blocks: vec![Block {
            id: block_id,
            block_type,
            agents: req.agents,
            task: req.task.clone(),
            git_repo: req.git_repo,
            isolate_agent_workspaces: req.isolate_agent_workspaces,
            rounds: req.rounds,
            aggregator: req.aggregator,
        }],
        connections: vec![],
    };
    design.validate()?;

    let (snapshot, receiver) = state.stream_hub.subscribe(&execution_id);
    spawn_execution(&state, execution_id, design, req.task, req.workflow_id);
    Ok(sse_response(snapshot, receiver))
}

fn sse_response(snapshot: Vec<orch_engine::stream_hub::Envelope>, receiver: tokio::sync::broadcast::Receiver<orch_engine::stream_hub::Envelope>) -> Response {
    let backlog = futures::stream::iter(
        snapshot
            .into_iter()
            .map(|envelope| Ok::<_, Infallible>(Event::default().json_data(&envelope).unwrap_or_else(|_| Event::default()))),
    );
    let tail = tokio_stream::wrappers::BroadcastStream::new(receiver).filter_map(|item| async move {
        match item {
            Ok(envelope) => Some(Ok::<_, Infallible>(Event::default().json_data(&envelope).unwrap_or_else(|_| Event::default()))),
            Err(_lagged) => None,
        }
    });

    Sse::new(backlog.chain(tail)).keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(15)).text("keep-alive")).into_response()
}

/// `GET /sse` — a bare keep-alive ping stream, used only to keep a
/// connection warm ahead of a real subscription; no events multiplex here.
async fn handle_sse() -> Response {
    let stream = futures::stream::pending::<Result<Event, Infallible>>();
    Sse::new(stream).keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(15)).text("keep-alive")).into_response()
}

#[derive(Deserialize)]
struct CancelRequest {
    execution_id: String,
}

async fn handle_cancel(State(state): State<SharedState>, headers: HeaderMap, Json(req): Json<CancelRequest>) -> Result<Json<serde_json::Value>, ApiError> {
    require_internal_token(&headers, &state.config)?;
    let token = {
        let executions = state.executions.lock();
        executions.get(&req.execution_id).map(|(_, token)| token.clone())
    };
    let token = token.ok_or_else(|| ApiError(EngineError::NotFound(format!("execution {}", req.execution_id))))?;
    token.cancel();
    Ok(Json(json!({ "ok": true })))
}

async fn handle_log(State(state): State<SharedState>, headers: HeaderMap, AxumPath(execution_id): AxumPath<String>) -> Result<Json<Execution>, ApiError> {
    require_internal_token(&headers, &state.config)?;
    let execution = state
        .executions
        .lock()
        .get(&execution_id)
        .map(|(execution, _)| execution.clone())
        .ok_or_else(|| ApiError(EngineError::NotFound(format!("execution {execution_id}"))))?;
    Ok(Json(execution))
}

#[derive(Deserialize)]
struct WorkspaceScopedRequest {
    workflow_id: String,
    #[serde(default)]
    workspace_path: Option<String>,
}

async fn resolve_manager(state: &SharedState, req: &WorkspaceScopedRequest) -> Result<Arc<EditorManager>, ApiError> {
    let default_root = state.workspace_base_dir.join(&req.workflow_id);
    let manager = state.editor_service.manager_for(&default_root, req.workspace_path.as_deref()).await?;
    Ok(manager)
}

#[derive(Deserialize)]
struct BrowseRequest {
    #[serde(flatten)]
    scope: WorkspaceScopedRequest,
    #[serde(default)]
    path: String,
    #[serde(default)]
    include_hidden: bool,
}

async fn handle_browse(State(state): State<SharedState>, headers: HeaderMap, Json(req): Json<BrowseRequest>) -> Result<Json<Vec<orch_engine::editor::Entry>>, ApiError> {
    require_internal_token(&headers, &state.config)?;
    let manager = resolve_manager(&state, &req.scope).await?;
    Ok(Json(manager.browse(&req.path, req.include_hidden)?))
}

#[derive(Deserialize)]
struct TreeRequest {
    #[serde(flatten)]
    scope: WorkspaceScopedRequest,
    #[serde(default)]
    max_depth: Option<usize>,
}

async fn handle_tree(State(state): State<SharedState>, headers: HeaderMap, Json(req): Json<TreeRequest>) -> Result<Json<orch_engine::editor::TreeNode>, ApiError> {
    require_internal_token(&headers, &state.config)?;
    let manager = resolve_manager(&state, &req.scope).await?;
    let max_depth = req.max_depth.unwrap_or(state.config.tree_max_depth);
    Ok(Json(manager.tree(max_depth, state.config.tree_max_nodes)?))
}

#[derive(Deserialize)]
struct ReadRequest {
    #[serde(flatten)]
    scope: WorkspaceScopedRequest,
    file_path: String,
}

async fn handle_read(State(state): State<SharedState>, headers: HeaderMap, Json(req): Json<ReadRequest>) -> Result<Json<orch_engine::editor::ReadResult>, ApiError> {
    require_internal_token(&headers, &state.config)?;
    let manager = resolve_manager(&state, &req.scope).await?;
    Ok(Json(manager.read(&req.file_path)?))
}

#[derive(Deserialize)]
struct SearchRequest {
    #[serde(flatten)]
    scope: WorkspaceScopedRequest,
    query: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    case_sensitive: bool,
}

async fn handle_search(State(state): State<SharedState>, headers: HeaderMap, Json(req): Json<SearchRequest>) -> Result<Json<Vec<orch_engine::editor::Hit>>, ApiError> {
    require_internal_token(&headers, &state.config)?;
    let manager = resolve_manager(&state, &req.scope).await?;
    Ok(Json(manager.search(&req.query, req.path.as_deref(), req.case_sensitive, state.config.search_max_hits)?))
}

#[derive(Deserialize)]
struct CreateChangeRequest {
    #[serde(flatten)]
    scope: WorkspaceScopedRequest,
    file_path: String,
    operation: Operation,
    #[serde(default)]
    new_content: Option<String>,
    #[serde(default)]
    old_path: Option<String>,
    #[serde(default = "default_true")]
    generate_diff: bool,
    #[serde(default)]
    agent: Option<String>,
    #[serde(default)]
    block: Option<String>,
}

fn default_true() -> bool {
    true
}

async fn handle_create_change(State(state): State<SharedState>, headers: HeaderMap, Json(req): Json<CreateChangeRequest>) -> Result<Json<Change>, ApiError> {
    require_internal_token(&headers, &state.config)?;
    let manager = resolve_manager(&state, &req.scope).await?;
    let new_content = req.new_content.map(|s| s.into_bytes());
    let change = manager
        .create_change(&req.file_path, req.operation, new_content, req.old_path.as_deref(), req.generate_diff, req.agent, req.block)
        .await?;
    Ok(Json(change))
}

#[derive(Deserialize)]
struct ChangesRequest {
    #[serde(flatten)]
    scope: WorkspaceScopedRequest,
    #[serde(default)]
    status: Option<ChangeStatus>,
}

async fn handle_changes(State(state): State<SharedState>, headers: HeaderMap, Json(req): Json<ChangesRequest>) -> Result<Json<Vec<Change>>, ApiError> {
    require_internal_token(&headers, &state.config)?;
    let manager = resolve_manager(&state, &req.scope).await?;
    Ok(Json(manager.list_changes(req.status)))
}

#[derive(Deserialize)]
struct ChangeIdRequest {
    #[serde(flatten)]
    scope: WorkspaceScopedRequest,
    change_id: String,
}

async fn handle_approve(State(state): State<SharedState>, headers: HeaderMap, Json(req): Json<ChangeIdRequest>) -> Result<Json<serde_json::Value>, ApiError> {
    require_internal_token(&headers, &state.config)?;
    let manager = resolve_manager(&state, &req.scope).await?;
    manager.approve(&req.change_id)?;
    Ok(Json(json!({ "ok": true })))
}

async fn handle_reject(State(state): State<SharedState>, headers: HeaderMap, Json(req): Json<ChangeIdRequest>) -> Result<Json<serde_json::Value>, ApiError> {
    require_internal_token(&headers, &state.config)?;
    let manager = resolve_manager(&state, &req.scope).await?;
    manager.reject(&req.change_id)?;
    Ok(Json(json!({ "ok": true })))
}

async fn handle_rollback(State(state): State<SharedState>, headers: HeaderMap, Json(req): Json<ChangeIdRequest>) -> Result<Json<Change>, ApiError> {
    require_internal_token(&headers, &state.config)?;
    let manager = resolve_manager(&state, &req.scope).await?;
    Ok(Json(manager.rollback(&req.change_id)?))
}

#[derive(Deserialize)]
struct McpRequest {
    #[serde(flatten)]
    rpc: RpcRequest,
    #[serde(default = "default_agent_name")]
    agent: String,
}

fn default_agent_name() -> String {
    "unknown".to_string()
}

async fn handle_mcp(State(state): State<SharedState>, headers: HeaderMap, Json(req): Json<McpRequest>) -> Json<RpcResponse> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    Json(state.tool_bridge.dispatch(req.rpc, &req.agent, token).await)
}

async fn handle_clear_caches(State(state): State<SharedState>, headers: HeaderMap) -> Result<Json<serde_json::Value>, ApiError> {
    require_internal_token(&headers, &state.config)?;
    state.editor_service.clear_caches().await;
    state.executions.lock().retain(|_, (execution, _)| execution.status == ExecutionStatus::Running);
    Ok(Json(json!({ "ok": true })))
}

struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
