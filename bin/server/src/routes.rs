//! HTTP bindings for the engine's operation-level contracts.

use crate::error::ApiError;
use crate::state::AppState;
use crate::stream::{event_stream, snapshot_stream};
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use flowline_core::{ExecutionId, WorkflowId};
use flowline_engine::{
    CatalogStats, ExecutionStats, Trigger, TriggerEvent, Workflow, WorkflowCategory,
    WorkflowEntry, WorkflowExecution, WorkflowStep,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tower_http::trace::TraceLayer;

/// Builds the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/workflows", get(list_workflows).post(register_workflow))
        .route("/api/workflows/{id}/executions", post(start_execution))
        .route("/api/executions", get(list_executions))
        .route("/api/executions/{id}", get(get_execution))
        .route("/api/executions/{id}/pause", post(pause_execution))
        .route("/api/executions/{id}/resume", post(resume_execution))
        .route("/api/executions/{id}/cancel", post(cancel_execution))
        .route("/api/events", post(route_event))
        .route("/api/stream", get(snapshot_stream))
        .route("/api/events/stream", get(event_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<JsonValue> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Response of `GET /api/workflows`.
#[derive(Debug, Serialize)]
pub struct ListWorkflowsResponse {
    /// Registered workflows with their statistics.
    pub workflows: Vec<WorkflowEntry>,
    /// Catalog counters.
    pub stats: CatalogStats,
}

async fn list_workflows(State(state): State<AppState>) -> Json<ListWorkflowsResponse> {
    let (workflows, stats) = state.engine.list_workflows();
    Json(ListWorkflowsResponse { workflows, stats })
}

/// Body of `POST /api/workflows`.
#[derive(Debug, Deserialize)]
pub struct RegisterWorkflowRequest {
    /// Workflow name.
    pub name: String,
    /// Description, if any.
    #[serde(default)]
    pub description: Option<String>,
    /// Business area.
    pub category: WorkflowCategory,
    /// Triggers, in evaluation order.
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    /// The step graph.
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    /// Router priority.
    #[serde(default)]
    pub priority: i32,
    /// AI-adaptive flag.
    #[serde(default)]
    pub ai_adaptive: bool,
    /// Whether the workflow starts active.
    #[serde(default = "default_is_active")]
    pub is_active: bool,
}

fn default_is_active() -> bool {
    true
}

async fn register_workflow(
    State(state): State<AppState>,
    Json(request): Json<RegisterWorkflowRequest>,
) -> Result<Json<Workflow>, ApiError> {
    let mut workflow = Workflow::new(request.name, request.category);
    workflow.description = request.description;
    workflow.triggers = request.triggers;
    workflow.steps = request.steps;
    workflow.priority = request.priority;
    workflow.ai_adaptive = request.ai_adaptive;
    workflow.is_active = request.is_active;

    let registered = state.engine.register_workflow(workflow)?;
    Ok(Json(registered))
}

/// Body of `POST /api/workflows/{id}/executions`.
#[derive(Debug, Deserialize)]
pub struct StartExecutionRequest {
    /// Provenance recorded on the execution.
    #[serde(default = "default_triggered_by")]
    pub triggered_by: String,
    /// Variables the execution starts with.
    #[serde(default)]
    pub initial_data: HashMap<String, JsonValue>,
}

fn default_triggered_by() -> String {
    "api".to_string()
}

async fn start_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<StartExecutionRequest>,
) -> Result<Json<WorkflowExecution>, ApiError> {
    let workflow_id: WorkflowId = parse_id(&id)?;
    let execution =
        state
            .engine
            .start(workflow_id, request.triggered_by, request.initial_data)?;
    Ok(Json(execution))
}

/// Response of `GET /api/executions`.
#[derive(Debug, Serialize)]
pub struct ListExecutionsResponse {
    /// Live executions.
    pub active: Vec<WorkflowExecution>,
    /// Recent terminal executions, most recent first.
    pub history: Vec<WorkflowExecution>,
    /// Store counters.
    pub stats: ExecutionStats,
}

async fn list_executions(State(state): State<AppState>) -> Json<ListExecutionsResponse> {
    let (active, history, stats) = state.engine.list_executions();
    Json(ListExecutionsResponse {
        active,
        history,
        stats,
    })
}

async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowExecution>, ApiError> {
    let execution_id: ExecutionId = parse_id(&id)?;
    state
        .engine
        .execution(execution_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("execution not found: {execution_id}")))
}

async fn pause_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowExecution>, ApiError> {
    let execution_id: ExecutionId = parse_id(&id)?;
    state
        .engine
        .pause(execution_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no running execution: {execution_id}")))
}

async fn resume_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowExecution>, ApiError> {
    let execution_id: ExecutionId = parse_id(&id)?;
    state
        .engine
        .resume(execution_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no paused execution: {execution_id}")))
}

async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowExecution>, ApiError> {
    let execution_id: ExecutionId = parse_id(&id)?;
    state
        .engine
        .cancel(execution_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no cancellable execution: {execution_id}")))
}

/// Response of `POST /api/events`.
#[derive(Debug, Serialize)]
pub struct RouteEventResponse {
    /// Executions the event started.
    pub started: Vec<WorkflowExecution>,
}

async fn route_event(
    State(state): State<AppState>,
    Json(event): Json<TriggerEvent>,
) -> Json<RouteEventResponse> {
    let started = state.router.route(&event).await;
    Json(RouteEventResponse { started })
}

fn parse_id<T>(raw: &str) -> Result<T, ApiError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e: T::Err| ApiError::invalid(format!("invalid id '{raw}': {e}")))
}
