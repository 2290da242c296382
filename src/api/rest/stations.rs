use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::engine::bypass::resolve_bypass;
use crate::engine::station::{complete_station, process_order, request_bypass, ProcessOutcome};
use crate::error::AppError;
use crate::models::order::OrderItem;
use crate::models::work::{OrderWorkProcess, WorkStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stations/process", post(process_handler))
        .route("/stations/complete", post(complete_handler))
        .route("/stations/bypass", post(bypass_handler))
        .route("/work-processes", get(list_work_processes))
        .route("/work-processes/:id/resolve", post(resolve_handler))
}

#[derive(Deserialize)]
pub struct ProcessRequest {
    pub worker_id: Uuid,
    pub order_id: Uuid,
    pub items: Vec<OrderItem>,
}

async fn process_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ProcessRequest>,
) -> Result<Json<Value>, AppError> {
    let outcome = process_order(&state, payload.worker_id, payload.order_id, payload.items)?;

    let body = match outcome {
        ProcessOutcome::Started { work, shift } => json!({
            "need_bypass": false,
            "work_process": work,
            "shift": shift
        }),
        ProcessOutcome::NeedBypass { mismatches } => json!({
            "need_bypass": true,
            "mismatches": mismatches
        }),
    };

    Ok(Json(body))
}

#[derive(Deserialize)]
pub struct CompleteRequest {
    pub worker_id: Uuid,
    pub order_id: Uuid,
}

async fn complete_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CompleteRequest>,
) -> Result<Json<Value>, AppError> {
    let (order, work) = complete_station(&state, payload.worker_id, payload.order_id)?;

    Ok(Json(json!({
        "order": order,
        "work_process": work
    })))
}

#[derive(Deserialize)]
pub struct BypassRequest {
    pub worker_id: Uuid,
    pub order_id: Uuid,
    pub reason: String,
}

async fn bypass_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<BypassRequest>,
) -> Result<Json<OrderWorkProcess>, AppError> {
    let work = request_bypass(&state, payload.worker_id, payload.order_id, payload.reason)?;
    Ok(Json(work))
}

#[derive(Deserialize)]
pub struct WorkProcessFilter {
    pub status: Option<WorkStatus>,
}

/// The admin bypass queue is this listing filtered to BypassRequested.
async fn list_work_processes(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<WorkProcessFilter>,
) -> Json<Vec<OrderWorkProcess>> {
    let processes = state
        .work_processes
        .iter()
        .filter(|work| filter.status.map(|s| work.status == s).unwrap_or(true))
        .map(|work| work.clone())
        .collect();

    Json(processes)
}

#[derive(Deserialize)]
pub struct ResolveRequest {
    pub admin_id: Uuid,
}

async fn resolve_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ResolveRequest>,
) -> Result<Json<Value>, AppError> {
    let (work, order) = resolve_bypass(&state, payload.admin_id, id)?;

    Ok(Json(json!({
        "work_process": work,
        "order": order
    })))
}
