use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::dispatch::{
    accept_delivery, accept_pickup, complete_delivery, complete_pickup,
};
use crate::error::AppError;
use crate::models::fulfillment::{DeliveryOrder, PickupOrder};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/pickups", get(list_pickups))
        .route("/pickups/:id/accept", post(accept_pickup_handler))
        .route("/pickups/:id/complete", post(complete_pickup_handler))
        .route("/deliveries", get(list_deliveries))
        .route("/deliveries/:id/accept", post(accept_delivery_handler))
        .route("/deliveries/:id/complete", post(complete_delivery_handler))
}

async fn list_pickups(State(state): State<Arc<AppState>>) -> Json<Vec<PickupOrder>> {
    let pickups = state.pickups.iter().map(|entry| entry.clone()).collect();
    Json(pickups)
}

async fn list_deliveries(State(state): State<Arc<AppState>>) -> Json<Vec<DeliveryOrder>> {
    let deliveries = state.deliveries.iter().map(|entry| entry.clone()).collect();
    Json(deliveries)
}

#[derive(Deserialize)]
pub struct AcceptRequest {
    pub driver_id: Uuid,
}

#[derive(Deserialize)]
pub struct CompletePickupRequest {
    pub driver_id: Uuid,
    pub proof_url: Option<String>,
}

async fn accept_pickup_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AcceptRequest>,
) -> Result<Json<PickupOrder>, AppError> {
    let pickup = accept_pickup(&state, payload.driver_id, id)?;
    Ok(Json(pickup))
}

async fn complete_pickup_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CompletePickupRequest>,
) -> Result<Json<PickupOrder>, AppError> {
    let pickup = complete_pickup(&state, payload.driver_id, id, payload.proof_url)?;
    Ok(Json(pickup))
}

async fn accept_delivery_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AcceptRequest>,
) -> Result<Json<DeliveryOrder>, AppError> {
    let delivery = accept_delivery(&state, payload.driver_id, id)?;
    Ok(Json(delivery))
}

async fn complete_delivery_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AcceptRequest>,
) -> Result<Json<DeliveryOrder>, AppError> {
    let delivery = complete_delivery(&state, payload.driver_id, id)?;
    Ok(Json(delivery))
}
