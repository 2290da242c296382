use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::engine::dispatch::request_pickup;
use crate::engine::payment::{mark_order_paid, mark_payment_failed};
use crate::engine::station::assign_processing;
use crate::error::AppError;
use crate::models::order::{Order, OrderItem, OrderStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/assign", post(assign_order))
        .route("/orders/:id/paid", post(order_paid))
        .route("/orders/:id/payment-failed", post(order_payment_failed))
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub customer_id: Uuid,
    pub address_id: Uuid,
    pub pickup_time: Option<DateTime<Utc>>,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<Value>, AppError> {
    let (order, pickup) = request_pickup(
        &state,
        payload.customer_id,
        payload.address_id,
        payload.pickup_time,
    )?;

    Ok(Json(json!({
        "order": order,
        "pickup": pickup
    })))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .orders
        .get(&id)
        .map(|entry| entry.clone())
        .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;

    Ok(Json(order))
}

#[derive(Deserialize)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
}

async fn list_orders(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<OrderFilter>,
) -> Json<Vec<Order>> {
    let orders = state
        .orders
        .iter()
        .filter(|order| filter.status.map(|s| order.status == s).unwrap_or(true))
        .map(|order| order.clone())
        .collect();

    Json(orders)
}

#[derive(Deserialize)]
pub struct AssignOrderRequest {
    pub admin_id: Uuid,
    pub items: Vec<OrderItem>,
    pub total_price: u64,
    pub total_weight_kg: f64,
    pub invoice_url: Option<String>,
}

async fn assign_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignOrderRequest>,
) -> Result<Json<Order>, AppError> {
    let order = assign_processing(
        &state,
        payload.admin_id,
        id,
        payload.items,
        payload.total_price,
        payload.total_weight_kg,
        payload.invoice_url,
    )?;

    Ok(Json(order))
}

async fn order_paid(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = mark_order_paid(&state, id)?;
    Ok(Json(order))
}

async fn order_payment_failed(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = mark_payment_failed(&state, id)?;
    Ok(Json(order))
}
