use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::attendance;
use crate::error::AppError;
use crate::models::account::{Address, Attendance, GeoPoint, Outlet, Role, User};
use crate::models::notification::{Notification, NotificationReceipt};
use crate::models::work::Station;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users", post(create_user).get(list_users))
        .route("/outlets", post(create_outlet).get(list_outlets))
        .route("/addresses", post(create_address))
        .route("/attendance/check-in", post(check_in))
        .route("/attendance/check-out", post(check_out))
        .route("/notifications/:user_id", get(list_notifications))
        .route("/notifications/:receipt_id/read", post(mark_read))
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub role: Role,
    pub outlet_id: Option<Uuid>,
    pub station: Option<Station>,
}

async fn create_user(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<Json<User>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }

    match payload.role {
        Role::Customer => {}
        Role::Driver | Role::OutletAdmin => {
            if payload.outlet_id.is_none() {
                return Err(AppError::BadRequest(format!(
                    "{:?} must belong to an outlet",
                    payload.role
                )));
            }
        }
        Role::Worker => {
            if payload.outlet_id.is_none() || payload.station.is_none() {
                return Err(AppError::BadRequest(
                    "Worker must belong to an outlet and a station".to_string(),
                ));
            }
        }
    }

    if let Some(outlet_id) = payload.outlet_id {
        if !state.outlets.contains_key(&outlet_id) {
            return Err(AppError::NotFound(format!("outlet {outlet_id} not found")));
        }
    }

    let user = User {
        id: Uuid::new_v4(),
        name: payload.name,
        role: payload.role,
        outlet_id: payload.outlet_id,
        station: if payload.role == Role::Worker {
            payload.station
        } else {
            None
        },
        created_at: state.clock.now(),
    };

    state.users.insert(user.id, user.clone());
    Ok(Json(user))
}

async fn list_users(State(state): State<Arc<AppState>>) -> Json<Vec<User>> {
    let users = state.users.iter().map(|entry| entry.clone()).collect();
    Json(users)
}

#[derive(Deserialize)]
pub struct CreateOutletRequest {
    pub name: String,
    pub location: GeoPoint,
}

async fn create_outlet(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOutletRequest>,
) -> Result<Json<Outlet>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }

    let outlet = Outlet {
        id: Uuid::new_v4(),
        name: payload.name,
        location: payload.location,
    };

    state.outlets.insert(outlet.id, outlet.clone());
    Ok(Json(outlet))
}

async fn list_outlets(State(state): State<Arc<AppState>>) -> Json<Vec<Outlet>> {
    let outlets = state.outlets.iter().map(|entry| entry.clone()).collect();
    Json(outlets)
}

#[derive(Deserialize)]
pub struct CreateAddressRequest {
    pub customer_id: Uuid,
    pub street: String,
    pub location: GeoPoint,
}

async fn create_address(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateAddressRequest>,
) -> Result<Json<Address>, AppError> {
    if payload.street.trim().is_empty() {
        return Err(AppError::BadRequest("street cannot be empty".to_string()));
    }

    let customer = state
        .users
        .get(&payload.customer_id)
        .map(|entry| entry.clone())
        .ok_or_else(|| AppError::NotFound(format!("user {} not found", payload.customer_id)))?;
    if customer.role != Role::Customer {
        return Err(AppError::Forbidden(format!(
            "user {} is not a customer",
            customer.id
        )));
    }

    let address = Address {
        id: Uuid::new_v4(),
        customer_id: payload.customer_id,
        street: payload.street,
        location: payload.location,
    };

    state.addresses.insert(address.id, address.clone());
    Ok(Json(address))
}

#[derive(Deserialize)]
pub struct AttendanceRequest {
    pub user_id: Uuid,
}

async fn check_in(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AttendanceRequest>,
) -> Result<Json<Attendance>, AppError> {
    let row = attendance::check_in(&state, payload.user_id)?;
    Ok(Json(row))
}

async fn check_out(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AttendanceRequest>,
) -> Result<Json<Attendance>, AppError> {
    let row = attendance::check_out(&state, payload.user_id)?;
    Ok(Json(row))
}

fn inbox_for_role<'a>(state: &'a AppState, role: Role) -> &'a DashMap<Uuid, NotificationReceipt> {
    match role {
        Role::Customer => &state.user_inbox,
        Role::Worker => &state.worker_inbox,
        Role::Driver => &state.driver_inbox,
        Role::OutletAdmin => &state.admin_inbox,
    }
}

#[derive(Serialize)]
struct InboxEntry {
    receipt: NotificationReceipt,
    notification: Notification,
}

async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<InboxEntry>>, AppError> {
    let user = state
        .users
        .get(&user_id)
        .map(|entry| entry.clone())
        .ok_or_else(|| AppError::NotFound(format!("user {user_id} not found")))?;

    let mut entries: Vec<InboxEntry> = inbox_for_role(&state, user.role)
        .iter()
        .filter(|receipt| receipt.recipient_id == user_id)
        .filter_map(|receipt| {
            state
                .notifications
                .get(&receipt.notification_id)
                .map(|notification| InboxEntry {
                    receipt: receipt.clone(),
                    notification: notification.clone(),
                })
        })
        .collect();

    entries.sort_by(|a, b| b.notification.created_at.cmp(&a.notification.created_at));
    Ok(Json(entries))
}

#[derive(Deserialize)]
pub struct MarkReadRequest {
    pub user_id: Uuid,
}

async fn mark_read(
    State(state): State<Arc<AppState>>,
    Path(receipt_id): Path<Uuid>,
    Json(payload): Json<MarkReadRequest>,
) -> Result<Json<NotificationReceipt>, AppError> {
    let user = state
        .users
        .get(&payload.user_id)
        .map(|entry| entry.clone())
        .ok_or_else(|| AppError::NotFound(format!("user {} not found", payload.user_id)))?;

    let mut receipt = inbox_for_role(&state, user.role)
        .get_mut(&receipt_id)
        .ok_or_else(|| AppError::NotFound(format!("notification {receipt_id} not found")))?;

    if receipt.recipient_id != payload.user_id {
        return Err(AppError::Forbidden(
            "notification belongs to another recipient".to_string(),
        ));
    }

    receipt.is_read = true;
    Ok(Json(receipt.clone()))
}
