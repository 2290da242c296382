use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::order::OrderStatus;
use crate::models::work::Station;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("attendance required: user {0} has no open check-in today")]
    AttendanceRequired(Uuid),

    #[error("invalid transition: cannot {action} while order is {status:?}")]
    InvalidTransition { status: OrderStatus, action: String },

    #[error("order is not at a workable station (status {0:?})")]
    OrderNotAtStation(OrderStatus),

    #[error("already assigned: {0}")]
    AlreadyAssigned(String),

    #[error("{station} station already claimed for order {order_id}")]
    StationAlreadyClaimed { order_id: Uuid, station: Station },

    #[error("worker {0} already holds an open shift")]
    WorkerBusy(Uuid),

    #[error("driver {0} already holds an active job")]
    DriverBusy(Uuid),

    #[error("work process {0} is already resolved")]
    BypassAlreadyResolved(Uuid),

    #[error("outlet {0} has no admins to notify")]
    NoAdminsForOutlet(Uuid),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable kind; the message is for humans.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::AttendanceRequired(_) => "ATTENDANCE_REQUIRED",
            AppError::InvalidTransition { .. } => "INVALID_TRANSITION",
            AppError::OrderNotAtStation(_) => "ORDER_NOT_AT_STATION",
            AppError::AlreadyAssigned(_) => "ALREADY_ASSIGNED",
            AppError::StationAlreadyClaimed { .. } => "STATION_ALREADY_CLAIMED",
            AppError::WorkerBusy(_) => "WORKER_BUSY",
            AppError::DriverBusy(_) => "DRIVER_BUSY",
            AppError::BypassAlreadyResolved(_) => "BYPASS_ALREADY_RESOLVED",
            AppError::NoAdminsForOutlet(_) => "NO_ADMINS_FOR_OUTLET",
            AppError::Internal(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::AttendanceRequired(_) => StatusCode::PRECONDITION_FAILED,
            AppError::InvalidTransition { .. }
            | AppError::OrderNotAtStation(_)
            | AppError::AlreadyAssigned(_)
            | AppError::StationAlreadyClaimed { .. }
            | AppError::WorkerBusy(_)
            | AppError::DriverBusy(_)
            | AppError::BypassAlreadyResolved(_) => StatusCode::CONFLICT,
            AppError::NoAdminsForOutlet(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "kind": self.kind(),
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}
