use dashmap::DashMap;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::engine::attendance::is_checked_in;
use crate::error::AppError;
use crate::models::account::Role;
use crate::models::notification::{Notification, NotificationReceipt};
use crate::models::work::Station;
use crate::state::AppState;

/// Who a fan-out addresses. Each variant knows its own join table, so the
/// dispatch happens once here instead of at every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Customer(Uuid),
    /// One specific worker, e.g. the requester of a resolved bypass.
    Worker(Uuid),
    /// Workers of one outlet assigned to one station and checked in today.
    OutletWorkers { outlet_id: Uuid, station: Station },
    /// Drivers of one outlet checked in today.
    OutletDrivers { outlet_id: Uuid },
    /// Admins of one outlet; no attendance requirement.
    OutletAdmins { outlet_id: Uuid },
}

impl Audience {
    pub fn kind(&self) -> &'static str {
        match self {
            Audience::Customer(_) => "customer",
            Audience::Worker(_) => "worker",
            Audience::OutletWorkers { .. } => "workers",
            Audience::OutletDrivers { .. } => "drivers",
            Audience::OutletAdmins { .. } => "admins",
        }
    }

    fn recipients(&self, state: &AppState) -> Vec<Uuid> {
        match *self {
            Audience::Customer(user_id) | Audience::Worker(user_id) => vec![user_id],
            Audience::OutletWorkers { outlet_id, station } => state
                .users
                .iter()
                .filter(|user| {
                    user.role == Role::Worker
                        && user.outlet_id == Some(outlet_id)
                        && user.station == Some(station)
                        && is_checked_in(state, user.id)
                })
                .map(|user| user.id)
                .collect(),
            Audience::OutletDrivers { outlet_id } => state
                .users
                .iter()
                .filter(|user| {
                    user.role == Role::Driver
                        && user.outlet_id == Some(outlet_id)
                        && is_checked_in(state, user.id)
                })
                .map(|user| user.id)
                .collect(),
            Audience::OutletAdmins { outlet_id } => state
                .users
                .iter()
                .filter(|user| {
                    user.role == Role::OutletAdmin && user.outlet_id == Some(outlet_id)
                })
                .map(|user| user.id)
                .collect(),
        }
    }

    fn inbox<'a>(&self, state: &'a AppState) -> &'a DashMap<Uuid, NotificationReceipt> {
        match self {
            Audience::Customer(_) => &state.user_inbox,
            Audience::Worker(_) | Audience::OutletWorkers { .. } => &state.worker_inbox,
            Audience::OutletDrivers { .. } => &state.driver_inbox,
            Audience::OutletAdmins { .. } => &state.admin_inbox,
        }
    }
}

/// Event mirrored onto the live websocket feed for every fan-out.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationEvent {
    pub notification: Notification,
    pub audience: &'static str,
    pub recipients: Vec<Uuid>,
}

/// One notification row plus one receipt per recipient. An empty admin
/// audience is a configuration gap and fails; other audiences may simply
/// have nobody on duty.
pub fn fan_out(
    state: &AppState,
    audience: Audience,
    title: &str,
    description: &str,
) -> Result<Vec<Uuid>, AppError> {
    let recipients = audience.recipients(state);

    if recipients.is_empty() {
        if let Audience::OutletAdmins { outlet_id } = audience {
            return Err(AppError::NoAdminsForOutlet(outlet_id));
        }
        warn!(audience = audience.kind(), title, "fan-out reached nobody");
    }

    let notification = Notification {
        id: Uuid::new_v4(),
        title: title.to_string(),
        description: description.to_string(),
        created_at: state.clock.now(),
    };
    state
        .notifications
        .insert(notification.id, notification.clone());

    let inbox = audience.inbox(state);
    for &recipient_id in &recipients {
        let receipt = NotificationReceipt {
            id: Uuid::new_v4(),
            notification_id: notification.id,
            recipient_id,
            is_read: false,
        };
        inbox.insert(receipt.id, receipt);
    }

    state
        .metrics
        .notifications_total
        .with_label_values(&[audience.kind()])
        .inc();

    let _ = state.notification_events_tx.send(NotificationEvent {
        notification,
        audience: audience.kind(),
        recipients: recipients.clone(),
    });

    Ok(recipients)
}

/// Fire-and-forget fan-out for call sites where a missed notification only
/// degrades UX; failures are logged, never propagated.
pub fn notify(state: &AppState, audience: Audience, title: &str, description: &str) {
    if let Err(err) = fan_out(state, audience, title, description) {
        warn!(error = %err, audience = audience.kind(), "notification fan-out failed");
    }
}
