use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PickupStatus {
    WaitingForPickup,
    LaundryOnTheWay,
    ArrivedAtOutlet,
}

/// The pickup leg of an order. `driver_id` is set exactly once: the first
/// accept wins, later accepts fail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickupOrder {
    pub id: Uuid,
    pub order_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub pickup_number: String,
    pub status: PickupStatus,
    pub pickup_at: Option<DateTime<Utc>>,
    pub pickup_proof_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    ReadyForDelivery,
    DeliveryOnTheWay,
    Completed,
}

/// The delivery leg, created the moment an order reaches READY_FOR_DELIVERY.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryOrder {
    pub id: Uuid,
    pub order_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub delivery_number: String,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
}

/// A driver's open-ended claim on capacity while carrying one leg.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSession {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub outlet_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub current_pickup_order_id: Option<Uuid>,
    pub current_delivery_order_id: Option<Uuid>,
}

impl DriverSession {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}
