use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    LookingForDriver,
    WaitingForPickup,
    LaundryOnTheWay,
    ArrivedAtOutlet,
    Washing,
    Ironing,
    Packing,
    WaitingForPayment,
    ReadyForDelivery,
    DeliveryOnTheWay,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Success,
    Pending,
    Failed,
}

/// One line of the order's item manifest, counted again at every station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub laundry_item_id: Uuid,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub customer_id: Uuid,
    pub outlet_id: Uuid,
    pub address_id: Uuid,
    /// Driver currently holding the order, mirrored from the active leg.
    pub driver_id: Option<Uuid>,
    /// Zero until the admin prices the order at intake.
    pub total_price: u64,
    pub total_weight_kg: f64,
    pub items: Vec<OrderItem>,
    pub pickup_time: Option<DateTime<Utc>>,
    pub delivery_time: Option<DateTime<Utc>>,
    pub invoice_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
