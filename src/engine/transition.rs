use std::fmt;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::AppError;
use crate::models::order::{Order, OrderStatus, PaymentStatus};
use crate::models::work::Station;

/// Every trigger that may move an order's status. Creation is not listed:
/// orders are born in LOOKING_FOR_DRIVER, not transitioned into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderAction {
    AcceptPickup,
    CompletePickup,
    AssignWashing,
    CompleteStation(Station),
    MarkPaid,
    AcceptDelivery,
    CompleteDelivery,
    CancelUnpaid,
}

impl fmt::Display for OrderAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderAction::AcceptPickup => f.write_str("accept pickup"),
            OrderAction::CompletePickup => f.write_str("complete pickup"),
            OrderAction::AssignWashing => f.write_str("assign washing"),
            OrderAction::CompleteStation(station) => write!(f, "complete {station}"),
            OrderAction::MarkPaid => f.write_str("mark paid"),
            OrderAction::AcceptDelivery => f.write_str("accept delivery"),
            OrderAction::CompleteDelivery => f.write_str("complete delivery"),
            OrderAction::CancelUnpaid => f.write_str("cancel unpaid"),
        }
    }
}

/// The transition table. Payment status only matters when packing completes:
/// a paid order goes straight to delivery, an unpaid one parks for payment.
pub fn next_status(
    status: OrderStatus,
    action: OrderAction,
    payment: PaymentStatus,
) -> Result<OrderStatus, AppError> {
    use OrderStatus::*;

    let next = match (action, status) {
        (OrderAction::AcceptPickup, LookingForDriver | WaitingForPickup) => LaundryOnTheWay,
        (OrderAction::CompletePickup, LaundryOnTheWay) => ArrivedAtOutlet,
        (OrderAction::AssignWashing, ArrivedAtOutlet) => Washing,
        (OrderAction::CompleteStation(Station::Washing), Washing) => Ironing,
        (OrderAction::CompleteStation(Station::Ironing), Ironing) => Packing,
        (OrderAction::CompleteStation(Station::Packing), Packing) => match payment {
            PaymentStatus::Success => ReadyForDelivery,
            PaymentStatus::Pending | PaymentStatus::Failed => WaitingForPayment,
        },
        (OrderAction::MarkPaid, WaitingForPayment) => ReadyForDelivery,
        (OrderAction::AcceptDelivery, ReadyForDelivery) => DeliveryOnTheWay,
        (OrderAction::CompleteDelivery, DeliveryOnTheWay) => Completed,
        (OrderAction::CancelUnpaid, WaitingForPayment) => Cancelled,
        (action, status) => {
            return Err(AppError::InvalidTransition {
                status,
                action: action.to_string(),
            })
        }
    };

    Ok(next)
}

/// Reverse of the station map: which station a worker acts at for a given
/// order status. WAITING_FOR_PAYMENT still belongs to packing.
pub fn station_for_status(status: OrderStatus) -> Option<Station> {
    match status {
        OrderStatus::Washing => Some(Station::Washing),
        OrderStatus::Ironing => Some(Station::Ironing),
        OrderStatus::Packing | OrderStatus::WaitingForPayment => Some(Station::Packing),
        _ => None,
    }
}

/// Validate and commit a transition onto the order row.
pub fn advance(
    order: &mut Order,
    action: OrderAction,
    payment: PaymentStatus,
    now: DateTime<Utc>,
) -> Result<OrderStatus, AppError> {
    let next = next_status(order.status, action, payment)?;

    info!(
        order = %order.order_number,
        from = ?order.status,
        to = ?next,
        action = %action,
        "order transition"
    );

    order.status = next;
    order.updated_at = now;
    Ok(next)
}
