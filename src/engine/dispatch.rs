use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::engine::attendance::ensure_active_attendance;
use crate::engine::exclusivity::{
    abandon_driver_session, assert_driver_free, claim_driver_session, close_driver_session,
};
use crate::engine::notify::{notify, Audience};
use crate::engine::require_user;
use crate::engine::transition::{advance, OrderAction};
use crate::error::AppError;
use crate::geo;
use crate::models::account::Role;
use crate::models::fulfillment::{DeliveryOrder, DeliveryStatus, PickupOrder, PickupStatus};
use crate::models::order::{Order, OrderStatus, PaymentStatus};
use crate::models::work::Station;
use crate::state::AppState;

/// Customer entry point: creates the order and its pickup leg, routed to the
/// nearest outlet, and wakes that outlet's drivers.
pub fn request_pickup(
    state: &AppState,
    customer_id: Uuid,
    address_id: Uuid,
    pickup_time: Option<DateTime<Utc>>,
) -> Result<(Order, PickupOrder), AppError> {
    let customer = require_user(state, customer_id, Role::Customer)?;

    let address = state
        .addresses
        .get(&address_id)
        .map(|entry| entry.clone())
        .ok_or_else(|| AppError::NotFound(format!("address {address_id} not found")))?;

    if address.customer_id != customer.id {
        return Err(AppError::Forbidden(format!(
            "address {address_id} does not belong to customer {customer_id}"
        )));
    }

    let outlet_id = geo::nearest_outlet(
        state.outlets.iter().map(|entry| entry.value().clone()),
        &address.location,
    )
    .ok_or_else(|| AppError::NotFound("no outlets registered".to_string()))?;

    let now = state.clock.now();
    let order = Order {
        id: Uuid::new_v4(),
        order_number: state.next_order_number(),
        status: OrderStatus::LookingForDriver,
        customer_id,
        outlet_id,
        address_id,
        driver_id: None,
        total_price: 0,
        total_weight_kg: 0.0,
        items: Vec::new(),
        pickup_time,
        delivery_time: None,
        invoice_url: None,
        created_at: now,
        updated_at: now,
    };
    let pickup = PickupOrder {
        id: Uuid::new_v4(),
        order_id: order.id,
        driver_id: None,
        pickup_number: state.next_pickup_number(),
        status: PickupStatus::WaitingForPickup,
        pickup_at: None,
        pickup_proof_url: None,
        created_at: now,
    };

    state.orders.insert(order.id, order.clone());
    state.pickups.insert(pickup.id, pickup.clone());
    state
        .metrics
        .transitions_total
        .with_label_values(&["request_pickup"])
        .inc();

    info!(
        order = %order.order_number,
        outlet = %outlet_id,
        "pickup requested"
    );

    notify(
        state,
        Audience::OutletDrivers { outlet_id },
        "New pickup request",
        &format!("Pickup {} is waiting for a driver", pickup.pickup_number),
    );

    Ok((order, pickup))
}

/// First accept wins: the conditional write on the pickup row decides, the
/// loser gets a definite AlreadyAssigned.
pub fn accept_pickup(
    state: &AppState,
    driver_id: Uuid,
    pickup_id: Uuid,
) -> Result<PickupOrder, AppError> {
    let driver = require_user(state, driver_id, Role::Driver)?;
    ensure_active_attendance(state, driver_id)?;
    assert_driver_free(state, driver_id)?;

    let order_id = state
        .pickups
        .get(&pickup_id)
        .map(|leg| leg.order_id)
        .ok_or_else(|| AppError::NotFound(format!("pickup {pickup_id} not found")))?;
    let outlet_id = state
        .orders
        .get(&order_id)
        .map(|order| order.outlet_id)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    if driver.outlet_id != Some(outlet_id) {
        return Err(AppError::Forbidden(format!(
            "driver {driver_id} serves a different outlet"
        )));
    }

    // Claim capacity first: it is the cheap claim to roll back if the
    // pickup row was taken in the meantime.
    let session = claim_driver_session(state, driver_id, outlet_id)?;

    let claimed = {
        let mut leg = state
            .pickups
            .get_mut(&pickup_id)
            .ok_or_else(|| AppError::NotFound(format!("pickup {pickup_id} not found")))?;

        if leg.status == PickupStatus::WaitingForPickup && leg.driver_id.is_none() {
            leg.driver_id = Some(driver_id);
            leg.status = PickupStatus::LaundryOnTheWay;
            Some(leg.clone())
        } else {
            None
        }
    };

    let Some(pickup) = claimed else {
        abandon_driver_session(state, driver_id, session.id);
        return Err(AppError::AlreadyAssigned(format!(
            "pickup {pickup_id} already has a driver"
        )));
    };

    if let Some(mut open) = state.driver_sessions.get_mut(&driver_id) {
        if open.id == session.id {
            open.current_pickup_order_id = Some(pickup_id);
        }
    }

    let now = state.clock.now();
    {
        let mut order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::Internal(format!("order {order_id} vanished")))?;
        advance(&mut order, OrderAction::AcceptPickup, PaymentStatus::Pending, now)?;
        order.driver_id = Some(driver_id);
    }

    state
        .metrics
        .transitions_total
        .with_label_values(&["accept_pickup"])
        .inc();

    Ok(pickup)
}

pub fn complete_pickup(
    state: &AppState,
    driver_id: Uuid,
    pickup_id: Uuid,
    proof_url: Option<String>,
) -> Result<PickupOrder, AppError> {
    require_user(state, driver_id, Role::Driver)?;
    ensure_active_attendance(state, driver_id)?;

    let snapshot = state
        .pickups
        .get(&pickup_id)
        .map(|leg| leg.clone())
        .ok_or_else(|| AppError::NotFound(format!("pickup {pickup_id} not found")))?;

    if snapshot.driver_id != Some(driver_id) {
        return Err(AppError::Forbidden(format!(
            "pickup {pickup_id} is not assigned to driver {driver_id}"
        )));
    }

    let order_status = state
        .orders
        .get(&snapshot.order_id)
        .map(|order| order.status)
        .ok_or_else(|| AppError::NotFound(format!("order {} not found", snapshot.order_id)))?;

    let now = state.clock.now();
    let updated = {
        let mut leg = state
            .pickups
            .get_mut(&pickup_id)
            .ok_or_else(|| AppError::NotFound(format!("pickup {pickup_id} not found")))?;

        if leg.driver_id == Some(driver_id) && leg.status == PickupStatus::LaundryOnTheWay {
            leg.status = PickupStatus::ArrivedAtOutlet;
            leg.pickup_at = Some(now);
            if proof_url.is_some() {
                leg.pickup_proof_url = proof_url;
            }
            Some(leg.clone())
        } else {
            None
        }
    };

    let Some(pickup) = updated else {
        return Err(AppError::InvalidTransition {
            status: order_status,
            action: OrderAction::CompletePickup.to_string(),
        });
    };

    let order = {
        let mut order = state
            .orders
            .get_mut(&pickup.order_id)
            .ok_or_else(|| AppError::Internal(format!("order {} vanished", pickup.order_id)))?;
        advance(
            &mut order,
            OrderAction::CompletePickup,
            PaymentStatus::Pending,
            now,
        )?;
        order.clone()
    };

    close_driver_session(state, driver_id, now);
    state
        .metrics
        .transitions_total
        .with_label_values(&["complete_pickup"])
        .inc();

    notify(
        state,
        Audience::OutletWorkers {
            outlet_id: order.outlet_id,
            station: Station::Washing,
        },
        "Laundry arrived",
        &format!("Order {} arrived at the outlet", order.order_number),
    );

    Ok(pickup)
}

pub fn accept_delivery(
    state: &AppState,
    driver_id: Uuid,
    delivery_id: Uuid,
) -> Result<DeliveryOrder, AppError> {
    let driver = require_user(state, driver_id, Role::Driver)?;
    ensure_active_attendance(state, driver_id)?;
    assert_driver_free(state, driver_id)?;

    let order_id = state
        .deliveries
        .get(&delivery_id)
        .map(|leg| leg.order_id)
        .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;
    let outlet_id = state
        .orders
        .get(&order_id)
        .map(|order| order.outlet_id)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    if driver.outlet_id != Some(outlet_id) {
        return Err(AppError::Forbidden(format!(
            "driver {driver_id} serves a different outlet"
        )));
    }

    let session = claim_driver_session(state, driver_id, outlet_id)?;

    let claimed = {
        let mut leg = state
            .deliveries
            .get_mut(&delivery_id)
            .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;

        if leg.status == DeliveryStatus::ReadyForDelivery && leg.driver_id.is_none() {
            leg.driver_id = Some(driver_id);
            leg.status = DeliveryStatus::DeliveryOnTheWay;
            Some(leg.clone())
        } else {
            None
        }
    };

    let Some(delivery) = claimed else {
        abandon_driver_session(state, driver_id, session.id);
        return Err(AppError::AlreadyAssigned(format!(
            "delivery {delivery_id} already has a driver"
        )));
    };

    if let Some(mut open) = state.driver_sessions.get_mut(&driver_id) {
        if open.id == session.id {
            open.current_delivery_order_id = Some(delivery_id);
        }
    }

    let now = state.clock.now();
    {
        let mut order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::Internal(format!("order {order_id} vanished")))?;
        advance(
            &mut order,
            OrderAction::AcceptDelivery,
            PaymentStatus::Pending,
            now,
        )?;
        order.driver_id = Some(driver_id);
    }

    state
        .metrics
        .transitions_total
        .with_label_values(&["accept_delivery"])
        .inc();

    Ok(delivery)
}

pub fn complete_delivery(
    state: &AppState,
    driver_id: Uuid,
    delivery_id: Uuid,
) -> Result<DeliveryOrder, AppError> {
    require_user(state, driver_id, Role::Driver)?;
    ensure_active_attendance(state, driver_id)?;

    let snapshot = state
        .deliveries
        .get(&delivery_id)
        .map(|leg| leg.clone())
        .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;

    if snapshot.driver_id != Some(driver_id) {
        return Err(AppError::Forbidden(format!(
            "delivery {delivery_id} is not assigned to driver {driver_id}"
        )));
    }

    let order_status = state
        .orders
        .get(&snapshot.order_id)
        .map(|order| order.status)
        .ok_or_else(|| AppError::NotFound(format!("order {} not found", snapshot.order_id)))?;

    let now = state.clock.now();
    let updated = {
        let mut leg = state
            .deliveries
            .get_mut(&delivery_id)
            .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;

        if leg.driver_id == Some(driver_id) && leg.status == DeliveryStatus::DeliveryOnTheWay {
            leg.status = DeliveryStatus::Completed;
            Some(leg.clone())
        } else {
            None
        }
    };

    let Some(delivery) = updated else {
        return Err(AppError::InvalidTransition {
            status: order_status,
            action: OrderAction::CompleteDelivery.to_string(),
        });
    };

    let order = {
        let mut order = state
            .orders
            .get_mut(&delivery.order_id)
            .ok_or_else(|| AppError::Internal(format!("order {} vanished", delivery.order_id)))?;
        advance(
            &mut order,
            OrderAction::CompleteDelivery,
            PaymentStatus::Pending,
            now,
        )?;
        order.delivery_time = Some(now);
        order.clone()
    };

    close_driver_session(state, driver_id, now);
    state
        .metrics
        .transitions_total
        .with_label_values(&["complete_delivery"])
        .inc();

    notify(
        state,
        Audience::Customer(order.customer_id),
        "Order delivered",
        &format!("Order {} has been delivered", order.order_number),
    );

    Ok(delivery)
}

/// Open the delivery leg for an order that just became READY_FOR_DELIVERY
/// and wake the outlet's drivers.
pub(crate) fn open_delivery(state: &AppState, order: &Order, now: DateTime<Utc>) -> DeliveryOrder {
    let delivery = DeliveryOrder {
        id: Uuid::new_v4(),
        order_id: order.id,
        driver_id: None,
        delivery_number: state.next_delivery_number(),
        status: DeliveryStatus::ReadyForDelivery,
        created_at: now,
    };
    state.deliveries.insert(delivery.id, delivery.clone());

    info!(
        order = %order.order_number,
        delivery = %delivery.delivery_number,
        "delivery leg opened"
    );

    notify(
        state,
        Audience::OutletDrivers {
            outlet_id: order.outlet_id,
        },
        "Delivery ready",
        &format!("Order {} is ready for delivery", order.order_number),
    );

    delivery
}
