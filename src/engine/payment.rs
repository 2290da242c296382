use tracing::info;
use uuid::Uuid;

use crate::engine::dispatch::open_delivery;
use crate::engine::exclusivity::close_shift_by_id;
use crate::engine::notify::{notify, Audience};
use crate::engine::transition::{advance, OrderAction};
use crate::error::AppError;
use crate::models::order::{Order, OrderStatus, PaymentStatus};
use crate::models::work::Station;
use crate::state::AppState;

/// The one fact consumed from the payment gateway.
pub fn payment_status_for(state: &AppState, order_id: Uuid) -> PaymentStatus {
    state
        .payments
        .get(&order_id)
        .map(|status| *status)
        .unwrap_or(PaymentStatus::Pending)
}

/// Webhook entry: a one-way "paid" signal. Orders parked in
/// WAITING_FOR_PAYMENT move on and release their packing worker; any other
/// status just records the payment for the packing branch to consume later.
pub fn mark_order_paid(state: &AppState, order_id: Uuid) -> Result<Order, AppError> {
    if !state.orders.contains_key(&order_id) {
        return Err(AppError::NotFound(format!("order {order_id} not found")));
    }

    state.payments.insert(order_id, PaymentStatus::Success);

    let now = state.clock.now();
    let advanced = {
        let mut order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        if order.status == OrderStatus::WaitingForPayment {
            advance(&mut order, OrderAction::MarkPaid, PaymentStatus::Success, now)?;
            Some(order.clone())
        } else {
            info!(order = %order.order_number, status = ?order.status, "payment recorded");
            None
        }
    };

    let Some(order) = advanced else {
        return state
            .orders
            .get(&order_id)
            .map(|order| order.clone())
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")));
    };

    // The packing worker was left holding the order until this moment.
    let shift_id = state
        .work_processes
        .get(&(order_id, Station::Packing))
        .and_then(|work| work.shift_id);
    if let Some(shift_id) = shift_id {
        close_shift_by_id(state, shift_id, now);
    }

    open_delivery(state, &order, now);
    state
        .metrics
        .transitions_total
        .with_label_values(&["mark_paid"])
        .inc();

    notify(
        state,
        Audience::Customer(order.customer_id),
        "Payment received",
        &format!("Order {} is ready for delivery", order.order_number),
    );

    Ok(order)
}

/// Webhook entry for a failed payment; recorded only, cancellation is the
/// unpaid-deadline sweep's call.
pub fn mark_payment_failed(state: &AppState, order_id: Uuid) -> Result<Order, AppError> {
    let order = state
        .orders
        .get(&order_id)
        .map(|order| order.clone())
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    state.payments.insert(order_id, PaymentStatus::Failed);
    info!(order = %order.order_number, "payment failed");

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::{mark_order_paid, payment_status_for};
    use crate::engine::station::{complete_station, process_order};
    use crate::engine::testutil::{fixture, manifest, order_at_washing};
    use crate::models::order::{OrderStatus, PaymentStatus};

    fn park_at_waiting_for_payment(fx: &crate::engine::testutil::Fixture) -> uuid::Uuid {
        let order_id = order_at_washing(fx);
        process_order(&fx.state, fx.washer_id, order_id, manifest()).unwrap();
        complete_station(&fx.state, fx.washer_id, order_id).unwrap();
        process_order(&fx.state, fx.ironer_id, order_id, manifest()).unwrap();
        complete_station(&fx.state, fx.ironer_id, order_id).unwrap();
        process_order(&fx.state, fx.packer_id, order_id, manifest()).unwrap();
        complete_station(&fx.state, fx.packer_id, order_id).unwrap();
        order_id
    }

    #[test]
    fn webhook_unparks_the_order_and_frees_the_packer() {
        let fx = fixture();
        let order_id = park_at_waiting_for_payment(&fx);
        assert!(fx
            .state
            .worker_shifts
            .get(&fx.packer_id)
            .unwrap()
            .is_open());

        let order = mark_order_paid(&fx.state, order_id).unwrap();

        assert_eq!(order.status, OrderStatus::ReadyForDelivery);
        assert!(!fx
            .state
            .worker_shifts
            .get(&fx.packer_id)
            .unwrap()
            .is_open());
        assert_eq!(fx.state.deliveries.len(), 1);
    }

    #[test]
    fn early_payment_is_recorded_and_consumed_at_packing() {
        let fx = fixture();
        let order_id = order_at_washing(&fx);

        mark_order_paid(&fx.state, order_id).unwrap();
        assert_eq!(payment_status_for(&fx.state, order_id), PaymentStatus::Success);
        // the order did not move; washing has not even started
        assert_eq!(
            fx.state.orders.get(&order_id).unwrap().status,
            OrderStatus::Washing
        );

        process_order(&fx.state, fx.washer_id, order_id, manifest()).unwrap();
        complete_station(&fx.state, fx.washer_id, order_id).unwrap();
        process_order(&fx.state, fx.ironer_id, order_id, manifest()).unwrap();
        complete_station(&fx.state, fx.ironer_id, order_id).unwrap();
        process_order(&fx.state, fx.packer_id, order_id, manifest()).unwrap();
        let (order, _) = complete_station(&fx.state, fx.packer_id, order_id).unwrap();

        // paid orders skip the payment park entirely
        assert_eq!(order.status, OrderStatus::ReadyForDelivery);
        assert!(!fx
            .state
            .worker_shifts
            .get(&fx.packer_id)
            .unwrap()
            .is_open());
        assert_eq!(fx.state.deliveries.len(), 1);
    }

    #[test]
    fn paying_twice_is_harmless() {
        let fx = fixture();
        let order_id = park_at_waiting_for_payment(&fx);

        mark_order_paid(&fx.state, order_id).unwrap();
        let order = mark_order_paid(&fx.state, order_id).unwrap();

        assert_eq!(order.status, OrderStatus::ReadyForDelivery);
        assert_eq!(fx.state.deliveries.len(), 1);
    }
}
