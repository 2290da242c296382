use dashmap::mapref::entry::Entry;
use tracing::info;
use uuid::Uuid;

use crate::engine::dispatch::open_delivery;
use crate::engine::exclusivity::close_shift_by_id;
use crate::engine::notify::{notify, Audience};
use crate::engine::payment::payment_status_for;
use crate::engine::require_user;
use crate::engine::transition::{advance, OrderAction};
use crate::error::AppError;
use crate::models::account::Role;
use crate::models::order::{Order, OrderStatus};
use crate::models::work::{OrderWorkProcess, WorkStatus};
use crate::state::AppState;

/// Admin adjudication of an escalated station: close the work process, free
/// the worker, and let the order move on.
pub fn resolve_bypass(
    state: &AppState,
    admin_id: Uuid,
    work_process_id: Uuid,
) -> Result<(OrderWorkProcess, Order), AppError> {
    let admin = require_user(state, admin_id, Role::OutletAdmin)?;

    let (key, outlet_id) = state
        .work_processes
        .iter()
        .find(|entry| entry.id == work_process_id)
        .map(|entry| (*entry.key(), entry.outlet_id))
        .ok_or_else(|| {
            AppError::NotFound(format!("work process {work_process_id} not found"))
        })?;

    if admin.outlet_id != Some(outlet_id) {
        return Err(AppError::Forbidden(format!(
            "admin {admin_id} manages a different outlet"
        )));
    }

    let now = state.clock.now();
    let work = {
        let mut slot = state
            .work_processes
            .get_mut(&key)
            .ok_or_else(|| {
                AppError::NotFound(format!("work process {work_process_id} not found"))
            })?;

        if slot.status == WorkStatus::Completed {
            return Err(AppError::BypassAlreadyResolved(work_process_id));
        }

        slot.status = WorkStatus::Completed;
        slot.completed_at = Some(now);
        slot.notes = None;
        slot.clone()
    };

    let freed_worker = work
        .shift_id
        .and_then(|shift_id| close_shift_by_id(state, shift_id, now));

    let payment = payment_status_for(state, work.order_id);
    let order = {
        let mut order = state
            .orders
            .get_mut(&work.order_id)
            .ok_or_else(|| AppError::Internal(format!("order {} vanished", work.order_id)))?;
        advance(
            &mut order,
            OrderAction::CompleteStation(work.station),
            payment,
            now,
        )?;
        order.clone()
    };

    // Seed the next station, or finish the pipeline on the payment branch.
    match work.station.successor() {
        Some(next_station) => {
            if let Entry::Vacant(slot) = state.work_processes.entry((order.id, next_station)) {
                slot.insert(OrderWorkProcess {
                    id: Uuid::new_v4(),
                    order_id: order.id,
                    outlet_id: order.outlet_id,
                    shift_id: None,
                    station: next_station,
                    status: WorkStatus::Pending,
                    notes: None,
                    created_at: now,
                    completed_at: None,
                });
            }
        }
        None => {
            if order.status == OrderStatus::ReadyForDelivery {
                open_delivery(state, &order, now);
            }
        }
    }

    state
        .metrics
        .transitions_total
        .with_label_values(&["resolve_bypass"])
        .inc();

    info!(
        order = %order.order_number,
        station = %work.station,
        admin = %admin_id,
        "bypass resolved"
    );

    if let Some(worker_id) = freed_worker {
        notify(
            state,
            Audience::Worker(worker_id),
            "Bypass resolved",
            &format!(
                "Order {} bypass at {} was approved",
                order.order_number, work.station
            ),
        );
    }

    match order.status {
        OrderStatus::Ironing | OrderStatus::Packing => {
            if let Some(next_station) = work.station.successor() {
                notify(
                    state,
                    Audience::OutletWorkers {
                        outlet_id: order.outlet_id,
                        station: next_station,
                    },
                    "New task",
                    &format!("Order {} is ready for {next_station}", order.order_number),
                );
            }
        }
        OrderStatus::WaitingForPayment => notify(
            state,
            Audience::Customer(order.customer_id),
            "Payment due",
            &format!("Order {} is packed and awaiting payment", order.order_number),
        ),
        OrderStatus::ReadyForDelivery => notify(
            state,
            Audience::Customer(order.customer_id),
            "Order packed",
            &format!("Order {} is on its way soon", order.order_number),
        ),
        _ => {}
    }

    Ok((work, order))
}

#[cfg(test)]
mod tests {
    use super::resolve_bypass;
    use crate::engine::payment::mark_order_paid;
    use crate::engine::station::{complete_station, process_order, request_bypass, ProcessOutcome};
    use crate::engine::testutil::{fixture, manifest, order_at_washing};
    use crate::error::AppError;
    use crate::models::order::OrderStatus;
    use crate::models::work::{Station, WorkStatus};

    #[test]
    fn resolving_a_washing_bypass_seeds_ironing_and_frees_the_worker() {
        let fx = fixture();
        let order_id = order_at_washing(&fx);
        let work =
            request_bypass(&fx.state, fx.washer_id, order_id, "one towel short".to_string())
                .unwrap();

        let (resolved, order) = resolve_bypass(&fx.state, fx.admin_id, work.id).unwrap();

        assert_eq!(resolved.status, WorkStatus::Completed);
        assert_eq!(resolved.notes, None);
        assert_eq!(order.status, OrderStatus::Ironing);
        assert!(!fx
            .state
            .worker_shifts
            .get(&fx.washer_id)
            .unwrap()
            .is_open());

        let pending = fx
            .state
            .work_processes
            .get(&(order_id, Station::Ironing))
            .unwrap()
            .clone();
        assert_eq!(pending.status, WorkStatus::Pending);
        assert_eq!(pending.shift_id, None);

        // the requesting worker heard back
        assert!(fx
            .state
            .worker_inbox
            .iter()
            .any(|receipt| receipt.recipient_id == fx.washer_id));
    }

    #[test]
    fn resolving_twice_fails() {
        let fx = fixture();
        let order_id = order_at_washing(&fx);
        let work =
            request_bypass(&fx.state, fx.washer_id, order_id, "one towel short".to_string())
                .unwrap();

        resolve_bypass(&fx.state, fx.admin_id, work.id).unwrap();
        let err = resolve_bypass(&fx.state, fx.admin_id, work.id).unwrap_err();

        assert!(matches!(err, AppError::BypassAlreadyResolved(id) if id == work.id));
    }

    #[test]
    fn pending_row_from_resolution_is_claimable_by_the_next_worker() {
        let fx = fixture();
        let order_id = order_at_washing(&fx);
        let work =
            request_bypass(&fx.state, fx.washer_id, order_id, "one towel short".to_string())
                .unwrap();
        resolve_bypass(&fx.state, fx.admin_id, work.id).unwrap();

        let outcome = process_order(&fx.state, fx.ironer_id, order_id, manifest()).unwrap();
        let ProcessOutcome::Started { work: claimed, shift } = outcome else {
            panic!("pending row should be claimable");
        };

        assert_eq!(claimed.status, WorkStatus::InProcess);
        assert_eq!(claimed.shift_id, Some(shift.id));
        // the pending row was claimed, not duplicated
        assert_eq!(
            fx.state
                .work_processes
                .get(&(order_id, Station::Ironing))
                .unwrap()
                .id,
            claimed.id
        );
    }

    #[test]
    fn unpaid_packing_bypass_parks_the_order_but_frees_the_worker() {
        let fx = fixture();
        let order_id = order_at_washing(&fx);
        process_order(&fx.state, fx.washer_id, order_id, manifest()).unwrap();
        complete_station(&fx.state, fx.washer_id, order_id).unwrap();
        process_order(&fx.state, fx.ironer_id, order_id, manifest()).unwrap();
        complete_station(&fx.state, fx.ironer_id, order_id).unwrap();

        let work =
            request_bypass(&fx.state, fx.packer_id, order_id, "box count off".to_string())
                .unwrap();
        let (_, order) = resolve_bypass(&fx.state, fx.admin_id, work.id).unwrap();

        assert_eq!(order.status, OrderStatus::WaitingForPayment);
        assert!(fx.state.deliveries.is_empty());
        // adjudicated orders do not pin their worker to the payment clock
        assert!(!fx
            .state
            .worker_shifts
            .get(&fx.packer_id)
            .unwrap()
            .is_open());
    }

    #[test]
    fn paid_packing_bypass_goes_straight_to_delivery() {
        let fx = fixture();
        let order_id = order_at_washing(&fx);
        mark_order_paid(&fx.state, order_id).unwrap();
        process_order(&fx.state, fx.washer_id, order_id, manifest()).unwrap();
        complete_station(&fx.state, fx.washer_id, order_id).unwrap();
        process_order(&fx.state, fx.ironer_id, order_id, manifest()).unwrap();
        complete_station(&fx.state, fx.ironer_id, order_id).unwrap();

        let work =
            request_bypass(&fx.state, fx.packer_id, order_id, "box count off".to_string())
                .unwrap();
        let (_, order) = resolve_bypass(&fx.state, fx.admin_id, work.id).unwrap();

        assert_eq!(order.status, OrderStatus::ReadyForDelivery);
        assert_eq!(fx.state.deliveries.len(), 1);
    }
}
