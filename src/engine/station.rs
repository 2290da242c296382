use std::collections::HashMap;

use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::engine::attendance::ensure_active_attendance;
use crate::engine::dispatch::open_delivery;
use crate::engine::exclusivity::{
    abandon_worker_shift, assert_worker_free, claim_worker_shift, close_worker_shift,
};
use crate::engine::notify::{fan_out, notify, Audience};
use crate::engine::payment::payment_status_for;
use crate::engine::require_user;
use crate::engine::transition::{advance, next_status, station_for_status, OrderAction};
use crate::error::AppError;
use crate::models::account::{Role, User};
use crate::models::order::{Order, OrderItem, OrderStatus};
use crate::models::work::{OrderWorkProcess, Station, WorkStatus, WorkerShift};
use crate::state::AppState;

/// One disagreeing manifest line; absent ids count as zero on the other side.
#[derive(Debug, Clone, Serialize)]
pub struct ItemMismatch {
    pub laundry_item_id: Uuid,
    pub expected: u32,
    pub submitted: u32,
}

/// Result of a worker starting a station. A manifest mismatch is not an
/// error: the worker must escalate it through request_bypass.
#[derive(Debug)]
pub enum ProcessOutcome {
    Started {
        work: OrderWorkProcess,
        shift: WorkerShift,
    },
    NeedBypass {
        mismatches: Vec<ItemMismatch>,
    },
}

/// Admin intake: prices the order, records the item manifest, and moves it
/// to the washing queue.
pub fn assign_processing(
    state: &AppState,
    admin_id: Uuid,
    order_id: Uuid,
    items: Vec<OrderItem>,
    total_price: u64,
    total_weight_kg: f64,
    invoice_url: Option<String>,
) -> Result<Order, AppError> {
    let admin = require_user(state, admin_id, Role::OutletAdmin)?;

    let outlet_id = state
        .orders
        .get(&order_id)
        .map(|order| order.outlet_id)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    if admin.outlet_id != Some(outlet_id) {
        return Err(AppError::Forbidden(format!(
            "admin {admin_id} manages a different outlet"
        )));
    }

    if items.is_empty() {
        return Err(AppError::BadRequest("item manifest cannot be empty".to_string()));
    }
    if items.iter().any(|item| item.quantity == 0) {
        return Err(AppError::BadRequest(
            "item quantities must be positive".to_string(),
        ));
    }

    let now = state.clock.now();
    let order = {
        let mut order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
        advance(
            &mut order,
            OrderAction::AssignWashing,
            payment_status_for(state, order_id),
            now,
        )?;
        order.items = items;
        order.total_price = total_price;
        order.total_weight_kg = total_weight_kg;
        order.invoice_url = invoice_url;
        order.clone()
    };

    state
        .metrics
        .transitions_total
        .with_label_values(&["assign_washing"])
        .inc();

    notify(
        state,
        Audience::Customer(order.customer_id),
        "Order priced",
        &format!(
            "Order {} weighs {:.1} kg, total {}",
            order.order_number, order.total_weight_kg, order.total_price
        ),
    );
    notify(
        state,
        Audience::OutletWorkers {
            outlet_id: order.outlet_id,
            station: Station::Washing,
        },
        "New task",
        &format!("Order {} is ready for washing", order.order_number),
    );

    Ok(order)
}

/// Worker starts a station visit: count the items, and only on a clean
/// match claim the station and open a shift.
pub fn process_order(
    state: &AppState,
    worker_user_id: Uuid,
    order_id: Uuid,
    submitted: Vec<OrderItem>,
) -> Result<ProcessOutcome, AppError> {
    let worker = require_user(state, worker_user_id, Role::Worker)?;
    ensure_active_attendance(state, worker_user_id)?;
    assert_worker_free(state, worker_user_id)?;

    let order = state
        .orders
        .get(&order_id)
        .map(|entry| entry.clone())
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
    let station = current_station(&worker, &order)?;

    let mismatches = manifest_diff(&order.items, &submitted);
    if !mismatches.is_empty() {
        info!(
            order = %order.order_number,
            station = %station,
            mismatches = mismatches.len(),
            "manifest mismatch, bypass needed"
        );
        return Ok(ProcessOutcome::NeedBypass { mismatches });
    }

    let (work, shift) = claim_station(
        state,
        &order,
        station,
        worker_user_id,
        WorkStatus::InProcess,
        None,
    )?;

    info!(
        order = %order.order_number,
        station = %station,
        worker = %worker_user_id,
        "station processing started"
    );

    Ok(ProcessOutcome::Started { work, shift })
}

/// Worker finishes their station: the order advances, the work process
/// closes, and capacity is freed at every boundary except the unpaid
/// packing park.
pub fn complete_station(
    state: &AppState,
    worker_user_id: Uuid,
    order_id: Uuid,
) -> Result<(Order, OrderWorkProcess), AppError> {
    require_user(state, worker_user_id, Role::Worker)?;
    ensure_active_attendance(state, worker_user_id)?;

    let shift = state
        .worker_shifts
        .get(&worker_user_id)
        .filter(|shift| shift.is_open())
        .map(|shift| shift.clone())
        .ok_or_else(|| {
            AppError::Forbidden(format!("worker {worker_user_id} has no open shift"))
        })?;

    let snapshot = state
        .orders
        .get(&order_id)
        .map(|entry| entry.clone())
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    let station = station_for_status(snapshot.status)
        .ok_or(AppError::OrderNotAtStation(snapshot.status))?;
    if station != shift.station {
        return Err(AppError::OrderNotAtStation(snapshot.status));
    }

    let payment = payment_status_for(state, order_id);
    next_status(snapshot.status, OrderAction::CompleteStation(station), payment)?;

    let now = state.clock.now();
    let work = {
        let mut slot = state
            .work_processes
            .get_mut(&(order_id, station))
            .ok_or_else(|| {
                AppError::NotFound(format!("no work process for order {order_id} at {station}"))
            })?;

        if slot.status == WorkStatus::Completed {
            return Err(AppError::InvalidTransition {
                status: snapshot.status,
                action: OrderAction::CompleteStation(station).to_string(),
            });
        }
        if slot.status != WorkStatus::InProcess || slot.shift_id != Some(shift.id) {
            return Err(AppError::Forbidden(format!(
                "work process for order {order_id} at {station} is not held by this worker"
            )));
        }

        slot.status = WorkStatus::Completed;
        slot.completed_at = Some(now);
        slot.clone()
    };

    let order = {
        let mut order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::Internal(format!("order {order_id} vanished")))?;
        advance(&mut order, OrderAction::CompleteStation(station), payment, now)?;
        order.clone()
    };

    // The packing worker stays bound to an unpaid order until payment
    // unblocks it; every other boundary frees the shift.
    if order.status != OrderStatus::WaitingForPayment {
        close_worker_shift(state, worker_user_id, now);
    }

    if order.status == OrderStatus::ReadyForDelivery {
        open_delivery(state, &order, now);
    }

    state
        .metrics
        .transitions_total
        .with_label_values(&["complete_station"])
        .inc();

    match order.status {
        OrderStatus::Ironing => notify(
            state,
            Audience::OutletWorkers {
                outlet_id: order.outlet_id,
                station: Station::Ironing,
            },
            "New task",
            &format!("Order {} is ready for ironing", order.order_number),
        ),
        OrderStatus::Packing => notify(
            state,
            Audience::OutletWorkers {
                outlet_id: order.outlet_id,
                station: Station::Packing,
            },
            "New task",
            &format!("Order {} is ready for packing", order.order_number),
        ),
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

    Ok((order, work))
}

/// Escalate a manifest mismatch: binds the worker to a BYPASS_REQUESTED
/// work process and summons the outlet's admins.
pub fn request_bypass(
    state: &AppState,
    worker_user_id: Uuid,
    order_id: Uuid,
    reason: String,
) -> Result<OrderWorkProcess, AppError> {
    let worker = require_user(state, worker_user_id, Role::Worker)?;
    ensure_active_attendance(state, worker_user_id)?;
    assert_worker_free(state, worker_user_id)?;

    if reason.trim().is_empty() {
        return Err(AppError::BadRequest("bypass reason cannot be empty".to_string()));
    }

    let order = state
        .orders
        .get(&order_id)
        .map(|entry| entry.clone())
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
    let station = current_station(&worker, &order)?;

    let (work, _shift) = claim_station(
        state,
        &order,
        station,
        worker_user_id,
        WorkStatus::BypassRequested,
        Some(reason.clone()),
    )?;

    info!(
        order = %order.order_number,
        station = %station,
        worker = %worker_user_id,
        "bypass requested"
    );

    // A missing admin pool is a configuration gap the caller must hear
    // about; the escalated work process stays either way.
    fan_out(
        state,
        Audience::OutletAdmins {
            outlet_id: order.outlet_id,
        },
        "Bypass requested",
        &format!(
            "Order {} needs a manifest bypass at {}: {}",
            order.order_number, station, reason
        ),
    )?;

    Ok(work)
}

/// Station the worker acts at, derived from the order status, with outlet
/// and home-station scope checks.
fn current_station(worker: &User, order: &Order) -> Result<Station, AppError> {
    let station =
        station_for_status(order.status).ok_or(AppError::OrderNotAtStation(order.status))?;

    if worker.outlet_id != Some(order.outlet_id) {
        return Err(AppError::Forbidden(format!(
            "worker {} works at a different outlet",
            worker.id
        )));
    }
    if worker.station != Some(station) {
        return Err(AppError::Forbidden(format!(
            "worker {} is not assigned to the {station} station",
            worker.id
        )));
    }

    Ok(station)
}

/// Open a shift and take the (order, station) slot. The entry lock on the
/// slot is the mutual-exclusion invariant; a PENDING row left by a bypass
/// resolution is claimable, anything else active is not.
fn claim_station(
    state: &AppState,
    order: &Order,
    station: Station,
    worker_user_id: Uuid,
    status: WorkStatus,
    notes: Option<String>,
) -> Result<(OrderWorkProcess, WorkerShift), AppError> {
    let shift = claim_worker_shift(state, worker_user_id, order.outlet_id, station)?;
    let now = state.clock.now();

    let claim = match state.work_processes.entry((order.id, station)) {
        Entry::Occupied(mut slot) => {
            let existing = slot.get();
            if existing.status == WorkStatus::Pending && existing.shift_id.is_none() {
                let mut work = existing.clone();
                work.shift_id = Some(shift.id);
                work.status = status;
                work.notes = notes;
                slot.insert(work.clone());
                Ok(work)
            } else {
                Err(AppError::StationAlreadyClaimed {
                    order_id: order.id,
                    station,
                })
            }
        }
        Entry::Vacant(slot) => {
            let work = OrderWorkProcess {
                id: Uuid::new_v4(),
                order_id: order.id,
                outlet_id: order.outlet_id,
                shift_id: Some(shift.id),
                station,
                status,
                notes,
                created_at: now,
                completed_at: None,
            };
            slot.insert(work.clone());
            Ok(work)
        }
    };

    match claim {
        Ok(work) => Ok((work, shift)),
        Err(err) => {
            abandon_worker_shift(state, worker_user_id, shift.id);
            Err(err)
        }
    }
}

/// Per-id quantity comparison between the persisted manifest and what the
/// worker counted. Equal means equal cardinality and equal quantities.
fn manifest_diff(manifest: &[OrderItem], submitted: &[OrderItem]) -> Vec<ItemMismatch> {
    let mut counts: HashMap<Uuid, (u32, u32)> = HashMap::new();

    for item in manifest {
        counts.entry(item.laundry_item_id).or_default().0 += item.quantity;
    }
    for item in submitted {
        counts.entry(item.laundry_item_id).or_default().1 += item.quantity;
    }

    let mut mismatches: Vec<ItemMismatch> = counts
        .into_iter()
        .filter(|(_, (expected, submitted))| expected != submitted)
        .map(|(laundry_item_id, (expected, submitted))| ItemMismatch {
            laundry_item_id,
            expected,
            submitted,
        })
        .collect();

    mismatches.sort_by_key(|mismatch| mismatch.laundry_item_id);
    mismatches
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{complete_station, manifest_diff, process_order, request_bypass, ProcessOutcome};
    use crate::engine::testutil::{fixture, fixture_without_admin, manifest, order_at_washing};
    use crate::error::AppError;
    use crate::models::order::{OrderItem, OrderStatus};
    use crate::models::work::{Station, WorkStatus};

    #[test]
    fn manifest_diff_flags_missing_extra_and_wrong_quantities() {
        let expected = manifest();

        assert!(manifest_diff(&expected, &manifest()).is_empty());

        let mut short = manifest();
        short[0].quantity = 1;
        let diff = manifest_diff(&expected, &short);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].expected, 3);
        assert_eq!(diff[0].submitted, 1);

        let mut extra = manifest();
        extra.push(OrderItem {
            laundry_item_id: Uuid::from_u128(0xC3),
            quantity: 1,
        });
        assert_eq!(manifest_diff(&expected, &extra).len(), 1);

        let missing_line = vec![expected[0]];
        assert_eq!(manifest_diff(&expected, &missing_line).len(), 1);
    }

    #[test]
    fn matching_manifest_starts_the_station() {
        let fx = fixture();
        let order_id = order_at_washing(&fx);

        let outcome = process_order(&fx.state, fx.washer_id, order_id, manifest()).unwrap();
        let ProcessOutcome::Started { work, shift } = outcome else {
            panic!("expected the station to start");
        };

        assert_eq!(work.status, WorkStatus::InProcess);
        assert_eq!(work.station, Station::Washing);
        assert_eq!(work.shift_id, Some(shift.id));
        // processing itself does not advance the order
        let status = fx.state.orders.get(&order_id).unwrap().status;
        assert_eq!(status, OrderStatus::Washing);
    }

    #[test]
    fn mismatched_manifest_needs_bypass_and_mutates_nothing() {
        let fx = fixture();
        let order_id = order_at_washing(&fx);

        let mut wrong = manifest();
        wrong[1].quantity = 5;
        let outcome = process_order(&fx.state, fx.washer_id, order_id, wrong).unwrap();

        let ProcessOutcome::NeedBypass { mismatches } = outcome else {
            panic!("expected a bypass request");
        };
        assert_eq!(mismatches.len(), 1);
        assert!(fx.state.work_processes.is_empty());
        assert!(!fx
            .state
            .worker_shifts
            .get(&fx.washer_id)
            .map(|shift| shift.is_open())
            .unwrap_or(false));
    }

    #[test]
    fn second_worker_at_the_same_station_is_rejected() {
        let fx = fixture();
        let order_id = order_at_washing(&fx);

        process_order(&fx.state, fx.washer_id, order_id, manifest()).unwrap();
        let err = process_order(&fx.state, fx.second_washer_id, order_id, manifest()).unwrap_err();

        assert!(matches!(err, AppError::StationAlreadyClaimed { .. }));
        // the loser's shift claim was rolled back
        assert!(!fx
            .state
            .worker_shifts
            .get(&fx.second_washer_id)
            .map(|shift| shift.is_open())
            .unwrap_or(false));
    }

    #[test]
    fn wrong_station_worker_is_forbidden() {
        let fx = fixture();
        let order_id = order_at_washing(&fx);

        let err = process_order(&fx.state, fx.ironer_id, order_id, manifest()).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn complete_station_advances_and_frees_the_worker() {
        let fx = fixture();
        let order_id = order_at_washing(&fx);
        process_order(&fx.state, fx.washer_id, order_id, manifest()).unwrap();

        let (order, work) = complete_station(&fx.state, fx.washer_id, order_id).unwrap();

        assert_eq!(order.status, OrderStatus::Ironing);
        assert_eq!(work.status, WorkStatus::Completed);
        assert!(!fx
            .state
            .worker_shifts
            .get(&fx.washer_id)
            .unwrap()
            .is_open());
    }

    #[test]
    fn complete_station_twice_fails_instead_of_double_advancing() {
        let fx = fixture();
        let order_id = order_at_washing(&fx);
        process_order(&fx.state, fx.washer_id, order_id, manifest()).unwrap();
        complete_station(&fx.state, fx.washer_id, order_id).unwrap();

        let err = complete_station(&fx.state, fx.washer_id, order_id).unwrap_err();
        // the washing shift is closed, so the repeat has no open shift
        assert!(matches!(err, AppError::Forbidden(_)));
        let status = fx.state.orders.get(&order_id).unwrap().status;
        assert_eq!(status, OrderStatus::Ironing);
    }

    #[test]
    fn unpaid_packing_parks_the_order_and_keeps_the_shift_open() {
        let fx = fixture();
        let order_id = order_at_washing(&fx);

        process_order(&fx.state, fx.washer_id, order_id, manifest()).unwrap();
        complete_station(&fx.state, fx.washer_id, order_id).unwrap();
        process_order(&fx.state, fx.ironer_id, order_id, manifest()).unwrap();
        complete_station(&fx.state, fx.ironer_id, order_id).unwrap();
        process_order(&fx.state, fx.packer_id, order_id, manifest()).unwrap();
        let (order, _) = complete_station(&fx.state, fx.packer_id, order_id).unwrap();

        assert_eq!(order.status, OrderStatus::WaitingForPayment);
        assert!(fx
            .state
            .worker_shifts
            .get(&fx.packer_id)
            .unwrap()
            .is_open());
        assert!(fx.state.deliveries.is_empty());

        // completing the parked station again is a definite failure
        let err = complete_station(&fx.state, fx.packer_id, order_id).unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[test]
    fn request_bypass_binds_the_worker_and_summons_admins() {
        let fx = fixture();
        let order_id = order_at_washing(&fx);

        let work =
            request_bypass(&fx.state, fx.washer_id, order_id, "two shirts missing".to_string())
                .unwrap();

        assert_eq!(work.status, WorkStatus::BypassRequested);
        assert_eq!(work.notes.as_deref(), Some("two shirts missing"));
        assert!(work.shift_id.is_some());
        assert!(fx
            .state
            .worker_shifts
            .get(&fx.washer_id)
            .unwrap()
            .is_open());
        assert_eq!(fx.state.admin_inbox.len(), 1);
    }

    #[test]
    fn bypass_without_admins_fails_but_keeps_the_escalation() {
        let fx = fixture_without_admin();
        let (order, pickup) = crate::engine::dispatch::request_pickup(
            &fx.state,
            fx.customer_id,
            fx.address_id,
            None,
        )
        .unwrap();
        crate::engine::dispatch::accept_pickup(&fx.state, fx.driver_id, pickup.id).unwrap();
        crate::engine::dispatch::complete_pickup(&fx.state, fx.driver_id, pickup.id, None).unwrap();
        // no admin exists, so intake happens by writing the order directly
        {
            let mut stored = fx.state.orders.get_mut(&order.id).unwrap();
            stored.status = OrderStatus::Washing;
            stored.items = manifest();
        }

        let err = request_bypass(&fx.state, fx.washer_id, order.id, "torn bag".to_string())
            .unwrap_err();

        assert!(matches!(err, AppError::NoAdminsForOutlet(_)));
        let work = fx
            .state
            .work_processes
            .get(&(order.id, Station::Washing))
            .unwrap()
            .clone();
        assert_eq!(work.status, WorkStatus::BypassRequested);
    }
}
