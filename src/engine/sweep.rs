use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::engine::attendance::day_bounds;
use crate::engine::exclusivity::close_shift_by_id;
use crate::engine::notify::{notify, Audience};
use crate::engine::payment::payment_status_for;
use crate::engine::transition::{advance, OrderAction};
use crate::models::order::{OrderStatus, PaymentStatus};
use crate::models::work::{ShiftPeriod, Station, WorkerShift};
use crate::state::AppState;

const MORNING_END_HOUR: i64 = 12;
const NOON_END_HOUR: i64 = 21;

fn scheduled_end(shift: &WorkerShift) -> DateTime<Utc> {
    let day_start = shift
        .start_time
        .date_naive()
        .and_time(NaiveTime::MIN)
        .and_utc();
    let hour = match shift.period {
        ShiftPeriod::Morning => MORNING_END_HOUR,
        ShiftPeriod::Noon => NOON_END_HOUR,
    };
    day_start + Duration::hours(hour)
}

/// Force-close worker shifts whose scheduled boundary has passed. The
/// re-check under the entry guard keeps this from touching a shift that a
/// completion is closing at the same moment.
pub fn auto_checkout_expired_worker_shifts(state: &AppState) -> usize {
    let now = state.clock.now();

    let expired: Vec<Uuid> = state
        .worker_shifts
        .iter()
        .filter(|shift| shift.is_open() && scheduled_end(shift) <= now)
        .map(|shift| *shift.key())
        .collect();

    let mut closed = 0;
    for worker_id in expired {
        if let Some(mut shift) = state.worker_shifts.get_mut(&worker_id) {
            if shift.is_open() && scheduled_end(&shift) <= now {
                shift.end_time = Some(now);
                state.metrics.active_worker_shifts.dec();
                closed += 1;
            }
        }
    }

    if closed > 0 {
        info!(closed, "auto-checked-out expired worker shifts");
        state
            .metrics
            .sweep_closed_total
            .with_label_values(&["worker_shifts"])
            .inc_by(closed as u64);
    }

    closed
}

/// Force-close driver sessions left open past the end of their start day.
pub fn auto_checkout_expired_driver_sessions(state: &AppState) -> usize {
    let now = state.clock.now();

    let expired: Vec<Uuid> = state
        .driver_sessions
        .iter()
        .filter(|session| session.is_open() && day_bounds(session.start_time).1 < now)
        .map(|session| *session.key())
        .collect();

    let mut closed = 0;
    for driver_id in expired {
        if let Some(mut session) = state.driver_sessions.get_mut(&driver_id) {
            if session.is_open() && day_bounds(session.start_time).1 < now {
                session.end_time = Some(now);
                state.metrics.active_driver_sessions.dec();
                closed += 1;
            }
        }
    }

    if closed > 0 {
        info!(closed, "auto-checked-out expired driver sessions");
        state
            .metrics
            .sweep_closed_total
            .with_label_values(&["driver_sessions"])
            .inc_by(closed as u64);
    }

    closed
}

/// Cancel orders parked in WAITING_FOR_PAYMENT past the deadline, releasing
/// the packing worker that was still bound to them.
pub fn auto_cancel_unpaid_orders(state: &AppState, deadline: Duration) -> usize {
    let now = state.clock.now();

    let stale: Vec<Uuid> = state
        .orders
        .iter()
        .filter(|order| {
            order.status == OrderStatus::WaitingForPayment && order.updated_at + deadline <= now
        })
        .map(|order| order.id)
        .collect();

    let mut cancelled = 0;
    for order_id in stale {
        let result = {
            let Some(mut order) = state.orders.get_mut(&order_id) else {
                continue;
            };
            if order.status != OrderStatus::WaitingForPayment
                || order.updated_at + deadline > now
                || payment_status_for(state, order_id) == PaymentStatus::Success
            {
                continue;
            }

            advance(
                &mut order,
                OrderAction::CancelUnpaid,
                PaymentStatus::Pending,
                now,
            )
            .ok()
            .map(|_| order.clone())
        };

        let Some(order) = result else {
            continue;
        };

        let shift_id = state
            .work_processes
            .get(&(order_id, Station::Packing))
            .and_then(|work| work.shift_id);
        if let Some(shift_id) = shift_id {
            close_shift_by_id(state, shift_id, now);
        }

        notify(
            state,
            Audience::Customer(order.customer_id),
            "Order cancelled",
            &format!(
                "Order {} was cancelled because payment did not arrive",
                order.order_number
            ),
        );

        state
            .metrics
            .transitions_total
            .with_label_values(&["cancel_unpaid"])
            .inc();
        cancelled += 1;
    }

    if cancelled > 0 {
        info!(cancelled, "cancelled stale unpaid orders");
        state
            .metrics
            .sweep_closed_total
            .with_label_values(&["unpaid_orders"])
            .inc_by(cancelled as u64);
    }

    cancelled
}

/// Nudge customers of orders still parked for payment.
pub fn payment_reminder(state: &AppState) -> usize {
    let waiting: Vec<(Uuid, String)> = state
        .orders
        .iter()
        .filter(|order| order.status == OrderStatus::WaitingForPayment)
        .map(|order| (order.customer_id, order.order_number.clone()))
        .collect();

    for (customer_id, order_number) in &waiting {
        notify(
            state,
            Audience::Customer(*customer_id),
            "Payment reminder",
            &format!("Order {order_number} is still awaiting payment"),
        );
    }

    waiting.len()
}

/// Interval loop spawned by main; every job is idempotent, so a missed or
/// doubled tick is harmless.
pub async fn run_sweeper(
    state: Arc<AppState>,
    interval: std::time::Duration,
    unpaid_deadline: Duration,
) {
    info!("sweep loop started");
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;
        auto_checkout_expired_worker_shifts(&state);
        auto_checkout_expired_driver_sessions(&state);
        auto_cancel_unpaid_orders(&state, unpaid_deadline);
        payment_reminder(&state);
    }
}
