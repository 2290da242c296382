use chrono::{DateTime, Timelike, Utc};
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::fulfillment::{DeliveryStatus, DriverSession, PickupStatus};
use crate::models::work::{ShiftPeriod, Station, WorkerShift};
use crate::state::AppState;

/// Advisory pre-check. The entry-level claim below is the actual constraint;
/// this exists to fail fast with a clear kind before any claim is attempted.
pub fn assert_worker_free(state: &AppState, worker_user_id: Uuid) -> Result<(), AppError> {
    let busy = state
        .worker_shifts
        .get(&worker_user_id)
        .map(|shift| shift.is_open())
        .unwrap_or(false);

    if busy {
        Err(AppError::WorkerBusy(worker_user_id))
    } else {
        Ok(())
    }
}

/// Advisory pre-check: a driver is busy while any leg still references them.
pub fn assert_driver_free(state: &AppState, driver_id: Uuid) -> Result<(), AppError> {
    let on_pickup = state.pickups.iter().any(|leg| {
        leg.driver_id == Some(driver_id)
            && matches!(
                leg.status,
                PickupStatus::WaitingForPickup | PickupStatus::LaundryOnTheWay
            )
    });

    let on_delivery = state.deliveries.iter().any(|leg| {
        leg.driver_id == Some(driver_id)
            && matches!(
                leg.status,
                DeliveryStatus::ReadyForDelivery | DeliveryStatus::DeliveryOnTheWay
            )
    });

    if on_pickup || on_delivery {
        Err(AppError::DriverBusy(driver_id))
    } else {
        Ok(())
    }
}

/// Open a shift for the worker. The entry lock on the per-user key makes
/// this the conditional write: two concurrent claims cannot both win.
pub fn claim_worker_shift(
    state: &AppState,
    worker_user_id: Uuid,
    outlet_id: Uuid,
    station: Station,
) -> Result<WorkerShift, AppError> {
    let now = state.clock.now();
    let period = if now.hour() < 12 {
        ShiftPeriod::Morning
    } else {
        ShiftPeriod::Noon
    };

    let shift = WorkerShift {
        id: Uuid::new_v4(),
        worker_id: worker_user_id,
        outlet_id,
        station,
        period,
        start_time: now,
        end_time: None,
    };

    match state.worker_shifts.entry(worker_user_id) {
        Entry::Occupied(mut slot) => {
            if slot.get().is_open() {
                return Err(AppError::WorkerBusy(worker_user_id));
            }
            slot.insert(shift.clone());
        }
        Entry::Vacant(slot) => {
            slot.insert(shift.clone());
        }
    }

    state.metrics.active_worker_shifts.inc();
    Ok(shift)
}

/// Close the worker's open shift, if any. Returns the closed shift.
pub fn close_worker_shift(
    state: &AppState,
    worker_user_id: Uuid,
    end: DateTime<Utc>,
) -> Option<WorkerShift> {
    let mut shift = state.worker_shifts.get_mut(&worker_user_id)?;
    if !shift.is_open() {
        return None;
    }

    shift.end_time = Some(end);
    state.metrics.active_worker_shifts.dec();
    Some(shift.clone())
}

/// Close an open shift located by shift id rather than worker id; used when
/// only the work process binding is known. Returns the worker user id.
pub fn close_shift_by_id(state: &AppState, shift_id: Uuid, end: DateTime<Utc>) -> Option<Uuid> {
    let worker_user_id = state
        .worker_shifts
        .iter()
        .find(|shift| shift.id == shift_id && shift.is_open())
        .map(|shift| *shift.key())?;

    let mut shift = state.worker_shifts.get_mut(&worker_user_id)?;
    if shift.id != shift_id || !shift.is_open() {
        return None;
    }

    shift.end_time = Some(end);
    state.metrics.active_worker_shifts.dec();
    Some(worker_user_id)
}

/// Undo a shift claim whose station claim lost; the shift never started.
pub fn abandon_worker_shift(state: &AppState, worker_user_id: Uuid, shift_id: Uuid) {
    let removed = state
        .worker_shifts
        .remove_if(&worker_user_id, |_, shift| {
            shift.id == shift_id && shift.is_open()
        })
        .is_some();

    if removed {
        state.metrics.active_worker_shifts.dec();
    }
}

/// Open a session for the driver; entry lock on the per-driver key is the
/// one-open-session constraint.
pub fn claim_driver_session(
    state: &AppState,
    driver_id: Uuid,
    outlet_id: Uuid,
) -> Result<DriverSession, AppError> {
    let now = state.clock.now();
    let session = DriverSession {
        id: Uuid::new_v4(),
        driver_id,
        outlet_id,
        start_time: now,
        end_time: None,
        current_pickup_order_id: None,
        current_delivery_order_id: None,
    };

    match state.driver_sessions.entry(driver_id) {
        Entry::Occupied(mut slot) => {
            if slot.get().is_open() {
                return Err(AppError::DriverBusy(driver_id));
            }
            slot.insert(session.clone());
        }
        Entry::Vacant(slot) => {
            slot.insert(session.clone());
        }
    }

    state.metrics.active_driver_sessions.inc();
    Ok(session)
}

pub fn close_driver_session(
    state: &AppState,
    driver_id: Uuid,
    end: DateTime<Utc>,
) -> Option<DriverSession> {
    let mut session = state.driver_sessions.get_mut(&driver_id)?;
    if !session.is_open() {
        return None;
    }

    session.end_time = Some(end);
    state.metrics.active_driver_sessions.dec();
    Some(session.clone())
}

/// Undo a session claim whose leg claim lost the race.
pub fn abandon_driver_session(state: &AppState, driver_id: Uuid, session_id: Uuid) {
    let removed = state
        .driver_sessions
        .remove_if(&driver_id, |_, session| {
            session.id == session_id && session.is_open()
        })
        .is_some();

    if removed {
        state.metrics.active_driver_sessions.dec();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use super::{
        abandon_worker_shift, assert_worker_free, claim_driver_session, claim_worker_shift,
        close_worker_shift,
    };
    use crate::clock::FixedClock;
    use crate::error::AppError;
    use crate::models::work::{ShiftPeriod, Station};
    use crate::state::AppState;

    fn state_at_hour(hour: u32) -> AppState {
        let start = Utc.with_ymd_and_hms(2025, 3, 10, hour, 0, 0).unwrap();
        AppState::with_clock(16, Arc::new(FixedClock::at(start)))
    }

    #[test]
    fn shift_period_follows_the_clock() {
        let state = state_at_hour(9);
        let worker = Uuid::new_v4();
        let shift = claim_worker_shift(&state, worker, Uuid::new_v4(), Station::Washing).unwrap();
        assert_eq!(shift.period, ShiftPeriod::Morning);

        let state = state_at_hour(14);
        let shift = claim_worker_shift(&state, worker, Uuid::new_v4(), Station::Washing).unwrap();
        assert_eq!(shift.period, ShiftPeriod::Noon);
    }

    #[test]
    fn second_shift_claim_for_same_worker_fails() {
        let state = state_at_hour(9);
        let worker = Uuid::new_v4();
        let outlet = Uuid::new_v4();

        claim_worker_shift(&state, worker, outlet, Station::Washing).unwrap();
        let err = claim_worker_shift(&state, worker, outlet, Station::Ironing).unwrap_err();
        assert!(matches!(err, AppError::WorkerBusy(id) if id == worker));
        assert!(assert_worker_free(&state, worker).is_err());
    }

    #[test]
    fn closed_shift_frees_the_worker() {
        let state = state_at_hour(9);
        let worker = Uuid::new_v4();
        let outlet = Uuid::new_v4();

        claim_worker_shift(&state, worker, outlet, Station::Washing).unwrap();
        close_worker_shift(&state, worker, state.clock.now());

        assert!(assert_worker_free(&state, worker).is_ok());
        assert!(claim_worker_shift(&state, worker, outlet, Station::Ironing).is_ok());
    }

    #[test]
    fn abandoned_claim_leaves_no_open_shift() {
        let state = state_at_hour(9);
        let worker = Uuid::new_v4();

        let shift = claim_worker_shift(&state, worker, Uuid::new_v4(), Station::Washing).unwrap();
        abandon_worker_shift(&state, worker, shift.id);

        assert!(assert_worker_free(&state, worker).is_ok());
        assert_eq!(state.metrics.active_worker_shifts.get(), 0);
    }

    #[test]
    fn second_session_claim_for_same_driver_fails() {
        let state = state_at_hour(9);
        let driver = Uuid::new_v4();
        let outlet = Uuid::new_v4();

        claim_driver_session(&state, driver, outlet).unwrap();
        let err = claim_driver_session(&state, driver, outlet).unwrap_err();
        assert!(matches!(err, AppError::DriverBusy(id) if id == driver));
    }
}
