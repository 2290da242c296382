use chrono::{DateTime, Duration, NaiveTime, Utc};
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::account::Attendance;
use crate::state::AppState;

/// [00:00:00.000, 23:59:59.999] of the server day containing `now`.
pub fn day_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    let end = start + Duration::days(1) - Duration::milliseconds(1);
    (start, end)
}

pub fn is_checked_in(state: &AppState, user_id: Uuid) -> bool {
    let (start, end) = day_bounds(state.clock.now());

    state
        .attendance
        .get(&user_id)
        .map(|row| row.check_out.is_none() && row.check_in >= start && row.check_in <= end)
        .unwrap_or(false)
}

/// The gate: pure read, called before every driver/worker state change.
pub fn ensure_active_attendance(state: &AppState, user_id: Uuid) -> Result<(), AppError> {
    if is_checked_in(state, user_id) {
        Ok(())
    } else {
        Err(AppError::AttendanceRequired(user_id))
    }
}

pub fn check_in(state: &AppState, user_id: Uuid) -> Result<Attendance, AppError> {
    if !state.users.contains_key(&user_id) {
        return Err(AppError::NotFound(format!("user {user_id} not found")));
    }

    let now = state.clock.now();
    let (start, end) = day_bounds(now);
    let fresh = Attendance {
        id: Uuid::new_v4(),
        user_id,
        check_in: now,
        check_out: None,
    };

    match state.attendance.entry(user_id) {
        Entry::Occupied(mut slot) => {
            let row = slot.get();
            if row.check_out.is_none() && row.check_in >= start && row.check_in <= end {
                return Err(AppError::BadRequest(format!(
                    "user {user_id} is already checked in"
                )));
            }
            slot.insert(fresh.clone());
        }
        Entry::Vacant(slot) => {
            slot.insert(fresh.clone());
        }
    }

    Ok(fresh)
}

pub fn check_out(state: &AppState, user_id: Uuid) -> Result<Attendance, AppError> {
    let now = state.clock.now();

    let mut row = state
        .attendance
        .get_mut(&user_id)
        .ok_or_else(|| AppError::NotFound(format!("user {user_id} has no attendance")))?;

    if row.check_out.is_some() {
        return Err(AppError::BadRequest(format!(
            "user {user_id} is not checked in"
        )));
    }

    row.check_out = Some(now);
    Ok(row.clone())
}
