pub mod attendance;
pub mod bypass;
pub mod dispatch;
pub mod exclusivity;
pub mod notify;
pub mod payment;
pub mod station;
pub mod sweep;
pub mod transition;

#[cfg(test)]
pub(crate) mod testutil;

use uuid::Uuid;

use crate::error::AppError;
use crate::models::account::{Role, User};
use crate::state::AppState;

/// Fetch a user and check the role it is acting under.
pub(crate) fn require_user(state: &AppState, user_id: Uuid, role: Role) -> Result<User, AppError> {
    let user = state
        .users
        .get(&user_id)
        .map(|entry| entry.clone())
        .ok_or_else(|| AppError::NotFound(format!("user {user_id} not found")))?;

    if user.role != role {
        return Err(AppError::Forbidden(format!(
            "user {user_id} does not act as {role:?}"
        )));
    }

    Ok(user)
}
