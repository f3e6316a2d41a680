//! HTTP route handlers

pub mod history;
pub mod lists;
pub mod profile;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use todo_core::{KvStore, SessionId};

use crate::app::AppState;
use crate::auth::Profile;
use crate::error::AppError;

/// 302 to `location`.
pub(crate) fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// Profile of a resolved session; a session without one is treated as not
/// signed up.
pub(crate) async fn require_profile<S: KvStore>(
    state: &AppState<S>,
    session: &SessionId,
) -> Result<Profile, AppError> {
    match state.auth.get_profile(session).await? {
        Some(profile) => Ok(profile),
        None => {
            tracing::debug!("No profile for session {}", session);
            Err(AppError::ProfileNotFound)
        }
    }
}
