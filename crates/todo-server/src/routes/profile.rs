//! GET /api/profile - profile of the signed-in user

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, Json};
use todo_core::KvStore;

use super::require_profile;
use crate::app::AppState;
use crate::auth::Profile;
use crate::error::AppError;

pub async fn get_profile<S: KvStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
) -> Result<Json<Profile>, AppError> {
    let Some(session) = state.auth.resolve_session_id(&headers) else {
        return Err(AppError::Unauthorized);
    };
    Ok(Json(require_profile(&state, &session).await?))
}
