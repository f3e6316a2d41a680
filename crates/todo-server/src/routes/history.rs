//! GET /history - paginated list history of the signed-in user

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use todo_core::{HistoryPage, KvStore, ListSummary};

use super::{found, require_profile};
use crate::app::AppState;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Taken leniently: anything that is not a number means page 1
    pub page: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub profile_name: String,
    pub page: usize,
    pub total_pages: usize,
    pub lists: Vec<ListSummary>,
}

pub async fn get_history<S: KvStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<HistoryQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let Some(session) = state.auth.resolve_session_id(&headers) else {
        return Ok(found(&state.config.signin_path));
    };
    let profile = require_profile(&state, &session).await?;

    let requested = query
        .page
        .as_deref()
        .and_then(|p| p.trim().parse::<usize>().ok())
        .unwrap_or(1);
    let lists = state.repo.get_user_lists(&session).await?;
    let page = HistoryPage::paginate(&lists, requested, state.config.history_page_size);

    Ok(Json(HistoryResponse {
        profile_name: profile.display_name(),
        page: page.page,
        total_pages: page.total_pages,
        lists: page.lists,
    })
    .into_response())
}
