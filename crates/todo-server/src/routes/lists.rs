//! List endpoints: snapshot reads, live sockets, batch writes, privacy
//! toggle and list creation.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        FromRequest, Path, Query, Request, State,
    },
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::Deserialize;
use todo_core::{Consistency, KvStore, ListError, ListId};

use super::{found, require_profile};
use crate::app::AppState;
use crate::error::AppError;
use crate::ws;

/// Header reporting how long the snapshot read took, in milliseconds
pub const LOAD_TIME_HEADER: &str = "x-list-load-time";

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Taken leniently: only `strong` asks for a strong read
    pub consistency: Option<String>,
}

impl ListQuery {
    fn consistency(&self) -> Consistency {
        match self.consistency.as_deref() {
            Some("strong") => Consistency::Strong,
            _ => Consistency::Eventual,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ActionForm {
    pub action: Option<String>,
}

/// Unparseable ids get the same answer as unknown ones.
fn parse_list_id(raw: &str) -> Result<ListId, AppError> {
    raw.parse().map_err(|_| AppError::List(ListError::NotFound))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false)
}

/// GET /lists/{list_id} - Snapshot as JSON, or a live socket when the
/// request is a WebSocket upgrade
pub async fn get_list<S: KvStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(list_id): Path<String>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, AppError> {
    let list_id = parse_list_id(&list_id)?;
    let session = state.auth.resolve_session_id(&headers);

    let Ok(upgrade) = upgrade else {
        let Some(session) = session else {
            return Ok(found(&state.config.signin_path));
        };
        require_profile(&state, &session).await?;

        let started = Instant::now();
        let consistency = query.consistency();
        let snapshot = state.repo.load_list(&list_id, consistency, Some(&session)).await?;
        let elapsed = started.elapsed().as_millis().to_string();
        return Ok(([(LOAD_TIME_HEADER, elapsed)], Json(snapshot)).into_response());
    };

    let Some(session) = session else {
        return Err(AppError::Unauthorized);
    };
    require_profile(&state, &session).await?;
    // Refuse the upgrade outright for lists the caller cannot see
    state
        .repo
        .visible_meta(&list_id, Consistency::Strong, Some(&session))
        .await?;

    tracing::info!("Opening live socket on list {} for {}", list_id, session);
    let reconciler = Arc::clone(&state.reconciler);
    Ok(upgrade
        .max_message_size(state.config.max_message_bytes)
        .on_upgrade(move |socket| ws::serve_socket(socket, list_id, Some(session), reconciler)))
}

/// POST /lists/{list_id} - JSON mutation batch, or form `action=togglePrivacy`.
/// Needs a signed-up session, like reads do.
pub async fn post_list<S: KvStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(list_id): Path<String>,
    request: Request,
) -> Result<Response, AppError> {
    let list_id = parse_list_id(&list_id)?;
    let Some(session) = state.auth.resolve_session_id(request.headers()) else {
        return Err(AppError::Unauthorized);
    };
    require_profile(&state, &session).await?;

    if is_json(request.headers()) {
        let body = axum::body::to_bytes(request.into_body(), state.config.max_message_bytes)
            .await
            .map_err(|e| AppError::BadRequest(format!("Unreadable body: {}", e)))?;
        let raw = std::str::from_utf8(&body)
            .map_err(|_| AppError::BadRequest("Body is not valid UTF-8".to_string()))?;
        let snapshot = state
            .reconciler
            .apply_message(&list_id, Some(&session), raw)
            .await?;
        return Ok(Json(snapshot).into_response());
    }

    let Form(form) = Form::<ActionForm>::from_request(request, &())
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?;

    match form.action.as_deref() {
        Some("togglePrivacy") => {
            if state.repo.toggle_list_privacy(&list_id, &session).await? {
                Ok(found(&format!("/lists/{}", list_id)))
            } else {
                Err(AppError::Unauthorized)
            }
        }
        other => {
            tracing::debug!("Unknown list action {:?}", other);
            Err(AppError::BadRequest("Invalid action".to_string()))
        }
    }
}

/// POST /lists - Create a list owned by the caller and go to it
pub async fn create_list<S: KvStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let Some(session) = state.auth.resolve_session_id(&headers) else {
        return Err(AppError::Unauthorized);
    };
    let list_id = state.repo.create_list(&session).await?;
    Ok(found(&format!("/lists/{}", list_id)))
}
