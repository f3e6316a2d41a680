//! Shared application state and router.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use todo_core::{KvStore, ListRepository, Reconciler};
use tower_http::trace::TraceLayer;

use crate::auth::Authenticator;
use crate::config::Config;
use crate::routes;

/// Shared application state
pub struct AppState<S> {
    pub config: Config,
    pub repo: Arc<ListRepository<S>>,
    pub reconciler: Arc<Reconciler<S>>,
    pub auth: Arc<dyn Authenticator>,
}

impl<S: KvStore> AppState<S> {
    pub fn new(config: Config, store: Arc<S>, auth: Arc<dyn Authenticator>) -> Self {
        let repo = Arc::new(ListRepository::new(store));
        let reconciler = Arc::new(Reconciler::new(Arc::clone(&repo), config.commit_retries));
        Self {
            config,
            repo,
            reconciler,
            auth,
        }
    }
}

pub fn router<S: KvStore + 'static>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/lists", post(routes::lists::create_list::<S>))
        .route(
            "/lists/{list_id}",
            get(routes::lists::get_list::<S>).post(routes::lists::post_list::<S>),
        )
        .route("/history", get(routes::history::get_history::<S>))
        .route("/api/profile", get(routes::profile::get_profile::<S>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
