//! Session resolution and user profiles.
//!
//! Sessions are issued elsewhere (sign-in is handled by an external OAuth
//! flow); this module only maps an incoming request to the session id it
//! carries and looks up the profile stored for that session.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use todo_core::store::{AtomicOperation, Consistency, Key, KvStore, StoreError};
use todo_core::SessionId;

/// A signed-in user's profile.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Profile {
    /// Name to show for this user.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.email.clone())
            .unwrap_or_else(|| "Anonymous".to_string())
    }
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Session id carried by the request, if any.
    fn resolve_session_id(&self, headers: &HeaderMap) -> Option<SessionId>;

    async fn get_profile(&self, session: &SessionId) -> Result<Option<Profile>, StoreError>;
}

fn profile_key(session: &SessionId) -> Key {
    Key::new(["user_profiles", session.as_str()])
}

/// Reads the session id from a cookie and profiles from the list store.
pub struct StoreAuthenticator<S> {
    store: Arc<S>,
    cookie_name: String,
}

impl<S: KvStore> StoreAuthenticator<S> {
    pub fn new(store: Arc<S>, cookie_name: impl Into<String>) -> Self {
        Self {
            store,
            cookie_name: cookie_name.into(),
        }
    }

    /// Store the profile for a session, replacing any previous one.
    pub async fn register_profile(&self, session: &SessionId, profile: &Profile) -> Result<(), StoreError> {
        let mut op = AtomicOperation::new();
        op.set(profile_key(session), serde_json::to_value(profile)?);
        self.store.commit(op).await?;
        tracing::info!("Registered profile for session {}", session);
        Ok(())
    }
}

#[async_trait]
impl<S: KvStore> Authenticator for StoreAuthenticator<S> {
    fn resolve_session_id(&self, headers: &HeaderMap) -> Option<SessionId> {
        let jar = CookieJar::from_headers(headers);
        let cookie = jar.get(&self.cookie_name)?;
        let value = cookie.value().trim();
        if value.is_empty() {
            tracing::debug!("Empty {} cookie", self.cookie_name);
            return None;
        }
        Some(SessionId::new(value))
    }

    async fn get_profile(&self, session: &SessionId) -> Result<Option<Profile>, StoreError> {
        match self.store.get(&profile_key(session), Consistency::Eventual).await? {
            Some(entry) => Ok(Some(serde_json::from_value(entry.value)?)),
            None => Ok(None),
        }
    }
}
