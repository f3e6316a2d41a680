//! Fan-out of list changes to live connections.
//!
//! Each connection holds one `ListSubscription` on its list's updated marker.
//! When the marker fires the connection reloads the list and pushes the
//! snapshot, so every write by anyone reaches every open connection.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::error::ListError;
use crate::ids::{ListId, SessionId};
use crate::model::Snapshot;
use crate::repository::{keys, ListRepository};
use crate::store::{Consistency, KvStore, Versionstamp, Watch};

/// Change notifications for one list. Dropping it unsubscribes.
pub struct ListSubscription {
    list_id: ListId,
    watch: Watch,
}

impl ListSubscription {
    pub fn list_id(&self) -> &ListId {
        &self.list_id
    }

    /// Wait until the list changes. Several quick changes may be reported
    /// once. Returns `None` if the store has gone away.
    pub async fn changed(&mut self) -> Option<Versionstamp> {
        self.watch.changed().await
    }
}

pub struct ChangeNotifier<S> {
    repo: Arc<ListRepository<S>>,
}

impl<S> Clone for ChangeNotifier<S> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
        }
    }
}

impl<S: KvStore> ChangeNotifier<S> {
    pub fn new(repo: Arc<ListRepository<S>>) -> Self {
        Self { repo }
    }

    pub fn subscribe(&self, list_id: &ListId) -> ListSubscription {
        debug!("Subscribing to changes on list {}", list_id);
        ListSubscription {
            list_id: list_id.clone(),
            watch: self.repo.store().watch(&keys::updated(list_id)),
        }
    }

    /// Strong snapshot to push after a change, or `None` if there is
    /// nothing to push (list gone, hidden from the requester, or the read
    /// failed).
    pub async fn snapshot_for(&self, list_id: &ListId, requester: Option<&SessionId>) -> Option<Snapshot> {
        match self.repo.load_list(list_id, Consistency::Strong, requester).await {
            Ok(snapshot) => Some(snapshot),
            Err(ListError::NotFound) => {
                warn!("List {} no longer visible, skipping push", list_id);
                None
            }
            Err(e) => {
                error!("Failed to load list {} for push: {}", list_id, e);
                None
            }
        }
    }
}
