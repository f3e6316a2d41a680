//! Per-connection live session state machine.
//!
//! A transport (WebSocket handler, test harness) feeds `LiveEvent`s in and
//! sends back whatever snapshot `dispatch` returns. The session owns the
//! connection's change subscription and releases it on close.
//!
//! ```text
//! Connecting --Opened--> Open --Closed/TransportError--> Closed
//!                        Open --Message--> apply batch, push snapshot
//!                        Open --Message, commit fails--> Closed
//!                        Open --StoreChanged--> push snapshot
//! ```

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::ListError;
use crate::ids::{ListId, SessionId};
use crate::model::Snapshot;
use crate::notifier::{ChangeNotifier, ListSubscription};
use crate::reconcile::Reconciler;
use crate::store::{KvStore, Versionstamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Something that happened on a connection.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    /// Transport is up
    Opened,
    /// Inbound text message (a JSON mutation batch)
    Message(String),
    /// The list's updated marker fired
    StoreChanged,
    /// Peer went away
    Closed,
    /// Transport failed; handled like a close
    TransportError(String),
}

pub struct LiveSession<S> {
    list_id: ListId,
    requester: Option<SessionId>,
    state: ConnectionState,
    reconciler: Arc<Reconciler<S>>,
    notifier: ChangeNotifier<S>,
    subscription: Option<ListSubscription>,
}

impl<S: KvStore> LiveSession<S> {
    pub fn new(list_id: ListId, requester: Option<SessionId>, reconciler: Arc<Reconciler<S>>) -> Self {
        let notifier = ChangeNotifier::new(Arc::clone(reconciler.repository()));
        Self {
            list_id,
            requester,
            state: ConnectionState::Connecting,
            reconciler,
            notifier,
            subscription: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn list_id(&self) -> &ListId {
        &self.list_id
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Handle one event. Returns the snapshot to send to the peer, if any.
    pub async fn dispatch(&mut self, event: LiveEvent) -> Option<Snapshot> {
        match (self.state, event) {
            (ConnectionState::Connecting, LiveEvent::Opened) => {
                self.subscription = Some(self.notifier.subscribe(&self.list_id));
                self.state = ConnectionState::Open;
                info!("Live session open on list {}", self.list_id);
                // Initial push, so the peer is current from the first frame
                self.notifier.snapshot_for(&self.list_id, self.requester.as_ref()).await
            }
            (ConnectionState::Open, LiveEvent::Message(raw)) => {
                match self
                    .reconciler
                    .apply_message(&self.list_id, self.requester.as_ref(), &raw)
                    .await
                {
                    Ok(snapshot) => Some(snapshot),
                    Err(ListError::Validation(e)) => {
                        warn!("Dropping invalid batch on list {}: {}", self.list_id, e);
                        None
                    }
                    Err(ListError::NotFound) => {
                        warn!("Dropping batch for list {}: not visible to {:?}", self.list_id, self.requester);
                        None
                    }
                    Err(e) => {
                        // Closing makes the peer reconnect and resend the batch
                        error!("Failed to apply batch on list {}, closing: {}", self.list_id, e);
                        self.close();
                        None
                    }
                }
            }
            (ConnectionState::Open, LiveEvent::StoreChanged) => {
                self.notifier.snapshot_for(&self.list_id, self.requester.as_ref()).await
            }
            (_, LiveEvent::Closed) => {
                self.close();
                None
            }
            (_, LiveEvent::TransportError(e)) => {
                warn!("Transport error on list {}: {}", self.list_id, e);
                self.close();
                None
            }
            (state, event) => {
                debug!("Ignoring {:?} in state {:?}", event, state);
                None
            }
        }
    }

    /// Wait for the next change to this session's list. Never resolves
    /// while the session has no subscription, so it can sit in a `select!`
    /// alongside the transport.
    pub async fn next_change(&mut self) -> Option<Versionstamp> {
        match self.subscription.as_mut() {
            Some(subscription) => subscription.changed().await,
            None => std::future::pending().await,
        }
    }

    fn close(&mut self) {
        if self.state != ConnectionState::Closed {
            debug!("Live session on list {} closed", self.list_id);
        }
        self.subscription = None;
        self.state = ConnectionState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{keys, ListRepository};
    use crate::store::MemoryStore;
    use std::time::Duration;

    async fn setup() -> (Arc<MemoryStore>, Arc<Reconciler<MemoryStore>>, ListId, SessionId) {
        let store = Arc::new(MemoryStore::new());
        let repo = Arc::new(ListRepository::new(store.clone()));
        let owner = SessionId::new("alice");
        let list_id = repo.create_list(&owner).await.unwrap();
        (store, Arc::new(Reconciler::new(repo, 0)), list_id, owner)
    }

    #[tokio::test]
    async fn test_open_subscribes_and_pushes_initial_snapshot() {
        let (store, reconciler, list_id, owner) = setup().await;
        let mut session = LiveSession::new(list_id.clone(), Some(owner), reconciler);
        assert_eq!(session.state(), ConnectionState::Connecting);

        let initial = session.dispatch(LiveEvent::Opened).await;
        assert!(initial.is_some());
        assert_eq!(session.state(), ConnectionState::Open);
        assert_eq!(store.watcher_count(&keys::updated(&list_id)), 1);
    }

    #[tokio::test]
    async fn test_message_before_open_is_ignored() {
        let (_store, reconciler, list_id, owner) = setup().await;
        let mut session = LiveSession::new(list_id, Some(owner), reconciler);
        let raw = r#"[{"id":"a","text":"x","completed":false}]"#.to_string();
        assert!(session.dispatch(LiveEvent::Message(raw)).await.is_none());
    }

    #[tokio::test]
    async fn test_message_returns_fresh_snapshot() {
        let (_store, reconciler, list_id, owner) = setup().await;
        let mut session = LiveSession::new(list_id, Some(owner), reconciler);
        session.dispatch(LiveEvent::Opened).await;

        let raw = r#"[{"id":"a","text":"buy milk","completed":false}]"#.to_string();
        let snapshot = session.dispatch(LiveEvent::Message(raw)).await.unwrap();
        assert_eq!(snapshot.items[0].text, "buy milk");

        // Malformed input is dropped without closing the session
        assert!(session.dispatch(LiveEvent::Message("{nope".into())).await.is_none());
        assert_eq!(session.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_write_from_other_session_is_pushed() {
        let (_store, reconciler, list_id, owner) = setup().await;
        let mut watcher = LiveSession::new(list_id.clone(), Some(owner.clone()), reconciler.clone());
        let mut writer = LiveSession::new(list_id, Some(owner), reconciler);
        watcher.dispatch(LiveEvent::Opened).await;
        writer.dispatch(LiveEvent::Opened).await;

        let raw = r#"[{"id":"a","text":"from writer","completed":false}]"#.to_string();
        writer.dispatch(LiveEvent::Message(raw)).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), watcher.next_change())
            .await
            .unwrap()
            .unwrap();
        let pushed = watcher.dispatch(LiveEvent::StoreChanged).await.unwrap();
        assert_eq!(pushed.items[0].text, "from writer");
    }

    #[tokio::test]
    async fn test_close_releases_subscription() {
        let (store, reconciler, list_id, owner) = setup().await;
        let mut session = LiveSession::new(list_id.clone(), Some(owner), reconciler);
        session.dispatch(LiveEvent::Opened).await;

        session.dispatch(LiveEvent::TransportError("reset".into())).await;
        assert_eq!(session.state(), ConnectionState::Closed);
        assert!(!session.is_subscribed());
        assert_eq!(store.watcher_count(&keys::updated(&list_id)), 0);

        // Nothing is pushed after close
        assert!(session.dispatch(LiveEvent::StoreChanged).await.is_none());
        let pending = tokio::time::timeout(Duration::from_millis(20), session.next_change()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_failed_commit_closes_session() {
        let (store, reconciler, list_id, owner) = setup().await;
        let mut session = LiveSession::new(list_id.clone(), Some(owner.clone()), reconciler.clone());
        session.dispatch(LiveEvent::Opened).await;

        store.inject_commit_failures(1);
        let raw = r#"[{"id":"a","text":"lost?","completed":false}]"#.to_string();
        assert!(session.dispatch(LiveEvent::Message(raw)).await.is_none());
        assert_eq!(session.state(), ConnectionState::Closed);
        assert_eq!(store.watcher_count(&keys::updated(&list_id)), 0);

        let snapshot = reconciler
            .repository()
            .load_list(&list_id, crate::store::Consistency::Strong, Some(&owner))
            .await
            .unwrap();
        assert!(snapshot.items.is_empty());
    }

    #[tokio::test]
    async fn test_hidden_list_pushes_nothing() {
        let (_store, reconciler, list_id, _owner) = setup().await;
        let mut session = LiveSession::new(list_id, Some(SessionId::new("bob")), reconciler);
        assert!(session.dispatch(LiveEvent::Opened).await.is_none());

        let raw = r#"[{"id":"a","text":"x","completed":false}]"#.to_string();
        assert!(session.dispatch(LiveEvent::Message(raw)).await.is_none());
    }
}
