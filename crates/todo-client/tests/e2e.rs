//! End-to-end tests for the sync client against an in-process server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use todo_client::{ClientCommand, ClientConfig, ClientError, ClientEvent, ReconnectConfig, SyncClient};
use todo_core::{ItemId, ListId, ListRepository, MemoryStore, SessionId, Snapshot};
use todo_server::{router, AppState, Config, Profile, StoreAuthenticator};

// ============================================================================
// Helpers
// ============================================================================

struct TestServer {
    store: Arc<MemoryStore>,
    owner: SessionId,
    list_id: ListId,
}

impl TestServer {
    /// Store with one signed-up user owning one list.
    async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let owner = SessionId::new("session-alice");
        let auth = StoreAuthenticator::new(Arc::clone(&store), "session");
        auth.register_profile(
            &owner,
            &Profile {
                name: Some("alice".into()),
                email: None,
            },
        )
        .await
        .unwrap();
        let list_id = ListRepository::new(Arc::clone(&store))
            .create_list(&owner)
            .await
            .unwrap();
        Self { store, owner, list_id }
    }

    async fn serve_on(&self, listener: tokio::net::TcpListener) {
        let auth = Arc::new(StoreAuthenticator::new(Arc::clone(&self.store), "session"));
        let state = Arc::new(AppState::new(Config::default(), Arc::clone(&self.store), auth));
        let app = router(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
    }

    async fn serve(&self) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        self.serve_on(listener).await;
        addr
    }

    fn config(&self, addr: SocketAddr) -> ClientConfig {
        let mut config = ClientConfig::new(format!("ws://{}/lists/{}", addr, self.list_id));
        config.session = Some(self.owner.to_string());
        config.flush_interval = Duration::from_millis(20);
        config.reconnect = ReconnectConfig {
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            ..Default::default()
        };
        config
    }
}

struct TestClient {
    commands: mpsc::UnboundedSender<ClientCommand>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    task: JoinHandle<Result<(), ClientError>>,
}

impl TestClient {
    fn start(config: ClientConfig) -> Self {
        let (client, handle) = SyncClient::new(config);
        Self {
            commands: handle.commands,
            events: handle.events,
            task: tokio::spawn(client.run()),
        }
    }

    fn send(&self, command: ClientCommand) {
        self.commands.send(command).unwrap();
    }

    async fn add(&mut self, text: &str) -> ItemId {
        self.send(ClientCommand::Add(text.to_string()));
        let event = self.next_event(|e| matches!(e, ClientEvent::Added(_))).await;
        match event {
            ClientEvent::Added(id) => id,
            other => panic!("unexpected event {:?}", other),
        }
    }

    async fn next_event(&mut self, predicate: impl Fn(&ClientEvent) -> bool) -> ClientEvent {
        timeout(Duration::from_secs(3), async {
            loop {
                let event = self.events.recv().await.expect("client stopped");
                if predicate(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("Timeout waiting for client event")
    }

    async fn snapshot_where(&mut self, predicate: impl Fn(&Snapshot) -> bool) -> Snapshot {
        let event = self
            .next_event(|e| matches!(e, ClientEvent::Snapshot(s) if predicate(s)))
            .await;
        match event {
            ClientEvent::Snapshot(snapshot) => snapshot,
            other => panic!("unexpected event {:?}", other),
        }
    }

    async fn shutdown(self) {
        drop(self.commands);
        timeout(Duration::from_secs(3), self.task)
            .await
            .expect("client did not stop")
            .unwrap()
            .unwrap();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_edits_round_trip_through_server() {
    let server = TestServer::new().await;
    let addr = server.serve().await;
    let mut client = TestClient::start(server.config(addr));
    client.next_event(|e| matches!(e, ClientEvent::Connected)).await;

    let id = client.add("buy milk").await;
    let snapshot = client.snapshot_where(|s| s.items.len() == 1).await;
    assert_eq!(snapshot.items[0].id, id);
    assert!(!snapshot.items[0].completed);

    client.send(ClientCommand::Toggle(id.clone()));
    client.snapshot_where(|s| s.item(&id).is_some_and(|i| i.completed)).await;

    client.send(ClientCommand::Delete(id));
    client.snapshot_where(|s| s.items.is_empty()).await;

    client.send(ClientCommand::Show);
    let state = client.next_event(|e| matches!(e, ClientEvent::State { .. })).await;
    assert!(matches!(state, ClientEvent::State { busy: false, .. }));

    client.shutdown().await;
}

#[tokio::test]
async fn test_two_clients_converge() {
    let server = TestServer::new().await;
    let addr = server.serve().await;
    let mut first = TestClient::start(server.config(addr));
    let mut second = TestClient::start(server.config(addr));
    first.next_event(|e| matches!(e, ClientEvent::Connected)).await;
    second.next_event(|e| matches!(e, ClientEvent::Connected)).await;

    first.add("from first").await;
    second.add("from second").await;

    let a = first.snapshot_where(|s| s.items.len() == 2).await;
    let b = second.snapshot_where(|s| s.items.len() == 2).await;
    let mut texts: Vec<_> = a.items.iter().map(|i| i.text.clone()).collect();
    texts.sort();
    assert_eq!(texts, ["from first", "from second"]);
    assert_eq!(a.items.len(), b.items.len());

    first.shutdown().await;
    second.shutdown().await;
}

#[tokio::test]
async fn test_unknown_item_edit_is_rejected_locally() {
    let server = TestServer::new().await;
    let addr = server.serve().await;
    let mut client = TestClient::start(server.config(addr));
    client.next_event(|e| matches!(e, ClientEvent::Connected)).await;

    client.send(ClientCommand::Toggle("ghost".parse().unwrap()));
    let event = client.next_event(|e| matches!(e, ClientEvent::CommandFailed(_))).await;
    assert!(matches!(event, ClientEvent::CommandFailed(_)));

    client.shutdown().await;
}

#[tokio::test]
async fn test_offline_edits_sync_after_server_comes_up() {
    let server = TestServer::new().await;

    // Reserve a port, then start the client before anything listens on it
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut client = TestClient::start(server.config(addr));
    client.next_event(|e| matches!(e, ClientEvent::Disconnected(_))).await;
    let id = client.add("written offline").await;

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    server.serve_on(listener).await;

    let snapshot = client.snapshot_where(|s| s.item(&id).is_some()).await;
    assert_eq!(snapshot.item(&id).unwrap().text, "written offline");

    client.shutdown().await;
}

#[tokio::test]
async fn test_batch_resent_after_server_fails_to_commit() {
    let server = TestServer::new().await;
    let addr = server.serve().await;
    let mut client = TestClient::start(server.config(addr));
    client.next_event(|e| matches!(e, ClientEvent::Connected)).await;

    // Exactly one apply's worth of attempts with the default retry count
    let retries = Config::default().commit_retries as usize;
    server.store.inject_commit_failures(retries + 1);
    let id = client.add("must survive").await;

    client.next_event(|e| matches!(e, ClientEvent::Disconnected(_))).await;
    let snapshot = client.snapshot_where(|s| s.item(&id).is_some()).await;
    assert_eq!(snapshot.item(&id).unwrap().text, "must survive");

    client.send(ClientCommand::Show);
    let state = client.next_event(|e| matches!(e, ClientEvent::State { .. })).await;
    assert!(matches!(state, ClientEvent::State { busy: false, .. }));

    client.shutdown().await;
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let server = TestServer::new().await;
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = server.config(addr);
    config.reconnect.max_attempts = Some(2);
    let client = TestClient::start(config);

    let result = timeout(Duration::from_secs(3), client.task).await.unwrap().unwrap();
    assert!(matches!(result, Err(ClientError::GaveUp(2))));
}
