//! Network loop of the sync client.
//!
//! Owns a `SyncAgent` and a WebSocket to one list. Commands edit the agent
//! immediately; a fixed-interval flush sends pending edits as one batch, and
//! every snapshot the server pushes replaces the agent's data. When the
//! socket drops, unsent and unanswered edits are kept and the client
//! reconnects after a jittered backoff.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::COOKIE, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use todo_core::{AgentError, ItemId, Snapshot, SyncAgent};

use crate::backoff::{ReconnectConfig, ReconnectState};
use crate::command::ClientCommand;
use crate::error::ClientError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the list, e.g. `ws://host:3000/lists/<id>`
    pub url: String,
    pub session: Option<String>,
    pub cookie_name: String,
    pub flush_interval: Duration,
    pub reconnect: ReconnectConfig,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            session: None,
            cookie_name: "session".to_string(),
            flush_interval: Duration::from_secs(1),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// What the client reports back to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    Disconnected(String),
    /// Server pushed a new snapshot
    Snapshot(Snapshot),
    /// An `add` command minted this item id
    Added(ItemId),
    /// Answer to `show`: current data and whether edits are still pending
    State { snapshot: Option<Snapshot>, busy: bool },
    CommandFailed(AgentError),
}

/// Handle for driving a running client.
pub struct ClientHandle {
    pub commands: mpsc::UnboundedSender<ClientCommand>,
    pub events: mpsc::UnboundedReceiver<ClientEvent>,
}

enum Disconnect {
    /// Command channel closed; stop for good
    Shutdown,
    Lost(String),
}

pub struct SyncClient {
    config: ClientConfig,
    agent: SyncAgent,
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    events: mpsc::UnboundedSender<ClientEvent>,
    rng: StdRng,
}

impl SyncClient {
    pub fn new(config: ClientConfig) -> (Self, ClientHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let client = Self {
            config,
            agent: SyncAgent::new(None),
            commands: command_rx,
            events: event_tx,
            rng: StdRng::from_os_rng(),
        };
        let handle = ClientHandle {
            commands: command_tx,
            events: event_rx,
        };
        (client, handle)
    }

    /// Run until the command channel closes or reconnect attempts run out.
    pub async fn run(mut self) -> Result<(), ClientError> {
        let mut reconnect = ReconnectState::new();

        loop {
            match self.connect().await {
                Ok(socket) => {
                    info!("Connected to {}", self.config.url);
                    reconnect.reset();
                    self.emit(ClientEvent::Connected);

                    let outcome = self.drive(socket).await;
                    self.agent.connection_lost();
                    match outcome {
                        Disconnect::Shutdown => return Ok(()),
                        Disconnect::Lost(reason) => {
                            warn!("Connection lost: {}", reason);
                            self.emit(ClientEvent::Disconnected(reason));
                        }
                    }
                }
                Err(ClientError::WebSocket(e)) => {
                    warn!("Failed to connect to {}: {}", self.config.url, e);
                    self.emit(ClientEvent::Disconnected(e.to_string()));
                }
                Err(e) => return Err(e),
            }

            if reconnect.exceeded_max_attempts(&self.config.reconnect) {
                return Err(ClientError::GaveUp(reconnect.attempts));
            }
            let delay = reconnect.next_delay(&self.config.reconnect, &mut self.rng);
            info!("Reconnecting in {:?} (attempt {})", delay, reconnect.attempts);

            // Keep taking edits while offline; they go out after reconnecting
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    command = self.commands.recv() => match command {
                        Some(command) => self.handle_command(command),
                        None => return Ok(()),
                    },
                }
            }
        }
    }

    async fn connect(&self) -> Result<Socket, ClientError> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        if let Some(session) = &self.config.session {
            let cookie = format!("{}={}", self.config.cookie_name, session);
            let value = HeaderValue::from_str(&cookie).map_err(|_| ClientError::InvalidSession)?;
            request.headers_mut().insert(COOKIE, value);
        }
        let (socket, _) = connect_async(request).await?;
        Ok(socket)
    }

    async fn drive(&mut self, socket: Socket) -> Disconnect {
        let (mut sink, mut stream) = socket.split();
        let mut ticker = tokio::time::interval(self.config.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(batch) = self.agent.drain() else {
                        continue;
                    };
                    debug!("Flushing {} mutations", batch.len());
                    if let Err(e) = sink.send(Message::Text(batch.to_json())).await {
                        self.agent.requeue(batch);
                        return Disconnect::Lost(e.to_string());
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<Snapshot>(&text) {
                        Ok(snapshot) => {
                            debug!("Received snapshot with {} items", snapshot.items.len());
                            self.agent.apply_snapshot(snapshot.clone());
                            self.emit(ClientEvent::Snapshot(snapshot));
                        }
                        Err(e) => warn!("Ignoring unparseable push: {}", e),
                    },
                    Some(Ok(Message::Close(_))) | None => return Disconnect::Lost("closed by server".to_string()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Disconnect::Lost(e.to_string()),
                },
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        // Last chance for edits made just before shutdown
                        if let Some(batch) = self.agent.drain() {
                            if let Err(e) = sink.send(Message::Text(batch.to_json())).await {
                                warn!("Final flush failed, {} edits not sent: {}", batch.len(), e);
                            }
                        }
                        let _ = sink.close().await;
                        return Disconnect::Shutdown;
                    }
                },
            }
        }
    }

    fn handle_command(&mut self, command: ClientCommand) {
        let result = match command {
            ClientCommand::Add(text) => {
                let id = self.agent.add(text);
                self.emit(ClientEvent::Added(id));
                Ok(())
            }
            ClientCommand::Edit(id, text) => self.agent.edit_text(&id, text),
            ClientCommand::Toggle(id) => self.agent.toggle_completed(&id).map(|_| ()),
            ClientCommand::Delete(id) => self.agent.delete(&id),
            ClientCommand::Show => {
                self.emit(ClientEvent::State {
                    snapshot: self.agent.data().cloned(),
                    busy: self.agent.is_busy(),
                });
                Ok(())
            }
        };
        if let Err(e) = result {
            self.emit(ClientEvent::CommandFailed(e));
        }
    }

    fn emit(&self, event: ClientEvent) {
        // Nobody listening is fine; the client keeps syncing
        let _ = self.events.send(event);
    }
}
