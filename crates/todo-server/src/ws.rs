//! WebSocket driver for live list sessions.
//!
//! Translates socket frames and store notifications into `LiveEvent`s for
//! the connection's `LiveSession` and writes back every snapshot it returns.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use todo_core::{ConnectionState, KvStore, ListId, LiveEvent, LiveSession, Reconciler, SessionId, Snapshot};
use tracing::{debug, error, info};

async fn send_snapshot(sink: &mut SplitSink<WebSocket, Message>, snapshot: &Snapshot) -> Result<(), String> {
    let json = serde_json::to_string(snapshot).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json.into())).await.map_err(|e| e.to_string())
}

/// Run one live connection until either side goes away.
pub async fn serve_socket<S: KvStore + 'static>(
    socket: WebSocket,
    list_id: ListId,
    requester: Option<SessionId>,
    reconciler: Arc<Reconciler<S>>,
) {
    let mut session = LiveSession::new(list_id.clone(), requester, reconciler);
    let (mut sink, mut stream) = socket.split();

    let mut event = LiveEvent::Opened;
    loop {
        if let Some(snapshot) = session.dispatch(event).await {
            debug!("Pushing {} items on list {}", snapshot.items.len(), list_id);
            if let Err(e) = send_snapshot(&mut sink, &snapshot).await {
                error!("Failed to push snapshot on list {}: {}", list_id, e);
                session.dispatch(LiveEvent::TransportError(e)).await;
                break;
            }
        }
        if session.state() == ConnectionState::Closed {
            break;
        }

        event = loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => break LiveEvent::Message(text.as_str().to_owned()),
                    Some(Ok(Message::Close(_))) | None => break LiveEvent::Closed,
                    Some(Ok(Message::Binary(data))) => {
                        debug!("Ignoring {} byte binary frame on list {}", data.len(), list_id);
                    }
                    // Ping/pong are answered by the protocol layer
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break LiveEvent::TransportError(e.to_string()),
                },
                changed = session.next_change() => match changed {
                    Some(_) => break LiveEvent::StoreChanged,
                    None => break LiveEvent::TransportError("store subscription ended".to_string()),
                },
            }
        };
    }

    let _ = sink.close().await;
    info!("Live socket on list {} closed", list_id);
}
