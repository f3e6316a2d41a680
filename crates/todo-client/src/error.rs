use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid list URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid session id for a cookie header")]
    InvalidSession,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Gave up after {0} reconnect attempts")]
    GaveUp(u32),
}
