//! todo-client library: sync client loop, reconnect backoff and command
//! parsing, exposed for the binary and integration tests.

pub mod backoff;
pub mod client;
pub mod command;
pub mod error;

pub use backoff::{calculate_backoff, jittered_backoff, ReconnectConfig, ReconnectState};
pub use client::{ClientConfig, ClientEvent, ClientHandle, SyncClient};
pub use command::{render, ClientCommand, CommandError};
pub use error::ClientError;
