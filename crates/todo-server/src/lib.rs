//! todo-server library: exposes the router and its parts for the binary
//! and for integration tests.

pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod ws;

pub use app::{router, AppState};
pub use auth::{Authenticator, Profile, StoreAuthenticator};
pub use config::Config;
pub use error::AppError;
