//! todo-core: shared library for real-time todo list sync.
//!
//! This crate provides:
//! - An ordered, transactional key-value store abstraction with watches
//! - The list repository (snapshots, batched item writes, privacy, history)
//! - The mutation reconciler and change fan-out used by live connections
//! - The client-side sync agent that coalesces and flushes local edits

pub mod agent;
pub mod error;
pub mod ids;
pub mod model;
pub mod notifier;
pub mod reconcile;
pub mod repository;
pub mod session;
pub mod store;

pub use agent::SyncAgent;
pub use error::{AgentError, ListError};
pub use ids::{IdError, ItemId, ListId, SessionId};
pub use model::{
    BatchError, HistoryPage, ListItem, ListMeta, ListSummary, Mutation, MutationBatch, Snapshot,
};
pub use notifier::{ChangeNotifier, ListSubscription};
pub use reconcile::Reconciler;
pub use repository::ListRepository;
pub use session::{ConnectionState, LiveEvent, LiveSession};
pub use store::{Consistency, KvStore, MemoryStore, StoreError, Versionstamp};
