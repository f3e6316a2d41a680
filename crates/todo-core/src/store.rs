//! Key-value store abstraction backing the list repository.
//!
//! The store is ordered by key, hands out a versionstamp for every committed
//! write, applies multi-key operations atomically (optionally guarded by
//! versionstamp checks), and notifies watchers of writes to a key.
//!
//! Implementations:
//! - `MemoryStore` - ordered in-process map, optionally persisted to a JSON
//!   file between `open` and `close`

use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The commit did not go through; nothing was written. Safe to retry.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store is closed")]
    Closed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A hierarchical key, compared part by part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(Vec<String>);

impl Key {
    pub fn new<I, P>(parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// Last part of the key (the item id for item keys).
    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn starts_with(&self, prefix: &Key) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

/// Monotonic commit stamp. Every entry written by a commit carries that
/// commit's stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Versionstamp(u64);

impl Versionstamp {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for Versionstamp {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl Display for Versionstamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:020x}", self.0)
    }
}

impl FromStr for Versionstamp {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        u64::from_str_radix(s, 16).map(Self)
    }
}

// Serialized as the hex string so it round-trips through JSON clients unchanged
impl Serialize for Versionstamp {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Versionstamp {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Read consistency.
///
/// `Eventual` reads may be served from a replica and lag behind the latest
/// commit; `Strong` reads always observe it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consistency {
    Strong,
    #[default]
    Eventual,
}

impl FromStr for Consistency {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "strong" => Ok(Self::Strong),
            "eventual" => Ok(Self::Eventual),
            other => Err(format!("unknown consistency level: {}", other)),
        }
    }
}

/// A stored value together with its key and stamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub key: Key,
    pub value: serde_json::Value,
    pub versionstamp: Versionstamp,
}

/// Options for prefix listing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    /// Enumerate in descending key order.
    pub reverse: bool,
    pub consistency: Consistency,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum KvMutation {
    Set(Key, serde_json::Value),
    Delete(Key),
}

impl KvMutation {
    pub fn key(&self) -> &Key {
        match self {
            KvMutation::Set(key, _) | KvMutation::Delete(key) => key,
        }
    }
}

/// A set of writes committed all-or-nothing.
///
/// Checks pin a key to an expected versionstamp (`None` = must not exist);
/// if any check fails nothing is written. Mutations apply in the order they
/// were added, so a later write to the same key wins.
#[derive(Debug, Clone, Default)]
pub struct AtomicOperation {
    checks: Vec<(Key, Option<Versionstamp>)>,
    mutations: Vec<KvMutation>,
}

impl AtomicOperation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, key: Key, versionstamp: Option<Versionstamp>) -> &mut Self {
        self.checks.push((key, versionstamp));
        self
    }

    pub fn set(&mut self, key: Key, value: serde_json::Value) -> &mut Self {
        self.mutations.push(KvMutation::Set(key, value));
        self
    }

    pub fn delete(&mut self, key: Key) -> &mut Self {
        self.mutations.push(KvMutation::Delete(key));
        self
    }

    pub fn checks(&self) -> &[(Key, Option<Versionstamp>)] {
        &self.checks
    }

    pub fn mutations(&self) -> &[KvMutation] {
        &self.mutations
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitResult {
    Committed(Versionstamp),
    /// A check did not match; nothing was written.
    CheckFailed,
}

impl CommitResult {
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitResult::Committed(_))
    }
}

/// Ordered, transactional key-value store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read several keys at one point in time.
    async fn get_many(&self, keys: &[Key], consistency: Consistency) -> Result<Vec<Option<Entry>>>;

    async fn get(&self, key: &Key, consistency: Consistency) -> Result<Option<Entry>> {
        let mut entries = self.get_many(std::slice::from_ref(key), consistency).await?;
        Ok(entries.pop().flatten())
    }

    /// List all entries whose key starts with `prefix`, in key order.
    async fn list(&self, prefix: &Key, options: ListOptions) -> Result<Vec<Entry>>;

    /// Commit an atomic operation.
    async fn commit(&self, op: AtomicOperation) -> Result<CommitResult>;

    /// Watch a key. The returned handle yields once per commit that writes
    /// (sets or deletes) the key; dropping it unsubscribes.
    fn watch(&self, key: &Key) -> Watch;
}

// ============================================================================
// Watches
// ============================================================================

type WatcherList = Vec<(usize, mpsc::UnboundedSender<Versionstamp>)>;

#[derive(Default)]
struct WatchRegistry {
    watchers: RwLock<HashMap<Key, WatcherList>>,
    next_id: AtomicUsize,
}

impl WatchRegistry {
    fn subscribe(self: &Arc<Self>, key: &Key) -> Watch {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.watchers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key.clone())
            .or_default()
            .push((id, tx));
        Watch {
            rx,
            _subscription: Subscription {
                registry: Arc::downgrade(self),
                key: key.clone(),
                id,
            },
        }
    }

    fn unsubscribe(&self, key: &Key, id: usize) {
        let mut watchers = self.watchers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = watchers.get_mut(key) {
            list.retain(|(i, _)| *i != id);
            if list.is_empty() {
                watchers.remove(key);
            }
        }
    }

    fn notify(&self, key: &Key, versionstamp: Versionstamp) {
        let watchers = self.watchers.read().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = watchers.get(key) {
            for (_, tx) in list {
                // A closed receiver is cleaned up when its Subscription drops
                let _ = tx.send(versionstamp);
            }
        }
    }

    fn count(&self, key: &Key) -> usize {
        self.watchers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map_or(0, Vec::len)
    }
}

/// Unsubscribes its watch when dropped.
struct Subscription {
    registry: Weak<WatchRegistry>,
    key: Key,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(&self.key, self.id);
        }
    }
}

/// Change notifications for one key.
pub struct Watch {
    rx: mpsc::UnboundedReceiver<Versionstamp>,
    _subscription: Subscription,
}

impl Watch {
    /// Wait for the next write to the watched key.
    ///
    /// Notifications that queued up while the caller was busy are coalesced;
    /// the newest stamp is returned. Returns `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<Versionstamp> {
        let mut latest = self.rx.recv().await?;
        while let Ok(next) = self.rx.try_recv() {
            latest = next;
        }
        Some(latest)
    }
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredValue {
    value: serde_json::Value,
    versionstamp: Versionstamp,
}

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<Key, StoredValue>,
    last_versionstamp: u64,
}

/// On-disk form of a `MemoryStore`.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStore {
    last_versionstamp: u64,
    entries: Vec<(Key, StoredValue)>,
}

/// Ordered in-memory store.
///
/// A single node, so every read is strongly consistent regardless of the
/// requested level. Commits serialize on one write lock. When opened with a
/// path, contents are loaded at `open` and written back at `flush`/`close`.
pub struct MemoryStore {
    state: RwLock<State>,
    watchers: Arc<WatchRegistry>,
    path: Option<PathBuf>,
    closed: AtomicBool,
    /// Commits left to fail with `StoreError::Unavailable`
    injected_failures: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store with no backing file.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            watchers: Arc::new(WatchRegistry::default()),
            path: None,
            closed: AtomicBool::new(false),
            injected_failures: AtomicUsize::new(0),
        }
    }

    /// Open a store, loading previous contents from `path` if it exists.
    pub fn open(path: Option<&Path>) -> Result<Self> {
        let mut store = Self::new();
        let Some(path) = path else {
            return Ok(store);
        };

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let persisted: PersistedStore = serde_json::from_str(&content)?;
            let state = store.state.get_mut().unwrap_or_else(|e| e.into_inner());
            state.last_versionstamp = persisted.last_versionstamp;
            state.entries = persisted.entries.into_iter().collect();
            tracing::info!("Loaded {} store entries from {:?}", state.entries.len(), path);
        } else {
            tracing::info!("No store file at {:?}, starting empty", path);
        }
        store.path = Some(path.to_path_buf());
        Ok(store)
    }

    /// Write the current contents to the backing file, if any.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let persisted = {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            PersistedStore {
                last_versionstamp: state.last_versionstamp,
                entries: state
                    .entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            }
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string(&persisted)?)?;
        tracing::debug!("Flushed {} store entries to {:?}", persisted.entries.len(), path);
        Ok(())
    }

    /// Flush and refuse further operations.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.flush()?;
        tracing::info!("Store closed");
        Ok(())
    }

    /// Make the next `n` commits fail as if the backend were unreachable.
    pub fn inject_commit_failures(&self, n: usize) {
        self.injected_failures.store(n, Ordering::SeqCst);
    }

    /// Number of live watches on a key.
    pub fn watcher_count(&self, key: &Key) -> usize {
        self.watchers.count(key)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn take_injected_failure(&self) -> bool {
        self.injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get_many(&self, keys: &[Key], _consistency: Consistency) -> Result<Vec<Option<Entry>>> {
        self.ensure_open()?;
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        Ok(keys
            .iter()
            .map(|key| {
                state.entries.get(key).map(|stored| Entry {
                    key: key.clone(),
                    value: stored.value.clone(),
                    versionstamp: stored.versionstamp,
                })
            })
            .collect())
    }

    async fn list(&self, prefix: &Key, options: ListOptions) -> Result<Vec<Entry>> {
        self.ensure_open()?;
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());

        // Keys sharing a prefix are contiguous in part-wise order
        let matching = state
            .entries
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| key.parts().len() > prefix.parts().len());

        let to_entry = |(key, stored): (&Key, &StoredValue)| Entry {
            key: key.clone(),
            value: stored.value.clone(),
            versionstamp: stored.versionstamp,
        };
        let limit = options.limit.unwrap_or(usize::MAX);

        let entries = if options.reverse {
            let mut all: Vec<_> = matching.map(to_entry).collect();
            all.reverse();
            all.truncate(limit);
            all
        } else {
            matching.take(limit).map(to_entry).collect()
        };
        Ok(entries)
    }

    async fn commit(&self, op: AtomicOperation) -> Result<CommitResult> {
        self.ensure_open()?;
        if self.take_injected_failure() {
            return Err(StoreError::Unavailable("injected commit failure".into()));
        }

        let (versionstamp, mut touched) = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());

            for (key, expected) in &op.checks {
                let actual = state.entries.get(key).map(|stored| stored.versionstamp);
                if actual != *expected {
                    tracing::debug!("Check failed on {}: expected {:?}, found {:?}", key, expected, actual);
                    return Ok(CommitResult::CheckFailed);
                }
            }

            state.last_versionstamp += 1;
            let versionstamp = Versionstamp(state.last_versionstamp);
            let mut touched = Vec::with_capacity(op.mutations.len());

            for mutation in op.mutations {
                match mutation {
                    KvMutation::Set(key, value) => {
                        state.entries.insert(key.clone(), StoredValue { value, versionstamp });
                        touched.push(key);
                    }
                    KvMutation::Delete(key) => {
                        state.entries.remove(&key);
                        touched.push(key);
                    }
                }
            }
            (versionstamp, touched)
        };

        // Notify outside the state lock so watchers can read immediately
        touched.sort();
        touched.dedup();
        for key in &touched {
            self.watchers.notify(key, versionstamp);
        }

        Ok(CommitResult::Committed(versionstamp))
    }

    fn watch(&self, key: &Key) -> Watch {
        self.watchers.subscribe(key)
    }
}
