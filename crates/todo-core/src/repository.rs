//! List repository: the only code that knows the key layout.
//!
//! Key layout:
//! - `["list_meta", listId]` -> `ListMeta`
//! - `["list", listId, itemId]` -> `StoredItem`
//! - `["list_updated", listId]` -> `true`, rewritten by every list write
//! - `["user_lists", ownerId, listId]` -> `IndexEntry`
//!
//! Every write to a list's items or metadata also sets its updated marker in
//! the same atomic operation, which is what change watchers subscribe to.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{ListError, Result};
use crate::ids::{ItemId, ListId, SessionId};
use crate::model::{
    now_millis, IndexEntry, ListItem, ListMeta, ListSummary, MutationBatch, Snapshot, StoredItem,
};
use crate::store::{
    AtomicOperation, CommitResult, Consistency, Key, KvStore, ListOptions, StoreError, Versionstamp,
};

/// Attempts at minting an unused list id before giving up.
const MAX_CREATE_ATTEMPTS: u32 = 3;

/// Attempts at a privacy toggle when racing other metadata writers.
const MAX_TOGGLE_ATTEMPTS: u32 = 5;

pub mod keys {
    use crate::ids::{ItemId, ListId, SessionId};
    use crate::store::Key;

    pub fn meta(list_id: &ListId) -> Key {
        Key::new(["list_meta", list_id.as_str()])
    }

    pub fn items(list_id: &ListId) -> Key {
        Key::new(["list", list_id.as_str()])
    }

    pub fn item(list_id: &ListId, item_id: &ItemId) -> Key {
        Key::new(["list", list_id.as_str(), item_id.as_str()])
    }

    pub fn updated(list_id: &ListId) -> Key {
        Key::new(["list_updated", list_id.as_str()])
    }

    pub fn user_lists(owner: &SessionId) -> Key {
        Key::new(["user_lists", owner.as_str()])
    }

    pub fn user_list(owner: &SessionId, list_id: &ListId) -> Key {
        Key::new(["user_lists", owner.as_str(), list_id.as_str()])
    }
}

fn decode<T: DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| StoreError::from(e).into())
}

fn encode<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| StoreError::from(e).into())
}

pub struct ListRepository<S> {
    store: Arc<S>,
}

impl<S: KvStore> ListRepository<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Create an empty private list owned by `owner`.
    pub async fn create_list(&self, owner: &SessionId) -> Result<ListId> {
        for _ in 0..MAX_CREATE_ATTEMPTS {
            let list_id = ListId::generate();
            let meta = ListMeta {
                owner_id: owner.clone(),
                is_public: false,
                created_at: now_millis(),
            };
            let index = IndexEntry {
                created_at: meta.created_at,
                is_public: meta.is_public,
            };

            let mut op = AtomicOperation::new();
            op.check(keys::meta(&list_id), None)
                .set(keys::meta(&list_id), encode(&meta)?)
                .set(keys::user_list(owner, &list_id), encode(&index)?)
                .set(keys::updated(&list_id), json!(true));

            match self.store.commit(op).await? {
                CommitResult::Committed(_) => {
                    info!("Created list {} for {}", list_id, owner);
                    return Ok(list_id);
                }
                CommitResult::CheckFailed => {
                    warn!("List ID collision on {}, generating another", list_id);
                }
            }
        }
        Err(ListError::Contention(MAX_CREATE_ATTEMPTS))
    }

    /// Read a list's metadata and its stamp, without any access check.
    pub async fn get_list_meta(
        &self,
        list_id: &ListId,
        consistency: Consistency,
    ) -> Result<Option<(ListMeta, Versionstamp)>> {
        match self.store.get(&keys::meta(list_id), consistency).await? {
            Some(entry) => Ok(Some((decode(entry.value)?, entry.versionstamp))),
            None => Ok(None),
        }
    }

    /// Metadata of a list the requester may see, with its stamp. Missing and
    /// hidden lists both come back as `NotFound`.
    pub async fn visible_meta(
        &self,
        list_id: &ListId,
        consistency: Consistency,
        requester: Option<&SessionId>,
    ) -> Result<(ListMeta, Versionstamp)> {
        match self.get_list_meta(list_id, consistency).await? {
            Some((meta, versionstamp)) if meta.is_visible_to(requester) => Ok((meta, versionstamp)),
            Some(_) => {
                debug!("List {} hidden from {:?}", list_id, requester);
                Err(ListError::NotFound)
            }
            None => Err(ListError::NotFound),
        }
    }

    /// Load a snapshot of a list: metadata plus every item, newest key first.
    pub async fn load_list(
        &self,
        list_id: &ListId,
        consistency: Consistency,
        requester: Option<&SessionId>,
    ) -> Result<Snapshot> {
        let (meta, _) = self.visible_meta(list_id, consistency, requester).await?;

        let options = ListOptions {
            reverse: true,
            consistency,
            limit: None,
        };
        let entries = self.store.list(&keys::items(list_id), options).await?;

        let mut items = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(id) = entry.key.last().and_then(|part| part.parse::<ItemId>().ok()) else {
                warn!("Skipping item with unusable key {}", entry.key);
                continue;
            };
            let stored: StoredItem = decode(entry.value)?;
            items.push(ListItem::from_stored(id, entry.versionstamp, stored));
        }

        Ok(Snapshot {
            owner_id: meta.owner_id,
            is_public: meta.is_public,
            items,
        })
    }

    /// Apply a batch of mutations to a list in one atomic operation.
    ///
    /// Creation time of existing items is preserved and `updatedAt` is set to
    /// now; `text: None` deletes the item. Does not check that the list
    /// exists or who is writing; callers do, see `write_items_if_meta`.
    pub async fn write_items(&self, list_id: &ListId, batch: &MutationBatch) -> Result<Versionstamp> {
        match self.commit_items(list_id, batch, None).await? {
            CommitResult::Committed(versionstamp) => Ok(versionstamp),
            // No checks were attached, so the store should never report this
            CommitResult::CheckFailed => Err(ListError::Contention(1)),
        }
    }

    /// Like `write_items`, but only commits if the list metadata still has
    /// the stamp `meta_versionstamp` it had when access was checked. Returns
    /// `None` and writes nothing if the metadata changed in between.
    pub async fn write_items_if_meta(
        &self,
        list_id: &ListId,
        batch: &MutationBatch,
        meta_versionstamp: Versionstamp,
    ) -> Result<Option<Versionstamp>> {
        match self.commit_items(list_id, batch, Some(meta_versionstamp)).await? {
            CommitResult::Committed(versionstamp) => Ok(Some(versionstamp)),
            CommitResult::CheckFailed => {
                debug!("Metadata of list {} changed under a write", list_id);
                Ok(None)
            }
        }
    }

    async fn commit_items(
        &self,
        list_id: &ListId,
        batch: &MutationBatch,
        meta_versionstamp: Option<Versionstamp>,
    ) -> Result<CommitResult> {
        let item_keys: Vec<Key> = batch.iter().map(|m| keys::item(list_id, &m.id)).collect();
        let current = self.store.get_many(&item_keys, Consistency::Strong).await?;
        let now = now_millis();

        let mut op = AtomicOperation::new();
        if let Some(expected) = meta_versionstamp {
            op.check(keys::meta(list_id), Some(expected));
        }
        for ((mutation, key), existing) in batch.iter().zip(item_keys).zip(current) {
            let Some(text) = &mutation.text else {
                op.delete(key);
                continue;
            };
            let created_at = match existing {
                Some(entry) => decode::<StoredItem>(entry.value)?.created_at,
                None => now,
            };
            let item = StoredItem {
                text: text.clone(),
                completed: mutation.completed,
                created_at,
                updated_at: now,
            };
            op.set(key, encode(&item)?);
        }
        op.set(keys::updated(list_id), json!(true));

        let result = self.store.commit(op).await?;
        if let CommitResult::Committed(versionstamp) = result {
            debug!("Wrote {} mutations to list {} at {}", batch.len(), list_id, versionstamp);
        }
        Ok(result)
    }

    /// Flip a list between private and public. Only the owner may do this;
    /// for anyone else, or a missing list, returns `false` and writes nothing.
    pub async fn toggle_list_privacy(&self, list_id: &ListId, requester: &SessionId) -> Result<bool> {
        for attempt in 1..=MAX_TOGGLE_ATTEMPTS {
            let Some((meta, versionstamp)) = self.get_list_meta(list_id, Consistency::Strong).await? else {
                debug!("Privacy toggle on missing list {}", list_id);
                return Ok(false);
            };
            if &meta.owner_id != requester {
                warn!("{} tried to toggle privacy of list {} they do not own", requester, list_id);
                return Ok(false);
            }

            let toggled = ListMeta {
                is_public: !meta.is_public,
                ..meta
            };
            let index = IndexEntry {
                created_at: toggled.created_at,
                is_public: toggled.is_public,
            };

            let mut op = AtomicOperation::new();
            op.check(keys::meta(list_id), Some(versionstamp))
                .set(keys::meta(list_id), encode(&toggled)?)
                .set(keys::user_list(&toggled.owner_id, list_id), encode(&index)?)
                .set(keys::updated(list_id), json!(true));

            if self.store.commit(op).await?.is_committed() {
                info!("List {} is now {}", list_id, if toggled.is_public { "public" } else { "private" });
                return Ok(true);
            }
            debug!("Privacy toggle on {} raced another write (attempt {})", list_id, attempt);
        }
        Err(ListError::Contention(MAX_TOGGLE_ATTEMPTS))
    }

    /// Every list owned by `owner`, newest first.
    pub async fn get_user_lists(&self, owner: &SessionId) -> Result<Vec<ListSummary>> {
        let entries = self
            .store
            .list(&keys::user_lists(owner), ListOptions::default())
            .await?;

        let mut lists = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(id) = entry.key.last().and_then(|part| part.parse::<ListId>().ok()) else {
                warn!("Skipping history entry with unusable key {}", entry.key);
                continue;
            };
            let index: IndexEntry = decode(entry.value)?;
            lists.push(ListSummary {
                id,
                created_at: index.created_at,
                is_public: index.is_public,
            });
        }
        lists.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(lists)
    }
}
