//! List, item and mutation types shared by server and clients.
//!
//! Everything here crosses the wire as camelCase JSON.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{ItemId, ListId, SessionId};
use crate::store::Versionstamp;

/// Most mutations accepted in one batch.
pub const MAX_BATCH_LEN: usize = 500;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// List metadata as stored under `["list_meta", listId]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMeta {
    pub owner_id: SessionId,
    pub is_public: bool,
    pub created_at: i64,
}

impl ListMeta {
    /// Private lists are visible to their owner only; public lists to any
    /// resolved session.
    pub fn is_visible_to(&self, requester: Option<&SessionId>) -> bool {
        self.is_public || requester == Some(&self.owner_id)
    }
}

/// Item value as stored under `["list", listId, itemId]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredItem {
    pub text: String,
    pub completed: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Entry in an owner's history index, `["user_lists", ownerId, listId]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub created_at: i64,
    pub is_public: bool,
}

/// One item of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListItem {
    pub id: ItemId,
    pub versionstamp: Versionstamp,
    pub text: String,
    pub completed: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ListItem {
    pub fn from_stored(id: ItemId, versionstamp: Versionstamp, stored: StoredItem) -> Self {
        Self {
            id,
            versionstamp,
            text: stored.text,
            completed: stored.completed,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
        }
    }
}

/// Full state of a list at one point in time. The only shape ever pushed to
/// clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub owner_id: SessionId,
    pub is_public: bool,
    /// Reverse key order, as enumerated by the store
    pub items: Vec<ListItem>,
}

impl Snapshot {
    pub fn item(&self, id: &ItemId) -> Option<&ListItem> {
        self.items.iter().find(|item| &item.id == id)
    }
}

/// A client-proposed change to one item. `text: None` deletes the item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Mutation {
    pub id: ItemId,
    /// Required on the wire, but may be null
    #[serde(deserialize_with = "Option::deserialize")]
    pub text: Option<String>,
    pub completed: bool,
}

impl Mutation {
    pub fn upsert(id: ItemId, text: impl Into<String>, completed: bool) -> Self {
        Self {
            id,
            text: Some(text.into()),
            completed,
        }
    }

    pub fn delete(id: ItemId, completed: bool) -> Self {
        Self {
            id,
            text: None,
            completed,
        }
    }

    pub fn is_delete(&self) -> bool {
        self.text.is_none()
    }
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Malformed batch: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Batch is empty")]
    Empty,

    #[error("Batch has {0} mutations, limit is {MAX_BATCH_LEN}")]
    TooLarge(usize),
}

/// A validated, non-empty sequence of mutations, applied in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MutationBatch(Vec<Mutation>);

impl MutationBatch {
    pub fn new(mutations: Vec<Mutation>) -> Result<Self, BatchError> {
        if mutations.is_empty() {
            return Err(BatchError::Empty);
        }
        if mutations.len() > MAX_BATCH_LEN {
            return Err(BatchError::TooLarge(mutations.len()));
        }
        Ok(Self(mutations))
    }

    /// Parse and validate a JSON array of mutations.
    pub fn parse(raw: &str) -> Result<Self, BatchError> {
        let mutations: Vec<Mutation> = serde_json::from_str(raw)?;
        Self::new(mutations)
    }

    pub fn to_json(&self) -> String {
        // A Vec of plain structs with string keys always serializes
        serde_json::to_string(&self.0).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Mutation> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<Mutation> {
        self.0
    }
}

impl<'a> IntoIterator for &'a MutationBatch {
    type Item = &'a Mutation;
    type IntoIter = std::slice::Iter<'a, Mutation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// One row of an owner's list history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSummary {
    pub id: ListId,
    pub created_at: i64,
    pub is_public: bool,
}

/// A page of list history. Pages are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub page: usize,
    pub total_pages: usize,
    pub lists: Vec<ListSummary>,
}

impl HistoryPage {
    /// Cut one page out of the full history. Out-of-range pages are clamped,
    /// and an empty history still has one (empty) page.
    pub fn paginate(lists: &[ListSummary], page: usize, page_size: usize) -> Self {
        let page_size = page_size.max(1);
        let total_pages = lists.len().div_ceil(page_size).max(1);
        let page = page.clamp(1, total_pages);
        let start = (page - 1) * page_size;
        let lists = lists.iter().skip(start).take(page_size).cloned().collect();
        Self {
            page,
            total_pages,
            lists,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_batch() {
        let raw = r#"[
            {"id": "a", "text": "buy milk", "completed": false},
            {"id": "b", "text": null, "completed": true}
        ]"#;
        let batch = MutationBatch::parse(raw).unwrap();
        assert_eq!(batch.len(), 2);
        let mutations = batch.into_inner();
        assert_eq!(mutations[0].text.as_deref(), Some("buy milk"));
        assert!(mutations[1].is_delete());
    }

    #[test]
    fn test_parse_rejects_malformed_shapes() {
        // Not an array
        assert!(MutationBatch::parse(r#"{"id": "a"}"#).is_err());
        // Missing text (must be explicit null to delete)
        assert!(MutationBatch::parse(r#"[{"id": "a", "completed": false}]"#).is_err());
        // Wrong type for completed, no coercion from strings
        assert!(MutationBatch::parse(r#"[{"id": "a", "text": "x", "completed": "yes"}]"#).is_err());
        // Empty id
        assert!(MutationBatch::parse(r#"[{"id": "", "text": "x", "completed": false}]"#).is_err());
        // Unknown field
        assert!(
            MutationBatch::parse(r#"[{"id": "a", "text": "x", "completed": false, "extra": 1}]"#)
                .is_err()
        );
        assert!(matches!(MutationBatch::parse("[]"), Err(BatchError::Empty)));
        assert!(matches!(MutationBatch::parse("not json"), Err(BatchError::Malformed(_))));
    }

    #[test]
    fn test_batch_size_limit() {
        let mutations: Vec<_> = (0..=MAX_BATCH_LEN)
            .map(|i| Mutation::upsert(ItemId::try_from(i.to_string()).unwrap(), "x", false))
            .collect();
        assert!(matches!(MutationBatch::new(mutations), Err(BatchError::TooLarge(_))));
    }

    #[test]
    fn test_batch_to_json_matches_wire_format() {
        let batch = MutationBatch::new(vec![Mutation::delete("a".parse().unwrap(), true)]).unwrap();
        assert_eq!(batch.to_json(), r#"[{"id":"a","text":null,"completed":true}]"#);
        assert_eq!(MutationBatch::parse(&batch.to_json()).unwrap(), batch);
    }

    #[test]
    fn test_visibility() {
        let owner = SessionId::new("owner");
        let other = SessionId::new("other");
        let mut meta = ListMeta {
            owner_id: owner.clone(),
            is_public: false,
            created_at: 0,
        };
        assert!(meta.is_visible_to(Some(&owner)));
        assert!(!meta.is_visible_to(Some(&other)));
        assert!(!meta.is_visible_to(None));

        meta.is_public = true;
        assert!(meta.is_visible_to(Some(&other)));
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let snapshot = Snapshot {
            owner_id: SessionId::new("owner"),
            is_public: true,
            items: vec![ListItem {
                id: "a".parse().unwrap(),
                versionstamp: Versionstamp::from(1),
                text: "buy milk".into(),
                completed: false,
                created_at: 10,
                updated_at: 10,
            }],
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["ownerId"], "owner");
        assert_eq!(json["isPublic"], true);
        assert_eq!(json["items"][0]["createdAt"], 10);
        assert_eq!(json["items"][0]["versionstamp"], "00000000000000000001");
    }

    fn summaries(n: usize) -> Vec<ListSummary> {
        (0..n)
            .map(|i| ListSummary {
                id: ListId::generate(),
                created_at: i as i64,
                is_public: false,
            })
            .collect()
    }

    #[test]
    fn test_paginate() {
        let lists = summaries(23);

        let first = HistoryPage::paginate(&lists, 1, 10);
        assert_eq!(first.total_pages, 3);
        assert_eq!(first.lists.len(), 10);

        let last = HistoryPage::paginate(&lists, 3, 10);
        assert_eq!(last.lists.len(), 3);
        assert_eq!(last.lists[0], lists[20]);

        // Clamped
        assert_eq!(HistoryPage::paginate(&lists, 0, 10).page, 1);
        assert_eq!(HistoryPage::paginate(&lists, 99, 10).page, 3);
    }

    #[test]
    fn test_paginate_empty_history() {
        let page = HistoryPage::paginate(&[], 5, 10);
        assert_eq!(page.page, 1);
        assert_eq!(page.total_pages, 1);
        assert!(page.lists.is_empty());
    }
}
