//! Identifiers for lists, items and sessions.
//!
//! List ids double as access keys (anyone who knows the id of a public list
//! can read it), so they come from a CSPRNG and carry 128 bits of entropy,
//! rendered in base58 for compact, URL-safe display.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Random bytes behind a generated list id.
pub const LIST_ID_BYTES: usize = 16;

/// Longest item id accepted from a client.
pub const MAX_ITEM_ID_LEN: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("Invalid list ID: {0:?} is not base58")]
    InvalidListId(String),
    #[error("Item ID must not be empty")]
    EmptyItemId,
    #[error("Item ID longer than {MAX_ITEM_ID_LEN} bytes")]
    ItemIdTooLong,
}

/// Opaque, unguessable identifier of a todo list.
///
/// # Examples
/// ```
/// use todo_core::ListId;
///
/// let id = ListId::generate();
/// let parsed: ListId = id.as_str().parse().unwrap();
/// assert_eq!(id, parsed);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListId(String);

impl ListId {
    /// Generate a new random list id.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; LIST_ID_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        Self(bs58::encode(bytes).into_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ListId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ListId {
    type Err = IdError;

    /// Accepts any non-empty base58 string, so ids minted with a different
    /// byte length still resolve.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || bs58::decode(s).into_vec().is_err() {
            return Err(IdError::InvalidListId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

/// Identifier of an item, unique within its list.
///
/// Minted by clients; the server only checks that it is non-empty and
/// bounded in length.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemId(String);

impl ItemId {
    /// Generate a fresh item id: creation millis plus a random UUID.
    pub fn generate() -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        Self(format!("{}-{}", millis, uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ItemId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(IdError::EmptyItemId);
        }
        if value.len() > MAX_ITEM_ID_LEN {
            return Err(IdError::ItemIdTooLong);
        }
        Ok(Self(value))
    }
}

impl From<ItemId> for String {
    fn from(id: ItemId) -> String {
        id.0
    }
}

impl FromStr for ItemId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_string())
    }
}

impl Display for ItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An authenticated session, as resolved by the authenticator.
///
/// The session id is also the owner identity recorded on lists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_list_ids_are_base58_and_distinct() {
        let a = ListId::generate();
        let b = ListId::generate();
        assert_ne!(a, b);
        assert_eq!(bs58::decode(a.as_str()).into_vec().unwrap().len(), LIST_ID_BYTES);
    }

    #[test]
    fn test_list_id_rejects_non_base58() {
        // 0, O, I and l are excluded from the base58 alphabet
        assert!("0OIl".parse::<ListId>().is_err());
        assert!("".parse::<ListId>().is_err());
        assert!("3mJr7AoUXx2Wqd".parse::<ListId>().is_ok());
    }

    #[test]
    fn test_item_id_validation() {
        assert_eq!("".parse::<ItemId>(), Err(IdError::EmptyItemId));
        let long = "x".repeat(MAX_ITEM_ID_LEN + 1);
        assert_eq!(long.parse::<ItemId>(), Err(IdError::ItemIdTooLong));
        assert!("a".parse::<ItemId>().is_ok());
    }

    #[test]
    fn test_item_id_deserialize_rejects_empty() {
        assert!(serde_json::from_str::<ItemId>("\"\"").is_err());
        let id: ItemId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(id.as_str(), "abc");
    }

    #[test]
    fn test_generated_item_ids_unique() {
        let ids: std::collections::HashSet<_> = (0..100).map(|_| ItemId::generate()).collect();
        assert_eq!(ids.len(), 100);
    }
}
