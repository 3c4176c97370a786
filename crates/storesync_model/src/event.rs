//! Change notifications pushed by the remote store.

use crate::error::ModelResult;
use crate::kind::CollectionKind;
use crate::record::RecordKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The kind of change carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// A new record was created.
    Insert,
    /// An existing record was modified.
    Update,
    /// A record was removed.
    Delete,
}

impl ChangeKind {
    /// Returns the wire name of the change kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }
}

/// A single change notification.
///
/// The collection is kept as the raw name the transport delivered, so an
/// event for a collection this engine does not know about can still be
/// represented and rejected at apply time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Collection (table) name.
    pub collection: String,
    /// Kind of change.
    pub kind: ChangeKind,
    /// Full new row for Insert, changed row for Update.
    pub new: Option<Value>,
    /// Key of the row before the change (Update and Delete).
    pub old_key: Option<RecordKey>,
}

impl ChangeEvent {
    /// Creates an Insert event.
    pub fn insert(collection: impl Into<String>, new: Value) -> Self {
        Self {
            collection: collection.into(),
            kind: ChangeKind::Insert,
            new: Some(new),
            old_key: None,
        }
    }

    /// Creates an Update event.
    pub fn update(collection: impl Into<String>, old_key: impl Into<RecordKey>, new: Value) -> Self {
        Self {
            collection: collection.into(),
            kind: ChangeKind::Update,
            new: Some(new),
            old_key: Some(old_key.into()),
        }
    }

    /// Creates a Delete event.
    pub fn delete(collection: impl Into<String>, old_key: impl Into<RecordKey>) -> Self {
        Self {
            collection: collection.into(),
            kind: ChangeKind::Delete,
            new: None,
            old_key: Some(old_key.into()),
        }
    }

    /// Resolves the collection name.
    pub fn collection_kind(&self) -> ModelResult<CollectionKind> {
        self.collection.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use serde_json::json;

    #[test]
    fn constructors() {
        let e = ChangeEvent::insert("orders", json!({"id": "o1"}));
        assert_eq!(e.kind, ChangeKind::Insert);
        assert!(e.old_key.is_none());

        let e = ChangeEvent::update("orders", "o1", json!({"id": "o1"}));
        assert_eq!(e.old_key, Some(RecordKey::new("o1")));

        let e = ChangeEvent::delete("orders", "o1");
        assert!(e.new.is_none());
        assert_eq!(e.collection_kind().unwrap(), CollectionKind::Orders);
    }

    #[test]
    fn unknown_collection_is_representable() {
        let e = ChangeEvent::delete("carts", "c1");
        assert_eq!(
            e.collection_kind().unwrap_err(),
            ModelError::UnknownCollection("carts".into())
        );
    }

    #[test]
    fn kind_serializes_uppercase() {
        assert_eq!(serde_json::to_value(ChangeKind::Update).unwrap(), json!("UPDATE"));
        assert_eq!(ChangeKind::Delete.as_str(), "DELETE");
    }
}
