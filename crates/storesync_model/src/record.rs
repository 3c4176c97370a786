//! Records, patches and nested line items.

use crate::error::{ModelError, ModelResult};
use crate::kind::CollectionKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Payload field carrying an order's nested line items.
pub const LINE_ITEMS_FIELD: &str = "order_items";

/// Primary key field on every table.
const KEY_FIELD: &str = "id";

/// Primary key of a record or line item.
///
/// Remote keys are either UUID strings or integers; both are kept in
/// their textual form so keys compare equal regardless of origin.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(String);

impl RecordKey {
    /// Creates a key from its textual form.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the textual form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reads a key from a JSON value.
    pub fn from_value(value: &Value) -> ModelResult<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Ok(Self(s.clone())),
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(Self(n.to_string())),
            other => Err(ModelError::InvalidKey(other.to_string())),
        }
    }

    /// Reads the `id` field of a JSON object.
    pub fn from_object(object: &Map<String, Value>) -> ModelResult<Self> {
        object
            .get(KEY_FIELD)
            .ok_or(ModelError::MissingKey { field: KEY_FIELD })
            .and_then(Self::from_value)
    }
}

impl fmt::Debug for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordKey({})", self.0)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

fn as_object(value: &Value) -> ModelResult<&Map<String, Value>> {
    value.as_object().ok_or(ModelError::NotAnObject)
}

/// A single line of an order.
#[derive(Debug, Clone, PartialEq)]
pub struct LineItem {
    key: RecordKey,
    fields: Map<String, Value>,
}

impl LineItem {
    /// Parses a line item row.
    pub fn from_value(value: &Value) -> ModelResult<Self> {
        let object = as_object(value)?;
        Ok(Self {
            key: RecordKey::from_object(object)?,
            fields: object.clone(),
        })
    }

    /// Returns the line item key.
    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    /// Returns a field value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns the key of the owning order, when present.
    pub fn order_key(&self) -> Option<RecordKey> {
        self.fields
            .get("order_id")
            .and_then(|v| RecordKey::from_value(v).ok())
    }

    /// Converts back to a JSON row.
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

fn parse_line_items(value: &Value) -> ModelResult<Option<Vec<LineItem>>> {
    match value {
        Value::Null => Ok(None),
        Value::Array(rows) => rows
            .iter()
            .map(LineItem::from_value)
            .collect::<ModelResult<Vec<_>>>()
            .map(Some),
        _ => Err(ModelError::InvalidField {
            field: LINE_ITEMS_FIELD.to_string(),
            reason: "expected an array".to_string(),
        }),
    }
}

/// A parsed Insert or Update payload.
///
/// `line_items` is `Some` only when the payload explicitly carried an
/// `order_items` array. Realtime updates for orders never do, which is
/// what lets a merge tell "no items sent" apart from "items cleared".
#[derive(Debug, Clone, PartialEq)]
pub struct RecordPatch {
    /// Primary key named by the payload.
    pub key: RecordKey,
    /// Top-level fields, without nested items.
    pub fields: Map<String, Value>,
    /// Nested items, if the payload carried them.
    pub line_items: Option<Vec<LineItem>>,
}

impl RecordPatch {
    /// Parses a payload for a collection.
    pub fn from_payload(kind: CollectionKind, payload: &Value) -> ModelResult<Self> {
        let object = as_object(payload)?;
        let key = RecordKey::from_object(object)?;
        let mut fields = object.clone();

        let line_items = if kind.has_line_items() {
            match fields.remove(LINE_ITEMS_FIELD) {
                Some(items) => parse_line_items(&items)?,
                None => None,
            }
        } else {
            None
        };

        Ok(Self {
            key,
            fields,
            line_items,
        })
    }
}

/// A record held in a synchronized collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    key: RecordKey,
    fields: Map<String, Value>,
    /// `Some` for aggregate kinds (orders), `None` otherwise.
    line_items: Option<Vec<LineItem>>,
}

impl Record {
    /// Parses a full row fetched from the remote store.
    ///
    /// Aggregate rows without embedded items start with an empty list.
    pub fn from_row(kind: CollectionKind, row: &Value) -> ModelResult<Self> {
        RecordPatch::from_payload(kind, row).map(|patch| Self::from_patch(kind, patch))
    }

    /// Builds a record from a patch.
    pub fn from_patch(kind: CollectionKind, patch: RecordPatch) -> Self {
        let line_items = if kind.has_line_items() {
            Some(patch.line_items.unwrap_or_default())
        } else {
            None
        };

        Self {
            key: patch.key,
            fields: patch.fields,
            line_items,
        }
    }

    /// Returns the primary key.
    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    /// Returns all top-level fields.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Returns a top-level field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns a top-level string field.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Returns the nested line items for aggregate records.
    pub fn line_items(&self) -> Option<&[LineItem]> {
        self.line_items.as_deref()
    }

    /// Replaces the nested line items.
    ///
    /// Has no effect on records of non-aggregate kinds.
    pub fn set_line_items(&mut self, items: Vec<LineItem>) {
        if let Some(current) = self.line_items.as_mut() {
            *current = items;
        }
    }

    /// Shallow-merges a patch over this record.
    ///
    /// Fields present in the patch overwrite existing ones, all other fields
    /// are kept. Line items are only replaced when the patch carries them.
    pub fn merge(&mut self, patch: RecordPatch) {
        self.key = patch.key;
        self.fields.extend(patch.fields);
        if let Some(items) = patch.line_items {
            self.set_line_items(items);
        }
    }

    /// Converts back to a JSON row, re-embedding line items.
    pub fn to_value(&self) -> Value {
        let mut object = self.fields.clone();
        if let Some(items) = &self.line_items {
            object.insert(
                LINE_ITEMS_FIELD.to_string(),
                Value::Array(items.iter().map(LineItem::to_value).collect()),
            );
        }
        Value::Object(object)
    }
}
