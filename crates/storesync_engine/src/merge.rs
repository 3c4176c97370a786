//! Merge/apply engine.
//!
//! Applies a single change event to the in-memory collections. Every event
//! is validated before anything is touched, so an `Err` leaves the target
//! collection exactly as it was.

use crate::error::{SyncError, SyncResult};
use serde_json::Value;
use storesync_model::{
    ChangeEvent, ChangeKind, Collection, CollectionKind, Collections, LineItem, Record,
    RecordKey, RecordPatch,
};

/// What applying an event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new record was prepended.
    Inserted {
        /// Key of the new record.
        key: RecordKey,
        /// True when the record's line items still have to be fetched.
        needs_line_items: bool,
    },
    /// An existing record was merged.
    Updated {
        /// Key of the record after the merge.
        key: RecordKey,
    },
    /// A record was removed.
    Deleted {
        /// Key of the removed record.
        key: RecordKey,
    },
    /// The event had nothing to act on.
    Ignored {
        /// Why the event was ignored.
        reason: &'static str,
    },
    /// The event was held until the initial load completes.
    Queued,
}

impl ApplyOutcome {
    /// Returns true if the collections changed.
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            ApplyOutcome::Inserted { .. } | ApplyOutcome::Updated { .. } | ApplyOutcome::Deleted { .. }
        )
    }
}

/// Applies an event to the collection it names.
pub fn apply(collections: &mut Collections, event: &ChangeEvent) -> SyncResult<ApplyOutcome> {
    let kind = event.collection_kind()?;
    apply_to(collections.get_mut(kind), event)
}

/// Applies an event to one collection.
pub fn apply_to(collection: &mut Collection, event: &ChangeEvent) -> SyncResult<ApplyOutcome> {
    let kind = event.collection_kind()?;
    if kind != collection.kind() {
        return Err(SyncError::malformed(format!(
            "{} event applied to {}",
            kind,
            collection.kind()
        )));
    }

    match event.kind {
        ChangeKind::Insert => insert(collection, event),
        ChangeKind::Update => update(collection, event),
        ChangeKind::Delete => delete(collection, event),
    }
}

/// Replaces the line items of an order.
///
/// Returns false if the record is gone or does not own line items.
pub fn attach_line_items(collection: &mut Collection, key: &RecordKey, items: Vec<LineItem>) -> bool {
    match collection.get_mut(key) {
        Some(record) if record.line_items().is_some() => {
            record.set_line_items(items);
            true
        }
        _ => false,
    }
}

fn payload(event: &ChangeEvent) -> SyncResult<&Value> {
    event
        .new
        .as_ref()
        .ok_or_else(|| SyncError::malformed(format!("{} event has no payload", event.kind.as_str())))
}

/// Parses a payload, falling back to `key` when the payload has no `id`.
fn parse_patch(kind: CollectionKind, payload: &Value, key: Option<&RecordKey>) -> SyncResult<RecordPatch> {
    match (payload.as_object(), key) {
        (Some(object), Some(key)) if !object.contains_key("id") => {
            let mut object = object.clone();
            object.insert("id".to_string(), Value::String(key.as_str().to_string()));
            Ok(RecordPatch::from_payload(kind, &Value::Object(object))?)
        }
        _ => Ok(RecordPatch::from_payload(kind, payload)?),
    }
}

fn insert(collection: &mut Collection, event: &ChangeEvent) -> SyncResult<ApplyOutcome> {
    let kind = collection.kind();
    let patch = parse_patch(kind, payload(event)?, None)?;
    let key = patch.key.clone();

    // Replayed or duplicated inserts merge in place.
    if let Some(existing) = collection.get_mut(&key) {
        existing.merge(patch);
        return Ok(ApplyOutcome::Updated { key });
    }

    let needs_line_items = kind.has_line_items() && patch.line_items.is_none();
    collection
        .prepend(Record::from_patch(kind, patch))
        .map_err(|record| SyncError::malformed(format!("duplicate key {}", record.key())))?;

    Ok(ApplyOutcome::Inserted {
        key,
        needs_line_items,
    })
}

fn update(collection: &mut Collection, event: &ChangeEvent) -> SyncResult<ApplyOutcome> {
    let kind = collection.kind();
    let patch = parse_patch(kind, payload(event)?, event.old_key.as_ref())?;
    let target = event.old_key.clone().unwrap_or_else(|| patch.key.clone());

    let Some(index) = collection.position(&target) else {
        return Ok(ApplyOutcome::Ignored {
            reason: "update for absent record",
        });
    };

    if patch.key != target && collection.contains(&patch.key) {
        return Err(SyncError::malformed(format!(
            "re-keying {} onto existing {}",
            target, patch.key
        )));
    }

    let key = patch.key.clone();
    let mut merged = collection.records()[index].clone();
    merged.merge(patch);
    collection
        .replace_at(index, merged)
        .map_err(|record| SyncError::malformed(format!("duplicate key {}", record.key())))?;

    Ok(ApplyOutcome::Updated { key })
}

fn delete(collection: &mut Collection, event: &ChangeEvent) -> SyncResult<ApplyOutcome> {
    let key = match (&event.old_key, &event.new) {
        (Some(key), _) => key.clone(),
        (None, Some(payload)) => payload
            .as_object()
            .ok_or_else(|| SyncError::malformed("delete payload is not an object"))
            .and_then(|object| RecordKey::from_object(object).map_err(SyncError::from))?,
        (None, None) => return Err(SyncError::malformed("delete event has no key")),
    };

    Ok(match collection.remove(&key) {
        Some(_) => ApplyOutcome::Deleted { key },
        None => ApplyOutcome::Ignored {
            reason: "delete for absent record",
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn orders() -> Collection {
        let rows = [
            json!({"id": "A", "status": "pending", "total": 40,
                   "order_items": [{"id": 1, "order_id": "A"}, {"id": 2, "order_id": "A"}]}),
            json!({"id": "B", "status": "pending", "total": 0}),
        ];
        Collection::from_records(
            CollectionKind::Orders,
            rows.iter()
                .map(|row| Record::from_row(CollectionKind::Orders, row).unwrap()),
        )
    }

    #[test]
    fn update_without_items_keeps_items() {
        let mut c = orders();
        let event = ChangeEvent::update("orders", "A", json!({"id": "A", "status": "shipped"}));

        let outcome = apply_to(&mut c, &event).unwrap();
        assert_eq!(outcome, ApplyOutcome::Updated { key: "A".into() });

        let a = c.get(&"A".into()).unwrap();
        assert_eq!(a.str_field("status"), Some("shipped"));
        assert_eq!(a.field("total"), Some(&json!(40)));
        assert_eq!(a.line_items().unwrap().len(), 2);
    }

    #[test]
    fn update_with_explicit_items_replaces_them() {
        let mut c = orders();
        let event = ChangeEvent::update(
            "orders",
            "A",
            json!({"id": "A", "order_items": [{"id": 9, "order_id": "A"}]}),
        );
        apply_to(&mut c, &event).unwrap();
        assert_eq!(c.get(&"A".into()).unwrap().line_items().unwrap().len(), 1);
    }

    #[test]
    fn update_payload_without_id_uses_old_key() {
        let mut c = orders();
        let event = ChangeEvent::update("orders", "B", json!({"status": "cancelled"}));
        apply_to(&mut c, &event).unwrap();
        assert_eq!(c.get(&"B".into()).unwrap().str_field("status"), Some("cancelled"));
    }

    #[test]
    fn update_of_absent_record_is_ignored() {
        let mut c = orders();
        let before = c.clone();
        let event = ChangeEvent::update("orders", "Z", json!({"id": "Z"}));
        assert!(matches!(apply_to(&mut c, &event).unwrap(), ApplyOutcome::Ignored { .. }));
        assert_eq!(c, before);
    }

    #[test]
    fn rekey_in_place() {
        let mut c = orders();
        let event = ChangeEvent::update("orders", "B", json!({"id": "C"}));
        apply_to(&mut c, &event).unwrap();
        assert_eq!(c.keys(), vec![RecordKey::new("A"), RecordKey::new("C")]);
    }

    #[test]
    fn rekey_onto_existing_key_is_rejected() {
        let mut c = orders();
        let before = c.clone();
        let event = ChangeEvent::update("orders", "B", json!({"id": "A"}));
        assert!(matches!(apply_to(&mut c, &event), Err(SyncError::MalformedEvent(_))));
        assert_eq!(c, before);
    }

    #[test]
    fn insert_prepends_and_flags_missing_items() {
        let mut c = orders();
        let outcome = apply_to(&mut c, &ChangeEvent::insert("orders", json!({"id": "N"}))).unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Inserted {
                key: "N".into(),
                needs_line_items: true
            }
        );
        assert_eq!(c.keys()[0].as_str(), "N");
        assert_eq!(c.get(&"N".into()).unwrap().line_items(), Some(&[][..]));
    }

    #[test]
    fn insert_with_items_needs_nothing() {
        let mut c = orders();
        let event = ChangeEvent::insert("orders", json!({"id": "N", "order_items": []}));
        assert_eq!(
            apply_to(&mut c, &event).unwrap(),
            ApplyOutcome::Inserted {
                key: "N".into(),
                needs_line_items: false
            }
        );
    }

    #[test]
    fn insert_of_existing_key_merges() {
        let mut c = orders();
        let event = ChangeEvent::insert("orders", json!({"id": "A", "status": "paid"}));
        assert_eq!(apply_to(&mut c, &event).unwrap(), ApplyOutcome::Updated { key: "A".into() });
        assert_eq!(c.len(), 2);
        assert_eq!(c.get(&"A".into()).unwrap().line_items().unwrap().len(), 2);
    }

    #[test]
    fn inserts_are_newest_first() {
        let mut c = Collection::new(CollectionKind::Products);
        apply_to(&mut c, &ChangeEvent::insert("products", json!({"id": "r1"}))).unwrap();
        apply_to(&mut c, &ChangeEvent::insert("products", json!({"id": "r2"}))).unwrap();
        assert_eq!(c.keys(), vec![RecordKey::new("r2"), RecordKey::new("r1")]);
    }

    #[test]
    fn delete_is_idempotent() {
        let mut c = orders();
        let event = ChangeEvent::delete("orders", "B");
        assert_eq!(apply_to(&mut c, &event).unwrap(), ApplyOutcome::Deleted { key: "B".into() });

        let before = c.clone();
        assert!(matches!(apply_to(&mut c, &event).unwrap(), ApplyOutcome::Ignored { .. }));
        assert_eq!(c, before);
    }

    #[test]
    fn delete_falls_back_to_payload_key() {
        let mut c = orders();
        let event = ChangeEvent {
            collection: "orders".into(),
            kind: ChangeKind::Delete,
            new: Some(json!({"id": "A"})),
            old_key: None,
        };
        apply_to(&mut c, &event).unwrap();
        assert!(!c.contains(&"A".into()));
    }

    #[test]
    fn malformed_events_leave_collection_untouched() {
        let mut c = orders();
        let before = c.clone();

        let bad = [
            ChangeEvent::insert("orders", json!("not an object")),
            ChangeEvent::insert("orders", json!({"status": "no id"})),
            ChangeEvent {
                collection: "orders".into(),
                kind: ChangeKind::Update,
                new: None,
                old_key: Some("A".into()),
            },
            ChangeEvent {
                collection: "orders".into(),
                kind: ChangeKind::Delete,
                new: None,
                old_key: None,
            },
            ChangeEvent::insert("products", json!({"id": "P"})),
        ];
        for event in &bad {
            assert!(apply_to(&mut c, event).is_err(), "accepted {event:?}");
        }
        assert_eq!(c, before);
    }

    #[test]
    fn unknown_collection() {
        let mut all = Collections::new();
        let err = apply(&mut all, &ChangeEvent::delete("carts", "c1")).unwrap_err();
        assert!(matches!(err, SyncError::UnknownCollection(name) if name == "carts"));
    }

    #[test]
    fn attach_line_items_only_to_orders() {
        let mut c = orders();
        let items = vec![LineItem::from_value(&json!({"id": 5, "order_id": "B"})).unwrap()];
        assert!(attach_line_items(&mut c, &"B".into(), items.clone()));
        assert_eq!(c.get(&"B".into()).unwrap().line_items().unwrap(), &items[..]);
        assert!(!attach_line_items(&mut c, &"gone".into(), items.clone()));

        let mut products = Collection::new(CollectionKind::Products);
        apply_to(&mut products, &ChangeEvent::insert("products", json!({"id": "p"}))).unwrap();
        assert!(!attach_line_items(&mut products, &"p".into(), items));
    }
}
