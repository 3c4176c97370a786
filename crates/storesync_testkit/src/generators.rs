//! Property-based test generators using proptest.
//!
//! Keys are drawn from a small pool so generated sequences hit every
//! interesting case: inserts of existing keys, updates and deletes of
//! absent ones, re-keys onto taken keys.

use proptest::prelude::*;
use serde_json::json;
use storesync_model::{ChangeEvent, ChangeKind, CollectionKind, RecordKey};

/// Strategy for keys from a pool of eight.
pub fn record_key_strategy() -> impl Strategy<Value = RecordKey> {
    (0u8..8).prop_map(|n| RecordKey::new(format!("k{n}")))
}

/// Strategy for order statuses.
pub fn status_strategy() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["pending", "paid", "shipped", "delivered", "cancelled"])
}

/// Strategy for a single change event on one collection.
///
/// Order inserts sometimes carry explicit line items; updates never do
/// unless `with_items` is drawn true.
pub fn change_event_strategy(kind: CollectionKind) -> impl Strategy<Value = ChangeEvent> {
    let table = kind.table();
    prop_oneof![
        (record_key_strategy(), status_strategy(), any::<bool>()).prop_map(
            move |(key, status, with_items)| {
                let mut row = json!({"id": key.as_str(), "status": status});
                if with_items && kind.has_line_items() {
                    row["order_items"] = json!([{"id": 1, "order_id": key.as_str()}]);
                }
                ChangeEvent::insert(table, row)
            }
        ),
        (
            record_key_strategy(),
            prop::option::weighted(0.1, record_key_strategy()),
            status_strategy()
        )
            .prop_map(move |(old, rekey, status)| {
                let new_key = rekey.unwrap_or_else(|| old.clone());
                ChangeEvent::update(table, old, json!({"id": new_key.as_str(), "status": status}))
            }),
        record_key_strategy().prop_map(move |key| ChangeEvent::delete(table, key)),
    ]
}

/// Strategy for a sequence of change events on one collection.
pub fn event_sequence_strategy(
    kind: CollectionKind,
    max_len: usize,
) -> impl Strategy<Value = Vec<ChangeEvent>> {
    prop::collection::vec(change_event_strategy(kind), 0..max_len)
}

/// Strategy for an Update that carries no line items.
pub fn itemless_update_strategy(key: RecordKey) -> impl Strategy<Value = ChangeEvent> {
    status_strategy().prop_map(move |status| {
        ChangeEvent::update(
            "orders",
            key.clone(),
            json!({"id": key.as_str(), "status": status}),
        )
    })
}

/// Returns true if the event is an Update without explicit line items.
pub fn is_itemless_update(event: &ChangeEvent) -> bool {
    event.kind == ChangeKind::Update
        && event
            .new
            .as_ref()
            .is_some_and(|row| row.get("order_items").is_none())
}
