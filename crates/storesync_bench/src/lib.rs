//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde_json::json;
use storesync_model::{ChangeEvent, Collection, CollectionKind, LineItem, Record};

/// Builds an orders collection of `count` records with `items` line items each.
pub fn orders_collection(count: usize, items: usize) -> Collection {
    let records = (0..count).map(|n| {
        let id = format!("ord-{n}");
        let mut record = Record::from_row(
            CollectionKind::Orders,
            &json!({"id": id, "status": "pending", "total": n}),
        )
        .expect("valid order row");
        let lines = (0..items)
            .map(|i| {
                LineItem::from_value(&json!({"id": n * items + i, "order_id": id, "quantity": 1}))
                    .expect("valid line item")
            })
            .collect();
        record.set_line_items(lines);
        record
    });
    Collection::from_records(CollectionKind::Orders, records)
}

/// A status update for the order at `index`.
pub fn status_update(index: usize) -> ChangeEvent {
    let id = format!("ord-{index}");
    ChangeEvent::update("orders", id.as_str(), json!({"id": id, "status": "shipped"}))
}
