//! Storefront fixtures.
//!
//! A small but complete storefront: three products, two orders (one with
//! two line items, one with none) and a handful of catalog rows and
//! messages. Rows are plain JSON as the remote store would return them.

use serde_json::{json, Value};
use storesync_model::{Collection, CollectionKind, Collections, LineItem, Record};

/// Key of the order that owns two line items.
pub const ORDER_A: &str = "ord-a";

/// Key of the order without line items.
pub const ORDER_B: &str = "ord-b";

/// A product row.
pub fn product_row(id: &str, name: &str, created_at: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "price": 1999,
        "stock": 10,
        "created_at": created_at,
    })
}

/// An order row without embedded line items.
pub fn order_row(id: &str, status: &str, created_at: &str) -> Value {
    json!({
        "id": id,
        "status": status,
        "customer_email": format!("{id}@example.com"),
        "total": 0,
        "created_at": created_at,
    })
}

/// A line item row.
pub fn line_item_row(id: i64, order_id: &str, product_id: &str, quantity: u32) -> Value {
    json!({
        "id": id,
        "order_id": order_id,
        "product_id": product_id,
        "quantity": quantity,
    })
}

/// Rows for every table, including `order_items`.
pub fn storefront_tables() -> Vec<(&'static str, Vec<Value>)> {
    vec![
        (
            "products",
            vec![
                product_row("prod-1", "Mug", "2024-01-01T00:00:00Z"),
                product_row("prod-2", "Tee", "2024-01-02T00:00:00Z"),
                product_row("prod-3", "Cap", "2024-01-03T00:00:00Z"),
            ],
        ),
        (
            "orders",
            vec![
                order_row(ORDER_A, "pending", "2024-02-02T00:00:00Z"),
                order_row(ORDER_B, "pending", "2024-02-01T00:00:00Z"),
            ],
        ),
        (
            "order_items",
            vec![
                line_item_row(1, ORDER_A, "prod-1", 2),
                line_item_row(2, ORDER_A, "prod-3", 1),
            ],
        ),
        (
            "categories",
            vec![
                json!({"id": "cat-drinkware", "name": "Drinkware"}),
                json!({"id": "cat-apparel", "name": "Apparel"}),
            ],
        ),
        ("brands", vec![json!({"id": 1, "name": "Acme"})]),
        (
            "messages",
            vec![json!({
                "id": "msg-1",
                "body": "Where is my order?",
                "created_at": "2024-02-03T00:00:00Z",
            })],
        ),
    ]
}

/// Rows of one fixture table.
pub fn storefront_rows(table: &str) -> Vec<Value> {
    storefront_tables()
        .into_iter()
        .find(|(name, _)| *name == table)
        .map(|(_, rows)| rows)
        .unwrap_or_default()
}

/// The fixture parsed into collections, line items attached.
///
/// Records keep fixture order, not the remote default sort.
pub fn storefront_collections() -> Collections {
    let items = storefront_rows("order_items");
    let mut collections = Collections::new();

    for kind in CollectionKind::ALL {
        let records = storefront_rows(kind.table())
            .iter()
            .map(|row| {
                let mut record = Record::from_row(kind, row).expect("fixture row");
                if kind.has_line_items() {
                    let owned = items
                        .iter()
                        .filter(|item| item["order_id"] == row["id"])
                        .map(|item| LineItem::from_value(item).expect("fixture item"))
                        .collect();
                    record.set_line_items(owned);
                }
                record
            })
            .collect::<Vec<_>>();
        collections.replace(Collection::from_records(kind, records));
    }
    collections
}
