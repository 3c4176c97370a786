//! Synchronized collection kinds.

use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A resource collection kept in sync with the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    /// Catalog products.
    Products,
    /// Customer orders (aggregates owning line items).
    Orders,
    /// Product categories.
    Categories,
    /// Product brands.
    Brands,
    /// Customer and admin messages.
    Messages,
}

impl CollectionKind {
    /// Every synchronized collection, in load order.
    pub const ALL: [CollectionKind; 5] = [
        CollectionKind::Products,
        CollectionKind::Orders,
        CollectionKind::Categories,
        CollectionKind::Brands,
        CollectionKind::Messages,
    ];

    /// Returns the remote table name.
    pub const fn table(self) -> &'static str {
        match self {
            CollectionKind::Products => "products",
            CollectionKind::Orders => "orders",
            CollectionKind::Categories => "categories",
            CollectionKind::Brands => "brands",
            CollectionKind::Messages => "messages",
        }
    }

    /// Returns the child table holding nested line items, if any.
    pub const fn child_table(self) -> Option<&'static str> {
        match self {
            CollectionKind::Orders => Some("order_items"),
            _ => None,
        }
    }

    /// Column on the child table referencing the parent key.
    pub const fn child_foreign_key(self) -> Option<&'static str> {
        match self {
            CollectionKind::Orders => Some("order_id"),
            _ => None,
        }
    }

    /// Returns true if records of this kind own nested line items.
    pub const fn has_line_items(self) -> bool {
        self.child_table().is_some()
    }

    /// Sort applied to the bulk snapshot fetch.
    pub const fn default_order(self) -> SortOrder {
        match self {
            CollectionKind::Products | CollectionKind::Orders | CollectionKind::Messages => {
                SortOrder::descending("created_at")
            }
            CollectionKind::Categories | CollectionKind::Brands => SortOrder::ascending("name"),
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

impl FromStr for CollectionKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CollectionKind::ALL
            .into_iter()
            .find(|kind| kind.table() == s)
            .ok_or_else(|| ModelError::UnknownCollection(s.to_string()))
    }
}

/// Sort order for a select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortOrder {
    /// Column to sort by.
    pub column: &'static str,
    /// Ascending when true, descending otherwise.
    pub ascending: bool,
}

impl SortOrder {
    /// Ascending sort on a column.
    pub const fn ascending(column: &'static str) -> Self {
        Self {
            column,
            ascending: true,
        }
    }

    /// Descending sort on a column.
    pub const fn descending(column: &'static str) -> Self {
        Self {
            column,
            ascending: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_table_names() {
        for kind in CollectionKind::ALL {
            assert_eq!(kind.table().parse::<CollectionKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = "carts".parse::<CollectionKind>().unwrap_err();
        assert_eq!(err, ModelError::UnknownCollection("carts".into()));
    }

    #[test]
    fn only_orders_have_line_items() {
        assert!(CollectionKind::Orders.has_line_items());
        assert_eq!(CollectionKind::Orders.child_table(), Some("order_items"));
        assert_eq!(CollectionKind::Orders.child_foreign_key(), Some("order_id"));

        for kind in [
            CollectionKind::Products,
            CollectionKind::Categories,
            CollectionKind::Brands,
            CollectionKind::Messages,
        ] {
            assert!(!kind.has_line_items());
        }
    }

    #[test]
    fn feeds_are_newest_first() {
        assert!(!CollectionKind::Products.default_order().ascending);
        assert!(!CollectionKind::Orders.default_order().ascending);
        assert!(CollectionKind::Brands.default_order().ascending);
        assert_eq!(CollectionKind::Categories.default_order().column, "name");
    }
}
