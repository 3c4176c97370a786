//! # storesync testkit
//!
//! Test utilities for storesync.
//!
//! This crate provides:
//! - Storefront fixtures (products, orders with line items, catalog tables)
//! - Property-based generators for change-event sequences
//! - Test logging initialisation
//!
//! ## Usage
//!
//! ```rust,ignore
//! use storesync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn loads_the_storefront() {
//!     init_test_tracing();
//!     for (table, rows) in storefront_tables() {
//!         gateway.set_table(table, rows);
//!     }
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;
