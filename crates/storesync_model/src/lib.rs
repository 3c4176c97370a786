//! # storesync model
//!
//! Record, collection and change-event types for storesync.
//!
//! This crate provides:
//! - `CollectionKind` naming the synchronized resource collections
//! - `Record`, `RecordPatch` and `LineItem` for storefront rows
//! - `Collection` / `Collections`, ordered sets with unique primary keys
//! - `ChangeEvent` for Insert/Update/Delete notifications
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod error;
mod event;
mod kind;
mod record;

pub use collection::{Collection, Collections};
pub use error::{ModelError, ModelResult};
pub use event::{ChangeEvent, ChangeKind};
pub use kind::{CollectionKind, SortOrder};
pub use record::{LineItem, Record, RecordKey, RecordPatch, LINE_ITEMS_FIELD};
