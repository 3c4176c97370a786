//! Ordered record collections with unique primary keys.

use crate::kind::CollectionKind;
use crate::record::{Record, RecordKey};
use std::collections::HashSet;

/// An insertion-ordered set of records of one kind.
///
/// No two records in a collection share a primary key. Every mutating
/// method preserves that.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    kind: CollectionKind,
    records: Vec<Record>,
}

impl Collection {
    /// Creates an empty collection.
    pub fn new(kind: CollectionKind) -> Self {
        Self {
            kind,
            records: Vec::new(),
        }
    }

    /// Creates a collection from records in the given order.
    ///
    /// When several records share a key, the first one wins.
    pub fn from_records(kind: CollectionKind, records: impl IntoIterator<Item = Record>) -> Self {
        let mut seen = HashSet::new();
        let records = records
            .into_iter()
            .filter(|record| seen.insert(record.key().clone()))
            .collect();
        Self { kind, records }
    }

    /// Returns the collection kind.
    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the collection holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates records in collection order.
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    /// Returns the records as a slice.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Returns the keys in collection order.
    pub fn keys(&self) -> Vec<RecordKey> {
        self.records.iter().map(|r| r.key().clone()).collect()
    }

    /// Returns the position of a key.
    pub fn position(&self, key: &RecordKey) -> Option<usize> {
        self.records.iter().position(|r| r.key() == key)
    }

    /// Returns true if a record with this key exists.
    pub fn contains(&self, key: &RecordKey) -> bool {
        self.position(key).is_some()
    }

    /// Looks up a record by key.
    pub fn get(&self, key: &RecordKey) -> Option<&Record> {
        self.records.iter().find(|r| r.key() == key)
    }

    /// Looks up a record by key for mutation.
    ///
    /// Callers must not change the record's key through this reference;
    /// use [`Collection::replace_at`] for re-keying.
    pub fn get_mut(&mut self, key: &RecordKey) -> Option<&mut Record> {
        self.records.iter_mut().find(|r| r.key() == key)
    }

    /// Inserts a record at the front.
    ///
    /// A record whose key is already present is handed back unchanged.
    pub fn prepend(&mut self, record: Record) -> Result<(), Record> {
        if self.contains(record.key()) {
            return Err(record);
        }
        self.records.insert(0, record);
        Ok(())
    }

    /// Replaces the record at `index`.
    ///
    /// Refuses (and hands back) a record whose key belongs to a different
    /// record in the collection.
    pub fn replace_at(&mut self, index: usize, record: Record) -> Result<Record, Record> {
        let clash = self
            .records
            .iter()
            .enumerate()
            .any(|(i, r)| i != index && r.key() == record.key());
        if clash || index >= self.records.len() {
            return Err(record);
        }
        Ok(std::mem::replace(&mut self.records[index], record))
    }

    /// Removes a record by key.
    pub fn remove(&mut self, key: &RecordKey) -> Option<Record> {
        self.position(key).map(|index| self.records.remove(index))
    }
}

impl<'a> IntoIterator for &'a Collection {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// One collection per synchronized kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Collections {
    products: Collection,
    orders: Collection,
    categories: Collection,
    brands: Collection,
    messages: Collection,
}

impl Default for Collections {
    fn default() -> Self {
        Self {
            products: Collection::new(CollectionKind::Products),
            orders: Collection::new(CollectionKind::Orders),
            categories: Collection::new(CollectionKind::Categories),
            brands: Collection::new(CollectionKind::Brands),
            messages: Collection::new(CollectionKind::Messages),
        }
    }
}

impl Collections {
    /// Creates empty collections for every kind.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the collection for a kind.
    pub fn get(&self, kind: CollectionKind) -> &Collection {
        match kind {
            CollectionKind::Products => &self.products,
            CollectionKind::Orders => &self.orders,
            CollectionKind::Categories => &self.categories,
            CollectionKind::Brands => &self.brands,
            CollectionKind::Messages => &self.messages,
        }
    }

    /// Returns the collection for a kind, mutably.
    pub fn get_mut(&mut self, kind: CollectionKind) -> &mut Collection {
        match kind {
            CollectionKind::Products => &mut self.products,
            CollectionKind::Orders => &mut self.orders,
            CollectionKind::Categories => &mut self.categories,
            CollectionKind::Brands => &mut self.brands,
            CollectionKind::Messages => &mut self.messages,
        }
    }

    /// Swaps in a whole collection, returning the previous one.
    pub fn replace(&mut self, collection: Collection) -> Collection {
        std::mem::replace(self.get_mut(collection.kind()), collection)
    }

    /// Iterates all collections in load order.
    pub fn iter(&self) -> impl Iterator<Item = &Collection> {
        CollectionKind::ALL.into_iter().map(|kind| self.get(kind))
    }

    /// Total number of records across all collections.
    pub fn total_records(&self) -> usize {
        self.iter().map(Collection::len).sum()
    }
}
