//! Snapshot loader.
//!
//! Fetches every synchronized collection from the remote store with a
//! bounded per-request timeout and a fixed number of attempts. Orders get
//! their line items fetched and attached before the collection counts as
//! loaded.

use crate::config::LoadConfig;
use crate::error::LoadError;
use crate::gateway::{RemoteGateway, SelectQuery};
use serde_json::Value;
use std::sync::Arc;
use storesync_model::{Collection, CollectionKind, Collections, LineItem, Record, RecordKey};
use tracing::{debug, warn};

/// Loads collection snapshots through a gateway.
pub struct SnapshotLoader<G> {
    gateway: Arc<G>,
    config: LoadConfig,
}

impl<G: RemoteGateway> SnapshotLoader<G> {
    /// Creates a loader.
    pub fn new(gateway: Arc<G>, config: LoadConfig) -> Self {
        Self { gateway, config }
    }

    /// Returns the loader configuration.
    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    /// Loads every collection. Fails if any collection fails.
    pub async fn load_all(&self) -> Result<Collections, LoadError> {
        let (products, orders, categories, brands, messages) = tokio::try_join!(
            self.load_collection(CollectionKind::Products),
            self.load_collection(CollectionKind::Orders),
            self.load_collection(CollectionKind::Categories),
            self.load_collection(CollectionKind::Brands),
            self.load_collection(CollectionKind::Messages),
        )?;

        let mut collections = Collections::new();
        for collection in [products, orders, categories, brands, messages] {
            collections.replace(collection);
        }
        debug!(records = collections.total_records(), "snapshot loaded");
        Ok(collections)
    }

    /// Loads one collection in its default order.
    pub async fn load_collection(&self, kind: CollectionKind) -> Result<Collection, LoadError> {
        let rows = self.fetch(SelectQuery::for_collection(kind)).await?;
        let mut records = parse_rows(kind, &rows);

        if kind.has_line_items() {
            for record in &mut records {
                let items = self.fetch_line_items(record.key()).await?;
                record.set_line_items(items);
            }
        }

        Ok(Collection::from_records(kind, records))
    }

    /// Fetches the line items of one order.
    pub async fn fetch_line_items(&self, order_key: &RecordKey) -> Result<Vec<LineItem>, LoadError> {
        let (table, column) = match (
            CollectionKind::Orders.child_table(),
            CollectionKind::Orders.child_foreign_key(),
        ) {
            (Some(table), Some(column)) => (table, column),
            _ => return Ok(Vec::new()),
        };

        let rows = self
            .fetch(SelectQuery::table(table).filter_eq(column, order_key.clone()))
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| match LineItem::from_value(row) {
                Ok(item) => Some(item),
                Err(err) => {
                    warn!(order = %order_key, error = %err, "skipping malformed line item");
                    None
                }
            })
            .collect())
    }

    async fn fetch(&self, query: SelectQuery) -> Result<Vec<Value>, LoadError> {
        let attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.fetch_once(&query).await {
                Ok(rows) => return Ok(rows),
                Err(err) if attempt < attempts => {
                    let delay = self.config.delay_for_attempt(attempt);
                    warn!(
                        collection = %query.table,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) if attempts > 1 => {
                    return Err(LoadError::MaxRetries {
                        collection: query.table,
                        attempts,
                        last: Box::new(err),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn fetch_once(&self, query: &SelectQuery) -> Result<Vec<Value>, LoadError> {
        let timeout = self.config.request_timeout;
        match tokio::time::timeout(timeout, self.gateway.select(query.clone())).await {
            Ok(Ok(rows)) => Ok(rows),
            Ok(Err(err)) => Err(LoadError::FetchFailure {
                collection: query.table.clone(),
                message: err.to_string(),
            }),
            Err(_) => Err(LoadError::Timeout {
                collection: query.table.clone(),
                after: timeout,
            }),
        }
    }
}

fn parse_rows(kind: CollectionKind, rows: &[Value]) -> Vec<Record> {
    rows.iter()
        .filter_map(|row| match Record::from_row(kind, row) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(collection = %kind, error = %err, "skipping malformed row");
                None
            }
        })
        .collect()
}
