//! Owned synchronization state.
//!
//! [`SyncStore`] holds the collections together with the loading flags,
//! the initial-load gate, delivered-order exclusions and the queue of
//! events that arrived before the gate opened.

use crate::error::SyncResult;
use crate::merge::{self, ApplyOutcome};
use parking_lot::RwLock;
use std::collections::{HashSet, VecDeque};
use std::time::SystemTime;
use storesync_model::{ChangeEvent, CollectionKind, Collections, LineItem, Record, RecordKey};
use tracing::{debug, warn};

/// Counters describing what the store has done.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Events that changed a collection.
    pub events_applied: u64,
    /// Events that were valid but had nothing to act on.
    pub events_ignored: u64,
    /// Events rejected as malformed or unknown.
    pub events_rejected: u64,
    /// Events held back before the initial load.
    pub events_queued: u64,
    /// Queued events dropped because the queue was full.
    pub events_dropped: u64,
    /// Snapshots installed.
    pub reloads: u64,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Read-only view of the synchronized state.
#[derive(Debug, Clone)]
pub struct SyncSnapshot {
    /// Products, newest first.
    pub products: Vec<Record>,
    /// Orders, newest first, without excluded delivered orders.
    pub orders: Vec<Record>,
    /// Categories by name.
    pub categories: Vec<Record>,
    /// Brands by name.
    pub brands: Vec<Record>,
    /// Messages, newest first.
    pub messages: Vec<Record>,
    /// True while a snapshot load is running.
    pub is_loading: bool,
    /// True when every channel is live and the last load succeeded.
    pub is_connected: bool,
    /// Time of the last installed snapshot or applied change.
    pub last_update: Option<SystemTime>,
    /// Store counters.
    pub stats: SyncStats,
}

impl SyncSnapshot {
    /// Returns the records of one collection.
    pub fn collection(&self, kind: CollectionKind) -> &[Record] {
        match kind {
            CollectionKind::Products => &self.products,
            CollectionKind::Orders => &self.orders,
            CollectionKind::Categories => &self.categories,
            CollectionKind::Brands => &self.brands,
            CollectionKind::Messages => &self.messages,
        }
    }
}

/// Result of installing a snapshot.
#[derive(Debug, Clone, Default)]
pub struct SnapshotInstall {
    /// True if this install completed the initial load.
    pub first_load: bool,
    /// Queued events replayed after the install, with their outcomes.
    pub replayed: Vec<(ChangeEvent, ApplyOutcome)>,
}

struct StoreState {
    collections: Collections,
    is_loading: bool,
    initial_load_complete: bool,
    last_update: Option<SystemTime>,
    excluded_orders: HashSet<RecordKey>,
    pending: VecDeque<ChangeEvent>,
    stats: SyncStats,
}

impl StoreState {
    fn apply_now(&mut self, event: &ChangeEvent) -> SyncResult<ApplyOutcome> {
        match merge::apply(&mut self.collections, event) {
            Ok(outcome) => {
                if outcome.is_change() {
                    self.stats.events_applied += 1;
                    self.last_update = Some(SystemTime::now());
                } else {
                    self.stats.events_ignored += 1;
                }
                Ok(outcome)
            }
            Err(err) => {
                self.stats.events_rejected += 1;
                self.stats.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }
}

/// The engine's single owned state object.
pub struct SyncStore {
    state: RwLock<StoreState>,
    max_pending: usize,
}

impl SyncStore {
    /// Creates an empty store whose pending queue holds `max_pending` events.
    pub fn new(max_pending: usize) -> Self {
        Self {
            state: RwLock::new(StoreState {
                collections: Collections::new(),
                is_loading: false,
                initial_load_complete: false,
                last_update: None,
                excluded_orders: HashSet::new(),
                pending: VecDeque::new(),
                stats: SyncStats::default(),
            }),
            max_pending: max_pending.max(1),
        }
    }

    /// Applies a change event, or queues it until the initial load is in.
    pub fn apply_event(&self, event: &ChangeEvent) -> SyncResult<ApplyOutcome> {
        let mut state = self.state.write();

        if !state.initial_load_complete {
            if state.pending.len() >= self.max_pending {
                state.pending.pop_front();
                state.stats.events_dropped += 1;
                warn!(max = self.max_pending, "pending event queue full, dropping oldest");
            }
            state.pending.push_back(event.clone());
            state.stats.events_queued += 1;
            return Ok(ApplyOutcome::Queued);
        }

        state.apply_now(event)
    }

    /// Replaces every collection with a fresh snapshot.
    ///
    /// The first install opens the gate and replays queued events in
    /// arrival order.
    pub fn install_snapshot(&self, collections: Collections) -> SnapshotInstall {
        let mut state = self.state.write();
        state.collections = collections;
        state.is_loading = false;
        state.last_update = Some(SystemTime::now());
        state.stats.reloads += 1;

        if state.initial_load_complete {
            return SnapshotInstall::default();
        }
        state.initial_load_complete = true;

        let pending: Vec<_> = state.pending.drain(..).collect();
        let mut replayed = Vec::with_capacity(pending.len());
        for event in pending {
            match state.apply_now(&event) {
                Ok(outcome) => replayed.push((event, outcome)),
                Err(err) => {
                    warn!(collection = %event.collection, error = %err, "dropping queued event");
                }
            }
        }
        debug!(replayed = replayed.len(), "initial load complete");

        SnapshotInstall {
            first_load: true,
            replayed,
        }
    }

    /// Attaches fetched line items to an order.
    pub fn attach_line_items(&self, key: &RecordKey, items: Vec<LineItem>) -> bool {
        let mut state = self.state.write();
        let attached =
            merge::attach_line_items(state.collections.get_mut(CollectionKind::Orders), key, items);
        if attached {
            state.last_update = Some(SystemTime::now());
        }
        attached
    }

    /// Hides a delivered order from the snapshot view.
    pub fn exclude_order(&self, key: RecordKey) {
        self.state.write().excluded_orders.insert(key);
    }

    /// Shows a previously hidden order again.
    pub fn include_order(&self, key: &RecordKey) -> bool {
        self.state.write().excluded_orders.remove(key)
    }

    /// Sets the loading flag.
    pub fn set_loading(&self, loading: bool) {
        self.state.write().is_loading = loading;
    }

    /// Records a failure message in the stats.
    pub fn record_error(&self, message: impl Into<String>) {
        let mut state = self.state.write();
        state.is_loading = false;
        state.stats.last_error = Some(message.into());
    }

    /// Returns true once the first snapshot has been installed.
    pub fn is_initial_load_complete(&self) -> bool {
        self.state.read().initial_load_complete
    }

    /// Number of events waiting for the initial load.
    pub fn pending_len(&self) -> usize {
        self.state.read().pending.len()
    }

    /// Returns the current counters.
    pub fn stats(&self) -> SyncStats {
        self.state.read().stats.clone()
    }

    /// Runs a closure against the raw collections.
    pub fn with_collections<R>(&self, f: impl FnOnce(&Collections) -> R) -> R {
        f(&self.state.read().collections)
    }

    /// Builds the read-only view.
    pub fn snapshot(&self, is_connected: bool) -> SyncSnapshot {
        let state = self.state.read();
        let records = |kind| state.collections.get(kind).records().to_vec();

        SyncSnapshot {
            products: records(CollectionKind::Products),
            orders: state
                .collections
                .get(CollectionKind::Orders)
                .iter()
                .filter(|order| !state.excluded_orders.contains(order.key()))
                .cloned()
                .collect(),
            categories: records(CollectionKind::Categories),
            brands: records(CollectionKind::Brands),
            messages: records(CollectionKind::Messages),
            is_loading: state.is_loading,
            is_connected,
            last_update: state.last_update,
            stats: state.stats.clone(),
        }
    }
}

impl Default for SyncStore {
    fn default() -> Self {
        Self::new(1024)
    }
}
