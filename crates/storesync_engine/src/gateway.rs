//! Remote data gateway abstraction.
//!
//! The engine talks to the hosted store through [`RemoteGateway`]: bulk
//! selects for snapshots, and per-collection change channels for push
//! updates. [`MockGateway`] is an in-memory implementation for tests.

use crate::error::{GatewayError, GatewayResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::time::Duration;
use storesync_model::{ChangeEvent, CollectionKind, RecordKey, SortOrder};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Equality filter on a key-valued column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    /// Column name.
    pub column: String,
    /// Key the column must equal.
    pub equals: RecordKey,
}

impl Filter {
    /// Returns true if the row matches.
    pub fn matches(&self, row: &Value) -> bool {
        row.get(&self.column)
            .and_then(|v| RecordKey::from_value(v).ok())
            .is_some_and(|key| key == self.equals)
    }
}

/// A select request against one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectQuery {
    /// Table name.
    pub table: String,
    /// Optional equality filter.
    pub filter: Option<Filter>,
    /// Optional sort.
    pub order: Option<SortOrder>,
}

impl SelectQuery {
    /// Selects every row of a table.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: None,
            order: None,
        }
    }

    /// Bulk snapshot query for a collection, in its default order.
    pub fn for_collection(kind: CollectionKind) -> Self {
        Self::table(kind.table()).order_by(kind.default_order())
    }

    /// Adds an equality filter.
    pub fn filter_eq(mut self, column: impl Into<String>, equals: RecordKey) -> Self {
        self.filter = Some(Filter {
            column: column.into(),
            equals,
        });
        self
    }

    /// Sets the sort.
    pub fn order_by(mut self, order: SortOrder) -> Self {
        self.order = Some(order);
        self
    }
}

/// Status reported for a change channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// The channel is live.
    Subscribed,
    /// The transport reported an error.
    ChannelError(String),
    /// The transport gave up waiting.
    TimedOut,
    /// The channel was closed by the remote side.
    Closed,
}

impl SubscriptionStatus {
    /// Returns true for the live status.
    pub fn is_subscribed(&self) -> bool {
        matches!(self, SubscriptionStatus::Subscribed)
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionStatus::Subscribed => f.write_str("subscribed"),
            SubscriptionStatus::ChannelError(reason) => write!(f, "channel error: {reason}"),
            SubscriptionStatus::TimedOut => f.write_str("timed out"),
            SubscriptionStatus::Closed => f.write_str("closed"),
        }
    }
}

/// A message delivered on a change channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    /// A change to the subscribed collection.
    Change(ChangeEvent),
    /// A status update for the channel.
    Status(SubscriptionStatus),
}

/// Where a gateway delivers a channel's messages.
pub type ChannelSink = mpsc::UnboundedSender<ChannelMessage>;

/// Identifier of one subscription attempt.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ChannelId(String);

impl ChannelId {
    /// Creates a fresh id for a collection.
    pub fn new(kind: CollectionKind) -> Self {
        Self(format!("{kind}-changes-{}", Uuid::new_v4()))
    }

    /// Returns the id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({})", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The hosted store as seen by the engine.
#[async_trait]
pub trait RemoteGateway: Send + Sync + 'static {
    /// Runs a select and returns the matching rows.
    async fn select(&self, query: SelectQuery) -> GatewayResult<Vec<Value>>;

    /// Opens a change channel and waits for the transport acknowledgment.
    ///
    /// Changes and later status updates are delivered through `sink` for
    /// as long as the channel lives.
    async fn subscribe(
        &self,
        id: &ChannelId,
        kind: CollectionKind,
        sink: ChannelSink,
    ) -> GatewayResult<SubscriptionStatus>;

    /// Removes a channel. Unknown ids are ignored.
    async fn remove_channel(&self, id: &ChannelId);
}

/// How [`MockGateway`] answers a subscribe call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockSubscribe {
    /// Acknowledge and keep the channel live.
    Acknowledge,
    /// Return the given non-live status.
    Reject(SubscriptionStatus),
    /// Fail the call itself.
    Error(GatewayError),
    /// Never answer.
    Hang,
}

struct LiveChannel {
    kind: CollectionKind,
    sink: ChannelSink,
}

/// An in-memory gateway for tests.
pub struct MockGateway {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    failing_selects: Mutex<HashMap<Option<String>, u32>>,
    select_delay: Mutex<Duration>,
    default_subscribe: Mutex<MockSubscribe>,
    scripted_subscribes: Mutex<HashMap<CollectionKind, VecDeque<MockSubscribe>>>,
    channels: Mutex<HashMap<ChannelId, LiveChannel>>,
    select_log: Mutex<Vec<SelectQuery>>,
    subscribe_calls: AtomicUsize,
    removed_channels: AtomicUsize,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    /// Creates an empty gateway that acknowledges every subscription.
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            failing_selects: Mutex::new(HashMap::new()),
            select_delay: Mutex::new(Duration::ZERO),
            default_subscribe: Mutex::new(MockSubscribe::Acknowledge),
            scripted_subscribes: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            select_log: Mutex::new(Vec::new()),
            subscribe_calls: AtomicUsize::new(0),
            removed_channels: AtomicUsize::new(0),
        }
    }

    /// Replaces a table's rows.
    pub fn set_table(&self, table: impl Into<String>, rows: Vec<Value>) {
        self.tables.lock().insert(table.into(), rows);
    }

    /// Appends a row to a table.
    pub fn insert_row(&self, table: &str, row: Value) {
        self.tables
            .lock()
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    /// Fails the next `count` selects on any table.
    pub fn fail_next_selects(&self, count: u32) {
        self.failing_selects.lock().insert(None, count);
    }

    /// Fails the next `count` selects on one table.
    pub fn fail_table(&self, table: impl Into<String>, count: u32) {
        self.failing_selects.lock().insert(Some(table.into()), count);
    }

    /// Delays every select.
    pub fn set_select_delay(&self, delay: Duration) {
        *self.select_delay.lock() = delay;
    }

    /// Sets the answer used when no scripted answer is queued.
    pub fn set_default_subscribe(&self, behaviour: MockSubscribe) {
        *self.default_subscribe.lock() = behaviour;
    }

    /// Queues answers for upcoming subscribes of one collection.
    pub fn script_subscribes(
        &self,
        kind: CollectionKind,
        answers: impl IntoIterator<Item = MockSubscribe>,
    ) {
        self.scripted_subscribes
            .lock()
            .entry(kind)
            .or_default()
            .extend(answers);
    }

    /// Delivers a change to every live channel of a collection.
    ///
    /// Returns the number of channels that received it.
    pub fn push_change(&self, kind: CollectionKind, event: ChangeEvent) -> usize {
        self.broadcast(kind, ChannelMessage::Change(event))
    }

    /// Reports a channel error on every live channel of a collection.
    pub fn fail_channels(&self, kind: CollectionKind, reason: &str) -> usize {
        self.broadcast(
            kind,
            ChannelMessage::Status(SubscriptionStatus::ChannelError(reason.to_string())),
        )
    }

    /// Drops the live channels of a collection without any status message.
    pub fn sever(&self, kind: CollectionKind) -> usize {
        let mut channels = self.channels.lock();
        let before = channels.len();
        channels.retain(|_, live| live.kind != kind);
        before - channels.len()
    }

    /// Drops every live channel.
    pub fn sever_all(&self) -> usize {
        let mut channels = self.channels.lock();
        let count = channels.len();
        channels.clear();
        count
    }

    /// Number of live channels for a collection.
    pub fn live_channels(&self, kind: CollectionKind) -> usize {
        self.channels
            .lock()
            .values()
            .filter(|live| live.kind == kind && !live.sink.is_closed())
            .count()
    }

    /// Total selects issued.
    pub fn select_count(&self) -> usize {
        self.select_log.lock().len()
    }

    /// Selects issued against one table.
    pub fn select_count_for(&self, table: &str) -> usize {
        self.select_log
            .lock()
            .iter()
            .filter(|q| q.table == table)
            .count()
    }

    /// Every select issued, in order.
    pub fn selects(&self) -> Vec<SelectQuery> {
        self.select_log.lock().clone()
    }

    /// Total subscribe calls.
    pub fn subscribe_count(&self) -> usize {
        self.subscribe_calls.load(AtomicOrdering::SeqCst)
    }

    /// Total remove_channel calls for known channels.
    pub fn removed_count(&self) -> usize {
        self.removed_channels.load(AtomicOrdering::SeqCst)
    }

    fn broadcast(&self, kind: CollectionKind, message: ChannelMessage) -> usize {
        let mut channels = self.channels.lock();
        channels.retain(|_, live| !live.sink.is_closed());
        channels
            .values()
            .filter(|live| live.kind == kind)
            .filter(|live| live.sink.send(message.clone()).is_ok())
            .count()
    }

    fn take_failure(&self, table: &str) -> bool {
        let mut failing = self.failing_selects.lock();
        for key in [Some(table.to_string()), None] {
            if let Some(remaining) = failing.get_mut(&key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return true;
                }
            }
        }
        false
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

#[async_trait]
impl RemoteGateway for MockGateway {
    async fn select(&self, query: SelectQuery) -> GatewayResult<Vec<Value>> {
        self.select_log.lock().push(query.clone());

        let delay = *self.select_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.take_failure(&query.table) {
            return Err(GatewayError::Request(format!(
                "injected failure for {}",
                query.table
            )));
        }

        let mut rows: Vec<Value> = self
            .tables
            .lock()
            .get(&query.table)
            .cloned()
            .unwrap_or_default();

        if let Some(filter) = &query.filter {
            rows.retain(|row| filter.matches(row));
        }
        if let Some(order) = query.order {
            rows.sort_by(|a, b| {
                let ord = compare_values(a.get(order.column), b.get(order.column));
                if order.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }
        Ok(rows)
    }

    async fn subscribe(
        &self,
        id: &ChannelId,
        kind: CollectionKind,
        sink: ChannelSink,
    ) -> GatewayResult<SubscriptionStatus> {
        self.subscribe_calls.fetch_add(1, AtomicOrdering::SeqCst);

        let scripted = self
            .scripted_subscribes
            .lock()
            .get_mut(&kind)
            .and_then(VecDeque::pop_front);
        let behaviour = scripted.unwrap_or_else(|| self.default_subscribe.lock().clone());

        match behaviour {
            MockSubscribe::Acknowledge => {
                self.channels
                    .lock()
                    .insert(id.clone(), LiveChannel { kind, sink });
                Ok(SubscriptionStatus::Subscribed)
            }
            MockSubscribe::Reject(status) => Ok(status),
            MockSubscribe::Error(err) => Err(err),
            MockSubscribe::Hang => {
                std::future::pending::<()>().await;
                Ok(SubscriptionStatus::TimedOut)
            }
        }
    }

    async fn remove_channel(&self, id: &ChannelId) {
        if self.channels.lock().remove(id).is_some() {
            self.removed_channels.fetch_add(1, AtomicOrdering::SeqCst);
        }
    }
}
