//! Change subscription manager.
//!
//! One supervisor task owns every channel transition. Subscribe attempts,
//! message pumps and backoff timers run as their own tasks and report back
//! to the supervisor through a command queue, so transitions for a channel
//! are strictly serialised and a message from a superseded attempt can be
//! recognised by its channel id and dropped.

use crate::channel::{ChannelAction, ChannelHandle, ChannelInput, ChannelMachine, ChannelState};
use crate::config::ReconnectConfig;
use crate::error::{SyncError, SyncResult};
use crate::gateway::{ChannelId, ChannelMessage, RemoteGateway};
use crate::notice::{publish, Notice, NoticeSender};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use storesync_model::{ChangeEvent, CollectionKind};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Aggregate push connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// Every registered channel is live.
    Connected,
    /// At least one channel is not live, or none is registered.
    Disconnected,
}

enum Command {
    Subscribe {
        kinds: Vec<CollectionKind>,
        reply: oneshot::Sender<Vec<ChannelHandle>>,
    },
    Acked {
        kind: CollectionKind,
        id: ChannelId,
    },
    Failed {
        kind: CollectionKind,
        id: ChannelId,
        error: SyncError,
    },
    RetryDue {
        kind: CollectionKind,
        epoch: u64,
    },
    ForceReconnect {
        reply: oneshot::Sender<()>,
    },
    Teardown {
        reply: oneshot::Sender<()>,
    },
}

struct ChannelSlot {
    machine: ChannelMachine,
    id: Option<ChannelId>,
    since: Instant,
    attempt: Option<JoinHandle<()>>,
    retry_timer: Option<JoinHandle<()>>,
    timer_epoch: u64,
}

impl ChannelSlot {
    fn new() -> Self {
        Self {
            machine: ChannelMachine::new(),
            id: None,
            since: Instant::now(),
            attempt: None,
            retry_timer: None,
            timer_epoch: 0,
        }
    }

    fn handle(&self, collection: CollectionKind) -> ChannelHandle {
        ChannelHandle {
            collection,
            id: self.id.clone(),
            state: self.machine.state,
            retry_count: self.machine.retry_count,
            exhausted: self.machine.exhausted,
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
        self.timer_epoch += 1;
    }

    fn abort_tasks(&mut self) {
        self.cancel_timer();
        if let Some(attempt) = self.attempt.take() {
            attempt.abort();
        }
    }
}

type Slots = Arc<Mutex<BTreeMap<CollectionKind, ChannelSlot>>>;

/// Opens and supervises one change channel per collection.
pub struct SubscriptionManager {
    commands: mpsc::UnboundedSender<Command>,
    slots: Slots,
    connectivity: watch::Receiver<Connectivity>,
    supervisor: JoinHandle<()>,
}

impl SubscriptionManager {
    /// Spawns the supervisor.
    ///
    /// Change events from every channel are forwarded to `events` in
    /// arrival order.
    pub fn spawn<G: RemoteGateway>(
        gateway: Arc<G>,
        config: ReconnectConfig,
        events: mpsc::UnboundedSender<ChangeEvent>,
        notices: broadcast::Sender<Notice>,
    ) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (connectivity_tx, connectivity) = watch::channel(Connectivity::Disconnected);
        let slots: Slots = Arc::new(Mutex::new(BTreeMap::new()));

        let supervisor = Supervisor {
            gateway,
            config,
            slots: slots.clone(),
            commands: commands.clone(),
            events,
            notices,
            connectivity: connectivity_tx,
            lost: false,
        };
        let supervisor = tokio::spawn(supervisor.run(rx));

        Self {
            commands,
            slots,
            connectivity,
            supervisor,
        }
    }

    /// Opens the channel for one collection.
    pub async fn subscribe(&self, kind: CollectionKind) -> SyncResult<ChannelHandle> {
        self.subscribe_all(&[kind])
            .await?
            .pop()
            .ok_or(SyncError::ChannelClosed)
    }

    /// Registers several collections at once, then opens their channels.
    ///
    /// Subscribing to an already open collection is a no-op.
    pub async fn subscribe_all(&self, kinds: &[CollectionKind]) -> SyncResult<Vec<ChannelHandle>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Subscribe {
            kinds: kinds.to_vec(),
            reply,
        })?;
        rx.await.map_err(|_| SyncError::ChannelClosed)
    }

    /// Cancels pending backoff, resets every retry budget and reconnects
    /// all channels that are not live.
    pub async fn force_reconnect(&self) -> SyncResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ForceReconnect { reply })?;
        rx.await.map_err(|_| SyncError::ChannelClosed)
    }

    /// Removes every channel and stops the supervisor.
    pub async fn teardown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Teardown { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Returns the handle of one collection's channel.
    pub fn handle(&self, kind: CollectionKind) -> Option<ChannelHandle> {
        self.slots.lock().get(&kind).map(|slot| slot.handle(kind))
    }

    /// Returns every channel handle.
    pub fn handles(&self) -> Vec<ChannelHandle> {
        self.slots
            .lock()
            .iter()
            .map(|(kind, slot)| slot.handle(*kind))
            .collect()
    }

    /// Current aggregate connectivity.
    pub fn connectivity(&self) -> Connectivity {
        *self.connectivity.borrow()
    }

    /// Returns true if every registered channel is live.
    pub fn is_connected(&self) -> bool {
        self.connectivity() == Connectivity::Connected
    }

    /// Returns a receiver following connectivity changes.
    pub fn watch_connectivity(&self) -> watch::Receiver<Connectivity> {
        self.connectivity.clone()
    }

    fn send(&self, command: Command) -> SyncResult<()> {
        self.commands
            .send(command)
            .map_err(|_| SyncError::ChannelClosed)
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.supervisor.abort();
        for slot in self.slots.lock().values_mut() {
            slot.abort_tasks();
        }
    }
}

struct Supervisor<G> {
    gateway: Arc<G>,
    config: ReconnectConfig,
    slots: Slots,
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedSender<ChangeEvent>,
    notices: NoticeSender,
    connectivity: watch::Sender<Connectivity>,
    /// Set once connectivity dropped, cleared when it comes back.
    lost: bool,
}

impl<G: RemoteGateway> Supervisor<G> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let period = self.config.health_check_interval;
        let mut health = tokio::time::interval_at(Instant::now() + period, period);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        self.teardown_all().await;
                        return;
                    };
                    if !self.handle(command).await {
                        return;
                    }
                }
                _ = health.tick() => self.health_check().await,
            }
            self.refresh_connectivity();
        }
    }

    /// Returns false once the supervisor should stop.
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Subscribe { kinds, reply } => {
                {
                    let mut slots = self.slots.lock();
                    for kind in &kinds {
                        slots.entry(*kind).or_insert_with(ChannelSlot::new);
                    }
                }
                for kind in &kinds {
                    self.transition(*kind, ChannelInput::Subscribe).await;
                }
                let handles: Vec<ChannelHandle> = {
                    let slots = self.slots.lock();
                    kinds
                        .iter()
                        .filter_map(|kind| slots.get(kind).map(|slot| slot.handle(*kind)))
                        .collect()
                };
                let _ = reply.send(handles);
            }
            Command::Acked { kind, id } => {
                if self.is_current(kind, &id) {
                    info!(collection = %kind, channel = %id, "channel subscribed");
                    self.transition(kind, ChannelInput::Acknowledged).await;
                } else {
                    debug!(collection = %kind, channel = %id, "ignoring stale acknowledgment");
                }
            }
            Command::Failed { kind, id, error } => {
                if !self.is_current(kind, &id) {
                    debug!(collection = %kind, channel = %id, %error, "ignoring stale failure");
                } else if error.is_retryable() {
                    warn!(collection = %kind, channel = %id, %error, "channel failed");
                    self.transition(kind, ChannelInput::Failed).await;
                } else {
                    warn!(collection = %kind, channel = %id, %error, "channel refused, not retrying");
                    self.transition(kind, ChannelInput::Rejected).await;
                }
            }
            Command::RetryDue { kind, epoch } => {
                let due = {
                    let mut slots = self.slots.lock();
                    match slots.get_mut(&kind) {
                        Some(slot) if slot.timer_epoch == epoch => {
                            slot.retry_timer = None;
                            true
                        }
                        _ => false,
                    }
                };
                if due {
                    self.transition(kind, ChannelInput::Subscribe).await;
                }
            }
            Command::ForceReconnect { reply } => {
                let kinds: Vec<_> = {
                    let mut slots = self.slots.lock();
                    for slot in slots.values_mut() {
                        slot.cancel_timer();
                    }
                    slots.keys().copied().collect()
                };
                info!(channels = kinds.len(), "manual reconnect");
                for kind in kinds {
                    self.transition(kind, ChannelInput::RetryNow).await;
                }
                let _ = reply.send(());
            }
            Command::Teardown { reply } => {
                self.teardown_all().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn is_current(&self, kind: CollectionKind, id: &ChannelId) -> bool {
        self.slots
            .lock()
            .get(&kind)
            .is_some_and(|slot| slot.id.as_ref() == Some(id))
    }

    async fn transition(&mut self, kind: CollectionKind, input: ChannelInput) {
        let action = {
            let mut slots = self.slots.lock();
            let Some(slot) = slots.get_mut(&kind) else {
                return;
            };
            let (next, action) = slot.machine.step(input, &self.config);
            if next.state != slot.machine.state || action == ChannelAction::Connect {
                slot.since = Instant::now();
            }
            debug!(
                collection = %kind,
                from = %slot.machine.state,
                to = %next.state,
                ?input,
                ?action,
                "channel transition"
            );
            slot.machine = next;
            action
        };

        match action {
            ChannelAction::None => {}
            ChannelAction::Connect => self.connect(kind).await,
            ChannelAction::ScheduleRetry(delay) => {
                self.close_current(kind).await;
                self.schedule_retry(kind, delay);
            }
            ChannelAction::GiveUp => {
                self.close_current(kind).await;
                warn!(
                    collection = %kind,
                    retries = self.config.max_retries,
                    "reconnect attempts exhausted"
                );
                publish(&self.notices, Notice::ReconnectExhausted { collection: kind });
            }
            ChannelAction::Disconnect => self.close_current(kind).await,
        }
    }

    /// Aborts the current attempt and removes its channel from the gateway.
    async fn close_current(&mut self, kind: CollectionKind) {
        let id = {
            let mut slots = self.slots.lock();
            let Some(slot) = slots.get_mut(&kind) else {
                return;
            };
            if let Some(attempt) = slot.attempt.take() {
                attempt.abort();
            }
            slot.id.take()
        };
        if let Some(id) = id {
            debug!(collection = %kind, channel = %id, "removing channel");
            self.gateway.remove_channel(&id).await;
        }
    }

    async fn connect(&mut self, kind: CollectionKind) {
        self.close_current(kind).await;

        let id = ChannelId::new(kind);
        let attempt = tokio::spawn(run_attempt(
            self.gateway.clone(),
            id.clone(),
            kind,
            self.config.ack_timeout,
            self.commands.clone(),
            self.events.clone(),
        ));

        if let Some(slot) = self.slots.lock().get_mut(&kind) {
            slot.id = Some(id.clone());
            slot.attempt = Some(attempt);
        }
        debug!(collection = %kind, channel = %id, "subscribing");
    }

    fn schedule_retry(&mut self, kind: CollectionKind, delay: Duration) {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(&kind) else {
            return;
        };
        slot.cancel_timer();
        let epoch = slot.timer_epoch;
        let commands = self.commands.clone();
        slot.retry_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(Command::RetryDue { kind, epoch });
        }));
        info!(
            collection = %kind,
            attempt = slot.machine.retry_count,
            delay_ms = delay.as_millis() as u64,
            "reconnect scheduled"
        );
    }

    /// Acts on channels stuck in one state for longer than `stale_after`.
    async fn health_check(&mut self) {
        let now = Instant::now();
        let stale: Vec<_> = {
            let slots = self.slots.lock();
            slots
                .iter()
                .filter(|(_, slot)| now.duration_since(slot.since) >= self.config.stale_after)
                .filter_map(|(kind, slot)| match slot.machine.state {
                    ChannelState::Subscribing => Some((*kind, ChannelInput::Failed)),
                    ChannelState::Errored
                        if !slot.machine.exhausted && slot.retry_timer.is_none() =>
                    {
                        Some((*kind, ChannelInput::Subscribe))
                    }
                    ChannelState::Unsubscribed => Some((*kind, ChannelInput::Subscribe)),
                    _ => None,
                })
                .collect()
        };

        for (kind, input) in stale {
            warn!(collection = %kind, ?input, "health check acting on stale channel");
            self.transition(kind, input).await;
        }
    }

    fn refresh_connectivity(&mut self) {
        let next = {
            let slots = self.slots.lock();
            let all_live = slots
                .values()
                .all(|slot| slot.machine.state == ChannelState::Subscribed);
            if !slots.is_empty() && all_live {
                Connectivity::Connected
            } else {
                Connectivity::Disconnected
            }
        };

        let previous = *self.connectivity.borrow();
        if next == previous {
            return;
        }
        self.connectivity.send_replace(next);

        match next {
            Connectivity::Connected => {
                info!("all channels live");
                if self.lost {
                    self.lost = false;
                    publish(&self.notices, Notice::Reconnected);
                }
            }
            Connectivity::Disconnected => {
                warn!("push connection lost");
                self.lost = true;
                publish(&self.notices, Notice::ConnectionLost);
            }
        }
    }

    async fn teardown_all(&mut self) {
        let kinds: Vec<_> = {
            let mut slots = self.slots.lock();
            for slot in slots.values_mut() {
                slot.cancel_timer();
            }
            slots.keys().copied().collect()
        };
        for kind in kinds {
            self.transition(kind, ChannelInput::Teardown).await;
        }
        self.connectivity.send_replace(Connectivity::Disconnected);
        info!("subscriptions torn down");
    }
}

/// Subscribes, waits for acknowledgment, then pumps channel messages.
async fn run_attempt<G: RemoteGateway>(
    gateway: Arc<G>,
    id: ChannelId,
    kind: CollectionKind,
    ack_timeout: Duration,
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedSender<ChangeEvent>,
) {
    let (sink, mut messages) = mpsc::unbounded_channel();
    let fail = |id: ChannelId, error: SyncError| {
        let _ = commands.send(Command::Failed { kind, id, error });
    };
    let refused = |message: String| SyncError::Subscription {
        collection: kind,
        message,
    };

    let status = match tokio::time::timeout(ack_timeout, gateway.subscribe(&id, kind, sink)).await {
        Ok(Ok(status)) => status,
        Ok(Err(err)) => return fail(id, SyncError::Gateway(err)),
        Err(_) => return fail(id, refused("acknowledgment timed out".to_string())),
    };
    if !status.is_subscribed() {
        return fail(id, refused(status.to_string()));
    }
    if commands
        .send(Command::Acked {
            kind,
            id: id.clone(),
        })
        .is_err()
    {
        return;
    }

    while let Some(message) = messages.recv().await {
        match message {
            ChannelMessage::Change(event) => {
                if events.send(event).is_err() {
                    return;
                }
            }
            ChannelMessage::Status(status) if status.is_subscribed() => {}
            ChannelMessage::Status(status) => return fail(id, refused(status.to_string())),
        }
    }
    fail(id, refused("channel closed".to_string()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{MockGateway, MockSubscribe, SubscriptionStatus};
    use crate::notice::NOTICE_CAPACITY;
    use serde_json::json;

    struct Harness {
        gateway: Arc<MockGateway>,
        manager: SubscriptionManager,
        events: mpsc::UnboundedReceiver<ChangeEvent>,
        notices: broadcast::Receiver<Notice>,
    }

    fn harness(config: ReconnectConfig) -> Harness {
        let gateway = Arc::new(MockGateway::new());
        let (events_tx, events) = mpsc::unbounded_channel();
        let (notice_tx, notices) = broadcast::channel(NOTICE_CAPACITY);
        let manager = SubscriptionManager::spawn(gateway.clone(), config, events_tx, notice_tx);
        Harness {
            gateway,
            manager,
            events,
            notices,
        }
    }

    fn drain(notices: &mut broadcast::Receiver<Notice>) -> Vec<Notice> {
        let mut seen = Vec::new();
        while let Ok(notice) = notices.try_recv() {
            seen.push(notice);
        }
        seen
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn subscribes_and_pumps_events() {
        let mut h = harness(ReconnectConfig::default());
        let handles = h.manager.subscribe_all(&CollectionKind::ALL).await.unwrap();
        assert_eq!(handles.len(), 5);
        settle().await;

        assert!(h.manager.is_connected());
        assert!(h.manager.handles().iter().all(ChannelHandle::is_subscribed));

        let event = ChangeEvent::insert("orders", json!({"id": "o9"}));
        assert_eq!(h.gateway.push_change(CollectionKind::Orders, event.clone()), 1);
        assert_eq!(h.events.recv().await, Some(event));

        // initial connection is not a "reconnect"
        assert!(drain(&mut h.notices).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_is_idempotent() {
        let h = harness(ReconnectConfig::default());
        h.manager.subscribe(CollectionKind::Brands).await.unwrap();
        settle().await;
        let first = h.manager.handle(CollectionKind::Brands).unwrap();

        h.manager.subscribe(CollectionKind::Brands).await.unwrap();
        settle().await;
        assert_eq!(h.manager.handle(CollectionKind::Brands).unwrap().id, first.id);
        assert_eq!(h.gateway.subscribe_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn severed_channel_reconnects_with_fresh_id() {
        let mut h = harness(ReconnectConfig::default());
        h.manager.subscribe_all(&CollectionKind::ALL).await.unwrap();
        settle().await;
        let before = h.manager.handle(CollectionKind::Products).unwrap().id;

        h.gateway.sever(CollectionKind::Products);
        settle().await;
        assert!(!h.manager.is_connected());
        assert_eq!(
            h.manager.handle(CollectionKind::Products).unwrap().state,
            ChannelState::Errored
        );

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(h.manager.is_connected());
        let after = h.manager.handle(CollectionKind::Products).unwrap();
        assert_ne!(after.id, before);
        assert_eq!(after.retry_count, 0);

        assert_eq!(
            drain(&mut h.notices),
            vec![Notice::ConnectionLost, Notice::Reconnected]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn status_error_triggers_backoff() {
        let h = harness(ReconnectConfig::default());
        h.manager.subscribe(CollectionKind::Messages).await.unwrap();
        settle().await;

        h.gateway.set_default_subscribe(MockSubscribe::Reject(SubscriptionStatus::TimedOut));
        h.gateway.fail_channels(CollectionKind::Messages, "boom");
        settle().await;
        assert_eq!(h.gateway.live_channels(CollectionKind::Messages), 0);

        // retries at +1s and +2s both fail
        tokio::time::sleep(Duration::from_millis(3100)).await;
        let handle = h.manager.handle(CollectionKind::Messages).unwrap();
        assert_eq!(handle.state, ChannelState::Errored);
        assert_eq!(handle.retry_count, 3);
        assert_eq!(h.gateway.subscribe_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_stops_until_manual_retry() {
        let mut h = harness(ReconnectConfig::default());
        h.gateway
            .set_default_subscribe(MockSubscribe::Reject(SubscriptionStatus::ChannelError(
                "down".into(),
            )));
        h.manager.subscribe(CollectionKind::Orders).await.unwrap();

        // 1 + 2 + 4 + 8 + 16 + 30 * 5 seconds of backoff
        tokio::time::sleep(Duration::from_secs(200)).await;
        let handle = h.manager.handle(CollectionKind::Orders).unwrap();
        assert!(handle.exhausted);
        assert_eq!(h.gateway.subscribe_count(), 11);
        assert!(drain(&mut h.notices).contains(&Notice::ReconnectExhausted {
            collection: CollectionKind::Orders
        }));

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(h.gateway.subscribe_count(), 11);

        h.gateway.set_default_subscribe(MockSubscribe::Acknowledge);
        h.manager.force_reconnect().await.unwrap();
        settle().await;
        assert!(h.manager.is_connected());
        assert_eq!(h.manager.handle(CollectionKind::Orders).unwrap().retry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn force_reconnect_cancels_pending_backoff() {
        let h = harness(ReconnectConfig::default());
        h.gateway.script_subscribes(
            CollectionKind::Brands,
            [MockSubscribe::Error(crate::error::GatewayError::Unavailable)],
        );
        h.manager.subscribe(CollectionKind::Brands).await.unwrap();
        settle().await;
        assert_eq!(h.gateway.subscribe_count(), 1);

        h.manager.force_reconnect().await.unwrap();
        settle().await;
        assert!(h.manager.is_connected());
        assert_eq!(h.gateway.subscribe_count(), 2);

        // the cancelled timer must not start a third attempt
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.gateway.subscribe_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_subscribe_is_not_retried() {
        let mut h = harness(ReconnectConfig::default());
        h.gateway.script_subscribes(
            CollectionKind::Products,
            [MockSubscribe::Error(crate::error::GatewayError::Rejected(
                "permission denied".into(),
            ))],
        );
        h.manager.subscribe(CollectionKind::Products).await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;

        let handle = h.manager.handle(CollectionKind::Products).unwrap();
        assert!(handle.exhausted);
        assert_eq!(handle.retry_count, 0);
        assert_eq!(h.gateway.subscribe_count(), 1);
        assert!(drain(&mut h.notices).contains(&Notice::ReconnectExhausted {
            collection: CollectionKind::Products
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_subscribe_times_out() {
        let config = ReconnectConfig::default().with_ack_timeout(Duration::from_secs(10));
        let h = harness(config);
        h.gateway.script_subscribes(CollectionKind::Categories, [MockSubscribe::Hang]);
        h.manager.subscribe(CollectionKind::Categories).await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(
            h.manager.handle(CollectionKind::Categories).unwrap().state,
            ChannelState::Subscribing
        );

        // timeout at 10s, retry after 1s more
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(h.manager.is_connected());
        assert_eq!(h.gateway.subscribe_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn health_check_fails_stale_attempts() {
        let config = ReconnectConfig::default()
            .with_ack_timeout(Duration::from_secs(600))
            .with_health_check_interval(Duration::from_secs(10))
            .with_stale_after(Duration::from_secs(30));
        let h = harness(config);
        h.gateway.script_subscribes(CollectionKind::Products, [MockSubscribe::Hang]);
        h.manager.subscribe(CollectionKind::Products).await.unwrap();

        // stale at 30s, caught by the next health check, retried 1s later
        tokio::time::sleep(Duration::from_secs(42)).await;
        assert!(h.manager.is_connected());
        assert_eq!(h.gateway.subscribe_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_removes_channels() {
        let mut h = harness(ReconnectConfig::default());
        h.manager.subscribe_all(&CollectionKind::ALL).await.unwrap();
        settle().await;

        h.manager.teardown().await;
        for kind in CollectionKind::ALL {
            assert_eq!(h.gateway.live_channels(kind), 0);
        }
        assert_eq!(h.gateway.removed_count(), 5);
        assert!(h
            .manager
            .handles()
            .iter()
            .all(|handle| handle.state == ChannelState::Unsubscribed));
        assert!(!h.manager.is_connected());
        assert!(drain(&mut h.notices).is_empty());

        assert!(matches!(
            h.manager.subscribe(CollectionKind::Orders).await,
            Err(SyncError::ChannelClosed)
        ));
    }
}
