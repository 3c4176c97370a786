//! Sync orchestrator.
//!
//! Owns the store, the loader, the subscription manager, the poller and the
//! auth watcher, and wires them together:
//!
//! - every channel's change events funnel into one queue drained by a
//!   single apply task;
//! - reloads of any origin (initial, manual, poll, auth) share one
//!   in-flight load;
//! - channels are opened once, after the first successful snapshot;
//! - a reconnect after any loss of push delivery triggers a catch-up reload.

use crate::auth::{AuthState, AuthWatcher};
use crate::channel::ChannelHandle;
use crate::config::SyncConfig;
use crate::error::LoadError;
use crate::gateway::RemoteGateway;
use crate::loader::SnapshotLoader;
use crate::merge::ApplyOutcome;
use crate::notice::{publish, Notice, NoticeSender, NOTICE_CAPACITY};
use crate::poller::FallbackPoller;
use crate::store::{SyncSnapshot, SyncStats, SyncStore};
use crate::subscription::{Connectivity, SubscriptionManager};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use storesync_model::{ChangeEvent, CollectionKind, RecordKey};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type ReloadResult = Result<(), LoadError>;

#[derive(Debug, Clone, Copy)]
enum ReloadOrigin {
    Initial,
    Manual,
    Poll,
    Auth,
    Reconnect,
}

struct Inner<G: RemoteGateway> {
    config: SyncConfig,
    loader: SnapshotLoader<G>,
    store: SyncStore,
    poller: Arc<FallbackPoller>,
    subscriptions: SubscriptionManager,
    notices: NoticeSender,
    load_healthy: AtomicBool,
    channels_open: AtomicBool,
    started: AtomicBool,
    inflight: Mutex<Option<watch::Receiver<Option<ReloadResult>>>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<ChangeEvent>>>,
    auth: Mutex<Option<watch::Receiver<AuthState>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<G: RemoteGateway> Inner<G> {
    fn is_connected(&self) -> bool {
        self.subscriptions.is_connected() && self.load_healthy.load(Ordering::SeqCst)
    }

    /// Joins the in-flight reload, or starts one.
    async fn reload(self: &Arc<Self>, origin: ReloadOrigin) -> ReloadResult {
        let mut rx = {
            let mut inflight = self.inflight.lock();
            match inflight.as_ref() {
                Some(rx) => {
                    debug!(?origin, "joining in-flight reload");
                    rx.clone()
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    *inflight = Some(rx.clone());
                    let inner = self.clone();
                    tokio::spawn(async move {
                        let result = inner.run_reload(origin).await;
                        inner.inflight.lock().take();
                        let _ = tx.send(Some(result));
                    });
                    rx
                }
            }
        };

        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(result) = current {
                return result;
            }
            if rx.changed().await.is_err() {
                return Err(LoadError::FetchFailure {
                    collection: "*".to_string(),
                    message: "reload cancelled".to_string(),
                });
            }
        }
    }

    /// Waits out any in-flight reload, then reloads.
    ///
    /// For triggers that must not be served by a load which started before
    /// they fired.
    async fn reload_fresh(self: &Arc<Self>, origin: ReloadOrigin) -> ReloadResult {
        let pending = self.inflight.lock().clone();
        if let Some(mut rx) = pending {
            debug!(?origin, "waiting for in-flight reload to finish");
            let _ = rx.wait_for(Option::is_some).await;
        }
        self.reload(origin).await
    }

    async fn run_reload(self: &Arc<Self>, origin: ReloadOrigin) -> ReloadResult {
        self.poller.record_reload();
        self.store.set_loading(true);
        info!(?origin, "loading snapshot");

        match self.loader.load_all().await {
            Ok(collections) => {
                let install = self.store.install_snapshot(collections);
                if !self.load_healthy.swap(true, Ordering::SeqCst) {
                    info!("snapshot load recovered");
                }
                for (event, outcome) in &install.replayed {
                    self.after_apply(event, outcome);
                }
                if install.first_load {
                    self.open_channels().await;
                }
                Ok(())
            }
            Err(err) => {
                warn!(?origin, error = %err, "snapshot load failed");
                self.load_healthy.store(false, Ordering::SeqCst);
                self.store.record_error(err.to_string());
                publish(
                    &self.notices,
                    Notice::LoadFailed {
                        message: err.to_string(),
                    },
                );
                Err(err)
            }
        }
    }

    async fn open_channels(&self) {
        if self.channels_open.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.subscriptions.subscribe_all(&CollectionKind::ALL).await {
            warn!(error = %err, "could not open change channels");
            self.channels_open.store(false, Ordering::SeqCst);
        }
    }

    fn apply(self: &Arc<Self>, event: &ChangeEvent) {
        match self.store.apply_event(event) {
            Ok(outcome) => {
                debug!(collection = %event.collection, kind = event.kind.as_str(), ?outcome, "change applied");
                self.after_apply(event, &outcome);
            }
            Err(err) => {
                warn!(collection = %event.collection, error = %err, "dropping change event");
            }
        }
    }

    /// Fetches line items for orders inserted without them.
    fn after_apply(self: &Arc<Self>, event: &ChangeEvent, outcome: &ApplyOutcome) {
        let ApplyOutcome::Inserted {
            key,
            needs_line_items: true,
        } = outcome
        else {
            return;
        };

        let inner = Arc::downgrade(self);
        let key = key.clone();
        let collection = event.collection.clone();
        tokio::spawn(async move {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            match inner.loader.fetch_line_items(&key).await {
                Ok(items) => {
                    if !inner.store.attach_line_items(&key, items) {
                        debug!(%collection, order = %key, "order gone before its items arrived");
                    }
                }
                Err(err) => {
                    warn!(%collection, order = %key, error = %err, "could not fetch line items");
                }
            }
        });
    }
}

async fn apply_loop<G: RemoteGateway>(
    inner: Weak<Inner<G>>,
    mut events: mpsc::UnboundedReceiver<ChangeEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.apply(&event);
    }
}

/// Keeps storefront collections in sync with the remote store.
pub struct SyncOrchestrator<G: RemoteGateway> {
    inner: Arc<Inner<G>>,
}

impl<G: RemoteGateway> SyncOrchestrator<G> {
    /// Creates an orchestrator. Must be called within a Tokio runtime.
    pub fn new(gateway: Arc<G>, config: SyncConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        let subscriptions = SubscriptionManager::spawn(
            gateway.clone(),
            config.reconnect.clone(),
            events_tx,
            notices.clone(),
        );

        let inner = Inner {
            loader: SnapshotLoader::new(gateway, config.load.clone()),
            store: SyncStore::new(config.max_pending_events),
            poller: Arc::new(FallbackPoller::new(config.poll.clone())),
            subscriptions,
            notices,
            load_healthy: AtomicBool::new(false),
            channels_open: AtomicBool::new(false),
            started: AtomicBool::new(false),
            inflight: Mutex::new(None),
            events: Mutex::new(Some(events_rx)),
            auth: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            config,
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Reloads when the authenticated identity changes.
    pub fn with_auth(self, auth: watch::Receiver<AuthState>) -> Self {
        *self.inner.auth.lock() = Some(auth);
        self
    }

    /// Runs the initial load and arms the background tasks.
    ///
    /// The poller and auth watcher are armed even when the load fails; the
    /// first later successful reload completes the initial load. Calling
    /// `start` again is a no-op.
    pub async fn start(&self) -> Result<(), LoadError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(events) = self.inner.events.lock().take() {
            let task = tokio::spawn(apply_loop(Arc::downgrade(&self.inner), events));
            self.inner.tasks.lock().push(task);
        }
        self.spawn_auth_watcher();
        self.spawn_reconnect_watcher();

        let result = self.inner.reload(ReloadOrigin::Initial).await;
        self.spawn_poller();
        result
    }

    fn spawn_poller(&self) {
        let connected = Arc::downgrade(&self.inner);
        let reloader = Arc::downgrade(&self.inner);
        let poller = self.inner.poller.clone();

        let task = tokio::spawn(poller.run(
            move || connected.upgrade().is_some_and(|inner| inner.is_connected()),
            move || {
                let inner = reloader.upgrade();
                async move {
                    if let Some(inner) = inner {
                        let _ = inner.reload(ReloadOrigin::Poll).await;
                    }
                }
            },
        ));
        self.inner.tasks.lock().push(task);
    }

    /// Arms the auth watcher with the identity the initial load runs under.
    fn spawn_auth_watcher(&self) {
        let Some(mut auth) = self.inner.auth.lock().take() else {
            return;
        };

        let initial = auth.borrow_and_update().clone();
        let watcher = AuthWatcher::new(self.inner.config.auth_debounce, &initial);
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(watcher.run(auth, move |state| {
            let inner = weak.upgrade();
            async move {
                if let Some(inner) = inner {
                    info!(user = ?state.identity(), "identity changed, reloading");
                    let _ = inner.reload_fresh(ReloadOrigin::Auth).await;
                }
            }
        }));
        self.inner.tasks.lock().push(task);
    }

    /// Reloads once push delivery comes back after a loss.
    ///
    /// Rows committed while a channel was down never arrive as events, so
    /// they are fetched here. The reload waits out `min_gap` like a poll.
    fn spawn_reconnect_watcher(&self) {
        let mut connectivity = self.inner.subscriptions.watch_connectivity();
        let weak = Arc::downgrade(&self.inner);

        let task = tokio::spawn(async move {
            let mut seen_connected = *connectivity.borrow_and_update() == Connectivity::Connected;
            while connectivity.changed().await.is_ok() {
                let state = *connectivity.borrow_and_update();
                if state != Connectivity::Connected {
                    continue;
                }
                // Connected is only republished after a Disconnected, even
                // when both changes landed before this task observed them.
                if !std::mem::replace(&mut seen_connected, true) {
                    continue;
                }

                let Some(wait) = weak.upgrade().map(|inner| inner.poller.remaining_gap()) else {
                    return;
                };
                if !wait.is_zero() {
                    debug!(wait_ms = wait.as_millis() as u64, "delaying catch-up reload");
                    tokio::time::sleep(wait).await;
                }
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                info!("push delivery restored, catching up");
                let _ = inner.reload_fresh(ReloadOrigin::Reconnect).await;
            }
        });
        self.inner.tasks.lock().push(task);
    }

    /// Reloads everything now. Concurrent calls share one load.
    pub async fn refresh(&self) -> Result<(), LoadError> {
        self.inner.reload(ReloadOrigin::Manual).await
    }

    /// Reconnects every channel now, and reloads if the last load failed.
    pub async fn retry_now(&self) -> Result<(), LoadError> {
        if let Err(err) = self.inner.subscriptions.force_reconnect().await {
            warn!(error = %err, "manual reconnect failed");
        }
        if self.inner.load_healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            self.refresh().await
        }
    }

    /// Returns the read-only view of the synchronized state.
    pub fn state(&self) -> SyncSnapshot {
        self.inner.store.snapshot(self.is_connected())
    }

    /// Returns the store counters.
    pub fn stats(&self) -> SyncStats {
        self.inner.store.stats()
    }

    /// Hides a delivered order from [`SyncOrchestrator::state`].
    pub fn exclude_delivered_order(&self, key: impl Into<RecordKey>) {
        self.inner.store.exclude_order(key.into());
    }

    /// Shows a hidden order again.
    pub fn include_delivered_order(&self, key: impl Into<RecordKey>) -> bool {
        self.inner.store.include_order(&key.into())
    }

    /// Subscribes to user-facing notices.
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.inner.notices.subscribe()
    }

    /// Returns the channel handles.
    pub fn channel_handles(&self) -> Vec<ChannelHandle> {
        self.inner.subscriptions.handles()
    }

    /// True when every channel is live and the last load succeeded.
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Stops background tasks and removes every channel.
    pub async fn shutdown(&self) {
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        self.inner.subscriptions.teardown().await;
        info!("sync stopped");
    }
}

impl<G: RemoteGateway> Drop for SyncOrchestrator<G> {
    fn drop(&mut self) {
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
    }
}
