//! Fallback poller.
//!
//! While push delivery is down the poller reloads everything on a fixed
//! interval, but never sooner than `min_gap` after the previous reload of
//! any origin.

use crate::config::PollConfig;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Interval-driven reload trigger for disconnected periods.
#[derive(Debug)]
pub struct FallbackPoller {
    config: PollConfig,
    last_reload: Mutex<Option<Instant>>,
}

impl FallbackPoller {
    /// Creates a poller.
    pub fn new(config: PollConfig) -> Self {
        Self {
            config,
            last_reload: Mutex::new(None),
        }
    }

    /// Returns the poller configuration.
    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Time of the last recorded reload.
    pub fn last_reload(&self) -> Option<Instant> {
        *self.last_reload.lock()
    }

    fn gap_elapsed(&self, last: Option<Instant>, now: Instant) -> bool {
        last.map_or(true, |at| now.duration_since(at) >= self.config.min_gap)
    }

    /// Returns true if a poll tick would reload right now.
    pub fn should_poll(&self, is_connected: bool) -> bool {
        !is_connected && self.gap_elapsed(self.last_reload(), Instant::now())
    }

    /// Atomically checks the gap and records a reload if it has elapsed.
    pub fn try_claim(&self) -> bool {
        let now = Instant::now();
        let mut last = self.last_reload.lock();
        if self.gap_elapsed(*last, now) {
            *last = Some(now);
            true
        } else {
            false
        }
    }

    /// Time left until `min_gap` has passed since the last reload.
    pub fn remaining_gap(&self) -> Duration {
        self.last_reload().map_or(Duration::ZERO, |at| {
            self.config.min_gap.saturating_sub(Instant::now().duration_since(at))
        })
    }

    /// Records a reload started elsewhere.
    pub fn record_reload(&self) {
        *self.last_reload.lock() = Some(Instant::now());
    }

    /// Ticks forever, reloading when disconnected and the gap allows.
    pub async fn run<C, R, Fut>(self: Arc<Self>, is_connected: C, reload: R)
    where
        C: Fn() -> bool,
        R: Fn() -> Fut,
        Fut: Future<Output = ()>,
    {
        let period = self.config.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if is_connected() {
                continue;
            }
            if !self.try_claim() {
                debug!("skipping poll, reloaded recently");
                continue;
            }

            info!("disconnected, polling for changes");
            reload().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn spawn_poller(
        poller: Arc<FallbackPoller>,
        connected: Arc<AtomicBool>,
    ) -> (Arc<Mutex<Vec<Instant>>>, tokio::task::JoinHandle<()>) {
        let reloads = Arc::new(Mutex::new(Vec::new()));
        let log = reloads.clone();
        let handle = tokio::spawn(poller.run(
            move || connected.load(Ordering::SeqCst),
            move || {
                let log = log.clone();
                async move { log.lock().push(Instant::now()) }
            },
        ));
        (reloads, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_gap_counts_down() {
        let poller = FallbackPoller::new(PollConfig::default());
        assert_eq!(poller.remaining_gap(), Duration::ZERO);

        poller.record_reload();
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(poller.remaining_gap(), Duration::from_secs(6));

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(poller.remaining_gap(), Duration::ZERO);
    }

    #[test]
    fn claim_respects_gap() {
        let poller = FallbackPoller::new(PollConfig::default());
        assert!(poller.should_poll(false));
        assert!(!poller.should_poll(true));

        assert!(poller.try_claim());
        assert!(!poller.try_claim());
        assert!(!poller.should_poll(false));
    }

    #[tokio::test(start_paused = true)]
    async fn polls_only_while_disconnected() {
        let poller = Arc::new(FallbackPoller::new(PollConfig::default()));
        let connected = Arc::new(AtomicBool::new(true));
        let (reloads, handle) = spawn_poller(poller, connected.clone());

        tokio::time::sleep(Duration::from_secs(65)).await;
        assert!(reloads.lock().is_empty());

        connected.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(reloads.lock().len(), 2);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn never_reloads_within_min_gap() {
        let config = PollConfig::default()
            .with_interval(Duration::from_secs(3))
            .with_min_gap(Duration::from_secs(10));
        let poller = Arc::new(FallbackPoller::new(config));
        let (reloads, handle) = spawn_poller(poller, Arc::new(AtomicBool::new(false)));

        tokio::time::sleep(Duration::from_secs(31)).await;
        handle.abort();

        let times = reloads.lock().clone();
        assert_eq!(times.len(), 3);
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(10));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recent_manual_reload_defers_poll() {
        let poller = Arc::new(FallbackPoller::new(PollConfig::default()));
        let (reloads, handle) = spawn_poller(poller.clone(), Arc::new(AtomicBool::new(false)));

        tokio::time::sleep(Duration::from_secs(25)).await;
        poller.record_reload();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(reloads.lock().is_empty());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(reloads.lock().len(), 1);

        handle.abort();
    }
}
