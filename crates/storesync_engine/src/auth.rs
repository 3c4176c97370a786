//! Authentication change watcher.
//!
//! Auth state tends to flicker while a session refreshes (signed in,
//! briefly signed out, signed in again). The watcher collapses each burst
//! with a debounce window and only reacts when the settled identity is a
//! different one.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Authentication state as published by the session layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    /// Signed-in user id.
    pub user: Option<String>,
    /// True when the session is authenticated.
    pub is_authenticated: bool,
}

impl AuthState {
    /// A signed-in state.
    pub fn signed_in(user: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            is_authenticated: true,
        }
    }

    /// A signed-out state.
    pub fn signed_out() -> Self {
        Self::default()
    }

    /// Returns the authenticated identity, if any.
    pub fn identity(&self) -> Option<&str> {
        if self.is_authenticated {
            self.user.as_deref()
        } else {
            None
        }
    }
}

/// Debounces auth changes and reports identity switches.
#[derive(Debug)]
pub struct AuthWatcher {
    debounce: Duration,
    last_identity: Option<String>,
}

impl AuthWatcher {
    /// Creates a watcher that treats `initial` as already seen.
    pub fn new(debounce: Duration, initial: &AuthState) -> Self {
        Self {
            debounce,
            last_identity: initial.identity().map(str::to_string),
        }
    }

    /// Returns the last identity acted on.
    pub fn last_identity(&self) -> Option<&str> {
        self.last_identity.as_deref()
    }

    /// Watches `rx` until its sender is dropped.
    ///
    /// `on_change` runs once per settled burst whose identity differs from
    /// the previous one.
    pub async fn run<F, Fut>(mut self, mut rx: watch::Receiver<AuthState>, mut on_change: F)
    where
        F: FnMut(AuthState) -> Fut,
        Fut: Future<Output = ()>,
    {
        loop {
            if rx.changed().await.is_err() {
                return;
            }

            let mut closed = false;
            loop {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            closed = true;
                            break;
                        }
                    }
                    _ = tokio::time::sleep(self.debounce) => break,
                }
            }

            let settled = rx.borrow_and_update().clone();
            let identity = settled.identity().map(str::to_string);
            if identity == self.last_identity {
                debug!(user = ?identity, "auth settled on the same identity");
            } else {
                debug!(from = ?self.last_identity, to = ?identity, "auth identity changed");
                self.last_identity = identity;
                on_change(settled).await;
            }

            if closed {
                return;
            }
        }
    }
}
