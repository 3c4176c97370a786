//! User-facing notices.

use std::fmt;
use storesync_model::CollectionKind;
use tokio::sync::broadcast;

/// Capacity of the notice broadcast channel.
pub(crate) const NOTICE_CAPACITY: usize = 64;

/// A condition worth surfacing to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Live updates stopped.
    ConnectionLost,
    /// Live updates resumed after a loss.
    Reconnected,
    /// A channel stopped retrying; only a manual retry brings it back.
    ReconnectExhausted {
        /// Collection whose channel gave up.
        collection: CollectionKind,
    },
    /// A snapshot load failed.
    LoadFailed {
        /// Failure description.
        message: String,
    },
}

impl Notice {
    /// Short text suitable for a toast.
    pub fn message(&self) -> String {
        match self {
            Notice::ConnectionLost => "Connection lost. Trying to reconnect...".to_string(),
            Notice::Reconnected => "Connection restored".to_string(),
            Notice::ReconnectExhausted { collection } => {
                format!(
                    "Live updates for {collection} are paused. Data keeps refreshing automatically in the background"
                )
            }
            Notice::LoadFailed { message } => format!("Failed to load data: {message}"),
        }
    }

    /// Returns true if the notice should offer a "retry now" action.
    pub fn offers_retry(&self) -> bool {
        matches!(
            self,
            Notice::ReconnectExhausted { .. } | Notice::LoadFailed { .. }
        )
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Sender side of the notice channel.
pub(crate) type NoticeSender = broadcast::Sender<Notice>;

/// Publishes a notice, ignoring the no-receiver case.
pub(crate) fn publish(sender: &NoticeSender, notice: Notice) {
    tracing::debug!(%notice, "notice");
    let _ = sender.send(notice);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_offered_for_failures_only() {
        assert!(!Notice::ConnectionLost.offers_retry());
        assert!(!Notice::Reconnected.offers_retry());
        assert!(Notice::ReconnectExhausted {
            collection: CollectionKind::Orders
        }
        .offers_retry());
        assert!(Notice::LoadFailed {
            message: "timeout".into()
        }
        .offers_retry());
    }

    #[test]
    fn messages_name_the_cause() {
        let notice = Notice::ReconnectExhausted {
            collection: CollectionKind::Messages,
        };
        assert!(notice.to_string().contains("messages"));
        assert!(notice.to_string().contains("refreshing automatically"));

        let notice = Notice::LoadFailed {
            message: "fetching products timed out".into(),
        };
        assert!(notice.message().contains("timed out"));
    }

    #[test]
    fn publish_without_receivers_is_fine() {
        let (tx, rx) = broadcast::channel(NOTICE_CAPACITY);
        drop(rx);
        publish(&tx, Notice::Reconnected);
    }
}
