//! Change channel state machine.
//!
//! Transitions are a pure function of the current machine and an input, so
//! the subscription manager can apply them under a lock and act on the
//! returned [`ChannelAction`] afterwards.

use crate::config::ReconnectConfig;
use crate::gateway::ChannelId;
use std::fmt;
use std::time::Duration;
use storesync_model::CollectionKind;

/// Lifecycle state of a change channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    /// No channel is open.
    #[default]
    Unsubscribed,
    /// An attempt is waiting for acknowledgment.
    Subscribing,
    /// The channel is live.
    Subscribed,
    /// The last attempt failed.
    Errored,
}

impl ChannelState {
    /// Returns a short name for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Unsubscribed => "unsubscribed",
            ChannelState::Subscribing => "subscribing",
            ChannelState::Subscribed => "subscribed",
            ChannelState::Errored => "errored",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened to a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelInput {
    /// Open the channel.
    Subscribe,
    /// The transport acknowledged the current attempt.
    Acknowledged,
    /// The current attempt or live channel failed.
    Failed,
    /// The remote store refused the channel; retrying cannot help.
    Rejected,
    /// Manual retry: reset the budget and reconnect now.
    RetryNow,
    /// Close the channel for good.
    Teardown,
}

/// What the manager must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAction {
    /// Nothing.
    None,
    /// Start a new attempt with a fresh channel id.
    Connect,
    /// Start a new attempt after the delay.
    ScheduleRetry(Duration),
    /// The retry budget is spent.
    GiveUp,
    /// Remove the channel.
    Disconnect,
}

/// Channel state plus its retry bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelMachine {
    /// Current state.
    pub state: ChannelState,
    /// Retries spent since the last successful acknowledgment.
    pub retry_count: u32,
    /// True once the retry budget is spent.
    pub exhausted: bool,
}

impl ChannelMachine {
    /// Creates an unsubscribed machine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies an input, returning the next machine and the action to take.
    #[must_use]
    pub fn step(self, input: ChannelInput, config: &ReconnectConfig) -> (Self, ChannelAction) {
        use ChannelInput as I;
        use ChannelState as S;

        match (self.state, input) {
            (_, I::Teardown) => (Self::new(), ChannelAction::Disconnect),

            (S::Unsubscribed, I::Subscribe) => (
                Self {
                    state: S::Subscribing,
                    ..self
                },
                ChannelAction::Connect,
            ),
            (S::Errored, I::Subscribe) if !self.exhausted => (
                Self {
                    state: S::Subscribing,
                    ..self
                },
                ChannelAction::Connect,
            ),

            (S::Subscribing, I::Acknowledged) => (
                Self {
                    state: S::Subscribed,
                    retry_count: 0,
                    exhausted: false,
                },
                ChannelAction::None,
            ),

            (S::Subscribing | S::Subscribed, I::Failed) => {
                if self.retry_count < config.max_retries {
                    let delay = config.delay_for_retry(self.retry_count);
                    (
                        Self {
                            state: S::Errored,
                            retry_count: self.retry_count + 1,
                            exhausted: false,
                        },
                        ChannelAction::ScheduleRetry(delay),
                    )
                } else {
                    (
                        Self {
                            state: S::Errored,
                            retry_count: self.retry_count,
                            exhausted: true,
                        },
                        ChannelAction::GiveUp,
                    )
                }
            }

            (S::Subscribing | S::Subscribed, I::Rejected) => (
                Self {
                    state: S::Errored,
                    retry_count: self.retry_count,
                    exhausted: true,
                },
                ChannelAction::GiveUp,
            ),

            (S::Subscribed, I::RetryNow) => (self, ChannelAction::None),
            (_, I::RetryNow) => (
                Self {
                    state: S::Subscribing,
                    retry_count: 0,
                    exhausted: false,
                },
                ChannelAction::Connect,
            ),

            _ => (self, ChannelAction::None),
        }
    }
}

/// Read-only view of one collection's channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandle {
    /// Collection the channel serves.
    pub collection: CollectionKind,
    /// Id of the current attempt, if any.
    pub id: Option<ChannelId>,
    /// Current state.
    pub state: ChannelState,
    /// Retries spent since the last acknowledgment.
    pub retry_count: u32,
    /// True once automatic retries have stopped.
    pub exhausted: bool,
}

impl ChannelHandle {
    /// Returns true if the channel is live.
    pub fn is_subscribed(&self) -> bool {
        self.state == ChannelState::Subscribed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config() -> ReconnectConfig {
        ReconnectConfig::default()
    }

    fn run(inputs: &[ChannelInput]) -> (ChannelMachine, Vec<ChannelAction>) {
        let config = config();
        let mut machine = ChannelMachine::new();
        let mut actions = Vec::new();
        for input in inputs {
            let (next, action) = machine.step(*input, &config);
            machine = next;
            actions.push(action);
        }
        (machine, actions)
    }

    #[test]
    fn subscribe_then_acknowledge() {
        let (machine, actions) = run(&[ChannelInput::Subscribe, ChannelInput::Acknowledged]);
        assert_eq!(machine.state, ChannelState::Subscribed);
        assert_eq!(actions, vec![ChannelAction::Connect, ChannelAction::None]);
    }

    #[test]
    fn failures_back_off_exponentially() {
        let mut inputs = vec![ChannelInput::Subscribe];
        for _ in 0..6 {
            inputs.push(ChannelInput::Failed);
            inputs.push(ChannelInput::Subscribe);
        }
        let (_, actions) = run(&inputs);

        let delays: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                ChannelAction::ScheduleRetry(d) => Some(d.as_millis()),
                _ => None,
            })
            .collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000]);
    }

    #[test]
    fn gives_up_after_budget() {
        let mut inputs = vec![ChannelInput::Subscribe];
        for _ in 0..10 {
            inputs.push(ChannelInput::Failed);
            inputs.push(ChannelInput::Subscribe);
        }
        inputs.push(ChannelInput::Failed);

        let (machine, actions) = run(&inputs);
        assert_eq!(actions.last(), Some(&ChannelAction::GiveUp));
        assert!(machine.exhausted);
        assert_eq!(machine.retry_count, 10);

        // no automatic reconnect once exhausted
        let (machine, action) = machine.step(ChannelInput::Subscribe, &config());
        assert_eq!(action, ChannelAction::None);
        assert_eq!(machine.state, ChannelState::Errored);

        let (machine, action) = machine.step(ChannelInput::RetryNow, &config());
        assert_eq!(action, ChannelAction::Connect);
        assert_eq!(machine.retry_count, 0);
        assert!(!machine.exhausted);
    }

    #[test]
    fn rejection_gives_up_at_once() {
        let (machine, actions) = run(&[ChannelInput::Subscribe, ChannelInput::Rejected]);
        assert_eq!(actions.last(), Some(&ChannelAction::GiveUp));
        assert!(machine.exhausted);
        assert_eq!(machine.retry_count, 0);

        let (machine, action) = machine.step(ChannelInput::RetryNow, &config());
        assert_eq!(action, ChannelAction::Connect);
        assert!(!machine.exhausted);
    }

    #[test]
    fn acknowledgment_resets_budget() {
        let (machine, _) = run(&[
            ChannelInput::Subscribe,
            ChannelInput::Failed,
            ChannelInput::Subscribe,
            ChannelInput::Failed,
            ChannelInput::Subscribe,
            ChannelInput::Acknowledged,
        ]);
        assert_eq!(machine.retry_count, 0);
        assert_eq!(machine.state, ChannelState::Subscribed);
    }

    #[test]
    fn live_channel_ignores_retry_now() {
        let (machine, _) = run(&[ChannelInput::Subscribe, ChannelInput::Acknowledged]);
        let (next, action) = machine.step(ChannelInput::RetryNow, &config());
        assert_eq!(next, machine);
        assert_eq!(action, ChannelAction::None);
    }

    #[test]
    fn teardown_from_anywhere() {
        let (machine, _) = run(&[ChannelInput::Subscribe, ChannelInput::Failed]);
        let (next, action) = machine.step(ChannelInput::Teardown, &config());
        assert_eq!(next, ChannelMachine::new());
        assert_eq!(action, ChannelAction::Disconnect);
    }

    #[test]
    fn stray_inputs_are_ignored() {
        let machine = ChannelMachine::new();
        for input in [
            ChannelInput::Acknowledged,
            ChannelInput::Failed,
            ChannelInput::Rejected,
        ] {
            let (next, action) = machine.step(input, &config());
            assert_eq!(next, machine);
            assert_eq!(action, ChannelAction::None);
        }
    }

    fn any_input() -> impl Strategy<Value = ChannelInput> {
        prop_oneof![
            Just(ChannelInput::Subscribe),
            Just(ChannelInput::Acknowledged),
            Just(ChannelInput::Failed),
            Just(ChannelInput::Rejected),
            Just(ChannelInput::RetryNow),
            Just(ChannelInput::Teardown),
        ]
    }

    proptest! {
        #[test]
        fn budget_is_never_exceeded(inputs in prop::collection::vec(any_input(), 0..200)) {
            let config = config();
            let mut machine = ChannelMachine::new();
            for input in inputs {
                let (next, action) = machine.step(input, &config);
                prop_assert!(next.retry_count <= config.max_retries);
                if next.exhausted {
                    prop_assert_eq!(next.state, ChannelState::Errored);
                }
                if let ChannelAction::ScheduleRetry(delay) = action {
                    prop_assert!(delay <= config.max_delay);
                }
                machine = next;
            }
        }
    }
}
