//! # storesync engine
//!
//! Realtime synchronization engine for storefront collections.
//!
//! This crate provides:
//! - A snapshot loader with per-request timeouts and bounded retries
//! - One push channel per collection with exponential-backoff reconnect
//! - A fallback poller for periods without push delivery
//! - A merge engine that applies partial updates without losing nested
//!   line items
//! - An orchestrator tying these together behind a small API
//!
//! ## Architecture
//!
//! ```text
//!  RemoteGateway ──select──▶ SnapshotLoader ──▶ SyncStore ◀── apply task
//!        │                                                       ▲
//!        └──subscribe──▶ SubscriptionManager ──change events─────┘
//! ```
//!
//! ## Key Invariants
//!
//! - No collection ever holds two records with the same key
//! - Change events are applied in arrival order by a single task
//! - No event is applied before the first snapshot is installed
//! - An Update without `order_items` never clears an order's line items
//! - Locks are never held across an `.await`

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod channel;
mod config;
mod error;
mod gateway;
mod loader;
mod merge;
mod notice;
mod orchestrator;
mod poller;
mod store;
mod subscription;

pub use auth::{AuthState, AuthWatcher};
pub use channel::{ChannelAction, ChannelHandle, ChannelInput, ChannelMachine, ChannelState};
pub use config::{LoadConfig, PollConfig, ReconnectConfig, SyncConfig};
pub use error::{GatewayError, GatewayResult, LoadError, SyncError, SyncResult};
pub use gateway::{
    ChannelId, ChannelMessage, ChannelSink, Filter, MockGateway, MockSubscribe, RemoteGateway,
    SelectQuery, SubscriptionStatus,
};
pub use loader::SnapshotLoader;
pub use merge::{apply, apply_to, attach_line_items, ApplyOutcome};
pub use notice::Notice;
pub use orchestrator::SyncOrchestrator;
pub use poller::FallbackPoller;
pub use store::{SnapshotInstall, SyncSnapshot, SyncStats, SyncStore};
pub use subscription::{Connectivity, SubscriptionManager};
