//! # driftlog Sync Engine
//!
//! The sync cycle driver for driftlog.
//!
//! This crate provides:
//! - [`SyncEngine`] — the facade wiring queue, store, transport, and
//!   conflict handling together via constructor injection
//! - Batch push with exponential-backoff retry and partial-failure requeue
//! - Two conflict-reconciliation strategies behind [`SyncStrategy`]:
//!   timestamp-based pull ([`TimestampStrategy`]) and whole-collection
//!   version/hash ([`VersionStrategy`])
//! - The FIFO [`ConflictQueue`] that blocks sync until resolution
//! - The [`PeriodicScheduler`] driving automatic pull-then-push cycles
//! - A best-effort [`EventBus`] for UI observers
//!
//! ## Architecture
//!
//! One sync cycle per collection may be in flight at a time; a concurrent
//! call is a no-op, not an error. Every failure mode converts into a
//! state transition plus a logged event; nothing panics across the
//! producer boundary. Durable-store writes are the last step of every
//! requeue path, so a crash between server ack and persist cannot lose a
//! requeue.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod conflicts;
mod engine;
mod error;
mod events;
mod http;
mod scheduler;
mod strategy;
mod transport;

pub use config::{
    RetryConfig, SettingsSource, SharedSettings, StaticSettings, SyncConfig, SyncSettings,
};
pub use conflicts::ConflictQueue;
pub use engine::{CycleOutcome, CycleState, SyncEngine, SyncReport, SyncStats};
pub use error::{SyncError, SyncResult};
pub use events::{EventBus, SyncEvent};
pub use http::{HttpClient, HttpResponse, HttpTransport, TOKEN_HEADER};
pub use scheduler::PeriodicScheduler;
pub use strategy::{EntryReport, StrategyContext, SyncStrategy, TimestampStrategy, VersionStrategy};
pub use transport::{MockTransport, SyncTransport};
