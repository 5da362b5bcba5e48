//! # driftlog Queue
//!
//! The ordered pending queue and batch preparation for the driftlog sync
//! engine.
//!
//! This crate provides:
//! - [`SyncQueue`] — bounded FIFO sequence plus an id index, with
//!   duplicate suppression, in-place updates, and a self-healing
//!   consistency check
//! - [`prepare_batch`] — the pure function that turns the queue into a
//!   deduplicated, duration-filtered batch eligible for transmission
//!
//! The queue and its index are owned exclusively by this crate's types;
//! all mutation goes through [`SyncQueue`] methods.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod queue;

pub use batch::{prepare_batch, BatchConfig, PreparedBatch};
pub use queue::{SyncQueue, DEFAULT_CAPACITY, STUCK_THRESHOLD_MS};
