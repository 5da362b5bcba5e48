//! # driftlog Sync Protocol
//!
//! Entity model and wire types for the driftlog sync engine.
//!
//! This crate provides:
//! - The entity model (`ActivityRecord`, `JournalEntry`, `SyncStatus`)
//! - Protocol messages for the batch (activity) protocol
//! - Protocol messages for the version/hash (journal) protocol
//! - `Conflict` types for divergence detection
//! - Sync token parsing and validation
//! - Load-time record validation
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod entity;
mod messages;
mod token;
mod validate;

pub use conflict::{Conflict, ConflictDetails, ConflictResolution, ConflictType};
pub use entity::{
    bucket_start_time, ActivityRecord, JournalEntry, LogicalKey, Queued, RemoteEntry, SyncStatus,
};
pub use messages::{
    ActivityBatchRequest, ActivityBatchResponse, EntryListRequest, EntrySyncRequest,
    EntrySyncResponse, FailedItem, SyncOutcome, MAX_BATCH_SIZE,
};
pub use token::{SyncToken, TokenError};
pub use validate::{validate_activity, validate_entry, Validated};
