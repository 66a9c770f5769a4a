//! # D2 Engine
//!
//! Offline sync and expression engine for DHIS2 mobile clients.
//!
//! This crate holds the logic a mobile client needs to work offline and
//! reconcile with a DHIS2 server later: per-record sync states, propagation
//! of state changes up the tracker ancestry, paginated downloads with limits,
//! batched uploads with per-item outcomes, and the expression language used
//! by validation rules, program indicators and program rules.
//!
//! ## Design Principles
//!
//! - **No IO of its own**: the server and the device database sit behind the
//!   [`RemoteApi`] and [`LocalStore`] traits
//! - **Server time**: watermarks and sync stamps come from a [`ServerClock`]
//! - **Transactional**: every multi-row state change commits or rolls back
//!   as a unit
//!
//! ## Core Concepts
//!
//! ### Sync States
//!
//! Every syncable [`Record`] carries a [`SyncState`]. Local edits, uploads
//! and downloads move records between states through
//! [`SyncState::transition`].
//!
//! ### Propagation
//!
//! Tracker data forms a tree:
//!
//! ```text
//! TrackedEntityInstance ◀ Enrollment ◀ Event ◀ TrackedEntityDataValue
//! ```
//!
//! A change on a child forces its ancestors to be uploaded again. The
//! [`DataStatePropagator`] walks the ancestry in the same transaction as the
//! write.
//!
//! ### Downloads and Uploads
//!
//! [`DownloadOrchestrator`] splits a download into (org unit, program)
//! combinations and pages each of them with [`compute_pages`].
//! [`UploadOrchestrator`] posts pending records in one batch, applies the
//! server verdict per item and deletes records marked for deletion one by
//! one.
//!
//! ### Expressions
//!
//! The [`expression`] module parses and evaluates the DHIS2 expression
//! language. [`validation`] builds validation rules and program indicators on
//! top of it.
//!
//! ## Quick Start
//!
//! ```rust
//! use d2_engine::{DataStatePropagator, LocalStore, MemoryStore, Record, ResourceType, SyncState};
//! use chrono::Utc;
//! use serde_json::json;
//!
//! let now = Utc::now();
//! let mut store = MemoryStore::new();
//! let propagator = DataStatePropagator::new();
//!
//! // A synced enrollment downloaded from the server
//! let enrollment = Record::new_remote("enr1", ResourceType::Enrollment, None, json!({}), now);
//! propagator.save_and_propagate(&mut store, enrollment).unwrap();
//!
//! // An event edited on the device
//! let mut event = Record::new_remote("ev1", ResourceType::Event, Some("enr1".into()), json!({}), now);
//! event.state = SyncState::ToUpdate;
//! propagator.save_and_propagate(&mut store, event).unwrap();
//!
//! let enrollment = store.get_by_id(ResourceType::Enrollment, "enr1").unwrap().unwrap();
//! assert_eq!(enrollment.state, SyncState::ToUpdate);
//! ```
//!
//! ## FFI
//!
//! The [`ffi`] module provides C-compatible functions for use from other languages
//! (Kotlin, Swift, Dart). All data is exchanged as JSON strings.
//!
//! ## Persistence
//!
//! Use [`StoreSnapshot::capture`] and [`StoreSnapshot::restore`] to persist a
//! [`MemoryStore`]. Snapshots are serializable to JSON with deterministic ordering.

pub mod clock;
pub mod config;
pub mod download;
pub mod error;
pub mod expression;
pub mod ffi;
pub mod logging;
pub mod paging;
pub mod progress;
pub mod propagate;
pub mod record;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod transport;
pub mod upload;
pub mod validation;

// Re-export main types at crate root
pub use clock::{FixedClock, ServerClock, SystemClock};
pub use config::{ConfigError, SyncConfig};
pub use download::{
    CancellationToken, CombinationFailure, DownloadOrchestrator, DownloadParams, DownloadReport,
    DownloadScope, QueryBundle,
};
pub use error::{Error, ExpressionError, Result};
pub use expression::{evaluate, Context, Expression, Value};
pub use paging::{compute_pages, Page, Pages};
pub use progress::{ProgressManager, SyncProgress};
pub use propagate::{DataStatePropagator, StateChange};
pub use record::{Metadata, Record, ResourceType};
pub use snapshot::{SnapshotMetadata, StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use state::{DeleteAction, SyncEvent, SyncState};
pub use store::{with_transaction, Collection, ImportConflict, LocalStore, MemoryStore};
pub use transport::{
    CategoryDimension, ConflictDetail, DeletionKey, DimensionResolver, FetchQuery, FetchedPage,
    ImportStatus, ImportSummary, ItemOutcome, OuMode, RemoteApi,
};
pub use upload::{FailedDeletion, UploadOrchestrator, UploadOutcome, UploadSummary};
pub use validation::{ProgramIndicator, ValidationRule, Violation};

/// Type aliases for clarity
pub type Uid = String;
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Propagate the state of a stored record to its ancestors in one
/// transaction.
pub fn propagate_state_change<S: LocalStore + ?Sized>(
    store: &mut S,
    record: &Record,
) -> Result<Vec<StateChange>> {
    with_transaction(store, |s| DataStatePropagator::new().propagate(s, record))
}
