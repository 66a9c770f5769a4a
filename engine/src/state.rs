//! Sync state of local records relative to the server.
//!
//! Every syncable record carries a [`SyncState`]. Local edits, uploads and
//! downloads move records between states through [`SyncState::transition`].
//!
//! ```text
//!   [TO_POST] ──upload──▶ UPLOADING ──ok──▶ SYNCED ──edit──▶ TO_UPDATE
//!                             │  │                              │
//!                             │  └─rejected─▶ ERROR ──edit──────┤
//!                             └─modified─▶ TO_UPDATE ◀──────────┘
//! ```

use crate::{error::Result, Error};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a syncable record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    /// Created locally, never sent
    ToPost,
    /// Previously synced, modified locally
    ToUpdate,
    /// Upload request in flight
    Uploading,
    Synced,
    SyncedViaSms,
    SentViaSms,
    /// Rejected by the server
    Error,
    /// Accepted by the server with warnings
    Warning,
    /// Marked for deletion, pending server confirmation
    ToDelete,
    /// Downloaded only as the target of a relationship
    Relationship,
}

/// Something that happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncEvent {
    LocalEdit,
    UploadStarted,
    UploadSucceeded,
    UploadWarned,
    UploadRejected,
    /// The record was edited while its upload was in flight.
    ModifiedDuringUpload,
    MarkedForDeletion,
    SentViaSms,
    SmsConfirmed,
    Downloaded,
}

/// What marking a record for deletion requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteAction {
    /// The server never saw the record; drop it locally.
    RemoveLocally,
    /// Keep the record as `TO_DELETE` until the server confirms.
    MarkToDelete,
}

impl SyncState {
    /// Apply an event and return the resulting state.
    pub fn transition(self, event: SyncEvent) -> Result<SyncState> {
        use SyncEvent as E;
        use SyncState as S;

        let next = match (self, event) {
            // Downloads always win: the server copy is authoritative.
            (_, E::Downloaded) => S::Synced,

            (S::ToDelete, E::LocalEdit) => return Err(self.invalid(event)),
            (S::ToPost, E::LocalEdit) => S::ToPost,
            (_, E::LocalEdit) => S::ToUpdate,

            (S::ToPost | S::ToUpdate | S::Error | S::Warning, E::UploadStarted) => S::Uploading,

            (S::Uploading, E::UploadSucceeded) => S::Synced,
            (S::Uploading, E::UploadWarned) => S::Warning,
            (S::Uploading, E::UploadRejected) => S::Error,
            (S::Uploading, E::ModifiedDuringUpload) => S::ToUpdate,
            // Outcome for a record edited mid-flight: keep it pending.
            (S::ToUpdate, E::UploadSucceeded | E::UploadWarned) => S::ToUpdate,
            (S::ToUpdate, E::UploadRejected) => S::Error,

            (
                S::ToPost | S::ToUpdate | S::Synced | S::SyncedViaSms | S::Error | S::Warning,
                E::MarkedForDeletion,
            ) => S::ToDelete,
            (S::ToDelete, E::MarkedForDeletion) => S::ToDelete,

            (S::ToPost | S::ToUpdate | S::Error | S::Warning, E::SentViaSms) => S::SentViaSms,
            (S::SentViaSms, E::SmsConfirmed) => S::SyncedViaSms,

            _ => return Err(self.invalid(event)),
        };

        Ok(next)
    }

    fn invalid(self, event: SyncEvent) -> Error {
        Error::InvalidTransition { from: self, event }
    }

    /// How a record marked for deletion should be handled.
    pub fn delete_action(self) -> DeleteAction {
        match self {
            SyncState::ToPost => DeleteAction::RemoveLocally,
            _ => DeleteAction::MarkToDelete,
        }
    }

    /// Crash-recovery mapping for a record left in `UPLOADING`.
    ///
    /// Records the server has seen before go back to `TO_UPDATE`, the rest to
    /// `TO_POST`. Any other state is returned unchanged.
    pub fn recovered(self, has_server_history: bool) -> SyncState {
        match self {
            SyncState::Uploading if has_server_history => SyncState::ToUpdate,
            SyncState::Uploading => SyncState::ToPost,
            other => other,
        }
    }

    /// Waiting to be uploaded (post, update or delete).
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            SyncState::ToPost | SyncState::ToUpdate | SyncState::ToDelete
        )
    }

    pub fn is_synced(self) -> bool {
        matches!(self, SyncState::Synced | SyncState::SyncedViaSms)
    }

    /// A child in this state requires its parent to be re-uploaded.
    pub fn propagates_to_parent(self) -> bool {
        matches!(
            self,
            SyncState::Synced
                | SyncState::SyncedViaSms
                | SyncState::ToUpdate
                | SyncState::Error
                | SyncState::Warning
        )
    }

    /// The string used on the wire and in storage.
    pub fn as_str(self) -> &'static str {
        match self {
            SyncState::ToPost => "TO_POST",
            SyncState::ToUpdate => "TO_UPDATE",
            SyncState::Uploading => "UPLOADING",
            SyncState::Synced => "SYNCED",
            SyncState::SyncedViaSms => "SYNCED_VIA_SMS",
            SyncState::SentViaSms => "SENT_VIA_SMS",
            SyncState::Error => "ERROR",
            SyncState::Warning => "WARNING",
            SyncState::ToDelete => "TO_DELETE",
            SyncState::Relationship => "RELATIONSHIP",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
