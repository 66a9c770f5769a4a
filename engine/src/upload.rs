//! Upload of pending local changes.
//!
//! New and updated records go to the server in one batch and are held in
//! `UPLOADING` while the request is in flight. Deletions are sent one by one
//! because each needs its own identifier tuple. Per-item failures end up in
//! the [`UploadSummary`]; only storage and authentication failures are
//! returned as errors.

use crate::{
    clock::ServerClock,
    error::Result,
    propagate::{DataStatePropagator, StateChange},
    state::SyncEvent,
    store::{with_transaction, ImportConflict, LocalStore},
    transport::{DeletionKey, DimensionResolver, ImportStatus, ImportSummary, ItemOutcome, RemoteApi},
    Error, Record, ResourceType, SyncState, Timestamp, Uid,
};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

/// Overall result of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UploadOutcome {
    /// Every item was accepted or deleted
    Complete,
    /// Some items succeeded, others did not
    Partial,
    /// Nothing succeeded
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedDeletion {
    pub uid: Uid,
    pub error: String,
}

/// Itemized result of an upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    /// Accepted by the server. Records edited during the upload stay pending.
    pub synced: Vec<Uid>,
    pub warned: Vec<Uid>,
    pub rejected: Vec<Uid>,
    pub not_found: Vec<Uid>,
    /// Sent but missing from the server response
    pub unresolved: Vec<Uid>,
    pub deleted: Vec<Uid>,
    pub failed_deletions: Vec<FailedDeletion>,
    /// Set when the batch request itself failed
    pub batch_error: Option<String>,
    pub propagated: Vec<StateChange>,
}

impl UploadSummary {
    pub fn outcome(&self) -> UploadOutcome {
        let succeeded = self.synced.len() + self.warned.len() + self.deleted.len();
        let failed = self.rejected.len()
            + self.not_found.len()
            + self.unresolved.len()
            + self.failed_deletions.len();

        match (succeeded, failed, &self.batch_error) {
            (_, 0, None) => UploadOutcome::Complete,
            (0, _, _) => UploadOutcome::Failed,
            _ => UploadOutcome::Partial,
        }
    }
}

/// Submits pending records and reconciles the server's answers.
pub struct UploadOrchestrator<A, R, C> {
    api: A,
    resolver: R,
    clock: C,
    propagator: DataStatePropagator,
}

impl<A, R, C> UploadOrchestrator<A, R, C>
where
    A: RemoteApi,
    R: DimensionResolver,
    C: ServerClock,
{
    pub fn new(api: A, resolver: R, clock: C) -> Self {
        Self {
            api,
            resolver,
            clock,
            propagator: DataStatePropagator::new(),
        }
    }

    /// Upload every pending record of `resource`.
    pub fn upload_pending<S: LocalStore + ?Sized>(
        &self,
        store: &mut S,
        resource: ResourceType,
    ) -> Result<UploadSummary> {
        let mut pending = Vec::new();
        for state in [SyncState::ToPost, SyncState::ToUpdate, SyncState::ToDelete] {
            pending.extend(store.get_by_state(resource, state)?);
        }
        self.upload(store, resource, pending)
    }

    /// Upload the given records.
    pub fn upload<S: LocalStore + ?Sized>(
        &self,
        store: &mut S,
        resource: ResourceType,
        pending: Vec<Record>,
    ) -> Result<UploadSummary> {
        let mut summary = UploadSummary::default();

        let (to_delete, rest): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .filter(|r| r.resource == resource)
            .partition(|r| r.state == SyncState::ToDelete);
        let to_send: Vec<Record> = rest
            .into_iter()
            .filter(|r| matches!(r.state, SyncState::ToPost | SyncState::ToUpdate))
            .collect();

        if to_send.is_empty() && to_delete.is_empty() {
            debug!(%resource, "nothing to upload");
            return Ok(summary);
        }

        let server_time = self.clock.server_time()?;

        if !to_send.is_empty() {
            self.upload_batch(store, resource, to_send, server_time, &mut summary)?;
        }

        for record in to_delete {
            self.delete(store, record, &mut summary)?;
        }

        info!(
            %resource,
            synced = summary.synced.len(),
            rejected = summary.rejected.len() + summary.not_found.len(),
            deleted = summary.deleted.len(),
            failed_deletions = summary.failed_deletions.len(),
            outcome = ?summary.outcome(),
            "upload finished"
        );
        Ok(summary)
    }

    fn upload_batch<S: LocalStore + ?Sized>(
        &self,
        store: &mut S,
        resource: ResourceType,
        records: Vec<Record>,
        server_time: Timestamp,
        summary: &mut UploadSummary,
    ) -> Result<()> {
        let prior: HashMap<Uid, SyncState> =
            records.iter().map(|r| (r.uid.clone(), r.state)).collect();

        with_transaction(store, |s| {
            for record in &records {
                let next = record.state.transition(SyncEvent::UploadStarted)?;
                s.set_state(resource, &record.uid, next)?;
            }
            Ok(())
        })?;
        debug!(%resource, count = records.len(), "submitting batch");

        let response = match self.api.submit_batch(resource, &records) {
            Ok(response) => response,
            Err(err) => {
                with_transaction(store, |s| restore(s, resource, &prior))?;
                if err.is_cycle_fatal() {
                    error!(%resource, error = %err, "upload aborted");
                    return Err(err);
                }
                warn!(%resource, error = %err, "batch upload failed");
                summary.batch_error = Some(err.to_string());
                return Ok(());
            }
        };

        with_transaction(store, |s| {
            for record in &records {
                self.reconcile(s, record, &response, server_time, summary)?;
            }
            Ok(())
        })
    }

    /// Apply the server's verdict for one record and propagate the result.
    fn reconcile<S: LocalStore + ?Sized>(
        &self,
        store: &mut S,
        sent: &Record,
        response: &ImportSummary,
        server_time: Timestamp,
        summary: &mut UploadSummary,
    ) -> Result<()> {
        let Some(mut current) = store.get_by_id(sent.resource, &sent.uid)? else {
            debug!(uid = %sent.uid, "record removed during upload");
            return Ok(());
        };
        let modified = current.state != SyncState::Uploading;

        let Some(outcome) = response.outcome(&sent.uid) else {
            if !modified {
                current.state = current.state.recovered(current.has_server_history());
                store.set_state(current.resource, &current.uid, current.state)?;
            }
            warn!(uid = %sent.uid, "no result for uploaded record");
            summary.unresolved.push(sent.uid.clone());
            return self.propagate(store, &current, summary);
        };

        match outcome.status {
            ImportStatus::Success => {
                store.clear_conflicts(&current.uid)?;
                if !modified {
                    current.mark_synced(server_time);
                    current.state = SyncState::Uploading.transition(SyncEvent::UploadSucceeded)?;
                }
                summary.synced.push(current.uid.clone());
            }
            ImportStatus::Warning => {
                store.clear_conflicts(&current.uid)?;
                if !modified {
                    current.metadata.last_synced = Some(server_time);
                    current.state = SyncState::Uploading.transition(SyncEvent::UploadWarned)?;
                }
                record_conflicts(store, &current, outcome, server_time)?;
                summary.warned.push(current.uid.clone());
            }
            ImportStatus::Error | ImportStatus::NotFound => {
                store.clear_conflicts(&current.uid)?;
                if !modified {
                    current.state = SyncState::Uploading.transition(SyncEvent::UploadRejected)?;
                }
                record_conflicts(store, &current, outcome, server_time)?;
                if outcome.status == ImportStatus::NotFound {
                    summary.not_found.push(current.uid.clone());
                } else {
                    summary.rejected.push(current.uid.clone());
                }
            }
        }

        if modified {
            debug!(uid = %current.uid, state = %current.state, "record modified during upload");
        }
        store.upsert(current.clone())?;
        self.propagate(store, &current, summary)
    }

    fn propagate<S: LocalStore + ?Sized>(
        &self,
        store: &mut S,
        record: &Record,
        summary: &mut UploadSummary,
    ) -> Result<()> {
        let changes = self.propagator.propagate(store, record)?;
        summary.propagated.extend(changes);
        Ok(())
    }

    /// Delete one record on the server. A failure leaves the record in
    /// `TO_DELETE` for the next cycle.
    fn delete<S: LocalStore + ?Sized>(
        &self,
        store: &mut S,
        record: Record,
        summary: &mut UploadSummary,
    ) -> Result<()> {
        let result = match DeletionKey::for_record(&record, &self.resolver) {
            Ok(key) => match self.api.delete_one(&key) {
                Err(Error::NotFound { .. }) => Ok(()),
                other => other,
            },
            // A key that cannot be built never reaches the server.
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => {
                with_transaction(store, |s| {
                    s.remove(record.resource, &record.uid)?;
                    s.clear_conflicts(&record.uid)
                })?;
                debug!(uid = %record.uid, "deleted");
                summary.deleted.push(record.uid);
            }
            Err(err) if err.is_cycle_fatal() => {
                error!(uid = %record.uid, error = %err, "deletion aborted");
                return Err(err);
            }
            Err(err) => {
                warn!(uid = %record.uid, error = %err, "deletion failed");
                summary.failed_deletions.push(FailedDeletion {
                    uid: record.uid,
                    error: err.to_string(),
                });
            }
        }
        Ok(())
    }
}

fn restore<S: LocalStore + ?Sized>(
    store: &mut S,
    resource: ResourceType,
    prior: &HashMap<Uid, SyncState>,
) -> Result<()> {
    for (uid, state) in prior {
        let Some(current) = store.get_by_id(resource, uid)? else {
            continue;
        };
        // Leave records edited while the request was in flight alone.
        if current.state == SyncState::Uploading {
            store.set_state(resource, uid, *state)?;
        }
    }
    Ok(())
}

fn record_conflicts<S: LocalStore + ?Sized>(
    store: &mut S,
    record: &Record,
    outcome: &ItemOutcome,
    created: Timestamp,
) -> Result<()> {
    let conflict = |conflict: String, value, error_code| ImportConflict {
        uid: record.uid.clone(),
        resource: record.resource,
        conflict,
        value,
        error_code,
        status: record.state,
        created,
    };

    if outcome.conflicts.is_empty() {
        let message = match outcome.status {
            ImportStatus::NotFound => "not found on server".to_string(),
            other => format!("{other:?}"),
        };
        return store.record_conflict(conflict(message, None, None));
    }

    for detail in &outcome.conflicts {
        store.record_conflict(conflict(
            detail.message.clone(),
            detail.value.clone(),
            detail.error_code.clone(),
        ))?;
    }
    Ok(())
}
