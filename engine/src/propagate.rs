//! Propagation of state changes up the tracker ancestry.
//!
//! A change on an event or data value means the enclosing enrollment and
//! tracked entity instance must be uploaded again. Parents are found by
//! identifier lookup, one level at a time:
//!
//! ```text
//! TrackedEntityDataValue ─▶ Event ─▶ Enrollment ─▶ TrackedEntityInstance
//! ```
//!
//! Call these functions inside the same transaction as the write that
//! triggered them, or use [`DataStatePropagator::save_and_propagate`].

use crate::{
    error::Result,
    store::{with_transaction, LocalStore},
    Record, ResourceType, SyncState, Uid,
};
use serde::Serialize;
use tracing::{debug, warn};

/// A state change applied to a stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    pub resource: ResourceType,
    pub uid: Uid,
    pub from: SyncState,
    pub to: SyncState,
}

/// Recomputes ancestor states after a record changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataStatePropagator;

impl DataStatePropagator {
    pub fn new() -> Self {
        Self
    }

    /// State a parent must take after one of its children changed.
    ///
    /// A parent still waiting to be created already carries all of its
    /// children, and one waiting for deletion has nothing left to update.
    pub fn parent_state(parent: SyncState) -> SyncState {
        match parent {
            SyncState::ToPost | SyncState::ToDelete => parent,
            _ => SyncState::ToUpdate,
        }
    }

    /// Walk up from `changed`, forcing ancestors to `TO_UPDATE`.
    ///
    /// Returns the changes that were written. Calling it again with no
    /// intervening change returns an empty list.
    pub fn propagate<S>(&self, store: &mut S, changed: &Record) -> Result<Vec<StateChange>>
    where
        S: LocalStore + ?Sized,
    {
        let mut changes = Vec::new();
        let mut child_state = changed.state;
        let mut resource = changed.resource;
        let mut parent_uid = changed.parent.clone();

        while child_state.propagates_to_parent() {
            let (Some(parent_type), Some(uid)) = (resource.parent_type(), parent_uid.take())
            else {
                break;
            };

            let Some(parent) = store.get_by_id(parent_type, &uid)? else {
                warn!(resource = %parent_type, uid = %uid, "parent not found, stopping propagation");
                break;
            };

            let next = Self::parent_state(parent.state);
            if next != parent.state {
                store.set_state(parent_type, &uid, next)?;
                debug!(resource = %parent_type, uid = %uid, from = %parent.state, to = %next, "propagated state");
                changes.push(StateChange {
                    resource: parent_type,
                    uid: uid.clone(),
                    from: parent.state,
                    to: next,
                });
            }

            child_state = next;
            resource = parent_type;
            parent_uid = parent.parent;
        }

        Ok(changes)
    }

    /// Persist `record` and propagate its state in one transaction.
    pub fn save_and_propagate<S>(&self, store: &mut S, record: Record) -> Result<Vec<StateChange>>
    where
        S: LocalStore + ?Sized,
    {
        with_transaction(store, |s| {
            s.upsert(record.clone())?;
            self.propagate(s, &record)
        })
    }

    /// Heal enrollments and events under a tracked entity instance that were
    /// left in `UPLOADING` by an interrupted upload.
    pub fn reset_uploading_states<S>(&self, store: &mut S, tei_uid: &str) -> Result<Vec<StateChange>>
    where
        S: LocalStore + ?Sized,
    {
        let mut changes = Vec::new();

        for enrollment in store.children(ResourceType::Enrollment, tei_uid)? {
            if let Some(change) = reset_if_uploading(store, &enrollment)? {
                changes.push(change);
            }
            for event in store.children(ResourceType::Event, &enrollment.uid)? {
                if let Some(change) = reset_if_uploading(store, &event)? {
                    changes.push(change);
                }
            }
        }

        Ok(changes)
    }

    /// Store-wide recovery pass, run at startup before any sync cycle.
    pub fn reset_all_uploading<S>(&self, store: &mut S) -> Result<Vec<StateChange>>
    where
        S: LocalStore + ?Sized,
    {
        with_transaction(store, |s| {
            let mut changes = Vec::new();
            for resource in ResourceType::ALL {
                for record in s.get_by_state(resource, SyncState::Uploading)? {
                    if let Some(change) = reset_if_uploading(s, &record)? {
                        changes.push(change);
                    }
                }
            }
            if !changes.is_empty() {
                warn!(count = changes.len(), "reset records stuck in UPLOADING");
            }
            Ok(changes)
        })
    }
}

fn reset_if_uploading<S>(store: &mut S, record: &Record) -> Result<Option<StateChange>>
where
    S: LocalStore + ?Sized,
{
    if record.state != SyncState::Uploading {
        return Ok(None);
    }
    let to = record.state.recovered(record.has_server_history());
    store.set_state(record.resource, &record.uid, to)?;
    Ok(Some(StateChange {
        resource: record.resource,
        uid: record.uid.clone(),
        from: record.state,
        to,
    }))
}
