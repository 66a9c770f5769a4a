//! Local store abstraction and the in-memory implementation.
//!
//! The relational engine on the device is out of scope; the sync code only
//! needs row access by identifier, by state and by parent, plus
//! all-or-nothing transactions.

use crate::{error::Result, Error, Record, ResourceType, SyncState, Timestamp, Uid};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// A per-item conflict reported by the server during an import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportConflict {
    pub uid: Uid,
    pub resource: ResourceType,
    /// Human readable conflict message
    pub conflict: String,
    /// Offending value, when the server reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// State the record was left in
    pub status: SyncState,
    pub created: Timestamp,
}

/// Row store with transactional semantics.
///
/// Writes between [`LocalStore::begin`] and [`LocalStore::commit`] become
/// visible atomically; [`LocalStore::rollback`] discards them.
pub trait LocalStore {
    fn begin(&mut self) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;

    /// Insert or replace a record.
    fn upsert(&mut self, record: Record) -> Result<()>;

    /// Remove a record. Removing a missing record is not an error.
    fn remove(&mut self, resource: ResourceType, uid: &str) -> Result<()>;

    fn get_by_id(&self, resource: ResourceType, uid: &str) -> Result<Option<Record>>;

    fn get_by_state(&self, resource: ResourceType, state: SyncState) -> Result<Vec<Record>>;

    /// Records of `resource` whose parent is `parent_uid`.
    fn children(&self, resource: ResourceType, parent_uid: &str) -> Result<Vec<Record>>;

    /// Set the state of a record, failing with [`Error::NotFound`] if absent.
    fn set_state(&mut self, resource: ResourceType, uid: &str, state: SyncState) -> Result<()>;

    fn record_conflict(&mut self, conflict: ImportConflict) -> Result<()>;

    fn conflicts(&self, uid: &str) -> Result<Vec<ImportConflict>>;

    fn clear_conflicts(&mut self, uid: &str) -> Result<()>;
}

/// Run `f` inside a transaction, committing on success and rolling back on
/// error.
pub fn with_transaction<S, T, F>(store: &mut S, f: F) -> Result<T>
where
    S: LocalStore + ?Sized,
    F: FnOnce(&mut S) -> Result<T>,
{
    store.begin()?;
    match f(store) {
        Ok(value) => {
            store.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = store.rollback() {
                warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

/// Records of one resource type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    records: BTreeMap<Uid, Record>,
}

impl Collection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
        }
    }

    pub fn get(&self, uid: &str) -> Option<&Record> {
        self.records.get(uid)
    }

    pub fn get_mut(&mut self, uid: &str) -> Option<&mut Record> {
        self.records.get_mut(uid)
    }

    pub fn insert(&mut self, record: Record) {
        self.records.insert(record.uid.clone(), record);
    }

    pub fn remove(&mut self, uid: &str) -> Option<Record> {
        self.records.remove(uid)
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Tables {
    pub(crate) collections: HashMap<ResourceType, Collection>,
    pub(crate) conflicts: Vec<ImportConflict>,
}

/// In-memory [`LocalStore`].
///
/// Transactions snapshot the tables at `begin`; `rollback` restores them.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub(crate) tables: Tables,
    backup: Option<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_tables(tables: Tables) -> Self {
        Self {
            tables,
            backup: None,
        }
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.backup.is_some()
    }

    /// Get a collection by resource type.
    pub fn collection(&self, resource: ResourceType) -> Option<&Collection> {
        self.tables.collections.get(&resource)
    }

    /// Number of records of a resource type.
    pub fn count(&self, resource: ResourceType) -> usize {
        self.collection(resource).map_or(0, Collection::len)
    }

    /// Every record of a resource type.
    pub fn all(&self, resource: ResourceType) -> Vec<Record> {
        self.collection(resource)
            .map(|c| c.records().cloned().collect())
            .unwrap_or_default()
    }

    /// Every stored conflict.
    pub fn all_conflicts(&self) -> &[ImportConflict] {
        &self.tables.conflicts
    }
}

impl LocalStore for MemoryStore {
    fn begin(&mut self) -> Result<()> {
        if self.backup.is_some() {
            return Err(Error::Storage("transaction already open".into()));
        }
        self.backup = Some(self.tables.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.backup
            .take()
            .map(|_| ())
            .ok_or_else(|| Error::Storage("commit without transaction".into()))
    }

    fn rollback(&mut self) -> Result<()> {
        let backup = self
            .backup
            .take()
            .ok_or_else(|| Error::Storage("rollback without transaction".into()))?;
        self.tables = backup;
        Ok(())
    }

    fn upsert(&mut self, record: Record) -> Result<()> {
        self.tables
            .collections
            .entry(record.resource)
            .or_default()
            .insert(record);
        Ok(())
    }

    fn remove(&mut self, resource: ResourceType, uid: &str) -> Result<()> {
        if let Some(collection) = self.tables.collections.get_mut(&resource) {
            collection.remove(uid);
        }
        Ok(())
    }

    fn get_by_id(&self, resource: ResourceType, uid: &str) -> Result<Option<Record>> {
        Ok(self
            .tables
            .collections
            .get(&resource)
            .and_then(|c| c.get(uid))
            .cloned())
    }

    fn get_by_state(&self, resource: ResourceType, state: SyncState) -> Result<Vec<Record>> {
        Ok(self
            .tables
            .collections
            .get(&resource)
            .map(|c| c.records().filter(|r| r.state == state).cloned().collect())
            .unwrap_or_default())
    }

    fn children(&self, resource: ResourceType, parent_uid: &str) -> Result<Vec<Record>> {
        Ok(self
            .tables
            .collections
            .get(&resource)
            .map(|c| {
                c.records()
                    .filter(|r| r.parent.as_deref() == Some(parent_uid))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn set_state(&mut self, resource: ResourceType, uid: &str, state: SyncState) -> Result<()> {
        let record = self
            .tables
            .collections
            .get_mut(&resource)
            .and_then(|c| c.get_mut(uid))
            .ok_or_else(|| Error::NotFound {
                resource,
                uid: uid.to_string(),
            })?;
        record.state = state;
        Ok(())
    }

    fn record_conflict(&mut self, conflict: ImportConflict) -> Result<()> {
        self.tables.conflicts.push(conflict);
        Ok(())
    }

    fn conflicts(&self, uid: &str) -> Result<Vec<ImportConflict>> {
        Ok(self
            .tables
            .conflicts
            .iter()
            .filter(|c| c.uid == uid)
            .cloned()
            .collect())
    }

    fn clear_conflicts(&mut self, uid: &str) -> Result<()> {
        self.tables.conflicts.retain(|c| c.uid != uid);
        Ok(())
    }
}
