//! Snapshot types for persisting and restoring store state.
//!
//! Snapshots are the bridge between the in-memory store and persistent
//! storage on the host. They are designed for deterministic serialization to
//! ensure consistency.

use crate::{
    error::Result,
    store::{Collection, ImportConflict, MemoryStore, Tables},
    Error, Record, ResourceType, SyncState, Uid,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of a [`MemoryStore`].
///
/// Uses BTreeMap instead of HashMap for deterministic serialization order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// All records organized by resource type, then by uid
    pub collections: BTreeMap<ResourceType, BTreeMap<Uid, Record>>,
    /// Import conflicts reported by the server
    #[serde(default)]
    pub conflicts: Vec<ImportConflict>,
}

impl Default for StoreSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreSnapshot {
    /// Create a new empty snapshot.
    pub fn new() -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            collections: BTreeMap::new(),
            conflicts: Vec::new(),
        }
    }

    /// Capture the committed state of a store.
    pub fn capture(store: &MemoryStore) -> Self {
        let mut snapshot = Self::new();
        for resource in ResourceType::ALL {
            for record in store.all(resource) {
                snapshot.add_record(record);
            }
        }
        snapshot.conflicts = store.all_conflicts().to_vec();
        snapshot
    }

    /// Rebuild a store from this snapshot.
    pub fn restore(self) -> Result<MemoryStore> {
        self.validate()?;

        let mut tables = Tables::default();
        for (resource, records) in self.collections {
            let collection: &mut Collection = tables.collections.entry(resource).or_default();
            for record in records.into_values() {
                collection.insert(record);
            }
        }
        tables.conflicts = self.conflicts;
        Ok(MemoryStore::from_tables(tables))
    }

    pub fn add_record(&mut self, record: Record) {
        self.collections
            .entry(record.resource)
            .or_default()
            .insert(record.uid.clone(), record);
    }

    pub fn get_record(&self, resource: ResourceType, uid: &str) -> Option<&Record> {
        self.collections.get(&resource)?.get(uid)
    }

    /// Count total records across all resource types.
    pub fn record_count(&self) -> usize {
        self.collections.values().map(|c| c.len()).sum()
    }

    /// Count records waiting to be uploaded.
    pub fn pending_count(&self) -> usize {
        self.records().filter(|r| r.state.is_pending()).count()
    }

    /// Number of records in each state.
    pub fn state_counts(&self) -> BTreeMap<SyncState, usize> {
        let mut counts = BTreeMap::new();
        for record in self.records() {
            *counts.entry(record.state).or_insert(0) += 1;
        }
        counts
    }

    fn records(&self) -> impl Iterator<Item = &Record> {
        self.collections.values().flat_map(|c| c.values())
    }

    /// Check that every record is filed under its own resource type and uid.
    pub fn validate(&self) -> Result<()> {
        for (resource, records) in &self.collections {
            for (uid, record) in records {
                if record.resource != *resource || record.uid != *uid {
                    return Err(Error::InvalidSnapshot(format!(
                        "record {} ({}) filed under {resource}/{uid}",
                        record.uid, record.resource
                    )));
                }
            }
        }
        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

/// Metadata about a snapshot (without the full data).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub format_version: u32,
    pub record_count: usize,
    pub pending_count: usize,
    pub conflict_count: usize,
}

impl From<&StoreSnapshot> for SnapshotMetadata {
    fn from(snapshot: &StoreSnapshot) -> Self {
        Self {
            format_version: snapshot.format_version,
            record_count: snapshot.record_count(),
            pending_count: snapshot.pending_count(),
            conflict_count: snapshot.conflicts.len(),
        }
    }
}
