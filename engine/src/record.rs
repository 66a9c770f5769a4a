//! Record types for syncable tracker and aggregate data.
//!
//! Field-level models are opaque here: a record is an identifier, a link to
//! its parent, a sync state and a JSON payload.

use crate::{SyncState, Timestamp, Uid};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of syncable record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceType {
    TrackedEntityInstance,
    Enrollment,
    Event,
    TrackedEntityDataValue,
    DataValue,
    DataSetCompleteRegistration,
}

impl ResourceType {
    /// Every resource type, roots first.
    pub const ALL: [ResourceType; 6] = [
        ResourceType::TrackedEntityInstance,
        ResourceType::Enrollment,
        ResourceType::Event,
        ResourceType::TrackedEntityDataValue,
        ResourceType::DataValue,
        ResourceType::DataSetCompleteRegistration,
    ];

    /// The resource type a record of this type points to as its parent.
    pub fn parent_type(self) -> Option<ResourceType> {
        match self {
            ResourceType::TrackedEntityDataValue => Some(ResourceType::Event),
            ResourceType::Event => Some(ResourceType::Enrollment),
            ResourceType::Enrollment => Some(ResourceType::TrackedEntityInstance),
            ResourceType::TrackedEntityInstance
            | ResourceType::DataValue
            | ResourceType::DataSetCompleteRegistration => None,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceType::TrackedEntityInstance => "TrackedEntityInstance",
            ResourceType::Enrollment => "Enrollment",
            ResourceType::Event => "Event",
            ResourceType::TrackedEntityDataValue => "TrackedEntityDataValue",
            ResourceType::DataValue => "DataValue",
            ResourceType::DataSetCompleteRegistration => "DataSetCompleteRegistration",
        };
        f.write_str(name)
    }
}

/// Timestamps associated with a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// When the record was first created
    pub created: Timestamp,
    /// When the record was last changed, locally or by a download
    pub last_updated: Timestamp,
    /// When the server last confirmed this record, if ever
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced: Option<Timestamp>,
}

impl Metadata {
    /// Metadata for a record created on this device.
    pub fn new_local(timestamp: Timestamp) -> Self {
        Self {
            created: timestamp,
            last_updated: timestamp,
            last_synced: None,
        }
    }

    /// Metadata for a record received from the server.
    pub fn new_remote(timestamp: Timestamp) -> Self {
        Self {
            created: timestamp,
            last_updated: timestamp,
            last_synced: Some(timestamp),
        }
    }
}

/// A syncable record in the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Unique identifier
    pub uid: Uid,
    /// Kind of record
    pub resource: ResourceType,
    /// Identifier of the parent record, if the resource has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Uid>,
    /// Sync state relative to the server
    pub state: SyncState,
    /// Soft delete flag
    #[serde(default)]
    pub deleted: bool,
    /// Model fields, opaque to the engine
    pub payload: serde_json::Value,
    pub metadata: Metadata,
}

impl Record {
    /// Create a record as if it had just been created on the device.
    pub fn new_local(
        uid: impl Into<Uid>,
        resource: ResourceType,
        parent: Option<Uid>,
        payload: serde_json::Value,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            uid: uid.into(),
            resource,
            parent,
            state: SyncState::ToPost,
            deleted: false,
            payload,
            metadata: Metadata::new_local(timestamp),
        }
    }

    /// Create a record as received from the server.
    pub fn new_remote(
        uid: impl Into<Uid>,
        resource: ResourceType,
        parent: Option<Uid>,
        payload: serde_json::Value,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            uid: uid.into(),
            resource,
            parent,
            state: SyncState::Synced,
            deleted: false,
            payload,
            metadata: Metadata::new_remote(timestamp),
        }
    }

    /// A tracked-entity data value, keyed by event and data element.
    pub fn data_value(
        event: &str,
        data_element: &str,
        payload: serde_json::Value,
        timestamp: Timestamp,
    ) -> Self {
        Self::new_local(
            data_value_uid(event, data_element),
            ResourceType::TrackedEntityDataValue,
            Some(event.to_string()),
            payload,
            timestamp,
        )
    }

    /// Whether the server has confirmed this record at least once.
    pub fn has_server_history(&self) -> bool {
        self.metadata.last_synced.is_some()
    }

    /// Read a string field from the payload.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(|v| v.as_str())
    }

    /// Stamp the record as confirmed by the server.
    pub fn mark_synced(&mut self, timestamp: Timestamp) {
        self.state = SyncState::Synced;
        self.metadata.last_updated = timestamp;
        self.metadata.last_synced = Some(timestamp);
    }
}

/// Composite identifier of a tracked-entity data value.
pub fn data_value_uid(event: &str, data_element: &str) -> Uid {
    format!("{event}.{data_element}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn ts() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn local_record_starts_to_post() {
        let record = Record::new_local(
            "tei1",
            ResourceType::TrackedEntityInstance,
            None,
            json!({"trackedEntityType": "nEenWmSyUEp"}),
            ts(),
        );
        assert_eq!(record.state, SyncState::ToPost);
        assert!(!record.has_server_history());
        assert_eq!(record.field("trackedEntityType"), Some("nEenWmSyUEp"));
    }

    #[test]
    fn remote_record_is_synced() {
        let record = Record::new_remote("ev1", ResourceType::Event, None, json!({}), ts());
        assert_eq!(record.state, SyncState::Synced);
        assert!(record.has_server_history());
    }

    #[test]
    fn data_value_key() {
        let record = Record::data_value("ev1", "de1", json!({"value": "12"}), ts());
        assert_eq!(record.uid, "ev1.de1");
        assert_eq!(record.parent.as_deref(), Some("ev1"));
        assert_eq!(record.resource.parent_type(), Some(ResourceType::Event));
    }

    #[test]
    fn ancestry_chain() {
        let mut chain = vec![ResourceType::TrackedEntityDataValue];
        while let Some(parent) = chain.last().and_then(|r| r.parent_type()) {
            chain.push(parent);
        }
        assert_eq!(
            chain,
            vec![
                ResourceType::TrackedEntityDataValue,
                ResourceType::Event,
                ResourceType::Enrollment,
                ResourceType::TrackedEntityInstance,
            ]
        );
        assert_eq!(ResourceType::DataValue.parent_type(), None);
    }

    #[test]
    fn serialization_format() {
        let record = Record::new_local("enr1", ResourceType::Enrollment, Some("tei1".into()), json!({}), ts());
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"resource\":\"enrollment\""));
        assert!(json.contains("\"state\":\"TO_POST\""));
        assert!(json.contains("lastUpdated"));
        assert!(!json.contains("lastSynced"));
    }
}
