//! Remote API abstraction.
//!
//! HTTP, authentication and the wire format live outside the engine. The
//! orchestrators only see typed pages, import summaries and deletion keys.

use crate::{error::Result, Error, Record, ResourceType, Timestamp, Uid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How the organisation unit filter of a query is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OuMode {
    /// Only the given organisation unit
    Selected,
    Children,
    /// The given unit and its whole subtree
    #[default]
    Descendants,
    /// Everything the user may read
    Accessible,
    /// The user's data capture units
    Capture,
}

/// A single page request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchQuery {
    pub resource: ResourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_unit: Option<Uid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<Uid>,
    pub ou_mode: OuMode,
    /// Only items updated on the server after this instant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_start: Option<Timestamp>,
    pub page: usize,
    pub page_size: usize,
}

/// Items returned for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchedPage {
    pub items: Vec<Record>,
    /// Set when the server reports there is nothing after this page
    #[serde(default)]
    pub is_last_page: bool,
}

/// Server verdict for one submitted item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportStatus {
    Success,
    Warning,
    /// Validation conflict; the item was not imported
    Error,
    /// The server does not know the item or one of its references
    NotFound,
}

/// A conflict reported against one field or reference of an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDetail {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl ConflictDetail {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            value: None,
            error_code: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemOutcome {
    pub uid: Uid,
    pub status: ImportStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<ConflictDetail>,
}

impl ItemOutcome {
    pub fn success(uid: impl Into<Uid>) -> Self {
        Self {
            uid: uid.into(),
            status: ImportStatus::Success,
            conflicts: Vec::new(),
        }
    }

    pub fn with_status(uid: impl Into<Uid>, status: ImportStatus, conflicts: Vec<ConflictDetail>) -> Self {
        Self {
            uid: uid.into(),
            status,
            conflicts,
        }
    }
}

/// Per-item results of a batched submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub outcomes: Vec<ItemOutcome>,
}

impl ImportSummary {
    pub fn new(outcomes: Vec<ItemOutcome>) -> Self {
        Self { outcomes }
    }

    pub fn outcome(&self, uid: &str) -> Option<&ItemOutcome> {
        self.outcomes.iter().find(|o| o.uid == uid)
    }
}

/// Category combination and options behind an attribute option combo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryDimension {
    pub category_combo: Uid,
    pub category_options: Vec<Uid>,
}

/// Looks up category metadata needed to address aggregate records.
pub trait DimensionResolver {
    fn resolve(&self, attribute_option_combo: &str) -> Result<CategoryDimension>;
}

/// Everything needed to delete one record on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionKey {
    pub resource: ResourceType,
    pub uid: Uid,
    /// Query parameters identifying the record on the server
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

impl DeletionKey {
    /// Build the key for `record`. Data-set complete registrations are
    /// addressed by data set, period, org unit and category options rather
    /// than by uid.
    pub fn for_record(record: &Record, resolver: &dyn DimensionResolver) -> Result<Self> {
        let mut params = BTreeMap::new();

        if record.resource == ResourceType::DataSetCompleteRegistration {
            let field = |name: &str| {
                record
                    .field(name)
                    .map(String::from)
                    .ok_or_else(|| Error::InvalidRecord {
                        uid: record.uid.clone(),
                        message: format!("missing field '{name}'"),
                    })
            };

            let dimension = resolver.resolve(&field("attributeOptionCombo")?)?;
            params.insert("ds".to_string(), field("dataSet")?);
            params.insert("pe".to_string(), field("period")?);
            params.insert("ou".to_string(), field("organisationUnit")?);
            params.insert("cc".to_string(), dimension.category_combo);
            params.insert("cp".to_string(), dimension.category_options.join(";"));
            params.insert("multiOu".to_string(), "false".to_string());
        }

        Ok(Self {
            resource: record.resource,
            uid: record.uid.clone(),
            params,
        })
    }
}

/// The server API used by the orchestrators.
pub trait RemoteApi {
    /// Fetch one page of a collection.
    fn fetch_page(&self, query: &FetchQuery) -> Result<FetchedPage>;

    /// Submit new and updated records in one payload.
    fn submit_batch(&self, resource: ResourceType, items: &[Record]) -> Result<ImportSummary>;

    /// Delete one record.
    fn delete_one(&self, key: &DeletionKey) -> Result<()>;
}

impl<A: RemoteApi + ?Sized> RemoteApi for &A {
    fn fetch_page(&self, query: &FetchQuery) -> Result<FetchedPage> {
        (**self).fetch_page(query)
    }

    fn submit_batch(&self, resource: ResourceType, items: &[Record]) -> Result<ImportSummary> {
        (**self).submit_batch(resource, items)
    }

    fn delete_one(&self, key: &DeletionKey) -> Result<()> {
        (**self).delete_one(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    struct StaticResolver;

    impl DimensionResolver for StaticResolver {
        fn resolve(&self, attribute_option_combo: &str) -> Result<CategoryDimension> {
            match attribute_option_combo {
                "HllvX50cXC0" => Ok(CategoryDimension {
                    category_combo: "bjDvmb4bfuf".into(),
                    category_options: vec!["xYerKDKCefk".into(), "ALoWx2mTBOb".into()],
                }),
                other => Err(Error::NotFound {
                    resource: ResourceType::DataValue,
                    uid: other.to_string(),
                }),
            }
        }
    }

    fn registration(payload: serde_json::Value) -> Record {
        Record::new_remote(
            "dscr1",
            ResourceType::DataSetCompleteRegistration,
            None,
            payload,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn registration_deletion_key() {
        let record = registration(json!({
            "dataSet": "lyLU2wR22tC",
            "period": "201801",
            "organisationUnit": "DiszpKrYNg8",
            "attributeOptionCombo": "HllvX50cXC0",
        }));

        let key = DeletionKey::for_record(&record, &StaticResolver).unwrap();
        assert_eq!(key.params["ds"], "lyLU2wR22tC");
        assert_eq!(key.params["cc"], "bjDvmb4bfuf");
        assert_eq!(key.params["cp"], "xYerKDKCefk;ALoWx2mTBOb");
        assert_eq!(key.params["multiOu"], "false");
    }

    #[test]
    fn registration_missing_field() {
        let record = registration(json!({"attributeOptionCombo": "HllvX50cXC0"}));
        let err = DeletionKey::for_record(&record, &StaticResolver).unwrap_err();
        assert!(matches!(err, Error::InvalidRecord { .. }));
    }

    #[test]
    fn unresolvable_combo() {
        let record = registration(json!({
            "dataSet": "lyLU2wR22tC",
            "period": "201801",
            "organisationUnit": "DiszpKrYNg8",
            "attributeOptionCombo": "unknown",
        }));
        assert!(matches!(
            DeletionKey::for_record(&record, &StaticResolver),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn tracker_key_is_uid_only() {
        let record = Record::new_remote(
            "ev1",
            ResourceType::Event,
            None,
            json!({}),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        );
        let key = DeletionKey::for_record(&record, &StaticResolver).unwrap();
        assert_eq!(key.uid, "ev1");
        assert!(key.params.is_empty());
    }

    #[test]
    fn summary_lookup() {
        let summary = ImportSummary::new(vec![
            ItemOutcome::success("a"),
            ItemOutcome::with_status("b", ImportStatus::Error, vec![ConflictDetail::new("bad")]),
        ]);
        assert_eq!(summary.outcome("b").unwrap().status, ImportStatus::Error);
        assert!(summary.outcome("c").is_none());

        let json = serde_json::to_string(&summary.outcomes[1]).unwrap();
        assert!(json.contains("\"status\":\"ERROR\""));
    }
}
