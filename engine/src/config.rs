//! Sync configuration.

use serde::{Deserialize, Serialize};
use std::env;

/// Default number of items requested per page.
pub const DEFAULT_PAGE_SIZE: usize = 50;
/// Default number of events kept by a single-event download.
pub const DEFAULT_EVENT_LIMIT: usize = 1000;

/// Configuration shared by the download and upload orchestrators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Items requested per page
    pub page_size: usize,
    /// Items kept per download when the caller sets no limit
    pub event_limit: usize,
    /// Apply the limit to each organisation unit separately
    pub limit_by_org_unit: bool,
    /// Apply the limit to each program separately
    pub limit_by_program: bool,
    /// `tracing` filter directive used by [`crate::logging::init`]
    pub log_filter: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            event_limit: DEFAULT_EVENT_LIMIT,
            limit_by_org_unit: false,
            limit_by_program: false,
            log_filter: "d2_engine=info".to_string(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// Recognised variables: `D2_PAGE_SIZE`, `D2_EVENT_LIMIT`,
    /// `D2_LIMIT_BY_ORG_UNIT`, `D2_LIMIT_BY_PROGRAM`, `D2_LOG`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let page_size = parse_or("D2_PAGE_SIZE", &lookup, defaults.page_size)?;
        let event_limit = parse_or("D2_EVENT_LIMIT", &lookup, defaults.event_limit)?;
        let limit_by_org_unit = parse_or("D2_LIMIT_BY_ORG_UNIT", &lookup, defaults.limit_by_org_unit)?;
        let limit_by_program = parse_or("D2_LIMIT_BY_PROGRAM", &lookup, defaults.limit_by_program)?;
        let log_filter = lookup("D2_LOG").unwrap_or(defaults.log_filter);

        let config = Self {
            page_size,
            event_limit,
            limit_by_org_unit,
            limit_by_program,
            log_filter,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the orchestrators cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::ZeroPageSize);
        }
        Ok(())
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    lookup: &impl Fn(&str) -> Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        None => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },

    #[error("page size must be greater than zero")]
    ZeroPageSize,

    #[error("limit needs {pages} pages, more than the maximum of {max}")]
    TooManyPages { pages: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = SyncConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.page_size, 50);
    }

    #[test]
    fn reads_overrides() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("D2_PAGE_SIZE", "25"),
            ("D2_EVENT_LIMIT", " 300 "),
            ("D2_LIMIT_BY_ORG_UNIT", "true"),
            ("D2_LOG", "d2_engine=debug"),
        ]))
        .unwrap();
        assert_eq!(config.page_size, 25);
        assert_eq!(config.event_limit, 300);
        assert!(config.limit_by_org_unit);
        assert!(!config.limit_by_program);
        assert_eq!(config.log_filter, "d2_engine=debug");
    }

    #[test]
    fn rejects_bad_values() {
        let err = SyncConfig::from_lookup(lookup(&[("D2_PAGE_SIZE", "many")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "D2_PAGE_SIZE",
                value: "many".into()
            }
        );

        let err = SyncConfig::from_lookup(lookup(&[("D2_PAGE_SIZE", "0")])).unwrap_err();
        assert_eq!(err, ConfigError::ZeroPageSize);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: SyncConfig = serde_json::from_str(r#"{"pageSize": 10}"#).unwrap();
        assert_eq!(config.page_size, 10);
        assert_eq!(config.event_limit, DEFAULT_EVENT_LIMIT);
    }
}
