//! Paginated download of remote collections.
//!
//! A download crosses organisation units with programs and drains each
//! combination page by page. Every page is persisted in its own transaction
//! before the next one is requested, so an interrupted download keeps what it
//! already committed.
//!
//! A failing combination is logged and skipped; the report then says the
//! sync was unsuccessful and the watermark is left alone. Only storage and
//! authentication failures abort the cycle.

use crate::{
    clock::ServerClock,
    config::SyncConfig,
    error::Result,
    paging::compute_pages,
    progress::{ProgressManager, SyncProgress},
    store::{with_transaction, LocalStore},
    transport::{FetchQuery, OuMode, RemoteApi},
    Error, ResourceType, Timestamp, Uid,
};
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{debug, error, info, warn};

/// Caller-selected scope of a download.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DownloadParams {
    /// Restrict the download to one program
    pub program: Option<Uid>,
    /// Restrict the download to these organisation units
    pub org_units: Vec<Uid>,
    /// Maximum number of items; falls back to the configured event limit
    /// for events and to no limit for other resources
    pub limit: Option<usize>,
    pub limit_by_org_unit: Option<bool>,
    pub limit_by_program: Option<bool>,
    pub ou_mode: Option<OuMode>,
}

impl DownloadParams {
    /// Whether the download covers everything the user can capture.
    pub fn is_global(&self) -> bool {
        self.program.is_none() && self.org_units.is_empty()
    }
}

/// Organisation units and programs the user has access to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DownloadScope {
    pub org_units: Vec<Uid>,
    pub programs: Vec<Uid>,
}

/// A group of combinations sharing one item limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryBundle {
    /// `None` stands for an unscoped query
    pub org_units: Vec<Option<Uid>>,
    pub programs: Vec<Option<Uid>>,
    pub ou_mode: OuMode,
    pub limit: Option<usize>,
    pub last_updated_start: Option<Timestamp>,
}

impl QueryBundle {
    /// Split a download into bundles according to the limit flags.
    pub fn build(
        params: &DownloadParams,
        scope: &DownloadScope,
        config: &SyncConfig,
        resource: ResourceType,
        watermark: Option<Timestamp>,
    ) -> Vec<QueryBundle> {
        let (org_units, default_mode) = if params.org_units.is_empty() {
            (scoped(&scope.org_units), OuMode::Descendants)
        } else {
            (scoped(&params.org_units), OuMode::Selected)
        };
        let programs = match &params.program {
            Some(program) => vec![Some(program.clone())],
            None => scoped(&scope.programs),
        };

        let limit = match (params.limit, resource) {
            (Some(limit), _) => Some(limit),
            (None, ResourceType::Event) => Some(config.event_limit),
            (None, _) => None,
        };
        let by_org_unit = params.limit_by_org_unit.unwrap_or(config.limit_by_org_unit);
        let by_program = params.limit_by_program.unwrap_or(config.limit_by_program);

        let bundle = |org_units: Vec<Option<Uid>>, programs: Vec<Option<Uid>>| QueryBundle {
            org_units,
            programs,
            ou_mode: params.ou_mode.unwrap_or(default_mode),
            limit,
            last_updated_start: watermark,
        };

        match (by_org_unit, by_program) {
            (false, false) => vec![bundle(org_units, programs)],
            (true, false) => org_units
                .into_iter()
                .map(|ou| bundle(vec![ou], programs.clone()))
                .collect(),
            (false, true) => programs
                .into_iter()
                .map(|p| bundle(org_units.clone(), vec![p]))
                .collect(),
            (true, true) => org_units
                .iter()
                .flat_map(|ou| {
                    programs
                        .iter()
                        .map(|p| bundle(vec![ou.clone()], vec![p.clone()]))
                        .collect::<Vec<_>>()
                })
                .collect(),
        }
    }
}

fn scoped(uids: &[Uid]) -> Vec<Option<Uid>> {
    if uids.is_empty() {
        vec![None]
    } else {
        uids.iter().cloned().map(Some).collect()
    }
}

/// Cooperative cancellation flag, checked between pages.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A combination that could not be downloaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinationFailure {
    pub org_unit: Option<Uid>,
    pub program: Option<Uid>,
    pub error: String,
}

/// Result of one download cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadReport {
    pub resource: ResourceType,
    /// Every combination was downloaded
    pub successful: bool,
    /// `false` when the cycle was cancelled
    pub complete: bool,
    pub persisted: usize,
    pub failures: Vec<CombinationFailure>,
    /// Watermark to pass to the next download
    pub watermark: Option<Timestamp>,
}

/// Drives fetch and persist cycles against a [`RemoteApi`].
pub struct DownloadOrchestrator<A, C> {
    api: A,
    clock: C,
    config: SyncConfig,
}

impl<A: RemoteApi, C: ServerClock> DownloadOrchestrator<A, C> {
    pub fn new(api: A, clock: C, config: SyncConfig) -> Self {
        Self { api, clock, config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Download single events (events without registration).
    pub fn download_single_events<S: LocalStore + ?Sized>(
        &self,
        store: &mut S,
        params: &DownloadParams,
        scope: &DownloadScope,
        watermark: Option<Timestamp>,
        cancel: &CancellationToken,
        progress: impl FnMut(SyncProgress),
    ) -> Result<DownloadReport> {
        self.download(store, ResourceType::Event, params, scope, watermark, cancel, progress)
    }

    /// Download one resource type.
    ///
    /// `watermark` is the previous successful download time. The returned
    /// report carries the new one, which only advances when a global
    /// download finished without failures.
    #[allow(clippy::too_many_arguments)]
    pub fn download<S: LocalStore + ?Sized>(
        &self,
        store: &mut S,
        resource: ResourceType,
        params: &DownloadParams,
        scope: &DownloadScope,
        watermark: Option<Timestamp>,
        cancel: &CancellationToken,
        mut progress: impl FnMut(SyncProgress),
    ) -> Result<DownloadReport> {
        let mut manager = ProgressManager::new(2);

        let server_time = self.clock.server_time()?;
        progress(manager.increase("SystemInfo", false));

        let mut report = DownloadReport {
            resource,
            successful: true,
            complete: true,
            persisted: 0,
            failures: Vec::new(),
            watermark,
        };

        let bundles = QueryBundle::build(params, scope, &self.config, resource, watermark);
        debug!(%resource, bundles = bundles.len(), "starting download");

        'bundles: for bundle in &bundles {
            let mut count = 0usize;
            for org_unit in &bundle.org_units {
                for program in &bundle.programs {
                    let remaining = match bundle.limit {
                        Some(limit) if count >= limit => continue 'bundles,
                        Some(limit) => Some(limit - count),
                        None => None,
                    };

                    let query = FetchQuery {
                        resource,
                        org_unit: org_unit.clone(),
                        program: program.clone(),
                        ou_mode: bundle.ou_mode,
                        last_updated_start: bundle.last_updated_start,
                        page: 1,
                        page_size: self.config.page_size,
                    };

                    let mut persisted = 0;
                    let result = self.download_combination(
                        store,
                        query,
                        remaining,
                        server_time,
                        cancel,
                        &mut persisted,
                    );
                    // Pages committed before a failure stay in the store.
                    count += persisted;
                    report.persisted += persisted;

                    match result {
                        Ok(()) => {}
                        Err(Error::Cancelled) => {
                            info!(%resource, persisted = report.persisted, "download cancelled");
                            report.complete = false;
                            report.successful = false;
                            return Ok(report);
                        }
                        Err(err) if err.is_cycle_fatal() => {
                            error!(%resource, error = %err, "download aborted");
                            return Err(err);
                        }
                        Err(err) => {
                            warn!(
                                %resource,
                                org_unit = ?org_unit,
                                program = ?program,
                                error = %err,
                                "combination failed, continuing"
                            );
                            report.successful = false;
                            report.failures.push(CombinationFailure {
                                org_unit: org_unit.clone(),
                                program: program.clone(),
                                error: err.to_string(),
                            });
                        }
                    }
                }
            }
        }

        if report.successful && params.is_global() {
            report.watermark = Some(server_time);
        }

        info!(
            %resource,
            persisted = report.persisted,
            failures = report.failures.len(),
            successful = report.successful,
            "download finished"
        );
        progress(manager.increase(resource, true));
        Ok(report)
    }

    /// Drain one org unit × program combination, adding the number of items
    /// committed to `persisted` page by page.
    fn download_combination<S: LocalStore + ?Sized>(
        &self,
        store: &mut S,
        mut query: FetchQuery,
        limit: Option<usize>,
        server_time: Timestamp,
        cancel: &CancellationToken,
        persisted: &mut usize,
    ) -> Result<()> {

        for page in compute_pages(self.config.page_size, limit) {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            query.page = page.page;
            query.page_size = page.page_size;
            let fetched = self.api.fetch_page(&query)?;
            let fetched_count = fetched.items.len();

            let mut items = page.select(fetched.items);
            for item in &mut items {
                item.mark_synced(server_time);
            }
            let kept = items.len();

            with_transaction(store, |s| {
                for item in items {
                    s.clear_conflicts(&item.uid)?;
                    s.upsert(item)?;
                }
                Ok(())
            })?;

            *persisted += kept;
            debug!(
                resource = %query.resource,
                page = page.page,
                fetched = fetched_count,
                kept,
                "persisted page"
            );

            if page.is_last_page || fetched.is_last_page || page.is_short(fetched_count) {
                break;
            }
        }

        Ok(())
    }
}
