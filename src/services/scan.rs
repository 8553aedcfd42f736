//! Incremental, resumable catalog scan.
//!
//! One pass: paginate titles by last-modified time down to the stored
//! checkpoint, store what changed, then regroup every ungrouped title. Titles
//! referenced by edges but missing locally are collected into a backlog that
//! is fetched in bulk before regrouping resumes. Every write is idempotent, so
//! an aborted pass is resumed by running another one.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::clients::{CatalogError, CatalogSource, MediaPage};
use crate::config::CatalogConfig;
use crate::db::TitleWrite;
use crate::domain::TitleId;
use crate::services::gateway::{GatewayError, PersistenceGateway};
use crate::services::resolver::{ResolveError, Resolver, StoreLookup};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("a scan pass is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Store(#[from] GatewayError),
}

/// Summary of one pass, logged at the end and printed by the CLI.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub run_id: String,
    pub pages: u32,
    pub short_pages_accepted: u32,
    pub titles_seen: u64,
    pub titles_stored: u64,
    /// False when a page fetch gave up before the checkpoint was reached.
    pub pagination_complete: bool,
    pub checkpoint: Option<i64>,
    pub groups_applied: u64,
    pub notifications: u64,
    pub resolve_failures: u64,
    pub backlog_fetched: u64,
    pub unavailable: u64,
    pub duration_ms: u64,
}

/// Titles still to fetch, threaded from the pagination and regroup phases
/// into the backlog drain.
type Backlog = BTreeSet<TitleId>;

pub struct ScanDriver {
    catalog: Arc<dyn CatalogSource>,
    gateway: PersistenceGateway,
    page_size: u32,
    short_page_retries: u32,
    /// Held for the duration of a pass; a second caller is turned away.
    slot: Mutex<()>,
}

impl ScanDriver {
    #[must_use]
    pub fn new(
        catalog: Arc<dyn CatalogSource>,
        gateway: PersistenceGateway,
        config: &CatalogConfig,
    ) -> Self {
        Self {
            catalog,
            gateway,
            page_size: config.page_size.max(1),
            short_page_retries: config.short_page_retries,
            slot: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.slot.try_lock().is_err()
    }

    /// Runs one complete pass.
    ///
    /// # Errors
    ///
    /// - [`ScanError::AlreadyRunning`] if another pass holds the slot
    /// - [`ScanError::Store`] when the local store fails; the pass stops and
    ///   the next one resumes from the persisted state
    pub async fn run_scan_pass(&self) -> Result<ScanReport, ScanError> {
        let Ok(_slot) = self.slot.try_lock() else {
            warn!("Scan pass requested while another is running, skipping");
            return Err(ScanError::AlreadyRunning);
        };

        let run_id = Uuid::new_v4();
        let span = info_span!("scan_pass", run_id = %run_id);
        self.pass(run_id).instrument(span).await
    }

    async fn pass(&self, run_id: Uuid) -> Result<ScanReport, ScanError> {
        let start = Instant::now();
        let mut report = ScanReport {
            run_id: run_id.to_string(),
            ..ScanReport::default()
        };

        info!(event = "scan_started", "Starting scan pass");

        let checkpoint = self.gateway.checkpoint().await?;
        let newest = self.paginate_updates(checkpoint, &mut report).await?;

        report.checkpoint = checkpoint;
        if report.pagination_complete
            && let Some(newest) = newest
        {
            let advanced = checkpoint.map_or(newest, |c| c.max(newest));
            self.gateway.set_checkpoint(advanced).await?;
            report.checkpoint = Some(advanced);
        }

        self.regroup(&mut report).await?;

        report.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            event = "scan_finished",
            pages = report.pages,
            titles_seen = report.titles_seen,
            titles_stored = report.titles_stored,
            groups_applied = report.groups_applied,
            notifications = report.notifications,
            resolve_failures = report.resolve_failures,
            backlog_fetched = report.backlog_fetched,
            duration_ms = report.duration_ms,
            "Scan pass finished"
        );
        Ok(report)
    }

    /// Stores every title newer than `checkpoint`. Returns the newest
    /// last-modified timestamp seen.
    async fn paginate_updates(
        &self,
        checkpoint: Option<i64>,
        report: &mut ScanReport,
    ) -> Result<Option<i64>, ScanError> {
        let mut newest: Option<i64> = None;
        let mut page_number = 1;

        loop {
            let page = match self.fetch_page(page_number, report).await {
                Ok(page) => page,
                Err(e) => {
                    error!(page = page_number, error = %e, "Update page fetch failed, stopping pagination");
                    return Ok(newest);
                }
            };
            report.pages += 1;

            let mut reached_checkpoint = false;
            for entry in &page.entries {
                if checkpoint.is_some_and(|c| entry.title.updated_at < c) {
                    reached_checkpoint = true;
                    break;
                }

                newest = Some(newest.map_or(entry.title.updated_at, |n| n.max(entry.title.updated_at)));
                report.titles_seen += 1;

                if self.gateway.store_entry(entry).await?.is_accepted() {
                    report.titles_stored += 1;
                }
            }

            if reached_checkpoint || !page.has_next_page {
                report.pagination_complete = true;
                info!(
                    pages = report.pages,
                    titles_seen = report.titles_seen,
                    reached_checkpoint,
                    "Pagination complete"
                );
                return Ok(newest);
            }

            page_number += 1;
        }
    }

    /// Fetches one page, re-requesting it while it looks truncated.
    async fn fetch_page(
        &self,
        page_number: u32,
        report: &mut ScanReport,
    ) -> Result<MediaPage, CatalogError> {
        let mut retries = 0;
        loop {
            let page = self.catalog.updated_page(page_number, self.page_size).await?;

            if !page.is_suspiciously_short(self.page_size) {
                return Ok(page);
            }

            if retries >= self.short_page_retries {
                warn!(
                    page = page_number,
                    returned = page.returned(),
                    requested = self.page_size,
                    "Accepting short page after retries"
                );
                report.short_pages_accepted += 1;
                return Ok(page);
            }

            retries += 1;
            warn!(
                page = page_number,
                returned = page.returned(),
                requested = self.page_size,
                retry = retries,
                "Short page while more pages are claimed, retrying"
            );
        }
    }

    /// Groups every ungrouped title, draining the backlog whenever the
    /// ungrouped set is exhausted.
    async fn regroup(&self, report: &mut ScanReport) -> Result<(), ScanError> {
        let lookup = StoreLookup::new(self.gateway.clone());
        let mut unavailable: BTreeSet<TitleId> = BTreeSet::new();
        let mut backlog = Backlog::new();
        let mut offset: u64 = 0;
        let mut last_seen: Option<TitleId> = None;
        // Seeds whose group was applied this pass. One that comes back
        // ungrouped was split off by a later group and is left for next pass.
        let mut applied_seeds: BTreeSet<TitleId> = BTreeSet::new();

        loop {
            let Some(id) = self.gateway.find_ungrouped_title(offset).await? else {
                if backlog.is_empty() {
                    return Ok(());
                }

                let known_unavailable = unavailable.len();
                let inserted = self
                    .drain_backlog(std::mem::take(&mut backlog), &mut unavailable, report)
                    .await?;

                // Deferred titles can make progress now, either through the new
                // titles or by ignoring what turned out to be unavailable.
                if inserted > 0 || unavailable.len() > known_unavailable {
                    offset = 0;
                    last_seen = None;
                }
                continue;
            };

            if last_seen == Some(id) {
                warn!(title_id = %id, offset, "Regrouping made no progress, skipping title");
                offset += 1;
                last_seen = None;
                continue;
            }
            last_seen = Some(id);

            if applied_seeds.contains(&id) {
                warn!(title_id = %id, offset, "Title left ungrouped after its group was applied, skipping");
                offset += 1;
                continue;
            }

            let resolved = Resolver::new(&lookup)
                .ignoring(&unavailable)
                .resolve(id)
                .await;

            match resolved {
                Ok(group) => {
                    let applied = self.gateway.apply_group(&group).await?;
                    applied_seeds.insert(id);
                    report.groups_applied += 1;
                    report.notifications += applied.events as u64;
                }
                Err(ResolveError::Store(e)) => return Err(ScanError::Store(e)),
                Err(ResolveError::Unresolved { missing }) => {
                    report.resolve_failures += 1;
                    let before = backlog.len();
                    backlog.extend(missing.into_iter().filter(|m| !unavailable.contains(m)));
                    info!(
                        title_id = %id,
                        queued = backlog.len() - before,
                        "Title references unfetched titles, deferring"
                    );
                    offset += 1;
                }
                Err(e @ ResolveError::InconsistentParents { .. }) => {
                    report.resolve_failures += 1;
                    error!(title_id = %id, error = %e, "Inconsistent source data, skipping title");
                    offset += 1;
                }
                Err(e) => {
                    report.resolve_failures += 1;
                    warn!(title_id = %id, error = %e, "Could not resolve title, skipping");
                    offset += 1;
                }
            }
        }
    }

    /// Fetches backlog titles in bulk. Ids the catalog does not return are
    /// remembered as unavailable for the rest of the pass. Returns how many
    /// titles were newly stored.
    async fn drain_backlog(
        &self,
        backlog: Backlog,
        unavailable: &mut BTreeSet<TitleId>,
        report: &mut ScanReport,
    ) -> Result<u64, ScanError> {
        let ids: Vec<TitleId> = backlog.into_iter().collect();
        let batch_size = self.catalog.batch_size().max(1);
        let mut inserted = 0;

        info!(titles = ids.len(), batch_size, "Fetching referenced titles");

        for chunk in ids.chunks(batch_size) {
            let entries = match self.catalog.media_by_ids(chunk).await {
                Ok(entries) => entries,
                Err(e) => {
                    error!(error = %e, titles = chunk.len(), "Bulk fetch failed, giving up on batch for this pass");
                    unavailable.extend(chunk.iter().copied());
                    report.unavailable += chunk.len() as u64;
                    continue;
                }
            };

            let returned: BTreeSet<TitleId> = entries.iter().map(|e| e.title.id).collect();
            for entry in &entries {
                if self.gateway.store_entry(entry).await? == TitleWrite::Inserted {
                    inserted += 1;
                }
            }
            report.backlog_fetched += entries.len() as u64;

            for id in chunk.iter().filter(|id| !returned.contains(id)) {
                unavailable.insert(*id);
                report.unavailable += 1;
            }
        }

        Ok(inserted)
    }
}
