//! Cache-backed entry point for what-if carrier pricing.
//!
//! One `Coordinator` is built per process and shared by reference. It owns
//! the loaded source (dataset, rate tables, controls), the in-memory and
//! on-disk caches, and three job registries (summary, breakdown, carrier
//! detail) that keep concurrent callers from duplicating work. Callers never
//! block on someone else's build: they get `Computed::Pending` and poll.

mod jobs;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{error, info, warn};

pub use jobs::{Claim, JobRegistry, JobTicket};

use crate::config::{EngineConfig, MerchantConfig};
use crate::domain::carriers;
use crate::domain::{
    self, CarrierName, CarrierSelector, CellOutcome, MetricsResult, PricingControls, Selection,
};
use crate::error::{EngineError, EngineResult};
use crate::infra::cache::CacheStore;
use crate::infra::dataset::Dataset;
use crate::infra::rate_tables::{RateTableStore, RateTables};
use crate::infra::template::{carrier_toggle_overrides, cross_check, template_metrics, CrossCheck};
use crate::infra::workbook::Workbook;
use crate::util::{sha256_hex, sha256_parts};

/// Relative/absolute agreement required between computed and template metrics.
const CROSS_CHECK_TOLERANCE: f64 = 0.01;

pub type SourceHash = String;

/// Answer to a cache-backed request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Computed<T> {
    Ready(T),
    /// A background build is running; ask again later.
    Pending,
}

impl<T> Computed<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Pending => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Everything one computation reads. Immutable once loaded.
struct Source {
    hash: SourceHash,
    config_hash: String,
    dataset: Arc<Dataset>,
    rates: Arc<RateTables>,
    workbook: Arc<Workbook>,
    merchant: MerchantConfig,
    controls: PricingControls,
    candidates: Selection,
}

impl Source {
    fn metrics(&self, rows: domain::RowMapping, selection: &Selection) -> MetricsResult {
        domain::compute_metrics(
            self.dataset.records(),
            self.rates.as_ref(),
            rows,
            &self.controls,
            self.merchant.declared_annual_orders,
            selection,
        )
    }

    fn breakdown(&self, rows: domain::RowMapping) -> BTreeMap<CarrierName, MetricsResult> {
        domain::compute_breakdown(
            self.dataset.records(),
            self.rates.as_ref(),
            rows,
            &self.controls,
            self.merchant.declared_annual_orders,
            &self.candidates,
        )
    }

    fn won_cells(&self, rows: domain::RowMapping, selection: &Selection) -> Vec<CellOutcome> {
        CarrierSelector::new(self.rates.as_ref(), rows, &self.controls)
            .run(self.dataset.records(), selection)
            .cells
            .into_iter()
            .filter(|cell| cell.won)
            .collect()
    }

    fn breakdown_key(&self) -> String {
        format!("{}:{}", self.dataset.hash(), self.config_hash)
    }
}

struct Inner {
    config: EngineConfig,
    templates: RateTableStore,
    disk: CacheStore,
    source: RwLock<Option<Arc<Source>>>,
    summaries: Mutex<HashMap<(SourceHash, String), MetricsResult>>,
    breakdowns: Mutex<HashMap<String, BTreeMap<CarrierName, MetricsResult>>>,
    details: Mutex<HashMap<(SourceHash, CarrierName), Vec<CellOutcome>>>,
    summary_jobs: Arc<JobRegistry>,
    breakdown_jobs: Arc<JobRegistry>,
    detail_jobs: Arc<JobRegistry>,
    builds: AtomicU64,
}

impl Inner {
    fn current(&self) -> EngineResult<Arc<Source>> {
        self.source.read().clone().ok_or(EngineError::NoSource)
    }

    /// Records a summary in memory and on disk. Disk failures only log.
    fn remember_summary(&self, source: &Source, key: &str, metrics: MetricsResult) {
        self.summaries
            .lock()
            .insert((source.hash.clone(), key.to_string()), metrics);
        if let Err(err) = self.disk.store_metrics(&source.hash, key, metrics) {
            warn!(source_hash = %source.hash, selection = key, error = %err, "could not persist metrics");
        }
    }

    fn cached_summary(&self, source: &Source, key: &str) -> Option<MetricsResult> {
        let memo_key = (source.hash.clone(), key.to_string());
        if let Some(hit) = self.summaries.lock().get(&memo_key) {
            return Some(*hit);
        }
        let hit = self
            .disk
            .load_dashboard(&source.hash)
            .and_then(|cache| cache.entries.get(key).copied())?;
        self.summaries.lock().insert(memo_key, hit);
        Some(hit)
    }

    fn cached_breakdown(&self, source: &Source) -> Option<BTreeMap<CarrierName, MetricsResult>> {
        let key = source.breakdown_key();
        if let Some(hit) = self.breakdowns.lock().get(&key) {
            return Some(hit.clone());
        }
        let from_disk = self
            .disk
            .load_breakdown(source.dataset.hash(), &source.config_hash)
            .filter(|carriers| {
                source
                    .candidates
                    .carriers()
                    .iter()
                    .all(|carrier| carriers.contains_key(carrier))
            })?;
        self.breakdowns.lock().insert(key, from_disk.clone());
        Some(from_disk)
    }

    fn build_breakdown(&self, source: &Source) {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let carriers = source.breakdown(self.config.template.rows);
        if let Err(err) =
            self.disk
                .store_breakdown(source.dataset.hash(), &source.config_hash, carriers.clone())
        {
            warn!(dataset_hash = %source.dataset.hash(), error = %err, "could not persist breakdown");
        }
        self.breakdowns.lock().insert(source.breakdown_key(), carriers);
    }
}

pub struct Coordinator {
    inner: Arc<Inner>,
    runtime: Handle,
}

impl Coordinator {
    /// Background jobs run on `runtime`'s blocking pool.
    pub fn new(config: EngineConfig, runtime: Handle) -> EngineResult<Self> {
        config.validate()?;
        let stale_after = Duration::from_secs(config.job_stale_after_secs);
        let inner = Inner {
            templates: RateTableStore::new(
                config.template.clone(),
                config.max_formula_depth,
                config.memo_capacity,
            ),
            disk: CacheStore::new(config.cache_dir.clone()),
            source: RwLock::new(None),
            summaries: Mutex::new(HashMap::new()),
            breakdowns: Mutex::new(HashMap::new()),
            details: Mutex::new(HashMap::new()),
            summary_jobs: JobRegistry::new("summary", stale_after),
            breakdown_jobs: JobRegistry::new("breakdown", stale_after),
            detail_jobs: JobRegistry::new("carrier-detail", stale_after),
            builds: AtomicU64::new(0),
            config,
        };
        Ok(Self {
            inner: Arc::new(inner),
            runtime,
        })
    }

    /// Loads a dataset, template and merchant config and makes them the
    /// current source. In-memory entries for any other source are dropped.
    pub fn load_source(
        &self,
        dataset_path: &Path,
        template_path: &Path,
        merchant: MerchantConfig,
    ) -> EngineResult<SourceHash> {
        merchant.validate()?;
        let inner = &self.inner;
        let layout = &inner.config.template;

        let workbook = inner.templates.workbook(template_path)?;
        let rates = inner.templates.load(template_path)?;
        let template_controls =
            PricingControls::from_workbook(&workbook, layout, inner.config.max_formula_depth)?;
        let controls = merchant.apply_discount(template_controls);
        let dataset = Dataset::load(dataset_path, &merchant)?;

        let template_hash = sha256_hex(&fs::read(template_path)?);
        let config_hash = sha256_parts(&[
            merchant.config_hash(&controls)?.as_bytes(),
            template_hash.as_bytes(),
        ]);
        let hash = sha256_parts(&[dataset.hash().as_bytes(), config_hash.as_bytes()]);
        let candidates = merchant.candidate_selection()?;

        info!(
            source_hash = %hash,
            dataset_hash = %dataset.hash(),
            candidates = %candidates,
            "source loaded"
        );

        let source = Arc::new(Source {
            hash: hash.clone(),
            config_hash,
            dataset,
            rates,
            workbook,
            merchant,
            controls,
            candidates,
        });
        *inner.source.write() = Some(Arc::clone(&source));
        inner.summaries.lock().retain(|(h, _), _| *h == hash);
        inner.details.lock().retain(|(h, _), _| *h == hash);
        inner
            .breakdowns
            .lock()
            .retain(|key, _| *key == source.breakdown_key());
        Ok(hash)
    }

    pub fn source_hash(&self) -> Option<SourceHash> {
        self.inner.source.read().as_ref().map(|s| s.hash.clone())
    }

    /// The current source's merchant candidate pool (forced-on included).
    pub fn candidates(&self) -> EngineResult<Selection> {
        Ok(self.inner.current()?.candidates.clone())
    }

    pub fn dataset(&self) -> EngineResult<Arc<Dataset>> {
        Ok(Arc::clone(&self.inner.current()?.dataset))
    }

    /// Number of computations started since construction.
    pub fn builds_started(&self) -> u64 {
        self.inner.builds.load(Ordering::SeqCst)
    }

    /// Metrics for `selection`. Cached results come back as-is; otherwise a
    /// background build starts (unless one is already running) and the
    /// caller gets `Pending`.
    pub fn compute_metrics(&self, selection: &Selection) -> EngineResult<Computed<MetricsResult>> {
        let inner = &self.inner;
        let source = inner.current()?;
        let key = selection.key();

        if let Some(hit) = inner.cached_summary(&source, &key) {
            return Ok(Computed::Ready(hit));
        }

        let ticket = match inner.summary_jobs.try_claim(&format!("{}:{key}", source.hash)) {
            Claim::Claimed(ticket) => ticket,
            Claim::InFlight => return Ok(Computed::Pending),
        };
        let selection = selection.clone();
        let worker = Arc::clone(inner);
        self.spawn_job("summary", ticket, move || {
            // Another caller may have finished between the lookup and the claim.
            let memo_key = (source.hash.clone(), key.clone());
            if worker.summaries.lock().contains_key(&memo_key) {
                return;
            }
            worker.builds.fetch_add(1, Ordering::SeqCst);
            let metrics = source.metrics(worker.config.template.rows, &selection);
            worker.remember_summary(&source, &key, metrics);
            info!(source_hash = %source.hash, selection = %key, "metrics computed");
        });
        Ok(Computed::Pending)
    }

    /// Single-carrier metrics for every candidate carrier.
    pub fn compute_breakdown(
        &self,
    ) -> EngineResult<Computed<BTreeMap<CarrierName, MetricsResult>>> {
        let inner = &self.inner;
        let source = inner.current()?;
        if let Some(hit) = inner.cached_breakdown(&source) {
            return Ok(Computed::Ready(hit));
        }

        let ticket = match inner.breakdown_jobs.try_claim(&source.breakdown_key()) {
            Claim::Claimed(ticket) => ticket,
            Claim::InFlight => return Ok(Computed::Pending),
        };
        let worker = Arc::clone(inner);
        self.spawn_job("breakdown", ticket, move || worker.build_breakdown(&source));
        Ok(Computed::Pending)
    }

    /// Cells `carrier` wins when it is the only candidate.
    pub fn compute_carrier_detail(&self, carrier: &str) -> EngineResult<Computed<Vec<CellOutcome>>> {
        let carrier = carriers::canonical(carrier)
            .ok_or_else(|| EngineError::UnknownCarrier(carrier.to_string()))?;
        let inner = &self.inner;
        let source = inner.current()?;
        let memo_key = (source.hash.clone(), carrier.to_string());

        if let Some(hit) = inner.details.lock().get(&memo_key) {
            return Ok(Computed::Ready(hit.clone()));
        }
        if let Some(hit) = inner.disk.load_detail(&source.hash, carrier) {
            inner.details.lock().insert(memo_key, hit.clone());
            return Ok(Computed::Ready(hit));
        }

        let ticket = match inner.detail_jobs.try_claim(&format!("{}:{carrier}", source.hash)) {
            Claim::Claimed(ticket) => ticket,
            Claim::InFlight => return Ok(Computed::Pending),
        };
        let selection = Selection::single(carrier)?;
        let worker = Arc::clone(inner);
        self.spawn_job("carrier-detail", ticket, move || {
            worker.builds.fetch_add(1, Ordering::SeqCst);
            let cells = source.won_cells(worker.config.template.rows, &selection);
            if let Err(err) = worker.disk.store_detail(&source.hash, carrier, cells.clone()) {
                warn!(source_hash = %source.hash, carrier, error = %err, "could not persist carrier detail");
            }
            worker
                .details
                .lock()
                .insert((source.hash.clone(), carrier.to_string()), cells);
        });
        Ok(Computed::Pending)
    }

    /// Precomputes the merchant's full candidate selection and every
    /// single-carrier result in one background pass. `Ready` when both are
    /// already cached.
    pub fn generate(&self) -> EngineResult<Computed<()>> {
        let inner = &self.inner;
        let source = inner.current()?;
        let key = source.candidates.key();
        let summary_cached = inner.cached_summary(&source, &key).is_some();
        let breakdown_cached = inner.cached_breakdown(&source).is_some();
        if summary_cached && breakdown_cached {
            return Ok(Computed::Ready(()));
        }

        let summary_ticket = if summary_cached {
            None
        } else {
            match inner.summary_jobs.try_claim(&format!("{}:{key}", source.hash)) {
                Claim::Claimed(ticket) => Some(ticket),
                Claim::InFlight => None,
            }
        };
        let breakdown_ticket = if breakdown_cached {
            None
        } else {
            match inner.breakdown_jobs.try_claim(&source.breakdown_key()) {
                Claim::Claimed(ticket) => Some(ticket),
                Claim::InFlight => None,
            }
        };

        let build_summary = summary_ticket.is_some();
        let build_breakdown = breakdown_ticket.is_some();
        if !build_summary && !build_breakdown {
            return Ok(Computed::Pending);
        }

        let worker = Arc::clone(inner);
        let tickets = (summary_ticket, breakdown_ticket);
        self.spawn_job("generate", tickets, move || {
            if build_summary {
                worker.builds.fetch_add(1, Ordering::SeqCst);
                let metrics = source.metrics(worker.config.template.rows, &source.candidates);
                worker.remember_summary(&source, &key, metrics);
            }
            if build_breakdown {
                worker.build_breakdown(&source);
            }
            info!(source_hash = %source.hash, "generate pass finished");
        });
        Ok(Computed::Pending)
    }

    /// Forgets everything cached for `source_hash`, in memory and on disk.
    pub fn invalidate(&self, source_hash: &str) -> EngineResult<()> {
        let inner = &self.inner;
        inner.summaries.lock().retain(|(h, _), _| h != source_hash);
        inner.details.lock().retain(|(h, _), _| h != source_hash);

        let current = inner.source.read().clone();
        let dataset_hash = current
            .as_ref()
            .filter(|source| source.hash == source_hash)
            .map(|source| {
                inner.breakdowns.lock().remove(&source.breakdown_key());
                source.dataset.hash().to_string()
            });
        inner.disk.remove_source(source_hash, dataset_hash.as_deref())?;
        info!(source_hash, "cache invalidated");
        Ok(())
    }

    /// Recomputes `selection` through the template's own formulas and
    /// compares the two.
    pub fn validate_against_template(&self, selection: &Selection) -> EngineResult<CrossCheck> {
        let inner = &self.inner;
        let source = inner.current()?;
        let layout = &inner.config.template;
        let depth = inner.config.max_formula_depth;

        let computed = inner
            .cached_summary(&source, &selection.key())
            .unwrap_or_else(|| source.metrics(layout.rows, selection));
        let services = source.merchant.qualification_filter();
        let overrides =
            carrier_toggle_overrides(&source.workbook, layout, selection, &services, depth)?;
        let template = template_metrics(&source.workbook, layout, overrides, depth)?;
        let check = cross_check(&computed, &template, CROSS_CHECK_TOLERANCE);

        if !check.is_consistent() {
            warn!(
                selection = %selection,
                discrepancies = check.discrepancies.len(),
                "template disagrees with computed metrics"
            );
        }
        Ok(check)
    }

    /// Runs `work` on the blocking pool while `ticket` marks the job in
    /// flight. Panics are logged; the ticket clears the marker either way.
    fn spawn_job<T, F>(&self, kind: &'static str, ticket: T, work: F)
    where
        T: Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        let handle = self.runtime.spawn_blocking(move || {
            let _ticket = ticket;
            work();
        });
        self.runtime.spawn(async move {
            if let Err(err) = handle.await {
                error!(job = kind, error = %err, "background job failed");
            }
        });
    }
}
