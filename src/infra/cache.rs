//! Persistent on-disk caches for computed metrics.
//!
//! Three files per source, all written through temp-file + rename:
//! - `dashboard-<source hash>.json`: selection key → metrics
//! - `breakdown-<dataset hash>.json`: carrier → single-carrier metrics,
//!   valid only for the config hash stored inside
//! - `detail-<source hash>.json`: carrier → cells that carrier won
//!
//! A new source hash means new file names, so entries for an old hash are
//! simply never read again.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::domain::{CarrierName, CellOutcome, MetricsResult};
use crate::util::persistence::{load_json, save_json_atomic, CacheError};

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

/// Age bookkeeping shared by every cache file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp {
    /// Unix timestamp (seconds) of the last write.
    pub cached_at: u64,
    /// Same instant, RFC 3339, for people reading the file.
    pub generated_at: String,
}

impl Stamp {
    pub fn now() -> Self {
        Self {
            cached_at: now_secs(),
            generated_at: now_rfc3339(),
        }
    }

    pub fn age(&self) -> Duration {
        Duration::from_secs(now_secs().saturating_sub(self.cached_at))
    }

    /// Human-readable age string.
    pub fn age_string(&self) -> String {
        let secs = self.age().as_secs();
        if secs < 60 {
            format!("{secs}s")
        } else if secs < 3600 {
            format!("{}m", secs / 60)
        } else if secs < 86400 {
            format!("{}h", secs / 3600)
        } else {
            format!("{}d", secs / 86400)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardCache {
    pub source_hash: String,
    pub stamp: Stamp,
    pub entries: BTreeMap<String, MetricsResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownCache {
    pub dataset_hash: String,
    pub config_hash: String,
    pub stamp: Stamp,
    pub carriers: BTreeMap<CarrierName, MetricsResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarrierDetailCache {
    pub source_hash: String,
    pub stamp: Stamp,
    pub carriers: BTreeMap<CarrierName, Vec<CellOutcome>>,
}

/// Cache directory plus the process-local write lock that serializes
/// load-merge-write cycles.
pub struct CacheStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn dashboard_path(&self, source_hash: &str) -> PathBuf {
        self.dir.join(format!("dashboard-{source_hash}.json"))
    }

    fn breakdown_path(&self, dataset_hash: &str) -> PathBuf {
        self.dir.join(format!("breakdown-{dataset_hash}.json"))
    }

    fn detail_path(&self, source_hash: &str) -> PathBuf {
        self.dir.join(format!("detail-{source_hash}.json"))
    }

    /// Unreadable files are logged and treated as a miss.
    fn read<T: DeserializeOwned>(path: &Path) -> Option<T> {
        match load_json(path) {
            Ok(Some(value)) => Some(value),
            Ok(None) => {
                debug!(path = %path.display(), "no cache file");
                None
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring unreadable cache file");
                None
            }
        }
    }

    pub fn load_dashboard(&self, source_hash: &str) -> Option<DashboardCache> {
        let cache: DashboardCache = Self::read(&self.dashboard_path(source_hash))?;
        if cache.source_hash != source_hash {
            warn!(source_hash, found = %cache.source_hash, "dashboard cache hash mismatch");
            return None;
        }
        info!(
            source_hash,
            entries = cache.entries.len(),
            age = %cache.stamp.age_string(),
            "loaded dashboard cache"
        );
        Some(cache)
    }

    /// Adds one selection's metrics without clobbering entries another job
    /// wrote since this one started.
    pub fn store_metrics(
        &self,
        source_hash: &str,
        selection_key: &str,
        metrics: MetricsResult,
    ) -> Result<(), CacheError> {
        self.store_many(source_hash, [(selection_key.to_string(), metrics)])
    }

    pub fn store_many<I>(&self, source_hash: &str, entries: I) -> Result<(), CacheError>
    where
        I: IntoIterator<Item = (String, MetricsResult)>,
    {
        let _guard = self.write_lock.lock();
        let path = self.dashboard_path(source_hash);
        let mut cache = Self::read::<DashboardCache>(&path)
            .filter(|cache| cache.source_hash == source_hash)
            .unwrap_or_else(|| DashboardCache {
                source_hash: source_hash.to_string(),
                stamp: Stamp::now(),
                entries: BTreeMap::new(),
            });
        cache.entries.extend(entries);
        cache.stamp = Stamp::now();
        save_json_atomic(&path, &cache)?;
        debug!(source_hash, entries = cache.entries.len(), "saved dashboard cache");
        Ok(())
    }

    /// Breakdown for `dataset_hash`, if it was computed under `config_hash`.
    pub fn load_breakdown(
        &self,
        dataset_hash: &str,
        config_hash: &str,
    ) -> Option<BTreeMap<CarrierName, MetricsResult>> {
        let cache: BreakdownCache = Self::read(&self.breakdown_path(dataset_hash))?;
        if cache.dataset_hash != dataset_hash || cache.config_hash != config_hash {
            debug!(dataset_hash, "breakdown cache built for another config");
            return None;
        }
        Some(cache.carriers)
    }

    pub fn store_breakdown(
        &self,
        dataset_hash: &str,
        config_hash: &str,
        carriers: BTreeMap<CarrierName, MetricsResult>,
    ) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock();
        let path = self.breakdown_path(dataset_hash);
        let mut cache = Self::read::<BreakdownCache>(&path)
            .filter(|cache| cache.dataset_hash == dataset_hash && cache.config_hash == config_hash)
            .unwrap_or_else(|| BreakdownCache {
                dataset_hash: dataset_hash.to_string(),
                config_hash: config_hash.to_string(),
                stamp: Stamp::now(),
                carriers: BTreeMap::new(),
            });
        cache.carriers.extend(carriers);
        cache.stamp = Stamp::now();
        save_json_atomic(&path, &cache)?;
        info!(dataset_hash, carriers = cache.carriers.len(), "saved breakdown cache");
        Ok(())
    }

    pub fn load_detail(&self, source_hash: &str, carrier: &str) -> Option<Vec<CellOutcome>> {
        let mut cache: CarrierDetailCache = Self::read(&self.detail_path(source_hash))?;
        if cache.source_hash != source_hash {
            return None;
        }
        cache.carriers.remove(carrier)
    }

    pub fn store_detail(
        &self,
        source_hash: &str,
        carrier: &str,
        cells: Vec<CellOutcome>,
    ) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock();
        let path = self.detail_path(source_hash);
        let mut cache = Self::read::<CarrierDetailCache>(&path)
            .filter(|cache| cache.source_hash == source_hash)
            .unwrap_or_else(|| CarrierDetailCache {
                source_hash: source_hash.to_string(),
                stamp: Stamp::now(),
                carriers: BTreeMap::new(),
            });
        cache.carriers.insert(carrier.to_string(), cells);
        cache.stamp = Stamp::now();
        save_json_atomic(&path, &cache)?;
        debug!(source_hash, carrier, "saved carrier detail cache");
        Ok(())
    }

    /// Deletes the files belonging to a source; the breakdown file too when
    /// its dataset hash is known.
    pub fn remove_source(
        &self,
        source_hash: &str,
        dataset_hash: Option<&str>,
    ) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock();
        let mut paths = vec![self.dashboard_path(source_hash), self.detail_path(source_hash)];
        paths.extend(dataset_hash.map(|hash| self.breakdown_path(hash)));
        for path in paths {
            match fs::remove_file(&path) {
                Ok(()) => info!(path = %path.display(), "removed cache file"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(savings: f64) -> MetricsResult {
        MetricsResult {
            merchant_annual_savings: savings,
            ..MetricsResult::default()
        }
    }

    #[test]
    fn dashboard_writes_merge_instead_of_clobbering() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());

        store.store_metrics("src1", "DHL", metrics(1.0)).unwrap();
        store.store_metrics("src1", "FedEx", metrics(2.0)).unwrap();

        let cache = store.load_dashboard("src1").unwrap();
        assert_eq!(cache.entries.len(), 2);
        assert_eq!(cache.entries["FedEx"], metrics(2.0));
        assert!(store.load_dashboard("src2").is_none());
    }

    #[test]
    fn breakdown_requires_matching_config_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let carriers = BTreeMap::from([("DHL".to_string(), metrics(3.0))]);

        store.store_breakdown("data", "cfg-a", carriers.clone()).unwrap();
        assert_eq!(store.load_breakdown("data", "cfg-a"), Some(carriers));
        assert_eq!(store.load_breakdown("data", "cfg-b"), None);
    }

    #[test]
    fn remove_source_deletes_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        store.store_metrics("src", "DHL", metrics(1.0)).unwrap();
        store.store_detail("src", "DHL", Vec::new()).unwrap();
        store
            .store_breakdown("data", "cfg", BTreeMap::new())
            .unwrap();

        assert_eq!(store.load_detail("src", "DHL"), Some(Vec::new()));
        store.remove_source("src", Some("data")).unwrap();
        assert!(store.load_dashboard("src").is_none());
        assert!(store.load_detail("src", "DHL").is_none());
        assert!(store.load_breakdown("data", "cfg").is_none());
        // Removing twice is fine.
        store.remove_source("src", None).unwrap();
    }

    #[test]
    fn corrupt_cache_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        fs::write(dir.path().join("dashboard-src.json"), "{not json").unwrap();
        assert!(store.load_dashboard("src").is_none());
        store.store_metrics("src", "DHL", metrics(1.0)).unwrap();
        assert!(store.load_dashboard("src").is_some());
    }

    #[test]
    fn stamp_age_formats_like_a_clock() {
        let stamp = Stamp {
            cached_at: now_secs() - 7200,
            generated_at: String::new(),
        };
        assert_eq!(stamp.age_string(), "2h");
    }
}
