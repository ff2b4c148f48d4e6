//! Bounded memo keyed by file identity and modification time.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::EngineResult;

struct Entry<V> {
    path: PathBuf,
    modified: SystemTime,
    value: Arc<V>,
}

/// Keeps the most recently used `capacity` loads. Editing a file changes its
/// mtime, so the next lookup misses and reloads.
pub struct FileMemo<V> {
    capacity: usize,
    entries: Mutex<VecDeque<Entry<V>>>,
}

impl<V> FileMemo<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Returns the memoized value for `path`, calling `load` on a miss.
    ///
    /// Files whose mtime cannot be read are loaded every time, which lets
    /// `load` report a missing file in its own terms.
    pub fn get_or_load<F>(&self, path: &Path, load: F) -> EngineResult<Arc<V>>
    where
        F: FnOnce(&Path) -> EngineResult<V>,
    {
        let Ok(modified) = fs::metadata(path).and_then(|meta| meta.modified()) else {
            return load(path).map(Arc::new);
        };

        {
            let mut entries = self.entries.lock();
            if let Some(pos) = entries
                .iter()
                .position(|e| e.path == path && e.modified == modified)
            {
                if let Some(entry) = entries.remove(pos) {
                    let value = Arc::clone(&entry.value);
                    entries.push_back(entry);
                    return Ok(value);
                }
            }
        }

        debug!(path = %path.display(), "memo miss");
        let value = Arc::new(load(path)?);

        let mut entries = self.entries.lock();
        entries.retain(|e| e.path != path);
        entries.push_back(Entry {
            path: path.to_path_buf(),
            modified,
            value: Arc::clone(&value),
        });
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    fn touch(path: &Path, body: &str, offset_secs: u64) {
        fs::write(path, body).unwrap();
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + offset_secs))
            .unwrap();
    }

    #[test]
    fn reloads_only_when_mtime_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rates.json");
        touch(&path, "1", 0);

        let memo = FileMemo::new(4);
        let loads = AtomicUsize::new(0);
        let load = |p: &Path| -> EngineResult<String> {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(fs::read_to_string(p)?)
        };

        assert_eq!(*memo.get_or_load(&path, load).unwrap(), "1");
        assert_eq!(*memo.get_or_load(&path, load).unwrap(), "1");
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        touch(&path, "2", 60);
        assert_eq!(*memo.get_or_load(&path, load).unwrap(), "2");
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert_eq!(memo.len(), 1);
    }

    #[test]
    fn evicts_least_recently_used() {
        let dir = tempfile::tempdir().unwrap();
        let memo = FileMemo::new(2);
        let paths: Vec<PathBuf> = (0..3).map(|i| dir.path().join(format!("{i}.json"))).collect();
        for path in &paths {
            touch(path, "x", 0);
            memo.get_or_load(path, |p| Ok(p.to_path_buf())).unwrap();
        }
        assert_eq!(memo.len(), 2);
    }
}
