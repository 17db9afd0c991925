//! Bounded cache of resident methylomes with single-flight loads.
//!
//! The server keeps at most `max_resident` methylomes in memory. Misses
//! load from disk off the reactor; concurrent requests for the same cold
//! accession collapse onto one load and all receive the same handle or the
//! same error. Eviction is least-recently-used among entries not currently
//! held by a request; when every entry is held, a miss fails rather than
//! grow the cache.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OnceCell};
use tracing::debug;

use crate::error::{CacheError, Error, MethylomeError};

use super::{methylome_path, Methylome, MethylomeMetadata};

/// Cache construction parameters
#[derive(Debug, Clone)]
pub struct MethylomeSetConfig {
    pub methylome_dir: PathBuf,
    pub max_resident: usize,
}

struct Entry {
    methylome: Arc<Methylome>,
    lru_tick: u64,
    epoch: u64,
}

type FlightResult = Result<Arc<Methylome>, CacheError>;
type FlightCell = Arc<OnceCell<FlightResult>>;

/// The resident methylome cache.
pub struct MethylomeSet {
    dir: PathBuf,
    max_resident: usize,
    /// Resident entries; never locked across an await point
    entries: Mutex<HashMap<String, Entry>>,
    /// One cell per in-flight load; waiters share the cell's result
    inflight: AsyncMutex<HashMap<String, FlightCell>>,
    tick: AtomicU64,
    epoch: AtomicU64,
    loads: AtomicU64,
}

impl MethylomeSet {
    #[must_use]
    pub fn new(config: MethylomeSetConfig) -> Self {
        Self {
            dir: config.methylome_dir,
            max_resident: config.max_resident,
            entries: Mutex::new(HashMap::new()),
            inflight: AsyncMutex::new(HashMap::new()),
            tick: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            loads: AtomicU64::new(0),
        }
    }

    /// Number of file loads performed so far
    #[must_use]
    pub fn n_loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Number of methylomes currently resident
    #[must_use]
    pub fn n_resident(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns a shared handle for `accession`, loading it if necessary.
    /// `expected` supplies the site count and content hash the loaded data
    /// must match.
    pub async fn get(
        &self,
        accession: &str,
        expected: &MethylomeMetadata,
    ) -> Result<Arc<Methylome>, CacheError> {
        if let Some(handle) = self.lookup(accession) {
            return Ok(handle);
        }

        let cell = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(accession.to_string())
                .or_default()
                .clone()
        };
        let result = cell
            .get_or_init(|| self.load_and_publish(accession, expected))
            .await
            .clone();

        // retire the flight; a failed accession is retried by later callers
        let mut inflight = self.inflight.lock().await;
        if let Some(current) = inflight.get(accession) {
            if Arc::ptr_eq(current, &cell) {
                inflight.remove(accession);
            }
        }
        result
    }

    /// Hit path: bump recency and hand out a clone of the handle.
    fn lookup(&self, accession: &str) -> Option<Arc<Methylome>> {
        let mut entries = self.entries.lock();
        entries.get_mut(accession).map(|entry| {
            entry.lru_tick = self.tick.fetch_add(1, Ordering::Relaxed) + 1;
            Arc::clone(&entry.methylome)
        })
    }

    async fn load_and_publish(
        &self,
        accession: &str,
        expected: &MethylomeMetadata,
    ) -> FlightResult {
        // a racing flight may have published between our miss and now
        if let Some(handle) = self.lookup(accession) {
            return Ok(handle);
        }

        let path = methylome_path(&self.dir, accession);
        let n_cpgs = expected.n_cpgs;
        self.loads.fetch_add(1, Ordering::Relaxed);
        debug!(accession, path = %path.display(), "loading methylome");

        let acc = accession.to_string();
        let loaded = tokio::task::spawn_blocking(move || Methylome::read(&path, n_cpgs))
            .await
            .map_err(|err| CacheError::Io(err.to_string()))?
            .map_err(|err| load_error(&acc, err))?;

        if loaded.content_hash() != expected.methylome_hash {
            return Err(CacheError::MetadataMismatch(accession.to_string()));
        }

        let handle = Arc::new(loaded);
        self.publish(accession, Arc::clone(&handle))?;
        Ok(handle)
    }

    /// Inserts a freshly loaded methylome, evicting the least recently
    /// used unpinned entry when at capacity.
    fn publish(&self, accession: &str, handle: Arc<Methylome>) -> Result<(), CacheError> {
        let mut entries = self.entries.lock();
        if !entries.contains_key(accession) && entries.len() >= self.max_resident {
            // strong count 1 means only the cache holds the entry
            let victim = entries
                .iter()
                .filter(|(_, entry)| Arc::strong_count(&entry.methylome) == 1)
                .min_by_key(|(_, entry)| (entry.lru_tick, entry.epoch))
                .map(|(key, _)| key.clone());
            match victim {
                Some(key) => {
                    debug!(evicted = %key, "evicting methylome");
                    entries.remove(&key);
                }
                None => return Err(CacheError::CacheFull),
            }
        }
        let entry = Entry {
            methylome: handle,
            lru_tick: self.tick.fetch_add(1, Ordering::Relaxed) + 1,
            epoch: self.epoch.fetch_add(1, Ordering::Relaxed) + 1,
        };
        entries.insert(accession.to_string(), entry);
        Ok(())
    }
}

fn load_error(accession: &str, err: Error) -> CacheError {
    match err {
        Error::IoError(err) if err.kind() == std::io::ErrorKind::NotFound => {
            CacheError::NotFound(accession.to_string())
        }
        Error::IoError(err) => CacheError::Io(err.to_string()),
        Error::MethylomeError(MethylomeError::SizeMismatch { expected, found }) => {
            CacheError::SizeMismatch { expected, found }
        }
        Error::ZlibError(err) => CacheError::CorruptData(err.to_string()),
        other => CacheError::Io(other.to_string()),
    }
}
