//! Embedded SQL store for detections, events, icons, and the summary cache.
//!
//! One connection is opened per operation; WAL journaling keeps readers and
//! writers out of each other's way. Writes are serialized by per-table
//! mutexes, and the in-memory species aggregates plus the log revision live
//! here so every detections write updates them under one roof.

mod detections;
mod events;
mod icons;
mod migrate;
mod summary;

pub use detections::{LogEntry, entry_id};
pub use events::{EventEntry, event_id};

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use rusqlite::Connection;

use crate::error::Result;
use crate::paths::ProjectPaths;
use crate::utils::time::epoch_ms;

/// Persistent store handle. Cheap to share behind an `Arc`.
pub struct Store {
    db_path: PathBuf,
    paths: ProjectPaths,
    detections_lock: Mutex<()>,
    events_lock: Mutex<()>,
    revision: Mutex<i64>,
    species: Mutex<HashSet<String>>,
    species_counts: Mutex<HashMap<String, u64>>,
}

impl Store {
    /// Open the store, creating the schema, importing any legacy
    /// line-delimited logs, and rebuilding the in-memory aggregates.
    pub fn open(paths: &ProjectPaths) -> Result<Self> {
        let store = Self {
            db_path: paths.db.clone(),
            paths: paths.clone(),
            detections_lock: Mutex::new(()),
            events_lock: Mutex::new(()),
            revision: Mutex::new(epoch_ms()),
            species: Mutex::new(HashSet::new()),
            species_counts: Mutex::new(HashMap::new()),
        };
        store.init_schema()?;
        store.migrate_legacy_files()?;
        store.rebuild_species_aggregates();
        Ok(store)
    }

    /// Open a fresh connection with the standard pragmas applied.
    pub(crate) fn connect(&self) -> Result<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(std::time::Duration::from_secs(30))?;
        connection.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Ok(connection)
    }

    fn init_schema(&self) -> Result<()> {
        let connection = self.connect()?;
        connection.execute_batch(
            "CREATE TABLE IF NOT EXISTS detections (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                species TEXT,
                scientific_name TEXT,
                confidence REAL,
                location TEXT,
                raw_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                type TEXT,
                message TEXT,
                raw_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS species_icons (
                species_key TEXT PRIMARY KEY,
                species_name TEXT,
                filename TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS summary_cache (
                cache_key TEXT PRIMARY KEY,
                log_revision INTEGER NOT NULL,
                payload_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_detections_timestamp ON detections(timestamp);
            CREATE INDEX IF NOT EXISTS idx_detections_species ON detections(species);
            CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_type ON events(type);
            CREATE INDEX IF NOT EXISTS idx_species_icons_filename ON species_icons(filename);",
        )?;
        Ok(())
    }

    fn lock<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current log revision.
    #[must_use]
    pub fn revision(&self) -> i64 {
        *Self::lock(&self.revision)
    }

    /// Advance the log revision to `max(current + 1, now_ms)`.
    pub fn bump_revision(&self) -> i64 {
        let mut revision = Self::lock(&self.revision);
        let candidate = epoch_ms().max(*revision + 1);
        *revision = candidate;
        candidate
    }

    /// Number of distinct species seen across all detections.
    #[must_use]
    pub fn species_count(&self) -> usize {
        Self::lock(&self.species).len()
    }

    /// How many times the given species appears in the log.
    #[must_use]
    pub fn species_heard_count(&self, species: &str) -> u64 {
        if species.is_empty() {
            return 0;
        }
        Self::lock(&self.species_counts)
            .get(species)
            .copied()
            .unwrap_or(0)
    }

    /// 1-based rank of the species by detection count (ties by name).
    #[must_use]
    pub fn species_rank(&self, species: &str) -> Option<usize> {
        if species.is_empty() {
            return None;
        }
        let counts = Self::lock(&self.species_counts);
        if counts.is_empty() {
            return None;
        }
        let mut items: Vec<(&String, &u64)> = counts.iter().collect();
        items.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        items
            .iter()
            .position(|(name, _)| name.as_str() == species)
            .map(|index| index + 1)
    }

    /// Rebuild the species set and counts from a full log scan.
    pub fn rebuild_species_aggregates(&self) {
        let entries = self.read_log(None);
        let mut set = HashSet::new();
        let mut counts: HashMap<String, u64> = HashMap::new();
        for entry in &entries {
            let species = entry.species_label().to_string();
            *counts.entry(species.clone()).or_insert(0) += 1;
            set.insert(species);
        }
        *Self::lock(&self.species) = set;
        *Self::lock(&self.species_counts) = counts;
    }

    /// Fold freshly appended entries into the aggregates.
    fn update_species_aggregates(&self, entries: &[LogEntry]) {
        {
            let mut set = Self::lock(&self.species);
            for entry in entries {
                set.insert(entry.species_label().to_string());
            }
        }
        let mut counts = Self::lock(&self.species_counts);
        for entry in entries {
            *counts.entry(entry.species_label().to_string()).or_insert(0) += 1;
        }
    }

    /// Replace the aggregates wholesale (used by the summary recompute).
    fn replace_species_aggregates(&self, counts: HashMap<String, u64>) {
        *Self::lock(&self.species) = counts.keys().cloned().collect();
        *Self::lock(&self.species_counts) = counts;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod testutil {
    use super::*;

    /// Store rooted in a fresh temp directory.
    pub fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let paths = ProjectPaths::new(dir.path());
        paths.ensure_directories().unwrap();
        let store = Store::open(&paths).unwrap();
        (dir, store)
    }
}
