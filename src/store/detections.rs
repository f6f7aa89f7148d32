//! Detection log: append-mostly rows keyed by a stable opaque id.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::warn;

use super::Store;
use crate::error::Result;
use crate::utils::time::now_iso;

/// One recorded detection.
///
/// Unknown fields from older releases ride along in `extra` so the raw
/// record round-trips unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogEntry {
    /// Stable opaque id.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// UTC timestamp, ISO-8601 with trailing `Z`.
    pub timestamp: String,
    /// Species common name.
    pub species: String,
    /// Species scientific name.
    pub scientific_name: String,
    /// Normalized confidence in [0, 1], when known.
    pub confidence: Option<f64>,
    /// Location label the detection was recorded under.
    pub location: String,
    /// Fields this release does not model.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl LogEntry {
    /// Species name with the historical `Unknown` fallback.
    #[must_use]
    pub fn species_label(&self) -> &str {
        if self.species.is_empty() {
            "Unknown"
        } else {
            &self.species
        }
    }
}

/// Stable id for a detection entry.
///
/// An explicit id wins; otherwise the id is the first 12 hex digits of
/// `SHA-1("timestamp|species|confidence")`, which makes re-derivation
/// idempotent.
#[must_use]
pub fn entry_id(entry: &LogEntry) -> String {
    if !entry.id.is_empty() {
        return entry.id.clone();
    }
    let confidence = entry
        .confidence
        .map(|c| c.to_string())
        .unwrap_or_default();
    let base = format!("{}|{}|{}", entry.timestamp, entry.species, confidence);
    let digest = Sha1::digest(base.as_bytes());
    hex::encode(digest)[..12].to_string()
}

impl Store {
    /// Append detections in one transaction, then update the in-memory
    /// aggregates, bump the revision, and invalidate the summary cache.
    pub fn append_detections(&self, entries: &mut [LogEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        for entry in entries.iter_mut() {
            if entry.id.is_empty() {
                entry.id = entry_id(entry);
            }
            if entry.timestamp.is_empty() {
                entry.timestamp = now_iso();
            }
        }
        {
            let _guard = Self::lock(&self.detections_lock);
            let mut connection = self.connect()?;
            let tx = connection.transaction()?;
            {
                let mut statement = tx.prepare(
                    "INSERT OR REPLACE INTO detections
                     (id, timestamp, species, scientific_name, confidence, location, raw_json)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for entry in entries.iter() {
                    let raw = serde_json::to_string(entry)?;
                    statement.execute(rusqlite::params![
                        entry.id,
                        entry.timestamp,
                        entry.species_label(),
                        entry.scientific_name,
                        entry.confidence,
                        entry.location,
                        raw,
                    ])?;
                }
            }
            tx.commit()?;
        }
        self.update_species_aggregates(entries);
        self.bump_revision();
        self.invalidate_summary_cache();
        Ok(())
    }

    /// Read up to `limit` of the newest detections, returned oldest-first.
    ///
    /// Store failures degrade to an empty list.
    #[must_use]
    pub fn read_log(&self, limit: Option<usize>) -> Vec<LogEntry> {
        if limit == Some(0) {
            return Vec::new();
        }
        match self.read_log_inner(limit) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("detections read failed: {e}");
                Vec::new()
            }
        }
    }

    fn read_log_inner(&self, limit: Option<usize>) -> Result<Vec<LogEntry>> {
        let rows = {
            let _guard = Self::lock(&self.detections_lock);
            let connection = self.connect()?;
            let mut query =
                "SELECT id, raw_json FROM detections ORDER BY timestamp DESC, rowid DESC"
                    .to_string();
            if limit.is_some() {
                query.push_str(" LIMIT ?1");
            }
            let mut statement = connection.prepare(&query)?;
            let map_row = |row: &rusqlite::Row<'_>| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            };
            let mapped = match limit {
                Some(n) => statement.query_map([n as i64], map_row)?,
                None => statement.query_map([], map_row)?,
            };
            mapped.collect::<std::result::Result<Vec<_>, _>>()?
        };

        let mut entries = Vec::with_capacity(rows.len());
        for (id, raw) in rows.into_iter().rev() {
            let mut entry: LogEntry = serde_json::from_str(&raw).unwrap_or_else(|_| LogEntry {
                id: id.clone(),
                ..LogEntry::default()
            });
            entry.id = entry_id(&entry);
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Timestamps of detections at or after `cutoff_iso`, oldest first.
    #[must_use]
    pub fn detection_timestamps_since(&self, cutoff_iso: &str) -> Vec<String> {
        let run = || -> Result<Vec<String>> {
            let _guard = Self::lock(&self.detections_lock);
            let connection = self.connect()?;
            let mut statement = connection.prepare(
                "SELECT timestamp FROM detections WHERE timestamp >= ?1 ORDER BY timestamp ASC",
            )?;
            let rows = statement.query_map([cutoff_iso], |row| row.get::<_, String>(0))?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        };
        match run() {
            Ok(stamps) => stamps,
            Err(e) => {
                warn!("activity read failed: {e}");
                Vec::new()
            }
        }
    }

    /// Delete a detection by id. On removal the aggregates are rebuilt from
    /// a full scan, the revision bumps, and the summary cache is dropped.
    #[must_use]
    pub fn delete_detection(&self, id: &str) -> bool {
        if id.is_empty() {
            return false;
        }
        let removed = {
            let _guard = Self::lock(&self.detections_lock);
            match self.connect().and_then(|connection| {
                Ok(connection.execute("DELETE FROM detections WHERE id = ?1", [id])?)
            }) {
                Ok(count) => count > 0,
                Err(e) => {
                    warn!("detection delete failed: {e}");
                    return false;
                }
            }
        };
        if removed {
            self.rebuild_species_aggregates();
            self.bump_revision();
            self.invalidate_summary_cache();
        }
        removed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::super::testutil::temp_store;
    use super::*;

    fn entry(species: &str, stamp: &str, confidence: f64) -> LogEntry {
        LogEntry {
            timestamp: stamp.to_string(),
            species: species.to_string(),
            scientific_name: format!("{species} sci"),
            confidence: Some(confidence),
            location: "Test".to_string(),
            ..LogEntry::default()
        }
    }

    #[test]
    fn test_entry_id_is_deterministic_and_idempotent() {
        let mut record = entry("American Robin", "2024-05-01T10:00:00Z", 0.91);
        let id = entry_id(&record);
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(entry_id(&record), id);
        record.id = id.clone();
        // Re-deriving from an entry that already carries its id is a no-op.
        assert_eq!(entry_id(&record), id);
    }

    #[test]
    fn test_append_then_read_round_trip() {
        let (_dir, store) = temp_store();
        let mut entries = vec![entry("American Robin", "2024-05-01T10:00:00Z", 0.91)];
        store.append_detections(&mut entries).unwrap();
        let read = store.read_log(None);
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].species, "American Robin");
        assert_eq!(read[0].confidence, Some(0.91));
        assert_eq!(read[0].id, entries[0].id);
    }

    #[test]
    fn test_read_log_orders_oldest_first_with_limit() {
        let (_dir, store) = temp_store();
        for (i, stamp) in [
            "2024-05-01T10:00:00Z",
            "2024-05-01T11:00:00Z",
            "2024-05-01T12:00:00Z",
        ]
        .iter()
        .enumerate()
        {
            let mut entries = vec![entry(&format!("Species {i}"), stamp, 0.5)];
            store.append_detections(&mut entries).unwrap();
        }
        let last_two = store.read_log(Some(2));
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].species, "Species 1");
        assert_eq!(last_two[1].species, "Species 2");
        assert!(store.read_log(Some(0)).is_empty());
    }

    #[test]
    fn test_append_updates_aggregates_and_revision() {
        let (_dir, store) = temp_store();
        let before = store.revision();
        let mut entries = vec![
            entry("American Robin", "2024-05-01T10:00:00Z", 0.91),
            entry("American Robin", "2024-05-01T10:00:00Z", 0.55),
            entry("Blue Jay", "2024-05-01T10:00:00Z", 0.70),
        ];
        store.append_detections(&mut entries).unwrap();
        assert!(store.revision() > before);
        assert_eq!(store.species_count(), 2);
        assert_eq!(store.species_heard_count("American Robin"), 2);
        assert_eq!(store.species_rank("American Robin"), Some(1));
        assert_eq!(store.species_rank("Blue Jay"), Some(2));
        assert_eq!(store.species_rank("Crow"), None);
    }

    #[test]
    fn test_delete_removes_only_target_row() {
        let (_dir, store) = temp_store();
        let mut entries = vec![
            entry("American Robin", "2024-05-01T10:00:00Z", 0.91),
            entry("Blue Jay", "2024-05-01T11:00:00Z", 0.70),
        ];
        store.append_detections(&mut entries).unwrap();
        let target = entries[0].id.clone();
        let before = store.revision();

        assert!(store.delete_detection(&target));
        assert!(store.revision() > before);
        let remaining = store.read_log(None);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].species, "Blue Jay");
        assert_eq!(store.species_count(), 1);

        assert!(!store.delete_detection(&target));
        assert!(!store.delete_detection(""));
    }

    #[test]
    fn test_insert_or_replace_dedupes_by_id() {
        let (_dir, store) = temp_store();
        let mut first = vec![entry("Robin", "2024-05-01T10:00:00Z", 0.5)];
        store.append_detections(&mut first).unwrap();
        let mut replay = vec![first[0].clone()];
        store.append_detections(&mut replay).unwrap();
        assert_eq!(store.read_log(None).len(), 1);
    }

    #[test]
    fn test_extra_fields_round_trip() {
        let (_dir, store) = temp_store();
        let mut record = entry("Robin", "2024-05-01T10:00:00Z", 0.5);
        record
            .extra
            .insert("source".to_string(), serde_json::json!("manual"));
        let mut entries = vec![record];
        store.append_detections(&mut entries).unwrap();
        let read = store.read_log(None);
        assert_eq!(read[0].extra["source"], "manual");
    }
}
