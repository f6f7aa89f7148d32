//! Materialized per-species summary with revision-keyed caching.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Local, Utc};
use serde_json::{Value, json};
use tracing::warn;

use super::Store;
use super::detections::{LogEntry, entry_id};
use crate::clips::ClipEntry;
use crate::error::Result;
use crate::utils::text::normalize_confidence_f64;
use crate::utils::time::{now_iso, parse_timestamp};

const CACHE_KEY: &str = "log_summary";
const SUMMARY_DAYS: i64 = 30;

struct SpeciesRollup {
    count: u64,
    latest_entry: LogEntry,
    latest_time: Option<DateTime<Utc>>,
    latest_raw: String,
    latest_conf: f64,
    daily_counts: Vec<u64>,
}

impl Store {
    /// Drop the cached summary. Store failures are swallowed; the next
    /// summary call simply recomputes.
    pub fn invalidate_summary_cache(&self) {
        let run = || -> Result<()> {
            let connection = self.connect()?;
            connection.execute(
                "DELETE FROM summary_cache WHERE cache_key = ?1",
                [CACHE_KEY],
            )?;
            Ok(())
        };
        if let Err(e) = run() {
            warn!("summary cache invalidation failed: {e}");
        }
    }

    /// Cached summary payload, iff it was built against the current
    /// revision.
    #[must_use]
    pub fn cached_summary(&self) -> Option<Value> {
        let revision = self.revision();
        let run = || -> Result<Option<String>> {
            let connection = self.connect()?;
            let mut statement = connection.prepare(
                "SELECT payload_json FROM summary_cache
                 WHERE cache_key = ?1 AND log_revision = ?2",
            )?;
            let mut rows = statement.query(rusqlite::params![CACHE_KEY, revision])?;
            match rows.next()? {
                Some(row) => Ok(Some(row.get(0)?)),
                None => Ok(None),
            }
        };
        let raw = run().ok()??;
        serde_json::from_str::<Value>(&raw)
            .ok()
            .filter(Value::is_object)
    }

    fn set_cached_summary(&self, payload: &Value) {
        let run = || -> Result<()> {
            let encoded = serde_json::to_string(payload)?;
            let connection = self.connect()?;
            connection.execute(
                "INSERT OR REPLACE INTO summary_cache
                 (cache_key, log_revision, payload_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![CACHE_KEY, self.revision(), encoded, now_iso()],
            )?;
            Ok(())
        };
        if let Err(e) = run() {
            warn!("summary cache write failed: {e}");
        }
    }

    /// Per-species aggregate over the whole log.
    ///
    /// Served from the cache while the revision matches; a recompute also
    /// refreshes the in-memory species aggregates so they stay equal to
    /// what a full scan produces.
    #[must_use]
    pub fn summarize(&self, clip_index: &HashMap<String, ClipEntry>) -> Value {
        if let Some(cached) = self.cached_summary() {
            return cached;
        }
        let entries = self.read_log(None);
        if entries.is_empty() {
            let payload = json!({
                "entries": [],
                "species_count": 0,
                "total_detections": 0,
                "log_revision": self.revision(),
            });
            self.set_cached_summary(&payload);
            return payload;
        }

        let today = Local::now().date_naive();
        let start_date = today - Duration::days(SUMMARY_DAYS - 1);
        let icon_index = self.load_icon_index();
        let total = entries.len();

        let mut rollups: HashMap<String, SpeciesRollup> = HashMap::new();
        for entry in entries {
            let species = entry.species_label().to_string();
            let time = parse_timestamp(&entry.timestamp);
            let raw = entry.timestamp.clone();
            let conf = normalize_confidence_f64(entry.confidence).unwrap_or(-1.0);
            let daily_index = time.and_then(|dt| {
                let local_date = dt.with_timezone(&Local).date_naive();
                let offset = (local_date - start_date).num_days();
                (0..SUMMARY_DAYS).contains(&offset).then_some(offset as usize)
            });

            let rollup = rollups.entry(species).or_insert_with(|| SpeciesRollup {
                count: 0,
                latest_entry: entry.clone(),
                latest_time: time,
                latest_raw: raw.clone(),
                latest_conf: conf,
                daily_counts: vec![0; SUMMARY_DAYS as usize],
            });
            rollup.count += 1;
            if let Some(index) = daily_index {
                rollup.daily_counts[index] += 1;
            }
            if rollup.count == 1 {
                continue;
            }

            let replace = match (time, rollup.latest_time) {
                (Some(current), Some(latest)) => {
                    current > latest || (current == latest && conf > rollup.latest_conf)
                }
                (Some(_), None) => true,
                (None, None) => raw > rollup.latest_raw,
                (None, Some(_)) => false,
            };
            if replace {
                rollup.latest_entry = entry;
                rollup.latest_time = time;
                rollup.latest_raw = raw;
                rollup.latest_conf = conf;
            }
        }

        let mut summary_entries = Vec::with_capacity(rollups.len());
        let mut counts: HashMap<String, u64> = HashMap::new();
        for (species, rollup) in &rollups {
            counts.insert(species.clone(), rollup.count);

            let mut latest = rollup.latest_entry.clone();
            if latest.species.is_empty() {
                latest.species.clone_from(species);
            }
            latest.id = entry_id(&latest);
            let mut value = serde_json::to_value(&latest).unwrap_or_else(|_| json!({}));
            if let Some(map) = value.as_object_mut() {
                map.insert("count".to_string(), json!(rollup.count));
                map.insert("daily_counts".to_string(), json!(rollup.daily_counts));
                map.insert(
                    "icon_url".to_string(),
                    json!(self.icon_url_for(species, &icon_index)),
                );
                if let Some(clip) = clip_index.get(species) {
                    if !clip.filename.is_empty() {
                        let query: String = url::form_urlencoded::Serializer::new(String::new())
                            .append_pair("species", species)
                            .finish();
                        map.insert("clip_url".to_string(), json!(format!("/api/clip?{query}")));
                        map.insert("clip_confidence".to_string(), json!(clip.confidence));
                    }
                }
            }
            summary_entries.push(value);
        }

        self.replace_species_aggregates(counts);

        let payload = json!({
            "entries": summary_entries,
            "species_count": summary_entries.len(),
            "total_detections": total,
            "log_revision": self.revision(),
        });
        self.set_cached_summary(&payload);
        payload
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::testutil::temp_store;
    use super::*;

    fn entry(species: &str, stamp: &str, confidence: f64) -> LogEntry {
        LogEntry {
            timestamp: stamp.to_string(),
            species: species.to_string(),
            scientific_name: String::new(),
            confidence: Some(confidence),
            location: "Test".to_string(),
            ..LogEntry::default()
        }
    }

    #[test]
    fn test_summary_counts_and_latest_selection() {
        let (_dir, store) = temp_store();
        let mut entries = vec![
            entry("Robin", "2024-05-01T10:00:00Z", 0.5),
            entry("Robin", "2024-05-02T10:00:00Z", 0.3),
            entry("Jay", "2024-05-01T09:00:00Z", 0.9),
        ];
        store.append_detections(&mut entries).unwrap();

        let summary = store.summarize(&HashMap::new());
        assert_eq!(summary["species_count"], 2);
        assert_eq!(summary["total_detections"], 3);
        let rows = summary["entries"].as_array().unwrap();
        let robin = rows
            .iter()
            .find(|row| row["species"] == "Robin")
            .unwrap();
        assert_eq!(robin["count"], 2);
        // Latest by timestamp, not by confidence.
        assert_eq!(robin["timestamp"], "2024-05-02T10:00:00Z");
        assert_eq!(robin["daily_counts"].as_array().unwrap().len(), 30);
    }

    #[test]
    fn test_equal_timestamps_break_ties_by_confidence() {
        let (_dir, store) = temp_store();
        let mut entries = vec![
            entry("Robin", "2024-05-01T10:00:00Z", 0.5),
            entry("Robin", "2024-05-01T10:00:00Z", 0.9),
        ];
        store.append_detections(&mut entries).unwrap();
        let summary = store.summarize(&HashMap::new());
        let row = &summary["entries"].as_array().unwrap()[0];
        assert_eq!(row["confidence"], 0.9);
    }

    #[test]
    fn test_cache_hit_until_revision_changes() {
        let (_dir, store) = temp_store();
        let mut entries = vec![entry("Robin", "2024-05-01T10:00:00Z", 0.5)];
        store.append_detections(&mut entries).unwrap();

        assert!(store.cached_summary().is_none());
        let first = store.summarize(&HashMap::new());
        assert_eq!(store.cached_summary(), Some(first.clone()));

        // A new append bumps the revision and invalidates the cache.
        let mut more = vec![entry("Jay", "2024-05-02T10:00:00Z", 0.7)];
        store.append_detections(&mut more).unwrap();
        assert!(store.cached_summary().is_none());
        let second = store.summarize(&HashMap::new());
        assert_ne!(first["species_count"], second["species_count"]);
    }

    #[test]
    fn test_clip_info_attached() {
        let (_dir, store) = temp_store();
        let mut entries = vec![entry("American Robin", "2024-05-01T10:00:00Z", 0.9)];
        store.append_detections(&mut entries).unwrap();

        let mut clips = HashMap::new();
        clips.insert(
            "American Robin".to_string(),
            ClipEntry {
                species: "American Robin".to_string(),
                confidence: Some(0.9),
                filename: "american-robin.wav".to_string(),
                ..ClipEntry::default()
            },
        );
        let summary = store.summarize(&clips);
        let row = &summary["entries"].as_array().unwrap()[0];
        assert_eq!(row["clip_url"], "/api/clip?species=American+Robin");
        assert_eq!(row["clip_confidence"], 0.9);
    }

    #[test]
    fn test_empty_log_summary() {
        let (_dir, store) = temp_store();
        let summary = store.summarize(&HashMap::new());
        assert_eq!(summary["species_count"], 0);
        assert_eq!(summary["total_detections"], 0);
        assert!(summary["entries"].as_array().unwrap().is_empty());
        // The empty payload is cached too.
        assert!(store.cached_summary().is_some());
    }
}
