//! One-shot import of legacy line-delimited JSON logs and the old icon
//! index, run at startup when the corresponding tables are empty.

use std::io::BufRead;
use std::path::Path;

use tracing::info;

use super::detections::{LogEntry, entry_id};
use super::events::{EventEntry, event_id};
use super::Store;
use crate::error::Result;
use crate::utils::text::normalize_species_key;
use crate::utils::time::now_iso;

const BATCH_SIZE: usize = 1000;

fn iter_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> Vec<T> {
    let Ok(file) = std::fs::File::open(path) else {
        return Vec::new();
    };
    let reader = std::io::BufReader::new(file);
    reader
        .lines()
        .map_while(std::result::Result::ok)
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(&line).ok())
        .collect()
}

impl Store {
    pub(super) fn migrate_legacy_files(&self) -> Result<()> {
        self.migrate_legacy_detections()?;
        self.migrate_legacy_events()?;
        self.migrate_legacy_icons()?;
        Ok(())
    }

    fn table_count(&self, table: &str) -> Result<i64> {
        let connection = self.connect()?;
        let count =
            connection.query_row(&format!("SELECT COUNT(1) FROM {table}"), [], |row| {
                row.get(0)
            })?;
        Ok(count)
    }

    fn migrate_legacy_detections(&self) -> Result<()> {
        if self.table_count("detections")? > 0 || !self.paths.legacy_detections.exists() {
            return Ok(());
        }
        let mut entries: Vec<LogEntry> = iter_jsonl(&self.paths.legacy_detections);
        if entries.is_empty() {
            return Ok(());
        }
        for entry in &mut entries {
            entry.id = entry_id(entry);
            if entry.timestamp.is_empty() {
                entry.timestamp = now_iso();
            }
        }
        info!("importing {} legacy detections", entries.len());
        let mut connection = self.connect()?;
        for batch in entries.chunks(BATCH_SIZE) {
            let tx = connection.transaction()?;
            {
                let mut statement = tx.prepare(
                    "INSERT OR REPLACE INTO detections
                     (id, timestamp, species, scientific_name, confidence, location, raw_json)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for entry in batch {
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
        Ok(())
    }

    fn migrate_legacy_events(&self) -> Result<()> {
        if self.table_count("events")? > 0 || !self.paths.legacy_events.exists() {
            return Ok(());
        }
        let mut entries: Vec<EventEntry> = iter_jsonl(&self.paths.legacy_events);
        if entries.is_empty() {
            return Ok(());
        }
        for entry in &mut entries {
            entry.id = event_id(entry);
            if entry.timestamp.is_empty() {
                entry.timestamp = now_iso();
            }
        }
        info!("importing {} legacy events", entries.len());
        let mut connection = self.connect()?;
        for batch in entries.chunks(BATCH_SIZE) {
            let tx = connection.transaction()?;
            {
                let mut statement = tx.prepare(
                    "INSERT OR REPLACE INTO events (id, timestamp, type, message, raw_json)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for entry in batch {
                    let raw = serde_json::to_string(entry)?;
                    statement.execute(rusqlite::params![
                        entry.id,
                        entry.timestamp,
                        entry.kind,
                        entry.message,
                        raw,
                    ])?;
                }
            }
            tx.commit()?;
        }
        Ok(())
    }

    fn migrate_legacy_icons(&self) -> Result<()> {
        if !self.paths.legacy_icon_index.exists() || self.table_count("species_icons")? > 0 {
            return Ok(());
        }
        let Ok(raw) = std::fs::read_to_string(&self.paths.legacy_icon_index) else {
            return Ok(());
        };
        let Ok(serde_json::Value::Object(index)) = serde_json::from_str(&raw) else {
            return Ok(());
        };
        let stamp = now_iso();
        let connection = self.connect()?;
        let mut imported = 0usize;
        for (name, filename) in index {
            let key = normalize_species_key(&name);
            let filename = filename.as_str().unwrap_or("").trim().to_string();
            if key.is_empty() || filename.is_empty() {
                continue;
            }
            connection.execute(
                "INSERT OR REPLACE INTO species_icons
                 (species_key, species_name, filename, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![key, name, filename, stamp],
            )?;
            imported += 1;
        }
        if imported > 0 {
            info!("imported {imported} legacy species icons");
        }
        Ok(())
    }
}
