//! Operational event log.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::warn;

use super::Store;
use crate::error::Result;
use crate::utils::time::now_iso;

/// One operational log record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EventEntry {
    /// Stable opaque id.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// UTC timestamp, ISO-8601 with trailing `Z`.
    pub timestamp: String,
    /// Event type: server, analysis, detection, error, or manual.
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Structured extras attached by the emitter.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Stable id for an event entry.
#[must_use]
pub fn event_id(entry: &EventEntry) -> String {
    if !entry.id.is_empty() {
        return entry.id.clone();
    }
    let base = format!("{}|{}|{}", entry.timestamp, entry.kind, entry.message);
    let digest = Sha1::digest(base.as_bytes());
    hex::encode(digest)[..12].to_string()
}

impl Store {
    /// Append one event. Failures are logged and swallowed so event
    /// emission never takes a worker down.
    pub fn append_event(&self, mut entry: EventEntry) {
        if entry.id.is_empty() {
            entry.id = event_id(&entry);
        }
        if entry.timestamp.is_empty() {
            entry.timestamp = now_iso();
        }
        if let Err(e) = self.append_event_inner(&entry) {
            warn!("event append failed: {e}");
        }
    }

    fn append_event_inner(&self, entry: &EventEntry) -> Result<()> {
        let raw = serde_json::to_string(entry)?;
        let _guard = Self::lock(&self.events_lock);
        let connection = self.connect()?;
        connection.execute(
            "INSERT OR REPLACE INTO events (id, timestamp, type, message, raw_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![entry.id, entry.timestamp, entry.kind, entry.message, raw],
        )?;
        Ok(())
    }

    /// Emit an event with a fresh opaque id and the current timestamp.
    pub fn log_event(&self, kind: &str, message: &str) {
        self.log_event_with(kind, message, serde_json::Map::new());
    }

    /// Emit an event carrying structured extras.
    pub fn log_event_with(
        &self,
        kind: &str,
        message: &str,
        extra: serde_json::Map<String, serde_json::Value>,
    ) {
        self.append_event(EventEntry {
            id: uuid::Uuid::new_v4().simple().to_string(),
            timestamp: now_iso(),
            kind: kind.to_string(),
            message: message.to_string(),
            extra,
        });
    }

    /// Read up to `limit` of the newest events, returned oldest-first.
    #[must_use]
    pub fn read_events(&self, limit: Option<usize>) -> Vec<EventEntry> {
        if limit == Some(0) {
            return Vec::new();
        }
        match self.read_events_inner(limit) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("events read failed: {e}");
                Vec::new()
            }
        }
    }

    fn read_events_inner(&self, limit: Option<usize>) -> Result<Vec<EventEntry>> {
        let rows = {
            let _guard = Self::lock(&self.events_lock);
            let connection = self.connect()?;
            let mut query =
                "SELECT id, raw_json FROM events ORDER BY timestamp DESC, rowid DESC".to_string();
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
            let mut entry: EventEntry =
                serde_json::from_str(&raw).unwrap_or_else(|_| EventEntry {
                    id: id.clone(),
                    ..EventEntry::default()
                });
            entry.id = event_id(&entry);
            entries.push(entry);
        }
        Ok(entries)
    }
}
