//! Best-clip archive: one retained wave file per species.
//!
//! A clip is replaced when a new segment scores higher without being
//! materially less confident. The index lives in `data/clips.json` and the
//! audio in `data/clips/<slug>.wav`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::audio::compute_snr_db;
use crate::classify::Prediction;
use crate::error::Result;
use crate::paths::ProjectPaths;
use crate::utils::text::{normalize_confidence_f64, slugify};
use crate::utils::time::now_iso;

/// Archived best clip for one species.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClipEntry {
    /// Species common name.
    pub species: String,
    /// Species scientific name.
    pub scientific_name: String,
    /// Confidence of the winning detection.
    pub confidence: Option<f64>,
    /// SNR estimate of the archived segment, in dB.
    pub snr_db: Option<f64>,
    /// Contest score the clip won with.
    pub score: f64,
    /// When the clip was archived.
    pub timestamp: String,
    /// Filename inside the clips directory.
    pub filename: String,
}

impl Default for ClipEntry {
    fn default() -> Self {
        Self {
            species: String::new(),
            scientific_name: String::new(),
            confidence: None,
            snr_db: None,
            score: f64::MIN,
            timestamp: String::new(),
            filename: String::new(),
        }
    }
}

/// Contest score: `confidence × 100 + snr_db`.
#[must_use]
pub fn compute_clip_score(confidence: f64, snr_db: Option<f64>) -> f64 {
    confidence * 100.0 + snr_db.unwrap_or(0.0)
}

/// Margin by which a new clip's confidence may trail the archived one.
const CONFIDENCE_SLACK: f64 = 0.02;

/// Per-species best-clip archive with JSON persistence.
pub struct ClipArchive {
    clips_dir: PathBuf,
    index_path: PathBuf,
    index: Mutex<HashMap<String, ClipEntry>>,
}

impl ClipArchive {
    /// Load the archive, creating an empty index file when missing.
    pub fn open(paths: &ProjectPaths) -> Result<Self> {
        let index = if paths.clip_index.exists() {
            let raw = std::fs::read_to_string(&paths.clip_index)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            std::fs::write(&paths.clip_index, "{}")?;
            HashMap::new()
        };
        Ok(Self {
            clips_dir: paths.clips_dir.clone(),
            index_path: paths.clip_index.clone(),
            index: Mutex::new(index),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ClipEntry>> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the current index.
    #[must_use]
    pub fn index_snapshot(&self) -> HashMap<String, ClipEntry> {
        self.lock().clone()
    }

    /// Archived entry for a species, if any.
    #[must_use]
    pub fn entry_for(&self, species: &str) -> Option<ClipEntry> {
        self.lock().get(species).cloned()
    }

    /// Absolute path of a species' archived clip file.
    #[must_use]
    pub fn clip_path(&self, entry: &ClipEntry) -> PathBuf {
        self.clips_dir.join(&entry.filename)
    }

    /// Run the scoring contest for each prediction against the archive.
    ///
    /// Returns `true` when any clip was replaced (callers then invalidate
    /// derived caches).
    pub fn evaluate(&self, segment: &Path, predictions: &[Prediction]) -> bool {
        if predictions.is_empty() {
            return false;
        }
        if let Err(e) = std::fs::create_dir_all(&self.clips_dir) {
            warn!("unable to create clips directory: {e}");
            return false;
        }
        let snr_db = compute_snr_db(segment);
        let mut updated = false;

        for prediction in predictions {
            let species = if prediction.species.is_empty() {
                "Unknown"
            } else {
                &prediction.species
            };
            let confidence =
                normalize_confidence_f64(prediction.confidence).unwrap_or(-1.0);
            let score = compute_clip_score(confidence, snr_db);

            let existing = self.entry_for(species);
            let (existing_conf, existing_score) = match &existing {
                Some(entry) => {
                    let conf = normalize_confidence_f64(entry.confidence).unwrap_or(-1.0);
                    let score = if entry.score == f64::MIN {
                        compute_clip_score(conf, entry.snr_db)
                    } else {
                        entry.score
                    };
                    (conf, score)
                }
                None => (-1.0, f64::MIN),
            };

            if confidence + CONFIDENCE_SLACK < existing_conf {
                continue;
            }
            if score <= existing_score {
                continue;
            }

            let filename = format!("{}.wav", slugify(species));
            let target = self.clips_dir.join(&filename);
            if let Err(e) = std::fs::copy(segment, &target) {
                warn!("unable to archive clip for {species}: {e}");
                continue;
            }
            self.lock().insert(
                species.to_string(),
                ClipEntry {
                    species: species.to_string(),
                    scientific_name: prediction.scientific_name.clone(),
                    confidence: prediction.confidence,
                    snr_db,
                    score: (score * 100.0).round() / 100.0,
                    timestamp: now_iso(),
                    filename,
                },
            );
            updated = true;
        }

        if updated {
            if let Err(e) = self.persist() {
                warn!("unable to persist clip index: {e}");
            }
        }
        updated
    }

    fn persist(&self) -> Result<()> {
        let encoded = serde_json::to_string_pretty(&self.index_snapshot())?;
        std::fs::write(&self.index_path, encoded)?;
        Ok(())
    }
}
