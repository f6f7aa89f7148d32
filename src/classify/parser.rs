//! Classifier results-CSV parsing.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One species prediction from the classifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    /// Species common name.
    pub species: String,
    /// Species scientific name.
    pub scientific_name: String,
    /// Raw confidence as reported by the classifier, when known.
    pub confidence: Option<f64>,
}

impl Prediction {
    /// Confidence with the zero fallback used for ordering and thresholds.
    #[must_use]
    pub fn confidence_or_zero(&self) -> f64 {
        self.confidence.unwrap_or(0.0)
    }
}

fn normalize_header(value: &str) -> String {
    value.trim().to_lowercase().replace('_', " ")
}

fn pick_column(headers: &csv::StringRecord, options: &[&str]) -> Option<usize> {
    let normalized: Vec<String> = headers.iter().map(normalize_header).collect();
    options.iter().find_map(|option| {
        let wanted = normalize_header(option);
        normalized.iter().position(|header| *header == wanted)
    })
}

/// Parse a classifier results CSV, sorted by confidence descending.
///
/// Header names are matched case- and underscore-insensitively over
/// {Common name, species} × {Scientific name} × {Confidence, Score,
/// Probability}. Rows whose confidence does not parse are skipped.
pub fn extract_predictions(path: &Path) -> Result<Vec<Prediction>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| Error::Classifier {
        message: format!("Unable to read BirdNET output: {e}"),
    })?;
    let headers = reader.headers().map_err(|e| Error::Classifier {
        message: format!("Unable to read BirdNET output: {e}"),
    })?;

    let common = pick_column(headers, &["common name", "common_name", "species"]);
    let scientific = pick_column(headers, &["scientific name", "scientific_name"]);
    let confidence = pick_column(headers, &["confidence", "score", "probability"]);

    let mut predictions = Vec::new();
    for record in reader.records() {
        let Ok(record) = record else { continue };
        let Some(confidence_index) = confidence else {
            continue;
        };
        let Some(parsed) = record
            .get(confidence_index)
            .and_then(|raw| raw.trim().parse::<f64>().ok())
        else {
            continue;
        };
        let species = common
            .and_then(|i| record.get(i))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("Unknown")
            .to_string();
        let scientific_name = scientific
            .and_then(|i| record.get(i))
            .map(str::trim)
            .unwrap_or("")
            .to_string();
        predictions.push(Prediction {
            species,
            scientific_name,
            confidence: Some(parsed),
        });
    }

    predictions.sort_by(|a, b| {
        b.confidence_or_zero()
            .partial_cmp(&a.confidence_or_zero())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(predictions)
}
