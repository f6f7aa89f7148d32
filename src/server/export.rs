//! CSV export of the detection log.

use crate::store::LogEntry;

/// Render detections as the export CSV (UTF-8, no BOM).
#[must_use]
pub fn build_log_csv(entries: &[LogEntry]) -> String {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let _ = writer.write_record([
        "timestamp",
        "species",
        "scientific_name",
        "confidence",
        "location",
        "id",
    ]);
    for entry in entries {
        let confidence = entry.confidence.map(|c| c.to_string()).unwrap_or_default();
        let _ = writer.write_record([
            entry.timestamp.as_str(),
            entry.species.as_str(),
            entry.scientific_name.as_str(),
            confidence.as_str(),
            entry.location.as_str(),
            entry.id.as_str(),
        ]);
    }
    let bytes = writer.into_inner().unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_header_and_rows() {
        let entries = vec![LogEntry {
            id: "abc123".to_string(),
            timestamp: "2024-05-01T10:00:00Z".to_string(),
            species: "American Robin".to_string(),
            scientific_name: "Turdus migratorius".to_string(),
            confidence: Some(0.91),
            location: "Yard".to_string(),
            ..LogEntry::default()
        }];
        let csv = build_log_csv(&entries);
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "timestamp,species,scientific_name,confidence,location,id"
        );
        assert_eq!(
            lines.next().unwrap(),
            "2024-05-01T10:00:00Z,American Robin,Turdus migratorius,0.91,Yard,abc123"
        );
        assert!(!csv.starts_with('\u{feff}'));
    }

    #[test]
    fn test_missing_confidence_renders_empty() {
        let entries = vec![LogEntry {
            id: "x".to_string(),
            timestamp: "2024-05-01T10:00:00Z".to_string(),
            species: "Mystery".to_string(),
            ..LogEntry::default()
        }];
        let csv = build_log_csv(&entries);
        assert!(csv.contains("Mystery,,,x"));
    }

    #[test]
    fn test_fields_with_commas_are_quoted() {
        let entries = vec![LogEntry {
            id: "y".to_string(),
            timestamp: "2024-05-01T10:00:00Z".to_string(),
            species: "Sparrow, House".to_string(),
            ..LogEntry::default()
        }];
        let csv = build_log_csv(&entries);
        assert!(csv.contains("\"Sparrow, House\""));
    }
}
