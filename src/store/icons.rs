//! Species icon mapping.
//!
//! The upload surface lives outside the core; the pipeline only reads the
//! mapping to decorate payloads, and the startup migration imports any
//! pre-existing icon index.

use std::collections::HashMap;

use tracing::warn;

use super::Store;
use crate::error::Result;
use crate::utils::text::normalize_species_key;

impl Store {
    /// Load the species-key → filename mapping.
    ///
    /// Store failures degrade to an empty index.
    #[must_use]
    pub fn load_icon_index(&self) -> HashMap<String, String> {
        match self.load_icon_index_inner() {
            Ok(index) => index,
            Err(e) => {
                warn!("icon index read failed: {e}");
                HashMap::new()
            }
        }
    }

    fn load_icon_index_inner(&self) -> Result<HashMap<String, String>> {
        let connection = self.connect()?;
        let mut statement =
            connection.prepare("SELECT species_key, filename FROM species_icons")?;
        let rows = statement.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut index = HashMap::new();
        for row in rows {
            let (key, filename) = row?;
            let key = normalize_species_key(&key);
            let filename = filename.trim().to_string();
            if !key.is_empty() && !filename.is_empty() {
                index.insert(key, filename);
            }
        }
        Ok(index)
    }

    /// Icon URL for a species, or empty when no icon exists on disk.
    #[must_use]
    pub fn icon_url_for(&self, species: &str, index: &HashMap<String, String>) -> String {
        let key = normalize_species_key(species);
        if key.is_empty() {
            return String::new();
        }
        let Some(filename) = index.get(&key) else {
            return String::new();
        };
        if !self.paths.icons_dir.join(filename).exists() {
            return String::new();
        }
        format!("/data/icons/{filename}")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::testutil::temp_store;

    #[test]
    fn test_icon_url_requires_mapping_and_file() {
        let (dir, store) = temp_store();
        let connection = store.connect().unwrap();
        connection
            .execute(
                "INSERT INTO species_icons (species_key, species_name, filename, updated_at)
                 VALUES ('american robin', 'American Robin', 'american-robin.png', '2024-01-01T00:00:00Z')",
                [],
            )
            .unwrap();

        let index = store.load_icon_index();
        assert_eq!(index["american robin"], "american-robin.png");

        // Mapping exists but the file does not: no URL.
        assert_eq!(store.icon_url_for("American Robin", &index), "");

        std::fs::write(
            dir.path().join("data/icons/american-robin.png"),
            b"\x89PNG\r\n\x1a\n",
        )
        .unwrap();
        assert_eq!(
            store.icon_url_for("American Robin", &index),
            "/data/icons/american-robin.png"
        );
        assert_eq!(store.icon_url_for("", &index), "");
        assert_eq!(store.icon_url_for("Blue Jay", &index), "");
    }
}
