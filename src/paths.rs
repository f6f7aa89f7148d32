//! Filesystem layout under the project root.

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Resolved locations of every file the pipeline touches.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    /// Project root directory.
    pub root: PathBuf,
    /// Durable state directory (`data/`).
    pub data_dir: PathBuf,
    /// Segment working directory (`tmp/`).
    pub tmp_dir: PathBuf,
    /// Best-clip wave files.
    pub clips_dir: PathBuf,
    /// Species icon files.
    pub icons_dir: PathBuf,
    /// Canonical settings file.
    pub settings: PathBuf,
    /// Legacy settings file, read-only fallback.
    pub legacy_settings: PathBuf,
    /// Published status snapshot.
    pub latest: PathBuf,
    /// Embedded SQL database.
    pub db: PathBuf,
    /// Best-clip index.
    pub clip_index: PathBuf,
    /// Legacy detections log (line-delimited JSON).
    pub legacy_detections: PathBuf,
    /// Legacy events log (line-delimited JSON).
    pub legacy_events: PathBuf,
    /// Legacy icon index.
    pub legacy_icon_index: PathBuf,
}

impl ProjectPaths {
    /// Build the layout rooted at `root`.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        let data_dir = root.join("data");
        Self {
            root: root.to_path_buf(),
            tmp_dir: root.join("tmp"),
            clips_dir: data_dir.join("clips"),
            icons_dir: data_dir.join("icons"),
            settings: root.join("settings.json"),
            legacy_settings: root.join("config.json"),
            latest: data_dir.join("latest.json"),
            db: data_dir.join("overlay.db"),
            clip_index: data_dir.join("clips.json"),
            legacy_detections: data_dir.join("detections.jsonl"),
            legacy_events: data_dir.join("events.jsonl"),
            legacy_icon_index: data_dir.join("icons.json"),
            data_dir,
        }
    }

    /// Create every directory the pipeline writes into.
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.tmp_dir)?;
        std::fs::create_dir_all(&self.clips_dir)?;
        std::fs::create_dir_all(&self.icons_dir)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_under_root() {
        let paths = ProjectPaths::new(Path::new("/srv/overlay"));
        assert_eq!(paths.db, PathBuf::from("/srv/overlay/data/overlay.db"));
        assert_eq!(paths.tmp_dir, PathBuf::from("/srv/overlay/tmp"));
        assert_eq!(
            paths.clip_index,
            PathBuf::from("/srv/overlay/data/clips.json")
        );
        assert_eq!(paths.settings, PathBuf::from("/srv/overlay/settings.json"));
    }

    #[test]
    fn test_ensure_directories_creates_tree() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ProjectPaths::new(dir.path());
        paths.ensure_directories().unwrap();
        assert!(paths.data_dir.is_dir());
        assert!(paths.tmp_dir.is_dir());
        assert!(paths.clips_dir.is_dir());
        assert!(paths.icons_dir.is_dir());
    }
}
