//! Data-root directory layout.
//!
//! Everything the engine persists lives under a single configurable data
//! root, namespaced per media item so per-item deletion is a directory or
//! file unlink:
//!
//! ```text
//! <data>/gaze.db
//! <data>/engine.lock
//! <data>/gaze.log
//! <data>/models/<name>.<ext>
//! <data>/thumbnails/<media_id>/frame_NNNNNN.jpg
//! <data>/faces/<media_id>/<face_id>.jpg
//! <data>/faiss/<media_id>.shard
//! <data>/temp/<media_id>.wav
//! ```

use crate::error::{GazeError, Result};
use std::path::{Path, PathBuf};

/// Resolved paths under the data root.
#[derive(Debug, Clone)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    /// Create the layout, making every directory that does not yet exist.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let paths = Self { root };
        for dir in [
            paths.root.clone(),
            paths.models_dir(),
            paths.thumbnails_dir(),
            paths.faces_dir(),
            paths.shards_dir(),
            paths.temp_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| GazeError::io_with_path(e, &dir))?;
        }
        Ok(paths)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("gaze.db")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join("engine.lock")
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join("gaze.log")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.root.join("models")
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.root.join("thumbnails")
    }

    pub fn faces_dir(&self) -> PathBuf {
        self.root.join("faces")
    }

    pub fn shards_dir(&self) -> PathBuf {
        self.root.join("faiss")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join("temp")
    }

    /// Per-item thumbnail directory.
    pub fn media_thumbnails_dir(&self, media_id: &str) -> PathBuf {
        self.thumbnails_dir().join(media_id)
    }

    /// Per-item face crop directory.
    pub fn media_faces_dir(&self, media_id: &str) -> PathBuf {
        self.faces_dir().join(media_id)
    }

    /// Per-item vector shard file.
    pub fn shard_path(&self, media_id: &str) -> PathBuf {
        self.shards_dir().join(format!("{media_id}.shard"))
    }

    /// Deterministic audio path owned by a pipeline run.
    pub fn audio_path(&self, media_id: &str) -> PathBuf {
        self.temp_dir().join(format!("{media_id}.wav"))
    }

    /// Remove every artifact belonging to a media item. Missing files are
    /// not an error.
    pub fn remove_media_artifacts(&self, media_id: &str) {
        let _ = std::fs::remove_dir_all(self.media_thumbnails_dir(media_id));
        let _ = std::fs::remove_dir_all(self.media_faces_dir(media_id));
        let _ = std::fs::remove_file(self.shard_path(media_id));
        let _ = std::fs::remove_file(self.audio_path(media_id));
    }

    /// Delete orphan audio files left behind by a crashed run.
    pub fn purge_temp_audio(&self) -> usize {
        let mut purged = 0;
        if let Ok(entries) = std::fs::read_dir(self.temp_dir()) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().map(|e| e == "wav").unwrap_or(false)
                    && std::fs::remove_file(&path).is_ok()
                {
                    purged += 1;
                }
            }
        }
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_created() {
        let temp = TempDir::new().unwrap();
        let paths = DataPaths::new(temp.path()).unwrap();

        assert!(paths.models_dir().is_dir());
        assert!(paths.thumbnails_dir().is_dir());
        assert!(paths.faces_dir().is_dir());
        assert!(paths.shards_dir().is_dir());
        assert!(paths.temp_dir().is_dir());
        assert_eq!(paths.db_path(), temp.path().join("gaze.db"));
    }

    #[test]
    fn test_per_item_paths() {
        let temp = TempDir::new().unwrap();
        let paths = DataPaths::new(temp.path()).unwrap();

        assert!(paths.shard_path("abc").ends_with("faiss/abc.shard"));
        assert!(paths.audio_path("abc").ends_with("temp/abc.wav"));
        assert!(paths
            .media_thumbnails_dir("abc")
            .ends_with("thumbnails/abc"));
    }

    #[test]
    fn test_purge_temp_audio() {
        let temp = TempDir::new().unwrap();
        let paths = DataPaths::new(temp.path()).unwrap();

        std::fs::write(paths.audio_path("a"), b"x").unwrap();
        std::fs::write(paths.temp_dir().join("keep.txt"), b"x").unwrap();

        assert_eq!(paths.purge_temp_audio(), 1);
        assert!(!paths.audio_path("a").exists());
        assert!(paths.temp_dir().join("keep.txt").exists());
    }

    #[test]
    fn test_remove_media_artifacts() {
        let temp = TempDir::new().unwrap();
        let paths = DataPaths::new(temp.path()).unwrap();

        std::fs::create_dir_all(paths.media_thumbnails_dir("m1")).unwrap();
        std::fs::write(paths.shard_path("m1"), b"x").unwrap();

        paths.remove_media_artifacts("m1");
        assert!(!paths.media_thumbnails_dir("m1").exists());
        assert!(!paths.shard_path("m1").exists());
    }
}
