//! Library scanner: incremental, fingerprint-based reconciliation of
//! on-disk state against the catalog.
//!
//! Discovery walks a library root and classifies every media file as new,
//! changed, unchanged or deleted by comparing content fingerprints against a
//! snapshot of the catalog. New and changed files get their metadata
//! extracted (EXIF for photos, ffprobe for videos) and are queued for
//! indexing; vanished paths are removed with their derived rows.

mod pairing;

pub use pairing::{find_live_sibling_mov, find_live_sibling_photo, LIVE_PHOTO_MAX_DURATION_MS};

use crate::catalog::{
    now_ms, Catalog, MediaItem, MediaMetadata, MediaStatus, MediaType, ScanStats,
};
use crate::error::{GazeError, Result};
use crate::events::{EngineEvent, EventBus};
use crate::fingerprint::compute_fingerprint;
use crate::media::{exif_meta, probe};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Photo extensions, matched case-insensitively.
pub const PHOTO_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".heic", ".heif", ".webp", ".gif", ".bmp", ".tiff",
];

/// Video extensions, matched case-insensitively.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    ".mp4", ".mkv", ".avi", ".mov", ".wmv", ".flv", ".webm", ".m4v", ".mpg", ".mpeg", ".3gp",
    ".3g2", ".ts", ".mts",
];

/// Classify a path by extension; non-media files yield `None`.
pub fn media_type_for(path: &Path) -> Option<MediaType> {
    let ext = format!(
        ".{}",
        path.extension()?.to_string_lossy().to_lowercase()
    );
    if PHOTO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaType::Photo)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaType::Video)
    } else {
        None
    }
}

/// Walks library roots and reconciles them against the catalog. At most one
/// scan runs per library; scans of distinct libraries may overlap.
#[derive(Clone)]
pub struct Scanner {
    catalog: Catalog,
    events: EventBus,
    active: Arc<Mutex<HashSet<String>>>,
}

impl Scanner {
    pub fn new(catalog: Catalog, events: EventBus) -> Self {
        Self {
            catalog,
            events,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn is_scanning(&self, library_id: &str) -> bool {
        self.active
            .lock()
            .map(|set| set.contains(library_id))
            .unwrap_or(false)
    }

    /// Run a full scan of one library.
    pub async fn scan(&self, library_id: &str) -> Result<ScanStats> {
        let library = self
            .catalog
            .get_library(library_id)?
            .ok_or_else(|| GazeError::LibraryNotFound {
                library_id: library_id.to_string(),
            })?;

        {
            let mut active = self
                .active
                .lock()
                .map_err(|_| GazeError::Other("scanner state poisoned".into()))?;
            if !active.insert(library_id.to_string()) {
                return Err(GazeError::AlreadyScanning {
                    library_id: library_id.to_string(),
                });
            }
        }

        let result = self
            .scan_inner(library_id, Path::new(&library.folder_path), library.recursive)
            .await;

        if let Ok(mut active) = self.active.lock() {
            active.remove(library_id);
        }
        result
    }

    async fn scan_inner(
        &self,
        library_id: &str,
        root: &Path,
        recursive: bool,
    ) -> Result<ScanStats> {
        if !root.exists() {
            return Err(GazeError::NotADirectory(root.to_path_buf()));
        }
        info!("Starting scan of library {}: {}", library_id, root.display());

        let mut stats = ScanStats::default();
        // Snapshot-then-iterate: never stream a cursor over a table we are
        // about to mutate.
        let existing = self.catalog.media_by_path(library_id)?;
        let mut seen: HashSet<String> = HashSet::new();

        for path in discover(root, recursive) {
            stats.files_found += 1;
            let path_str = path.to_string_lossy().to_string();
            seen.insert(path_str.clone());

            let outcome = match existing.get(&path_str) {
                Some((media_id, old_fingerprint)) => {
                    self.reconcile_existing(library_id, &path, media_id, old_fingerprint)
                        .await
                }
                None => self.register_new(library_id, &path).await,
            };
            match outcome {
                Ok(FileOutcome::New) => stats.files_new += 1,
                Ok(FileOutcome::Changed) => stats.files_changed += 1,
                Ok(FileOutcome::Unchanged) => stats.files_unchanged += 1,
                Err(e) => warn!("Failed to process {}: {}", path.display(), e),
            }

            if stats.files_found % 10 == 0 || stats.files_new > 0 || stats.files_changed > 0 {
                self.events.emit(EngineEvent::ScanProgress {
                    library_id: library_id.to_string(),
                    files_found: stats.files_found,
                    files_new: stats.files_new,
                    files_changed: stats.files_changed,
                    files_deleted: stats.files_deleted,
                });
            }
        }

        // Anything previously known but not rediscovered is gone.
        for (path_str, (media_id, _)) in &existing {
            if !seen.contains(path_str) {
                stats.files_deleted += 1;
                self.catalog.delete_media(media_id)?;
                info!("Removed deleted media: {}", path_str);
            }
        }

        // Self-healing resync: failed or stranded rows get another chance,
        // in-progress rows are left alone.
        let requeued = self.catalog.resync_requeue(library_id)?;
        if requeued > 0 {
            info!("Resync requeued {} items in library {}", requeued, library_id);
        }

        info!(
            "Scan complete for library {}: {} found, {} new, {} changed, {} deleted",
            library_id, stats.files_found, stats.files_new, stats.files_changed, stats.files_deleted
        );
        self.events.emit(EngineEvent::ScanComplete {
            library_id: library_id.to_string(),
            files_found: stats.files_found,
            files_new: stats.files_new,
            files_changed: stats.files_changed,
            files_unchanged: stats.files_unchanged,
            files_deleted: stats.files_deleted,
        });
        Ok(stats)
    }

    async fn reconcile_existing(
        &self,
        library_id: &str,
        path: &Path,
        media_id: &str,
        old_fingerprint: &str,
    ) -> Result<FileOutcome> {
        let fingerprint = compute_fingerprint(path)?;
        if fingerprint == old_fingerprint {
            return Ok(FileOutcome::Unchanged);
        }

        let (mut item, extra) = self.build_item(library_id, path, fingerprint).await?;
        item.media_id = media_id.to_string();
        self.catalog.update_changed_media(&item)?;
        self.catalog.replace_media_extra_metadata(media_id, &extra)?;
        info!("Updated changed media: {}", path.display());
        Ok(FileOutcome::Changed)
    }

    async fn register_new(&self, library_id: &str, path: &Path) -> Result<FileOutcome> {
        let fingerprint = compute_fingerprint(path)?;
        let (item, extra) = self.build_item(library_id, path, fingerprint).await?;
        let media_id = item.media_id.clone();
        self.catalog.insert_media(&item)?;
        self.catalog.replace_media_extra_metadata(&media_id, &extra)?;
        info!("Added new media: {}", path.display());
        Ok(FileOutcome::New)
    }

    /// Extract per-type metadata and live-photo pairing into a full row plus
    /// the extra key→value tag bag.
    async fn build_item(
        &self,
        library_id: &str,
        path: &Path,
        fingerprint: String,
    ) -> Result<(MediaItem, Vec<(String, String)>)> {
        let media_type = media_type_for(path).ok_or_else(|| GazeError::Validation {
            field: "path".into(),
            message: format!("not a media file: {}", path.display()),
        })?;
        let stat = std::fs::metadata(path).map_err(|e| GazeError::io_with_path(e, path))?;
        let mtime_ms = stat
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        let metadata = match media_type {
            MediaType::Photo => exif_meta::photo_metadata(path)?,
            MediaType::Video => probe::probe_media(path).await.unwrap_or_default(),
        };

        let (is_component, pair_id) = self
            .live_photo_pairing(path, media_type, &fingerprint, &metadata)
            .await;
        let extra = metadata.extra.clone();

        let item = MediaItem {
            media_id: uuid::Uuid::new_v4().to_string(),
            library_id: library_id.to_string(),
            path: path.to_string_lossy().to_string(),
            filename: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            file_ext: path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy().to_lowercase())),
            media_type,
            file_size: stat.len() as i64,
            mtime_ms,
            fingerprint,
            duration_ms: metadata.duration_ms,
            width: metadata.width,
            height: metadata.height,
            fps: metadata.fps,
            video_codec: metadata.video_codec,
            video_bitrate: metadata.video_bitrate,
            audio_codec: metadata.audio_codec,
            audio_channels: metadata.audio_channels,
            audio_sample_rate: metadata.audio_sample_rate,
            container_format: metadata.container_format,
            rotation: metadata.rotation,
            creation_time: metadata.creation_time,
            camera_make: metadata.camera_make,
            camera_model: metadata.camera_model,
            gps_lat: metadata.gps_lat,
            gps_lng: metadata.gps_lng,
            is_live_photo_component: is_component,
            live_photo_pair_id: pair_id,
            status: MediaStatus::Queued,
            last_completed_stage: None,
            progress: 0.0,
            error_code: None,
            error_message: None,
            indexed_at_ms: None,
            created_at_ms: now_ms(),
        };
        Ok((item, extra))
    }

    /// Live-photo detection: a still paired with a same-stem `.mov` shorter
    /// than five seconds, linked by the still's fingerprint.
    async fn live_photo_pairing(
        &self,
        path: &Path,
        media_type: MediaType,
        fingerprint: &str,
        metadata: &MediaMetadata,
    ) -> (bool, Option<String>) {
        match media_type {
            MediaType::Photo => {
                if pairing::is_pairable_photo(path) && find_live_sibling_mov(path).is_some() {
                    (false, Some(fingerprint.to_string()))
                } else {
                    (false, None)
                }
            }
            MediaType::Video => {
                if !pairing::is_mov(path) {
                    return (false, None);
                }
                let short_enough = metadata
                    .duration_ms
                    .map(|d| d < LIVE_PHOTO_MAX_DURATION_MS)
                    .unwrap_or(false);
                if !short_enough {
                    return (false, None);
                }
                match find_live_sibling_photo(path) {
                    Some(photo_path) => match compute_fingerprint(&photo_path) {
                        Ok(photo_fingerprint) => (true, Some(photo_fingerprint)),
                        Err(e) => {
                            warn!(
                                "Failed to fingerprint live-photo still {}: {}",
                                photo_path.display(),
                                e
                            );
                            (false, None)
                        }
                    },
                    None => (false, None),
                }
            }
        }
    }
}

enum FileOutcome {
    New,
    Changed,
    Unchanged,
}

/// Discover media files under a root, sorted for deterministic scans.
fn discover(root: &Path, recursive: bool) -> Vec<PathBuf> {
    let walker = if recursive {
        WalkDir::new(root)
    } else {
        WalkDir::new(root).max_depth(1)
    };
    let mut files: Vec<PathBuf> = walker
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| media_type_for(path).is_some())
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn scanner_with_library(root: &Path) -> (Scanner, String) {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog
            .create_library("lib1", &root.to_string_lossy(), None, true)
            .unwrap();
        (Scanner::new(catalog, EventBus::new()), "lib1".to_string())
    }

    #[test]
    fn test_media_type_for() {
        assert_eq!(media_type_for(Path::new("a/b.JPG")), Some(MediaType::Photo));
        assert_eq!(media_type_for(Path::new("a/b.heic")), Some(MediaType::Photo));
        assert_eq!(media_type_for(Path::new("a/b.MOV")), Some(MediaType::Video));
        assert_eq!(media_type_for(Path::new("a/b.txt")), None);
        assert_eq!(media_type_for(Path::new("noext")), None);
    }

    #[test]
    fn test_discover_respects_recursion() {
        let temp = TempDir::new().unwrap();
        write_file(temp.path(), "top.jpg", b"a");
        std::fs::create_dir(temp.path().join("sub")).unwrap();
        write_file(&temp.path().join("sub"), "nested.jpg", b"b");
        write_file(temp.path(), "skip.txt", b"c");

        assert_eq!(discover(temp.path(), true).len(), 2);
        assert_eq!(discover(temp.path(), false).len(), 1);
    }

    #[tokio::test]
    async fn test_empty_library_scan() {
        let temp = TempDir::new().unwrap();
        let (scanner, library_id) = scanner_with_library(temp.path());

        let stats = scanner.scan(&library_id).await.unwrap();
        assert_eq!(stats, ScanStats::default());
    }

    #[tokio::test]
    async fn test_scan_is_idempotent() {
        let temp = TempDir::new().unwrap();
        write_file(temp.path(), "one.png", b"photo bytes");
        let (scanner, library_id) = scanner_with_library(temp.path());

        let first = scanner.scan(&library_id).await.unwrap();
        assert_eq!(first.files_new, 1);

        let second = scanner.scan(&library_id).await.unwrap();
        assert_eq!(second.files_new, 0);
        assert_eq!(second.files_changed, 0);
        assert_eq!(second.files_deleted, 0);
        assert_eq!(second.files_unchanged, 1);
    }

    #[tokio::test]
    async fn test_changed_file_requeues() {
        let temp = TempDir::new().unwrap();
        let path = write_file(temp.path(), "one.png", b"original");
        let (scanner, library_id) = scanner_with_library(temp.path());
        scanner.scan(&library_id).await.unwrap();

        let catalog = scanner.catalog.clone();
        let map = catalog.media_by_path(&library_id).unwrap();
        let media_id = map.values().next().unwrap().0.clone();
        catalog.mark_media_done(&media_id).unwrap();

        std::fs::write(&path, b"rewritten with new content").unwrap();
        let stats = scanner.scan(&library_id).await.unwrap();
        assert_eq!(stats.files_changed, 1);

        let item = catalog.get_media(&media_id).unwrap().unwrap();
        assert_eq!(item.status, MediaStatus::Queued);
        assert!(item.last_completed_stage.is_none());
        assert!(item.error_code.is_none());
    }

    #[tokio::test]
    async fn test_deleted_file_removed() {
        let temp = TempDir::new().unwrap();
        let path = write_file(temp.path(), "gone.png", b"bytes");
        let (scanner, library_id) = scanner_with_library(temp.path());
        scanner.scan(&library_id).await.unwrap();

        std::fs::remove_file(&path).unwrap();
        let stats = scanner.scan(&library_id).await.unwrap();
        assert_eq!(stats.files_deleted, 1);
        assert!(scanner
            .catalog
            .media_by_path(&library_id)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_resync_requeues_failed() {
        let temp = TempDir::new().unwrap();
        write_file(temp.path(), "one.png", b"bytes");
        let (scanner, library_id) = scanner_with_library(temp.path());
        scanner.scan(&library_id).await.unwrap();

        let catalog = scanner.catalog.clone();
        let media_id = catalog
            .media_by_path(&library_id)
            .unwrap()
            .values()
            .next()
            .unwrap()
            .0
            .clone();
        catalog
            .mark_media_failed(&media_id, "FFMPEG_ERROR", "boom")
            .unwrap();

        scanner.scan(&library_id).await.unwrap();
        assert_eq!(
            catalog.media_status(&media_id).unwrap().unwrap(),
            MediaStatus::Queued
        );
    }

    #[tokio::test]
    async fn test_concurrent_scan_guard() {
        let temp = TempDir::new().unwrap();
        let (scanner, library_id) = scanner_with_library(temp.path());

        scanner
            .active
            .lock()
            .unwrap()
            .insert(library_id.clone());
        let result = scanner.scan(&library_id).await;
        assert!(matches!(result, Err(GazeError::AlreadyScanning { .. })));
    }

    #[tokio::test]
    async fn test_live_photo_still_gets_pair_id() {
        let temp = TempDir::new().unwrap();
        let photo = temp.path().join("IMG_0042.jpg");
        image::RgbImage::from_pixel(32, 32, image::Rgb([9, 9, 9]))
            .save(&photo)
            .unwrap();
        write_file(temp.path(), "IMG_0042.mov", b"clip bytes");

        let (scanner, library_id) = scanner_with_library(temp.path());
        scanner.scan(&library_id).await.unwrap();

        let catalog = scanner.catalog.clone();
        let map = catalog.media_by_path(&library_id).unwrap();
        let still_id = &map[&photo.to_string_lossy().to_string()].0;
        let still = catalog.get_media(still_id).unwrap().unwrap();

        assert!(!still.is_live_photo_component);
        assert_eq!(
            still.live_photo_pair_id.as_deref(),
            Some(still.fingerprint.as_str())
        );
    }

    #[tokio::test]
    async fn test_zero_byte_file_gets_row() {
        let temp = TempDir::new().unwrap();
        write_file(temp.path(), "empty.mp4", b"");
        let (scanner, library_id) = scanner_with_library(temp.path());

        let stats = scanner.scan(&library_id).await.unwrap();
        assert_eq!(stats.files_new, 1);
    }
}
