//! The engine facade: one handle over catalog, scanner, pipeline, scheduler
//! and search, for embedders and the HTTP layer alike.

use crate::catalog::{
    Catalog, CrashRepairReport, FaceFilter, Job, Library, MediaFilter, MediaItem, MediaStatus,
    Person, RecognitionMode, ScanStats, SettingsView,
};
use crate::error::{GazeError, Result};
use crate::events::EventBus;
use crate::learning::FaceLearning;
use crate::ml::MlToolkit;
use crate::paths::DataPaths;
use crate::pipeline::{IndexingPipeline, JobScheduler};
use crate::scanner::Scanner;
use crate::search::captions::{export_captions, CaptionFormat};
use crate::search::{SearchPlanner, SearchRequest, SearchResponse};
use std::path::PathBuf;
use tracing::info;

/// Aggregate counts for the stats surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineStats {
    pub libraries: usize,
    pub media_total: usize,
    pub media_done: usize,
    pub media_queued: usize,
    pub media_failed: usize,
    pub frames: usize,
    pub detections: usize,
    pub faces: usize,
    pub persons: usize,
    pub transcript_segments: usize,
}

/// Main entry point for programmatic access to the engine.
pub struct GazeEngine {
    paths: DataPaths,
    catalog: Catalog,
    events: EventBus,
    scanner: Scanner,
    scheduler: JobScheduler,
    planner: SearchPlanner,
}

impl GazeEngine {
    /// Open the engine over a data root: create the directory layout, open
    /// and migrate the catalog, run crash repair, purge orphan temp audio,
    /// and load whatever models are present.
    pub async fn open(data_root: impl Into<PathBuf>) -> Result<Self> {
        let paths = DataPaths::new(data_root)?;
        let catalog = Catalog::open(paths.db_path())?;

        let repair = catalog.crash_repair()?;
        if repair.media_requeued > 0 || repair.jobs_failed > 0 {
            info!(
                "Startup repair: {} media requeued, {} jobs failed",
                repair.media_requeued, repair.jobs_failed
            );
        }
        let purged = paths.purge_temp_audio();
        if purged > 0 {
            info!("Purged {} orphan temp audio files", purged);
        }

        let settings = catalog.settings_view()?;
        let toolkit = MlToolkit::load(&paths, &settings.transcription_backend);

        let events = EventBus::new();
        let scanner = Scanner::new(catalog.clone(), events.clone());
        let pipeline = IndexingPipeline::new(
            catalog.clone(),
            paths.clone(),
            toolkit.clone(),
            events.clone(),
        );
        let scheduler = JobScheduler::new(pipeline);
        scheduler.spawn_ticker();
        let planner = SearchPlanner::new(catalog.clone(), paths.clone(), toolkit);

        Ok(Self {
            paths,
            catalog,
            events,
            scanner,
            scheduler,
            planner,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn paths(&self) -> &DataPaths {
        &self.paths
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    // ------------------------------------------------------------------
    // Libraries and scanning
    // ------------------------------------------------------------------

    pub fn add_library(
        &self,
        folder_path: &str,
        name: Option<&str>,
        recursive: bool,
    ) -> Result<String> {
        let library_id = uuid::Uuid::new_v4().to_string();
        self.catalog
            .create_library(&library_id, folder_path, name, recursive)?;
        Ok(library_id)
    }

    pub fn list_libraries(&self) -> Result<Vec<Library>> {
        self.catalog.list_libraries()
    }

    /// Delete a library, its rows (by cascade) and its on-disk artifacts.
    pub fn delete_library(&self, library_id: &str) -> Result<bool> {
        let media_ids = self.catalog.list_media_ids_for_library(library_id)?;
        let deleted = self.catalog.delete_library(library_id)?;
        if deleted {
            for media_id in media_ids {
                self.planner
                    .shard_cache()
                    .invalidate(&self.paths.shard_path(&media_id));
                self.paths.remove_media_artifacts(&media_id);
            }
        }
        Ok(deleted)
    }

    pub fn is_scanning(&self, library_id: &str) -> bool {
        self.scanner.is_scanning(library_id)
    }

    pub async fn scan_library(&self, library_id: &str) -> Result<ScanStats> {
        self.scanner.scan(library_id).await
    }

    // ------------------------------------------------------------------
    // Media and jobs
    // ------------------------------------------------------------------

    pub fn list_media(&self, filter: &MediaFilter) -> Result<(Vec<MediaItem>, usize)> {
        self.catalog.list_media(filter)
    }

    pub fn get_media(&self, media_id: &str) -> Result<Option<MediaItem>> {
        self.catalog.get_media(media_id)
    }

    pub fn list_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        self.catalog.list_jobs(limit)
    }

    pub async fn start_indexing(&self, limit: usize) -> Result<usize> {
        self.scheduler.start_indexing_queued(limit).await
    }

    pub fn pause_indexing(&self) {
        self.scheduler.pause();
    }

    pub async fn resume_indexing(&self) -> Result<usize> {
        self.scheduler.resume().await
    }

    /// Cancel one or all running pipelines. Also flips the media row so a
    /// run between stages converges on CANCELLED.
    pub fn stop_indexing(&self, media_id: Option<&str>) -> Result<Vec<String>> {
        let stopped = self.scheduler.stop_indexing(media_id);
        for media_id in &stopped {
            if matches!(
                self.catalog.media_status(media_id)?,
                Some(status) if status.is_intermediate()
            ) {
                self.catalog
                    .set_media_status(media_id, MediaStatus::Cancelled)?;
            }
        }
        Ok(stopped)
    }

    /// Reset a failed item back to the queue, clearing its error fields.
    /// Job history is retained.
    pub fn retry_media(&self, media_id: &str) -> Result<()> {
        let item = self
            .catalog
            .get_media(media_id)?
            .ok_or_else(|| GazeError::MediaNotFound {
                media_id: media_id.to_string(),
            })?;
        if item.status != MediaStatus::Failed && item.status != MediaStatus::Cancelled {
            return Err(GazeError::Validation {
                field: "status".into(),
                message: format!("cannot retry item in status {}", item.status),
            });
        }
        self.catalog.requeue_media(media_id)
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    pub fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        self.planner.search(request)
    }

    pub fn export_captions(&self, media_id: &str, format: CaptionFormat) -> Result<String> {
        export_captions(&self.catalog, media_id, format)
    }

    // ------------------------------------------------------------------
    // Faces and persons
    // ------------------------------------------------------------------

    pub fn list_faces(&self, filter: &FaceFilter) -> Result<Vec<crate::catalog::FaceRow>> {
        if filter.unassigned_only && filter.person_id.is_some() {
            // Empty by construction; reject instead of returning nothing.
            return Err(GazeError::Validation {
                field: "unassigned".into(),
                message: "unassigned and person_id are mutually exclusive".into(),
            });
        }
        self.catalog.list_faces(filter)
    }

    pub fn list_persons(&self) -> Result<Vec<Person>> {
        self.catalog.list_persons()
    }

    pub fn create_person(&self, name: &str) -> Result<String> {
        self.catalog.create_person(name)
    }

    pub fn set_recognition_mode(&self, person_id: &str, mode: RecognitionMode) -> Result<()> {
        self.catalog
            .get_person(person_id)?
            .ok_or_else(|| GazeError::PersonNotFound {
                person_id: person_id.to_string(),
            })?;
        self.catalog.set_person_recognition_mode(person_id, mode)
    }

    /// Assign a face to a person (creating learning signals on a
    /// reassignment), or unassign it with `None`.
    pub fn assign_face(&self, face_id: &str, person_id: Option<&str>) -> Result<()> {
        let face = self
            .catalog
            .get_face(face_id)?
            .ok_or_else(|| GazeError::FaceNotFound {
                face_id: face_id.to_string(),
            })?;

        match (face.person_id.as_deref(), person_id) {
            (Some(from), Some(to)) if from != to => {
                FaceLearning::record_reassignment(&self.catalog, face_id, from, to)
            }
            (_, Some(to)) => {
                self.catalog.set_face_person(
                    face_id,
                    Some(to),
                    crate::catalog::AssignmentSource::Manual,
                    1.0,
                )?;
                FaceLearning::repick_thumbnail(&self.catalog, to)
            }
            (Some(from), None) => {
                self.catalog.set_face_person(
                    face_id,
                    None,
                    crate::catalog::AssignmentSource::Manual,
                    1.0,
                )?;
                FaceLearning::repick_thumbnail(&self.catalog, from)
            }
            (None, None) => Ok(()),
        }
    }

    /// Merge one person into another: faces move, the source person (and
    /// its learning rows, by cascade) disappears.
    pub fn merge_persons(&self, source_id: &str, target_id: &str) -> Result<usize> {
        for person_id in [source_id, target_id] {
            self.catalog
                .get_person(person_id)?
                .ok_or_else(|| GazeError::PersonNotFound {
                    person_id: person_id.to_string(),
                })?;
        }
        let moved = self.catalog.merge_persons(source_id, target_id)?;
        FaceLearning::repick_thumbnail(&self.catalog, target_id)?;
        Ok(moved)
    }

    pub fn mark_face_reference(&self, face_id: &str, person_id: &str) -> Result<()> {
        self.catalog
            .get_person(person_id)?
            .ok_or_else(|| GazeError::PersonNotFound {
                person_id: person_id.to_string(),
            })?;
        FaceLearning::mark_reference(&self.catalog, face_id, person_id)
    }

    // ------------------------------------------------------------------
    // Settings, maintenance, backup, stats
    // ------------------------------------------------------------------

    pub fn settings(&self) -> Result<SettingsView> {
        self.catalog.settings_view()
    }

    pub fn set_setting(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        if !crate::catalog::RECOGNIZED_SETTINGS.contains(&key) {
            return Err(GazeError::Validation {
                field: "key".into(),
                message: format!("unrecognized setting: {key}"),
            });
        }
        self.catalog.set_setting(key, value)
    }

    pub fn list_settings(&self) -> Result<Vec<(String, serde_json::Value)>> {
        self.catalog.list_settings()
    }

    /// Clear pipeline outputs (rows and artifacts) and requeue everything.
    /// User data survives.
    pub fn wipe_derived(&self) -> Result<()> {
        let media_ids = self.catalog.list_all_media_ids()?;
        self.catalog.wipe_derived()?;
        for media_id in media_ids {
            self.planner
                .shard_cache()
                .invalidate(&self.paths.shard_path(&media_id));
            self.paths.remove_media_artifacts(&media_id);
        }
        Ok(())
    }

    pub fn export_backup(&self) -> Result<crate::catalog::BackupDocument> {
        self.catalog.export_backup()
    }

    pub fn restore_backup(
        &self,
        doc: &crate::catalog::BackupDocument,
        options: &crate::catalog::RestoreOptions,
    ) -> Result<crate::catalog::RestoreReport> {
        self.catalog.restore_backup(doc, options)
    }

    pub fn crash_repair(&self) -> Result<CrashRepairReport> {
        self.catalog.crash_repair()
    }

    pub fn stats(&self) -> Result<EngineStats> {
        let conn = self.catalog.lock()?;
        let count = |sql: &str| -> Result<usize> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };
        Ok(EngineStats {
            libraries: count("SELECT COUNT(*) FROM libraries")?,
            media_total: count("SELECT COUNT(*) FROM media")?,
            media_done: count("SELECT COUNT(*) FROM media WHERE status = 'DONE'")?,
            media_queued: count("SELECT COUNT(*) FROM media WHERE status = 'QUEUED'")?,
            media_failed: count("SELECT COUNT(*) FROM media WHERE status = 'FAILED'")?,
            frames: count("SELECT COUNT(*) FROM frames")?,
            detections: count("SELECT COUNT(*) FROM detections")?,
            faces: count("SELECT COUNT(*) FROM faces")?,
            persons: count("SELECT COUNT(*) FROM persons")?,
            transcript_segments: count("SELECT COUNT(*) FROM transcript_segments")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_layout() {
        let temp = TempDir::new().unwrap();
        let engine = GazeEngine::open(temp.path()).await.unwrap();
        assert!(engine.paths().db_path().exists());
        assert!(engine.paths().thumbnails_dir().is_dir());
    }

    #[tokio::test]
    async fn test_library_lifecycle() {
        let temp = TempDir::new().unwrap();
        let media_dir = TempDir::new().unwrap();
        let engine = GazeEngine::open(temp.path()).await.unwrap();

        let library_id = engine
            .add_library(&media_dir.path().to_string_lossy(), Some("Test"), true)
            .unwrap();
        assert_eq!(engine.list_libraries().unwrap().len(), 1);

        let stats = engine.scan_library(&library_id).await.unwrap();
        assert_eq!(stats.files_found, 0);

        assert!(engine.delete_library(&library_id).unwrap());
        assert!(engine.list_libraries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unassigned_with_person_rejected() {
        let temp = TempDir::new().unwrap();
        let engine = GazeEngine::open(temp.path()).await.unwrap();
        let filter = FaceFilter {
            person_id: Some("p1".into()),
            unassigned_only: true,
            limit: 10,
            ..Default::default()
        };
        assert!(matches!(
            engine.list_faces(&filter),
            Err(GazeError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_setting_rejected() {
        let temp = TempDir::new().unwrap();
        let engine = GazeEngine::open(temp.path()).await.unwrap();
        assert!(engine
            .set_setting("totally_made_up", &serde_json::json!(1))
            .is_err());
        engine
            .set_setting("indexing_preset", &serde_json::json!("quick"))
            .unwrap();
    }

    #[tokio::test]
    async fn test_retry_requires_failed_state() {
        let temp = TempDir::new().unwrap();
        let engine = GazeEngine::open(temp.path()).await.unwrap();
        crate::catalog::test_support::seed_media(
            engine.catalog(),
            "m1",
            crate::catalog::MediaType::Video,
        );

        assert!(engine.retry_media("m1").is_err());
        engine
            .catalog()
            .mark_media_failed("m1", "FFMPEG_ERROR", "x")
            .unwrap();
        engine.retry_media("m1").unwrap();
        assert_eq!(
            engine.catalog().media_status("m1").unwrap().unwrap(),
            MediaStatus::Queued
        );
    }

    #[tokio::test]
    async fn test_stats_empty_engine() {
        let temp = TempDir::new().unwrap();
        let engine = GazeEngine::open(temp.path()).await.unwrap();
        let stats = engine.stats().unwrap();
        assert_eq!(stats.media_total, 0);
        assert_eq!(stats.libraries, 0);
    }
}
