//! Durable relational state for the engine.
//!
//! A single on-disk SQLite database holds libraries, media, frames,
//! detections, transcripts (plus an FTS5 mirror), faces, persons, jobs,
//! settings and user data. Foreign-key cascade deletion is on; WAL keeps
//! readers live while the pipeline writes. Thread-safe via an internal
//! mutex on the connection.

mod backup;
mod faces;
mod frames;
mod jobs;
mod media;
mod schema;
mod settings;
mod transcripts;
mod types;
mod userdata;

pub use backup::{BackupDocument, RestoreMode, RestoreOptions, RestoreReport};
pub use faces::FaceFilter;
pub use frames::{DetectionMoment, LabelMoment};
pub use media::MediaFilter;
pub use settings::{SettingsView, RECOGNIZED_SETTINGS};
pub use transcripts::TranscriptHit;
pub use types::*;

use crate::config::DbConfig;
use crate::error::{GazeError, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

/// Handle onto the catalog database.
#[derive(Clone)]
pub struct Catalog {
    conn: Arc<Mutex<Connection>>,
}

impl Catalog {
    /// Open (creating if absent) the catalog at `db_path`, run migrations,
    /// create indexes and apply backfills.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GazeError::io_with_path(e, parent))?;
        }

        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    /// In-memory catalog for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(&format!(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = {};",
            DbConfig::BUSY_TIMEOUT.as_millis()
        ))?;

        conn.execute_batch(schema::SCHEMA_TABLES)?;
        schema::migrate_schema(&conn)?;
        conn.execute_batch(schema::SCHEMA_INDEXES)?;
        schema::backfill_face_assignment_sources(&conn)?;

        info!("Catalog initialized");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Lock the connection. Poisoning is unrecoverable state corruption.
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| GazeError::Database {
            message: format!("Failed to lock database: {e}"),
            source: None,
        })
    }

    /// Run a write closure with bounded retry on SQLITE_BUSY, backing off
    /// additively (100ms, 200ms, ...).
    pub(crate) fn retry_busy<T>(
        &self,
        mut f: impl FnMut(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let mut last_busy = false;
        for attempt in 0..DbConfig::BUSY_RETRY_ATTEMPTS {
            {
                let conn = self.lock()?;
                match f(&conn) {
                    Ok(value) => return Ok(value),
                    Err(rusqlite::Error::SqliteFailure(e, msg))
                        if matches!(
                            e.code,
                            rusqlite::ErrorCode::DatabaseBusy
                                | rusqlite::ErrorCode::DatabaseLocked
                        ) =>
                    {
                        warn!(
                            "Database busy (attempt {}/{}): {:?}",
                            attempt + 1,
                            DbConfig::BUSY_RETRY_ATTEMPTS,
                            msg
                        );
                        last_busy = true;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            std::thread::sleep(DbConfig::BUSY_RETRY_BASE_DELAY * (attempt + 1));
        }
        debug_assert!(last_busy);
        Err(GazeError::DatabaseBusy {
            attempts: DbConfig::BUSY_RETRY_ATTEMPTS,
        })
    }

    /// Startup crash repair: requeue media stranded in an intermediate
    /// stage, fail in-flight jobs, leave terminal states alone. Idempotent
    /// and safe to run unconditionally.
    pub fn crash_repair(&self) -> Result<CrashRepairReport> {
        let conn = self.lock()?;

        let stage_names: Vec<String> = [
            Stage::ExtractingAudio,
            Stage::Transcribing,
            Stage::ExtractingFrames,
            Stage::Embedding,
            Stage::Detecting,
            Stage::DetectingFaces,
        ]
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect();
        let stage_list = stage_names.join(",");

        let media_requeued = conn.execute(
            &format!(
                "UPDATE media
                 SET status = 'QUEUED', progress = 0.0,
                     error_code = NULL, error_message = NULL
                 WHERE status IN ({stage_list})"
            ),
            [],
        )?;

        let jobs_failed = conn.execute(
            &format!(
                "UPDATE jobs
                 SET status = 'FAILED', error_code = 'UNKNOWN_ERROR',
                     error_message = 'Job interrupted by engine restart',
                     updated_at_ms = ?1
                 WHERE status IN ('PENDING',{stage_list})"
            ),
            [now_ms()],
        )?;

        if media_requeued > 0 || jobs_failed > 0 {
            info!(
                "Crash repair: requeued {} media items, failed {} interrupted jobs",
                media_requeued, jobs_failed
            );
        }

        Ok(CrashRepairReport {
            media_requeued,
            jobs_failed,
        })
    }

    /// Clear every pipeline output and requeue all media. Persons,
    /// references, negatives, pair thresholds, favorites and tags are user
    /// data and survive.
    pub fn wipe_derived(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "BEGIN;
             DELETE FROM faces;
             DELETE FROM detections;
             DELETE FROM frames;
             DELETE FROM transcript_segments;
             DELETE FROM transcript_fts;
             DELETE FROM jobs;
             UPDATE persons SET face_count = 0, thumbnail_face_id = NULL;
             UPDATE media SET status = 'QUEUED', progress = 0.0,
                 last_completed_stage = NULL,
                 error_code = NULL, error_message = NULL, indexed_at_ms = NULL;
             COMMIT;",
        )?;
        info!("Wiped derived data; all media requeued");
        Ok(())
    }
}

/// What crash repair touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrashRepairReport {
    pub media_requeued: usize,
    pub jobs_failed: usize,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Insert a library + media pair for tests that need a parent row.
    pub fn seed_media(catalog: &Catalog, media_id: &str, media_type: MediaType) -> String {
        let library_id = format!("lib-{media_id}");
        catalog
            .create_library(&library_id, &format!("/tmp/{media_id}"), None, true)
            .unwrap();
        let item = MediaItem {
            media_id: media_id.to_string(),
            library_id: library_id.clone(),
            path: format!("/tmp/{media_id}/file.mp4"),
            filename: "file.mp4".into(),
            file_ext: Some(".mp4".into()),
            media_type,
            file_size: 10,
            mtime_ms: 1,
            fingerprint: "fp".into(),
            duration_ms: Some(4000),
            width: Some(640),
            height: Some(480),
            fps: None,
            video_codec: None,
            video_bitrate: None,
            audio_codec: None,
            audio_channels: None,
            audio_sample_rate: None,
            container_format: None,
            rotation: 0,
            creation_time: None,
            camera_make: None,
            camera_model: None,
            gps_lat: None,
            gps_lng: None,
            is_live_photo_component: false,
            live_photo_pair_id: None,
            status: MediaStatus::Queued,
            last_completed_stage: None,
            progress: 0.0,
            error_code: None,
            error_message: None,
            indexed_at_ms: None,
            created_at_ms: 1,
        };
        catalog.insert_media(&item).unwrap();
        library_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let catalog = Catalog::open_in_memory().unwrap();
        let report = catalog.crash_repair().unwrap();
        assert_eq!(report.media_requeued, 0);
        assert_eq!(report.jobs_failed, 0);
    }

    #[test]
    fn test_open_on_disk_twice() {
        let temp = tempfile::TempDir::new().unwrap();
        let db = temp.path().join("gaze.db");
        drop(Catalog::open(&db).unwrap());
        // Reopen runs migrations idempotently.
        drop(Catalog::open(&db).unwrap());
    }

    #[test]
    fn test_crash_repair_requeues_intermediate() {
        let catalog = Catalog::open_in_memory().unwrap();
        test_support::seed_media(&catalog, "m1", MediaType::Video);
        catalog
            .set_media_status("m1", MediaStatus::Running(Stage::Embedding))
            .unwrap();

        let report = catalog.crash_repair().unwrap();
        assert_eq!(report.media_requeued, 1);

        let item = catalog.get_media("m1").unwrap().unwrap();
        assert_eq!(item.status, MediaStatus::Queued);
        assert_eq!(item.progress, 0.0);
    }

    #[test]
    fn test_crash_repair_leaves_terminal_states() {
        let catalog = Catalog::open_in_memory().unwrap();
        test_support::seed_media(&catalog, "m1", MediaType::Video);
        catalog.set_media_status("m1", MediaStatus::Done).unwrap();

        let report = catalog.crash_repair().unwrap();
        assert_eq!(report.media_requeued, 0);
        assert_eq!(
            catalog.get_media("m1").unwrap().unwrap().status,
            MediaStatus::Done
        );
    }

    #[test]
    fn test_wipe_derived_preserves_user_data() {
        let catalog = Catalog::open_in_memory().unwrap();
        test_support::seed_media(&catalog, "m1", MediaType::Video);
        catalog.set_media_status("m1", MediaStatus::Done).unwrap();

        let person_id = catalog.create_person("Alice").unwrap();
        catalog.add_media_tag("m1", "holiday").unwrap();

        catalog.wipe_derived().unwrap();

        let item = catalog.get_media("m1").unwrap().unwrap();
        assert_eq!(item.status, MediaStatus::Queued);
        assert!(catalog.get_person(&person_id).unwrap().is_some());
        assert_eq!(catalog.list_media_tags("m1").unwrap(), vec!["holiday"]);
    }
}
