//! Backup export and restore.
//!
//! A single JSON document carries the settings map plus flat arrays for
//! libraries, media, media metadata and all user data. Derived rows
//! (frames, detections, transcripts, faces) are not exported; a re-index
//! rebuilds them. Restore upserts by primary key in `merge` mode or
//! truncates the covered tables first in `replace` mode.

use super::{Catalog, MediaStatus, MediaType};
use crate::catalog::types::now_ms;
use crate::error::Result;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const BACKUP_SCHEMA_VERSION: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupLibrary {
    pub library_id: String,
    pub folder_path: String,
    pub name: Option<String>,
    pub recursive: bool,
    pub created_at_ms: i64,
}

/// Media rows flattened with status as its wire string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMedia {
    pub media_id: String,
    pub library_id: String,
    pub path: String,
    pub filename: String,
    pub file_ext: Option<String>,
    pub media_type: String,
    pub file_size: i64,
    pub mtime_ms: i64,
    pub fingerprint: String,
    pub duration_ms: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub creation_time: Option<String>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub gps_lat: Option<f64>,
    pub gps_lng: Option<f64>,
    pub is_live_photo_component: bool,
    pub live_photo_pair_id: Option<String>,
    pub status: String,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMediaMetadata {
    pub media_id: String,
    pub key: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupPerson {
    pub person_id: String,
    pub name: String,
    pub face_count: i64,
    /// Absent in older snapshots; restore defaults to `average`.
    #[serde(default)]
    pub recognition_mode: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupFaceReference {
    pub face_id: String,
    pub person_id: String,
    pub weight: f64,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupFaceNegative {
    pub face_id: String,
    pub person_id: String,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupPairThreshold {
    pub person_a_id: String,
    pub person_b_id: String,
    pub threshold: f64,
    pub correction_count: i64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupFavorite {
    pub id: String,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupTag {
    pub media_id: String,
    pub tag: String,
    pub created_at_ms: i64,
}

/// The persisted document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupDocument {
    pub schema_version: u32,
    pub app_version: String,
    pub created_at_ms: i64,
    pub settings: serde_json::Map<String, serde_json::Value>,
    pub libraries: Vec<BackupLibrary>,
    pub media: Vec<BackupMedia>,
    pub media_metadata: Vec<BackupMediaMetadata>,
    pub persons: Vec<BackupPerson>,
    pub face_references: Vec<BackupFaceReference>,
    pub face_negatives: Vec<BackupFaceNegative>,
    pub person_pair_thresholds: Vec<BackupPairThreshold>,
    pub media_favorites: Vec<BackupFavorite>,
    pub person_favorites: Vec<BackupFavorite>,
    pub media_tags: Vec<BackupTag>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestoreMode {
    Merge,
    Replace,
}

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub mode: RestoreMode,
    /// Skip libraries whose folder no longer exists instead of aborting.
    pub skip_missing_paths: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            mode: RestoreMode::Merge,
            skip_missing_paths: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreReport {
    pub libraries: usize,
    pub media: usize,
    pub persons: usize,
    pub references: usize,
    pub negatives: usize,
    pub pair_thresholds: usize,
    pub favorites: usize,
    pub tags: usize,
    pub skipped_libraries: Vec<String>,
    /// Reference/negative rows whose face no longer exists after restore.
    pub skipped_face_rows: usize,
}

impl Catalog {
    /// Export the full backup document.
    pub fn export_backup(&self) -> Result<BackupDocument> {
        let conn = self.lock()?;

        let mut settings = serde_json::Map::new();
        {
            let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (key, raw) = row?;
                let value = serde_json::from_str(&raw)
                    .unwrap_or(serde_json::Value::String(raw));
                settings.insert(key, value);
            }
        }

        let mut libraries = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT library_id, folder_path, name, recursive, created_at_ms FROM libraries",
            )?;
            for row in stmt.query_map([], |row| {
                Ok(BackupLibrary {
                    library_id: row.get(0)?,
                    folder_path: row.get(1)?,
                    name: row.get(2)?,
                    recursive: row.get::<_, i64>(3)? != 0,
                    created_at_ms: row.get(4)?,
                })
            })? {
                libraries.push(row?);
            }
        }

        let mut media = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT media_id, library_id, path, filename, file_ext, media_type, file_size,
                        mtime_ms, fingerprint, duration_ms, width, height, creation_time,
                        camera_make, camera_model, gps_lat, gps_lng,
                        COALESCE(is_live_photo_component, 0), live_photo_pair_id, status,
                        created_at_ms
                 FROM media",
            )?;
            for row in stmt.query_map([], |row| {
                Ok(BackupMedia {
                    media_id: row.get(0)?,
                    library_id: row.get(1)?,
                    path: row.get(2)?,
                    filename: row.get(3)?,
                    file_ext: row.get(4)?,
                    media_type: row.get(5)?,
                    file_size: row.get(6)?,
                    mtime_ms: row.get(7)?,
                    fingerprint: row.get(8)?,
                    duration_ms: row.get(9)?,
                    width: row.get(10)?,
                    height: row.get(11)?,
                    creation_time: row.get(12)?,
                    camera_make: row.get(13)?,
                    camera_model: row.get(14)?,
                    gps_lat: row.get(15)?,
                    gps_lng: row.get(16)?,
                    is_live_photo_component: row.get::<_, i64>(17)? != 0,
                    live_photo_pair_id: row.get(18)?,
                    status: row.get(19)?,
                    created_at_ms: row.get(20)?,
                })
            })? {
                media.push(row?);
            }
        }

        let mut media_metadata = Vec::new();
        {
            let mut stmt =
                conn.prepare("SELECT media_id, key, value FROM media_metadata")?;
            for row in stmt.query_map([], |row| {
                Ok(BackupMediaMetadata {
                    media_id: row.get(0)?,
                    key: row.get(1)?,
                    value: row.get(2)?,
                })
            })? {
                media_metadata.push(row?);
            }
        }

        let mut persons = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT person_id, name, face_count, recognition_mode, created_at_ms,
                        updated_at_ms
                 FROM persons",
            )?;
            for row in stmt.query_map([], |row| {
                Ok(BackupPerson {
                    person_id: row.get(0)?,
                    name: row.get(1)?,
                    face_count: row.get(2)?,
                    recognition_mode: row.get(3)?,
                    created_at_ms: row.get(4)?,
                    updated_at_ms: row.get(5)?,
                })
            })? {
                persons.push(row?);
            }
        }

        let mut face_references = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT face_id, person_id, weight, created_at_ms FROM face_references",
            )?;
            for row in stmt.query_map([], |row| {
                Ok(BackupFaceReference {
                    face_id: row.get(0)?,
                    person_id: row.get(1)?,
                    weight: row.get(2)?,
                    created_at_ms: row.get(3)?,
                })
            })? {
                face_references.push(row?);
            }
        }

        let mut face_negatives = Vec::new();
        {
            let mut stmt =
                conn.prepare("SELECT face_id, person_id, created_at_ms FROM face_negatives")?;
            for row in stmt.query_map([], |row| {
                Ok(BackupFaceNegative {
                    face_id: row.get(0)?,
                    person_id: row.get(1)?,
                    created_at_ms: row.get(2)?,
                })
            })? {
                face_negatives.push(row?);
            }
        }

        let mut person_pair_thresholds = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT person_a_id, person_b_id, threshold, correction_count, created_at_ms,
                        updated_at_ms
                 FROM person_pair_thresholds",
            )?;
            for row in stmt.query_map([], |row| {
                Ok(BackupPairThreshold {
                    person_a_id: row.get(0)?,
                    person_b_id: row.get(1)?,
                    threshold: row.get(2)?,
                    correction_count: row.get(3)?,
                    created_at_ms: row.get(4)?,
                    updated_at_ms: row.get(5)?,
                })
            })? {
                person_pair_thresholds.push(row?);
            }
        }

        let mut media_favorites = Vec::new();
        {
            let mut stmt =
                conn.prepare("SELECT media_id, created_at_ms FROM media_favorites")?;
            for row in stmt.query_map([], |row| {
                Ok(BackupFavorite {
                    id: row.get(0)?,
                    created_at_ms: row.get(1)?,
                })
            })? {
                media_favorites.push(row?);
            }
        }

        let mut person_favorites = Vec::new();
        {
            let mut stmt =
                conn.prepare("SELECT person_id, created_at_ms FROM person_favorites")?;
            for row in stmt.query_map([], |row| {
                Ok(BackupFavorite {
                    id: row.get(0)?,
                    created_at_ms: row.get(1)?,
                })
            })? {
                person_favorites.push(row?);
            }
        }

        let mut media_tags = Vec::new();
        {
            let mut stmt =
                conn.prepare("SELECT media_id, tag, created_at_ms FROM media_tags")?;
            for row in stmt.query_map([], |row| {
                Ok(BackupTag {
                    media_id: row.get(0)?,
                    tag: row.get(1)?,
                    created_at_ms: row.get(2)?,
                })
            })? {
                media_tags.push(row?);
            }
        }

        Ok(BackupDocument {
            schema_version: BACKUP_SCHEMA_VERSION,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            created_at_ms: now_ms(),
            settings,
            libraries,
            media,
            media_metadata,
            persons,
            face_references,
            face_negatives,
            person_pair_thresholds,
            media_favorites,
            person_favorites,
            media_tags,
        })
    }

    /// Restore a backup document.
    pub fn restore_backup(
        &self,
        doc: &BackupDocument,
        options: &RestoreOptions,
    ) -> Result<RestoreReport> {
        let mut report = RestoreReport::default();

        let skipped: Vec<String> = if options.skip_missing_paths {
            doc.libraries
                .iter()
                .filter(|l| !std::path::Path::new(&l.folder_path).exists())
                .map(|l| l.library_id.clone())
                .collect()
        } else {
            Vec::new()
        };
        for library in &skipped {
            warn!("Restore skipping library with missing folder: {}", library);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(crate::error::GazeError::from)?;

        if options.mode == RestoreMode::Replace {
            tx.execute_batch(
                "DELETE FROM faces;
                 DELETE FROM detections;
                 DELETE FROM frames;
                 DELETE FROM transcript_segments;
                 DELETE FROM transcript_fts;
                 DELETE FROM jobs;
                 DELETE FROM face_references;
                 DELETE FROM face_negatives;
                 DELETE FROM person_pair_thresholds;
                 DELETE FROM media_favorites;
                 DELETE FROM person_favorites;
                 DELETE FROM media_tags;
                 DELETE FROM media_metadata;
                 DELETE FROM media;
                 DELETE FROM persons;
                 DELETE FROM libraries;",
            )?;
        }

        let upsert = match options.mode {
            RestoreMode::Merge => "INSERT OR IGNORE",
            RestoreMode::Replace => "INSERT OR REPLACE",
        };

        for (key, value) in &doc.settings {
            tx.execute(
                &format!("{upsert} INTO settings (key, value) VALUES (?1, ?2)"),
                params![key, serde_json::to_string(value)?],
            )?;
        }

        for library in &doc.libraries {
            if skipped.contains(&library.library_id) {
                continue;
            }
            let inserted = tx.execute(
                &format!(
                    "{upsert} INTO libraries (library_id, folder_path, name, recursive,
                         created_at_ms)
                     VALUES (?1, ?2, ?3, ?4, ?5)"
                ),
                params![
                    library.library_id,
                    library.folder_path,
                    library.name,
                    library.recursive as i64,
                    library.created_at_ms,
                ],
            )?;
            report.libraries += inserted;
        }

        for item in &doc.media {
            if skipped.contains(&item.library_id) {
                continue;
            }
            // Restored media re-enter the queue unless already terminal; a
            // later scan reconciles reality.
            let status = MediaStatus::from_str(&item.status)
                .filter(|s| !s.is_intermediate())
                .unwrap_or(MediaStatus::Queued);
            let inserted = tx.execute(
                &format!(
                    "{upsert} INTO media (media_id, library_id, path, filename, file_ext,
                         media_type, file_size, mtime_ms, fingerprint, duration_ms, width,
                         height, creation_time, camera_make, camera_model, gps_lat, gps_lng,
                         is_live_photo_component, live_photo_pair_id, status, progress,
                         created_at_ms)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                         ?15, ?16, ?17, ?18, ?19, ?20, 0.0, ?21)"
                ),
                params![
                    item.media_id,
                    item.library_id,
                    item.path,
                    item.filename,
                    item.file_ext,
                    MediaType::from_str(&item.media_type)
                        .unwrap_or(MediaType::Video)
                        .as_str(),
                    item.file_size,
                    item.mtime_ms,
                    item.fingerprint,
                    item.duration_ms,
                    item.width,
                    item.height,
                    item.creation_time,
                    item.camera_make,
                    item.camera_model,
                    item.gps_lat,
                    item.gps_lng,
                    item.is_live_photo_component as i64,
                    item.live_photo_pair_id,
                    status.as_str(),
                    item.created_at_ms,
                ],
            )?;
            report.media += inserted;
        }

        for row in &doc.media_metadata {
            tx.execute(
                &format!(
                    "{upsert} INTO media_metadata (media_id, key, value) VALUES (?1, ?2, ?3)"
                ),
                params![row.media_id, row.key, row.value],
            )
            .ok();
        }

        for person in &doc.persons {
            let mode = person
                .recognition_mode
                .as_deref()
                .unwrap_or("average");
            let inserted = tx.execute(
                &format!(
                    "{upsert} INTO persons (person_id, name, face_count, recognition_mode,
                         created_at_ms, updated_at_ms)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                ),
                params![
                    person.person_id,
                    person.name,
                    person.face_count,
                    mode,
                    person.created_at_ms,
                    person.updated_at_ms,
                ],
            )?;
            report.persons += inserted;
        }

        // Reference and negative rows point at derived face rows which may
        // not exist yet; insert the ones whose face survives and count the
        // rest rather than aborting the restore.
        for reference in &doc.face_references {
            let face_exists: bool = tx
                .query_row(
                    "SELECT 1 FROM faces WHERE face_id = ?1",
                    [&reference.face_id],
                    |_| Ok(true),
                )
                .unwrap_or(false);
            if !face_exists {
                report.skipped_face_rows += 1;
                continue;
            }
            report.references += tx.execute(
                &format!(
                    "{upsert} INTO face_references (face_id, person_id, weight, created_at_ms)
                     VALUES (?1, ?2, ?3, ?4)"
                ),
                params![
                    reference.face_id,
                    reference.person_id,
                    reference.weight,
                    reference.created_at_ms,
                ],
            )?;
        }

        for negative in &doc.face_negatives {
            let face_exists: bool = tx
                .query_row(
                    "SELECT 1 FROM faces WHERE face_id = ?1",
                    [&negative.face_id],
                    |_| Ok(true),
                )
                .unwrap_or(false);
            if !face_exists {
                report.skipped_face_rows += 1;
                continue;
            }
            report.negatives += tx.execute(
                &format!(
                    "{upsert} INTO face_negatives (face_id, person_id, created_at_ms)
                     VALUES (?1, ?2, ?3)"
                ),
                params![negative.face_id, negative.person_id, negative.created_at_ms],
            )?;
        }

        for pair in &doc.person_pair_thresholds {
            report.pair_thresholds += tx.execute(
                &format!(
                    "{upsert} INTO person_pair_thresholds (person_a_id, person_b_id,
                         threshold, correction_count, created_at_ms, updated_at_ms)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                ),
                params![
                    pair.person_a_id,
                    pair.person_b_id,
                    pair.threshold,
                    pair.correction_count,
                    pair.created_at_ms,
                    pair.updated_at_ms,
                ],
            )?;
        }

        for favorite in &doc.media_favorites {
            report.favorites += tx
                .execute(
                    &format!(
                        "{upsert} INTO media_favorites (media_id, created_at_ms) VALUES (?1, ?2)"
                    ),
                    params![favorite.id, favorite.created_at_ms],
                )
                .unwrap_or(0);
        }

        for favorite in &doc.person_favorites {
            report.favorites += tx
                .execute(
                    &format!(
                        "{upsert} INTO person_favorites (person_id, created_at_ms) VALUES (?1, ?2)"
                    ),
                    params![favorite.id, favorite.created_at_ms],
                )
                .unwrap_or(0);
        }

        for tag in &doc.media_tags {
            report.tags += tx
                .execute(
                    &format!(
                        "{upsert} INTO media_tags (media_id, tag, created_at_ms)
                         VALUES (?1, ?2, ?3)"
                    ),
                    params![tag.media_id, tag.tag, tag.created_at_ms],
                )
                .unwrap_or(0);
        }

        tx.commit().map_err(crate::error::GazeError::from)?;
        report.skipped_libraries = skipped;
        Ok(report)
    }
}
