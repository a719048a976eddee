//! Library and media row operations.

use super::{Catalog, Library, MediaItem, MediaStatus, MediaType, Stage};
use crate::catalog::types::now_ms;
use crate::error::{GazeError, Result};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashMap;

const MEDIA_COLUMNS: &str = "media_id, library_id, path, filename, file_ext, media_type, \
     file_size, mtime_ms, fingerprint, duration_ms, width, height, fps, video_codec, \
     video_bitrate, audio_codec, audio_channels, audio_sample_rate, container_format, \
     rotation, creation_time, camera_make, camera_model, gps_lat, gps_lng, \
     is_live_photo_component, live_photo_pair_id, status, last_completed_stage, progress, \
     error_code, error_message, indexed_at_ms, created_at_ms";

fn media_from_row(row: &Row<'_>) -> rusqlite::Result<MediaItem> {
    let media_type: String = row.get(5)?;
    let status: String = row.get(27)?;
    let last_stage: Option<String> = row.get(28)?;
    Ok(MediaItem {
        media_id: row.get(0)?,
        library_id: row.get(1)?,
        path: row.get(2)?,
        filename: row.get(3)?,
        file_ext: row.get(4)?,
        media_type: MediaType::from_str(&media_type).unwrap_or(MediaType::Video),
        file_size: row.get(6)?,
        mtime_ms: row.get(7)?,
        fingerprint: row.get(8)?,
        duration_ms: row.get(9)?,
        width: row.get(10)?,
        height: row.get(11)?,
        fps: row.get(12)?,
        video_codec: row.get(13)?,
        video_bitrate: row.get(14)?,
        audio_codec: row.get(15)?,
        audio_channels: row.get(16)?,
        audio_sample_rate: row.get(17)?,
        container_format: row.get(18)?,
        rotation: row.get::<_, Option<i64>>(19)?.unwrap_or(0),
        creation_time: row.get(20)?,
        camera_make: row.get(21)?,
        camera_model: row.get(22)?,
        gps_lat: row.get(23)?,
        gps_lng: row.get(24)?,
        is_live_photo_component: row.get::<_, Option<i64>>(25)?.unwrap_or(0) != 0,
        live_photo_pair_id: row.get(26)?,
        status: MediaStatus::from_str(&status).unwrap_or(MediaStatus::Queued),
        last_completed_stage: last_stage.as_deref().and_then(Stage::from_str),
        progress: row.get(29)?,
        error_code: row.get(30)?,
        error_message: row.get(31)?,
        indexed_at_ms: row.get(32)?,
        created_at_ms: row.get(33)?,
    })
}

/// Filters for media listing.
#[derive(Debug, Clone, Default)]
pub struct MediaFilter {
    pub library_id: Option<String>,
    pub media_type: Option<MediaType>,
    pub status: Option<String>,
    /// Live-photo components are hidden from lists unless requested.
    pub include_live_photo_components: bool,
    pub favorites_only: bool,
    pub tag: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl Catalog {
    // ------------------------------------------------------------------
    // Libraries
    // ------------------------------------------------------------------

    pub fn create_library(
        &self,
        library_id: &str,
        folder_path: &str,
        name: Option<&str>,
        recursive: bool,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO libraries (library_id, folder_path, name, recursive, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![library_id, folder_path, name, recursive as i64, now_ms()],
        )?;
        Ok(())
    }

    pub fn get_library(&self, library_id: &str) -> Result<Option<Library>> {
        let conn = self.lock()?;
        let library = conn
            .query_row(
                "SELECT library_id, folder_path, name, recursive, created_at_ms
                 FROM libraries WHERE library_id = ?1",
                [library_id],
                |row| {
                    Ok(Library {
                        library_id: row.get(0)?,
                        folder_path: row.get(1)?,
                        name: row.get(2)?,
                        recursive: row.get::<_, i64>(3)? != 0,
                        created_at_ms: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(library)
    }

    pub fn list_libraries(&self) -> Result<Vec<Library>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT library_id, folder_path, name, recursive, created_at_ms
             FROM libraries ORDER BY created_at_ms",
        )?;
        let libraries = stmt
            .query_map([], |row| {
                Ok(Library {
                    library_id: row.get(0)?,
                    folder_path: row.get(1)?,
                    name: row.get(2)?,
                    recursive: row.get::<_, i64>(3)? != 0,
                    created_at_ms: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(libraries)
    }

    /// Delete a library; cascades to all media and derived rows.
    pub fn delete_library(&self, library_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM libraries WHERE library_id = ?1", [library_id])?;
        Ok(deleted > 0)
    }

    /// Media ids belonging to a library, for artifact cleanup before delete.
    pub fn list_media_ids_for_library(&self, library_id: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT media_id FROM media WHERE library_id = ?1")?;
        let ids = stmt
            .query_map([library_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Year-month buckets with item counts, newest first. Items without an
    /// EXIF/container creation time fall back to their mtime-derived month.
    pub fn media_date_groups(&self, library_id: Option<&str>) -> Result<Vec<(String, usize)>> {
        let conn = self.lock()?;
        let mut sql = String::from(
            "SELECT COALESCE(
                 substr(creation_time, 1, 7),
                 strftime('%Y-%m', mtime_ms / 1000, 'unixepoch')
             ) AS ym, COUNT(*)
             FROM media
             WHERE COALESCE(is_live_photo_component, 0) = 0",
        );
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        if let Some(library) = library_id {
            sql.push_str(" AND library_id = ?1");
            args.push(Box::new(library.to_string()));
        }
        sql.push_str(" GROUP BY ym ORDER BY ym DESC");

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            args.iter().map(|b| b.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let groups = stmt
            .query_map(params_ref.as_slice(), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(groups)
    }

    /// Every media id in the catalog, for global artifact cleanup.
    pub fn list_all_media_ids(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT media_id FROM media")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    // ------------------------------------------------------------------
    // Media rows
    // ------------------------------------------------------------------

    pub fn insert_media(&self, item: &MediaItem) -> Result<()> {
        self.retry_busy(|conn| {
            conn.execute(
                &format!("INSERT INTO media ({MEDIA_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32, ?33, ?34)"),
                params![
                    item.media_id,
                    item.library_id,
                    item.path,
                    item.filename,
                    item.file_ext,
                    item.media_type.as_str(),
                    item.file_size,
                    item.mtime_ms,
                    item.fingerprint,
                    item.duration_ms,
                    item.width,
                    item.height,
                    item.fps,
                    item.video_codec,
                    item.video_bitrate,
                    item.audio_codec,
                    item.audio_channels,
                    item.audio_sample_rate,
                    item.container_format,
                    item.rotation,
                    item.creation_time,
                    item.camera_make,
                    item.camera_model,
                    item.gps_lat,
                    item.gps_lng,
                    item.is_live_photo_component as i64,
                    item.live_photo_pair_id,
                    item.status.as_str(),
                    item.last_completed_stage.map(|s| s.as_str()),
                    item.progress,
                    item.error_code,
                    item.error_message,
                    item.indexed_at_ms,
                    item.created_at_ms,
                ],
            )
        })?;
        Ok(())
    }

    /// Overwrite the technical/source columns after a fingerprint change and
    /// reset processing state back to QUEUED.
    pub fn update_changed_media(&self, item: &MediaItem) -> Result<()> {
        self.retry_busy(|conn| {
            conn.execute(
                "UPDATE media SET
                     file_size = ?2, mtime_ms = ?3, fingerprint = ?4, duration_ms = ?5,
                     width = ?6, height = ?7, fps = ?8, video_codec = ?9, video_bitrate = ?10,
                     audio_codec = ?11, audio_channels = ?12, audio_sample_rate = ?13,
                     container_format = ?14, rotation = ?15, creation_time = ?16,
                     camera_make = ?17, camera_model = ?18, gps_lat = ?19, gps_lng = ?20,
                     is_live_photo_component = ?21, live_photo_pair_id = ?22,
                     status = 'QUEUED', progress = 0.0, last_completed_stage = NULL,
                     error_code = NULL, error_message = NULL, indexed_at_ms = NULL
                 WHERE media_id = ?1",
                params![
                    item.media_id,
                    item.file_size,
                    item.mtime_ms,
                    item.fingerprint,
                    item.duration_ms,
                    item.width,
                    item.height,
                    item.fps,
                    item.video_codec,
                    item.video_bitrate,
                    item.audio_codec,
                    item.audio_channels,
                    item.audio_sample_rate,
                    item.container_format,
                    item.rotation,
                    item.creation_time,
                    item.camera_make,
                    item.camera_model,
                    item.gps_lat,
                    item.gps_lng,
                    item.is_live_photo_component as i64,
                    item.live_photo_pair_id,
                ],
            )
        })?;
        Ok(())
    }

    pub fn get_media(&self, media_id: &str) -> Result<Option<MediaItem>> {
        let conn = self.lock()?;
        let item = conn
            .query_row(
                &format!("SELECT {MEDIA_COLUMNS} FROM media WHERE media_id = ?1"),
                [media_id],
                media_from_row,
            )
            .optional()?;
        Ok(item)
    }

    /// Snapshot a library's rows into a map keyed by path. The scanner
    /// iterates this snapshot instead of streaming a cursor while writing.
    pub fn media_by_path(&self, library_id: &str) -> Result<HashMap<String, (String, String)>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT path, media_id, fingerprint FROM media WHERE library_id = ?1")?;
        let mut map = HashMap::new();
        let rows = stmt.query_map([library_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        for row in rows {
            let (path, media_id, fingerprint) = row?;
            map.insert(path, (media_id, fingerprint));
        }
        Ok(map)
    }

    pub fn set_media_status(&self, media_id: &str, status: MediaStatus) -> Result<()> {
        self.retry_busy(|conn| {
            conn.execute(
                "UPDATE media SET status = ?2 WHERE media_id = ?1",
                params![media_id, status.as_str()],
            )
        })?;
        Ok(())
    }

    pub fn media_status(&self, media_id: &str) -> Result<Option<MediaStatus>> {
        let conn = self.lock()?;
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM media WHERE media_id = ?1",
                [media_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status.as_deref().and_then(MediaStatus::from_str))
    }

    pub fn set_media_progress(&self, media_id: &str, progress: f64) -> Result<()> {
        self.retry_busy(|conn| {
            conn.execute(
                "UPDATE media SET progress = ?2 WHERE media_id = ?1",
                params![media_id, progress],
            )
        })?;
        Ok(())
    }

    pub fn set_last_completed_stage(&self, media_id: &str, stage: Stage) -> Result<()> {
        self.retry_busy(|conn| {
            conn.execute(
                "UPDATE media SET last_completed_stage = ?2 WHERE media_id = ?1",
                params![media_id, stage.as_str()],
            )
        })?;
        Ok(())
    }

    pub fn mark_media_done(&self, media_id: &str) -> Result<()> {
        self.retry_busy(|conn| {
            conn.execute(
                "UPDATE media SET status = 'DONE', progress = 1.0, indexed_at_ms = ?2,
                     error_code = NULL, error_message = NULL
                 WHERE media_id = ?1",
                params![media_id, now_ms()],
            )
        })?;
        Ok(())
    }

    pub fn mark_media_failed(&self, media_id: &str, code: &str, message: &str) -> Result<()> {
        self.retry_busy(|conn| {
            conn.execute(
                "UPDATE media SET status = 'FAILED', error_code = ?2, error_message = ?3
                 WHERE media_id = ?1",
                params![media_id, code, message],
            )
        })?;
        Ok(())
    }

    pub fn mark_media_cancelled(&self, media_id: &str) -> Result<()> {
        self.retry_busy(|conn| {
            conn.execute(
                "UPDATE media SET status = 'CANCELLED', error_code = 'CANCELLED',
                     error_message = ?2
                 WHERE media_id = ?1",
                params![media_id, crate::error::ErrorCode::Cancelled.message()],
            )
        })?;
        Ok(())
    }

    /// Reset a media row to QUEUED with cleared error fields (retry-failed
    /// and cooperative busy requeue both land here).
    pub fn requeue_media(&self, media_id: &str) -> Result<()> {
        self.retry_busy(|conn| {
            conn.execute(
                "UPDATE media SET status = 'QUEUED', progress = 0.0,
                     error_code = NULL, error_message = NULL
                 WHERE media_id = ?1",
                params![media_id],
            )
        })?;
        Ok(())
    }

    /// After a scan: force-requeue every row in the library that is neither
    /// DONE nor currently inside a pipeline stage, so failed items get
    /// another chance while in-progress items are left alone.
    pub fn resync_requeue(&self, library_id: &str) -> Result<usize> {
        let requeued = self.retry_busy(|conn| {
            conn.execute(
                "UPDATE media SET status = 'QUEUED', progress = 0.0,
                     error_code = NULL, error_message = NULL
                 WHERE library_id = ?1
                   AND status NOT IN ('DONE', 'QUEUED', 'EXTRACTING_AUDIO', 'TRANSCRIBING',
                       'EXTRACTING_FRAMES', 'EMBEDDING', 'DETECTING', 'DETECTING_FACES')",
                params![library_id],
            )
        })?;
        Ok(requeued)
    }

    pub fn delete_media(&self, media_id: &str) -> Result<bool> {
        let deleted = self.retry_busy(|conn| {
            conn.execute("DELETE FROM media WHERE media_id = ?1", params![media_id])
        })?;
        Ok(deleted > 0)
    }

    /// Queued media ids, ordered by the scheduler's queue policy.
    pub fn list_queued(&self, limit: usize, prioritize_recent: bool) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let sql = if prioritize_recent {
            // Greatest-of mtime / EXIF creation time / row creation, newest first.
            "SELECT media_id FROM media WHERE status = 'QUEUED'
             ORDER BY MAX(
                 mtime_ms,
                 COALESCE(CAST(strftime('%s', creation_time) AS INTEGER) * 1000, 0),
                 created_at_ms
             ) DESC
             LIMIT ?1"
        } else {
            "SELECT media_id FROM media WHERE status = 'QUEUED'
             ORDER BY created_at_ms ASC
             LIMIT ?1"
        };
        let mut stmt = conn.prepare(sql)?;
        let ids = stmt
            .query_map([limit as i64], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    pub fn count_queued(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM media WHERE status = 'QUEUED'",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// List media with filters and pagination; returns (rows, total).
    pub fn list_media(&self, filter: &MediaFilter) -> Result<(Vec<MediaItem>, usize)> {
        let conn = self.lock()?;

        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref library_id) = filter.library_id {
            clauses.push(format!("library_id = ?{}", args.len() + 1));
            args.push(Box::new(library_id.clone()));
        }
        if let Some(media_type) = filter.media_type {
            clauses.push(format!("media_type = ?{}", args.len() + 1));
            args.push(Box::new(media_type.as_str().to_string()));
        }
        if let Some(ref status) = filter.status {
            clauses.push(format!("status = ?{}", args.len() + 1));
            args.push(Box::new(status.clone()));
        }
        if !filter.include_live_photo_components {
            clauses.push("COALESCE(is_live_photo_component, 0) = 0".to_string());
        }
        if filter.favorites_only {
            clauses.push("media_id IN (SELECT media_id FROM media_favorites)".to_string());
        }
        if let Some(ref tag) = filter.tag {
            clauses.push(format!(
                "media_id IN (SELECT media_id FROM media_tags WHERE tag = ?{})",
                args.len() + 1
            ));
            args.push(Box::new(tag.clone()));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            args.iter().map(|b| b.as_ref()).collect();

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM media {where_clause}"),
            params_ref.as_slice(),
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {MEDIA_COLUMNS} FROM media {where_clause}
             ORDER BY COALESCE(creation_time, datetime(mtime_ms / 1000, 'unixepoch')) DESC
             LIMIT {} OFFSET {}",
            filter.limit.max(1),
            filter.offset
        ))?;
        let items = stmt
            .query_map(params_ref.as_slice(), media_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok((items, total as usize))
    }

    /// Media ids with status DONE, optionally restricted to a library. The
    /// search embedding pass walks these shards.
    pub fn list_done_media_ids(&self, library_id: Option<&str>) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut ids = Vec::new();
        match library_id {
            Some(lib) => {
                let mut stmt = conn.prepare(
                    "SELECT media_id FROM media WHERE status = 'DONE' AND library_id = ?1",
                )?;
                for row in stmt.query_map([lib], |row| row.get::<_, String>(0))? {
                    ids.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare("SELECT media_id FROM media WHERE status = 'DONE'")?;
                for row in stmt.query_map([], |row| row.get::<_, String>(0))? {
                    ids.push(row?);
                }
            }
        }
        Ok(ids)
    }

    // ------------------------------------------------------------------
    // Extra key→value metadata
    // ------------------------------------------------------------------

    /// Replace the extra-metadata rows for a media item.
    pub fn replace_media_extra_metadata(
        &self,
        media_id: &str,
        extra: &[(String, String)],
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(GazeError::from)?;
        tx.execute(
            "DELETE FROM media_metadata WHERE media_id = ?1",
            params![media_id],
        )?;
        for (key, value) in extra {
            tx.execute(
                "INSERT OR REPLACE INTO media_metadata (media_id, key, value) VALUES (?1, ?2, ?3)",
                params![media_id, key, value],
            )?;
        }
        tx.commit().map_err(GazeError::from)?;
        Ok(())
    }

    pub fn media_extra_metadata(&self, media_id: &str) -> Result<Vec<(String, String)>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT key, value FROM media_metadata WHERE media_id = ?1 ORDER BY key")?;
        let rows = stmt
            .query_map([media_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
