//! Frame and detection row operations.

use super::{Catalog, DetectionRow, Frame};
use crate::error::{GazeError, Result};
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;

/// A detection-pass hit for the search planner.
#[derive(Debug, Clone)]
pub struct DetectionMoment {
    pub video_id: String,
    pub timestamp_ms: i64,
    pub thumbnail_path: Option<String>,
    pub max_confidence: f64,
    pub labels: Vec<String>,
}

/// A label-only search hit.
#[derive(Debug, Clone)]
pub struct LabelMoment {
    pub video_id: String,
    pub timestamp_ms: i64,
    pub thumbnail_path: Option<String>,
    pub labels: Vec<String>,
    pub label_hits: i64,
}

impl Catalog {
    /// Replace all frames for a media item in one transaction.
    pub fn replace_frames(&self, media_id: &str, frames: &[Frame]) -> Result<()> {
        self.retry_busy(|conn| {
            conn.execute_batch("BEGIN")?;
            let result = (|| {
                conn.execute("DELETE FROM frames WHERE video_id = ?1", params![media_id])?;
                for frame in frames {
                    conn.execute(
                        "INSERT INTO frames (frame_id, video_id, frame_index, timestamp_ms,
                             thumbnail_path, colors)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            frame.frame_id,
                            frame.video_id,
                            frame.frame_index,
                            frame.timestamp_ms,
                            frame.thumbnail_path,
                            frame.colors,
                        ],
                    )?;
                }
                Ok(())
            })();
            match result {
                Ok(()) => conn.execute_batch("COMMIT"),
                Err(e) => {
                    let _ = conn.execute_batch("ROLLBACK");
                    Err(e)
                }
            }
        })?;
        Ok(())
    }

    /// Frames of an item ordered by frame_index.
    pub fn list_frames(&self, media_id: &str) -> Result<Vec<Frame>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT frame_id, video_id, frame_index, timestamp_ms, thumbnail_path, colors
             FROM frames WHERE video_id = ?1 ORDER BY frame_index",
        )?;
        let frames = stmt
            .query_map([media_id], |row| {
                Ok(Frame {
                    frame_id: row.get(0)?,
                    video_id: row.get(1)?,
                    frame_index: row.get(2)?,
                    timestamp_ms: row.get(3)?,
                    thumbnail_path: row.get(4)?,
                    colors: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(frames)
    }

    /// Batch lookup of frames by index for shard-hit resolution.
    pub fn frames_by_index(
        &self,
        media_id: &str,
        indices: &[i64],
    ) -> Result<HashMap<i64, Frame>> {
        if indices.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.lock()?;
        let placeholders = vec!["?"; indices.len()].join(",");
        let mut stmt = conn.prepare(&format!(
            "SELECT frame_id, video_id, frame_index, timestamp_ms, thumbnail_path, colors
             FROM frames WHERE video_id = ? AND frame_index IN ({placeholders})"
        ))?;
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(media_id.to_string())];
        for idx in indices {
            args.push(Box::new(*idx));
        }
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            args.iter().map(|b| b.as_ref()).collect();

        let mut map = HashMap::new();
        let rows = stmt.query_map(params_ref.as_slice(), |row| {
            Ok(Frame {
                frame_id: row.get(0)?,
                video_id: row.get(1)?,
                frame_index: row.get(2)?,
                timestamp_ms: row.get(3)?,
                thumbnail_path: row.get(4)?,
                colors: row.get(5)?,
            })
        })?;
        for row in rows {
            let frame = row?;
            map.insert(frame.frame_index, frame);
        }
        Ok(map)
    }

    /// First frame at or after a timestamp window start, for person-window
    /// thumbnails.
    pub fn first_frame_in_window(
        &self,
        media_id: &str,
        window_start_ms: i64,
        window_end_ms: i64,
    ) -> Result<Option<String>> {
        let conn = self.lock()?;
        let path: Option<String> = conn
            .query_row(
                "SELECT thumbnail_path FROM frames
                 WHERE video_id = ?1 AND timestamp_ms >= ?2 AND timestamp_ms < ?3
                 ORDER BY timestamp_ms LIMIT 1",
                params![media_id, window_start_ms, window_end_ms],
                |row| row.get(0),
            )
            .optional()
            .map_err(GazeError::from)?;
        Ok(path)
    }

    /// Replace all detections for a media item in one transaction.
    pub fn replace_detections(&self, media_id: &str, detections: &[DetectionRow]) -> Result<()> {
        self.retry_busy(|conn| {
            conn.execute_batch("BEGIN")?;
            let result = (|| {
                conn.execute(
                    "DELETE FROM detections WHERE video_id = ?1",
                    params![media_id],
                )?;
                for det in detections {
                    conn.execute(
                        "INSERT INTO detections (video_id, frame_id, timestamp_ms, label,
                             confidence, bbox_x, bbox_y, bbox_w, bbox_h)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                        params![
                            det.video_id,
                            det.frame_id,
                            det.timestamp_ms,
                            det.label,
                            det.confidence,
                            det.bbox_x,
                            det.bbox_y,
                            det.bbox_w,
                            det.bbox_h,
                        ],
                    )?;
                }
                Ok(())
            })();
            match result {
                Ok(()) => conn.execute_batch("COMMIT"),
                Err(e) => {
                    let _ = conn.execute_batch("ROLLBACK");
                    Err(e)
                }
            }
        })?;
        Ok(())
    }

    pub fn list_detections(&self, media_id: &str) -> Result<Vec<DetectionRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT video_id, frame_id, timestamp_ms, label, confidence,
                    bbox_x, bbox_y, bbox_w, bbox_h
             FROM detections WHERE video_id = ?1 ORDER BY timestamp_ms",
        )?;
        let detections = stmt
            .query_map([media_id], |row| {
                Ok(DetectionRow {
                    video_id: row.get(0)?,
                    frame_id: row.get(1)?,
                    timestamp_ms: row.get(2)?,
                    label: row.get(3)?,
                    confidence: row.get(4)?,
                    bbox_x: row.get(5)?,
                    bbox_y: row.get(6)?,
                    bbox_w: row.get(7)?,
                    bbox_h: row.get(8)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(detections)
    }

    /// Moments (video, timestamp) where a label was detected on a DONE
    /// item, with the max confidence per moment. Feeds the search planner's
    /// detection pass.
    pub fn detection_moments(
        &self,
        label: &str,
        library_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DetectionMoment>> {
        let conn = self.lock()?;
        let mut sql = String::from(
            "SELECT d.video_id, d.timestamp_ms, f.thumbnail_path,
                    MAX(d.confidence), GROUP_CONCAT(DISTINCT d.label)
             FROM detections d
             INNER JOIN media m ON m.media_id = d.video_id
             LEFT JOIN frames f ON f.frame_id = d.frame_id
             WHERE d.label = ?1 AND m.status = 'DONE'",
        );
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(label.to_string())];
        if let Some(library) = library_id {
            sql.push_str(&format!(" AND m.library_id = ?{}", args.len() + 1));
            args.push(Box::new(library.to_string()));
        }
        sql.push_str(&format!(
            " GROUP BY d.video_id, d.timestamp_ms
              ORDER BY MAX(d.confidence) DESC
              LIMIT {limit}"
        ));

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            args.iter().map(|b| b.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let moments = stmt
            .query_map(params_ref.as_slice(), |row| {
                Ok(DetectionMoment {
                    video_id: row.get(0)?,
                    timestamp_ms: row.get(1)?,
                    thumbnail_path: row.get(2)?,
                    max_confidence: row.get(3)?,
                    labels: row
                        .get::<_, Option<String>>(4)?
                        .map(|s| s.split(',').map(str::to_string).collect())
                        .unwrap_or_default(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(moments)
    }

    /// Label-only search path: moments grouped by (video, timestamp) with
    /// the count of distinct matching labels, ranked by matches descending.
    /// Returns (rows, pre-pagination total).
    pub fn label_moments(
        &self,
        labels: &[String],
        library_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<LabelMoment>, usize)> {
        if labels.is_empty() {
            return Ok((Vec::new(), 0));
        }
        let conn = self.lock()?;
        let placeholders = vec!["?"; labels.len()].join(",");

        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = labels
            .iter()
            .map(|l| Box::new(l.clone()) as Box<dyn rusqlite::types::ToSql>)
            .collect();
        let library_clause = if let Some(library) = library_id {
            args.push(Box::new(library.to_string()));
            format!(" AND m.library_id = ?{}", args.len())
        } else {
            String::new()
        };
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            args.iter().map(|b| b.as_ref()).collect();

        let total: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM (
                     SELECT d.video_id, d.timestamp_ms
                     FROM detections d
                     INNER JOIN media m ON m.media_id = d.video_id
                     WHERE d.label IN ({placeholders}){library_clause}
                     GROUP BY d.video_id, d.timestamp_ms
                 )"
            ),
            params_ref.as_slice(),
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT d.video_id, d.timestamp_ms, f.thumbnail_path,
                    GROUP_CONCAT(DISTINCT d.label), COUNT(DISTINCT d.label)
             FROM detections d
             INNER JOIN media m ON m.media_id = d.video_id
             LEFT JOIN frames f ON f.frame_id = d.frame_id
             WHERE d.label IN ({placeholders}){library_clause}
             GROUP BY d.video_id, d.timestamp_ms, f.thumbnail_path
             ORDER BY COUNT(DISTINCT d.label) DESC, d.timestamp_ms ASC
             LIMIT {limit} OFFSET {offset}"
        ))?;
        let moments = stmt
            .query_map(params_ref.as_slice(), |row| {
                Ok(LabelMoment {
                    video_id: row.get(0)?,
                    timestamp_ms: row.get(1)?,
                    thumbnail_path: row.get(2)?,
                    labels: row
                        .get::<_, Option<String>>(3)?
                        .map(|s| s.split(',').map(str::to_string).collect())
                        .unwrap_or_default(),
                    label_hits: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok((moments, total as usize))
    }

    /// Distinct labels detected within ±window of a timestamp, intersected
    /// with the requested label set.
    pub fn matching_labels_near(
        &self,
        media_id: &str,
        timestamp_ms: i64,
        window_ms: i64,
        labels: &[String],
    ) -> Result<Vec<String>> {
        if labels.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock()?;
        let placeholders = vec!["?"; labels.len()].join(",");
        let mut stmt = conn.prepare(&format!(
            "SELECT DISTINCT label FROM detections
             WHERE video_id = ? AND timestamp_ms BETWEEN ? AND ? AND label IN ({placeholders})"
        ))?;
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = vec![
            Box::new(media_id.to_string()),
            Box::new(timestamp_ms - window_ms),
            Box::new(timestamp_ms + window_ms),
        ];
        for label in labels {
            args.push(Box::new(label.clone()));
        }
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            args.iter().map(|b| b.as_ref()).collect();
        let found = stmt
            .query_map(params_ref.as_slice(), |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::seed_media;
    use super::*;
    use crate::catalog::{Catalog, MediaType};

    fn frame(media_id: &str, idx: i64) -> Frame {
        Frame {
            frame_id: Frame::frame_id_for(media_id, idx as usize),
            video_id: media_id.to_string(),
            frame_index: idx,
            timestamp_ms: idx * 2000,
            thumbnail_path: format!("/thumbs/{media_id}/frame_{:06}.jpg", idx + 1),
            colors: Some("blue,white".into()),
        }
    }

    #[test]
    fn test_replace_frames_is_idempotent() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_media(&catalog, "m1", MediaType::Video);

        catalog
            .replace_frames("m1", &[frame("m1", 0), frame("m1", 1)])
            .unwrap();
        catalog
            .replace_frames("m1", &[frame("m1", 0), frame("m1", 1)])
            .unwrap();

        let frames = catalog.list_frames("m1").unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].frame_index, 0);
        assert_eq!(frames[1].timestamp_ms, 2000);
    }

    #[test]
    fn test_frames_by_index() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_media(&catalog, "m1", MediaType::Video);
        catalog
            .replace_frames("m1", &[frame("m1", 0), frame("m1", 1), frame("m1", 2)])
            .unwrap();

        let map = catalog.frames_by_index("m1", &[0, 2, 99]).unwrap();
        assert_eq!(map.len(), 2);
        assert!(map.contains_key(&0));
        assert!(map.contains_key(&2));
    }

    #[test]
    fn test_detections_replace_and_window() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_media(&catalog, "m1", MediaType::Video);
        catalog.replace_frames("m1", &[frame("m1", 0)]).unwrap();

        let det = DetectionRow {
            video_id: "m1".into(),
            frame_id: Frame::frame_id_for("m1", 0),
            timestamp_ms: 0,
            label: "car".into(),
            confidence: 0.9,
            bbox_x: Some(1.0),
            bbox_y: Some(2.0),
            bbox_w: Some(3.0),
            bbox_h: Some(4.0),
        };
        catalog.replace_detections("m1", &[det]).unwrap();
        assert_eq!(catalog.list_detections("m1").unwrap().len(), 1);

        let hit = catalog
            .matching_labels_near("m1", 2000, 3000, &["car".into(), "dog".into()])
            .unwrap();
        assert_eq!(hit, vec!["car"]);

        let miss = catalog
            .matching_labels_near("m1", 9000, 3000, &["car".into()])
            .unwrap();
        assert!(miss.is_empty());
    }

    #[test]
    fn test_cascade_on_media_delete() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_media(&catalog, "m1", MediaType::Video);
        catalog.replace_frames("m1", &[frame("m1", 0)]).unwrap();

        catalog.delete_media("m1").unwrap();
        assert!(catalog.list_frames("m1").unwrap().is_empty());
    }
}
