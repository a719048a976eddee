//! Face, person and learning-table row operations.
//!
//! Cached `persons.face_count` must equal the live face count; every write
//! path here that moves an assignment recomputes it inside the same
//! transaction or immediately after.

use super::{AssignmentSource, Catalog, FaceRow, PairThreshold, Person, RecognitionMode};
use crate::catalog::types::now_ms;
use crate::error::{GazeError, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

const FACE_COLUMNS: &str = "face_id, video_id, frame_id, timestamp_ms, bbox_x, bbox_y, bbox_w, \
     bbox_h, confidence, embedding, crop_path, age, gender, person_id, cluster_id, \
     assignment_source, assignment_confidence, assigned_at_ms, created_at_ms";

fn face_from_row(row: &Row<'_>) -> rusqlite::Result<FaceRow> {
    let source: Option<String> = row.get(15)?;
    Ok(FaceRow {
        face_id: row.get(0)?,
        video_id: row.get(1)?,
        frame_id: row.get(2)?,
        timestamp_ms: row.get(3)?,
        bbox_x: row.get(4)?,
        bbox_y: row.get(5)?,
        bbox_w: row.get(6)?,
        bbox_h: row.get(7)?,
        confidence: row.get(8)?,
        embedding: row.get(9)?,
        crop_path: row.get(10)?,
        age: row.get(11)?,
        gender: row.get(12)?,
        person_id: row.get(13)?,
        cluster_id: row.get(14)?,
        assignment_source: source.as_deref().and_then(AssignmentSource::from_str),
        assignment_confidence: row.get(16)?,
        assigned_at_ms: row.get(17)?,
        created_at_ms: row.get(18)?,
    })
}

fn person_from_row(row: &Row<'_>) -> rusqlite::Result<Person> {
    let mode: Option<String> = row.get(4)?;
    Ok(Person {
        person_id: row.get(0)?,
        name: row.get(1)?,
        thumbnail_face_id: row.get(2)?,
        face_count: row.get(3)?,
        recognition_mode: mode
            .as_deref()
            .and_then(RecognitionMode::from_str)
            .unwrap_or_default(),
        created_at_ms: row.get(5)?,
        updated_at_ms: row.get(6)?,
    })
}

const PERSON_COLUMNS: &str =
    "person_id, name, thumbnail_face_id, face_count, recognition_mode, created_at_ms, updated_at_ms";

fn recompute_face_count(conn: &Connection, person_id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE persons
         SET face_count = (SELECT COUNT(*) FROM faces WHERE faces.person_id = persons.person_id),
             updated_at_ms = ?2
         WHERE person_id = ?1",
        params![person_id, now_ms()],
    )?;
    Ok(())
}

/// Canonical (sorted) ordering for a person pair.
pub(crate) fn canonical_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Filters for face listing.
#[derive(Debug, Clone, Default)]
pub struct FaceFilter {
    pub media_id: Option<String>,
    pub person_id: Option<String>,
    pub unassigned_only: bool,
    pub limit: usize,
    pub offset: usize,
}

impl Catalog {
    // ------------------------------------------------------------------
    // Faces
    // ------------------------------------------------------------------

    /// Replace all face rows for a media item and recompute face counts for
    /// every person referenced before or after, in one transaction.
    pub fn replace_faces(&self, media_id: &str, faces: &[FaceRow]) -> Result<()> {
        self.retry_busy(|conn| {
            conn.execute_batch("BEGIN")?;
            let result = (|| {
                let mut affected: std::collections::HashSet<String> =
                    std::collections::HashSet::new();
                {
                    let mut stmt = conn.prepare(
                        "SELECT DISTINCT person_id FROM faces
                         WHERE video_id = ?1 AND person_id IS NOT NULL",
                    )?;
                    for row in stmt.query_map([media_id], |row| row.get::<_, String>(0))? {
                        affected.insert(row?);
                    }
                }

                conn.execute("DELETE FROM faces WHERE video_id = ?1", params![media_id])?;

                for face in faces {
                    conn.execute(
                        &format!(
                            "INSERT INTO faces ({FACE_COLUMNS})
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)"
                        ),
                        params![
                            face.face_id,
                            face.video_id,
                            face.frame_id,
                            face.timestamp_ms,
                            face.bbox_x,
                            face.bbox_y,
                            face.bbox_w,
                            face.bbox_h,
                            face.confidence,
                            face.embedding,
                            face.crop_path,
                            face.age,
                            face.gender,
                            face.person_id,
                            face.cluster_id,
                            face.assignment_source.map(|s| s.as_str()),
                            face.assignment_confidence,
                            face.assigned_at_ms,
                            face.created_at_ms,
                        ],
                    )?;
                    if let Some(ref person_id) = face.person_id {
                        affected.insert(person_id.clone());
                    }
                }

                for person_id in &affected {
                    recompute_face_count(conn, person_id)?;
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

    pub fn get_face(&self, face_id: &str) -> Result<Option<FaceRow>> {
        let conn = self.lock()?;
        let face = conn
            .query_row(
                &format!("SELECT {FACE_COLUMNS} FROM faces WHERE face_id = ?1"),
                [face_id],
                face_from_row,
            )
            .optional()?;
        Ok(face)
    }

    pub fn list_faces(&self, filter: &FaceFilter) -> Result<Vec<FaceRow>> {
        let conn = self.lock()?;
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref media_id) = filter.media_id {
            clauses.push(format!("video_id = ?{}", args.len() + 1));
            args.push(Box::new(media_id.clone()));
        }
        if let Some(ref person_id) = filter.person_id {
            clauses.push(format!("person_id = ?{}", args.len() + 1));
            args.push(Box::new(person_id.clone()));
        }
        if filter.unassigned_only {
            clauses.push("person_id IS NULL".to_string());
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let mut stmt = conn.prepare(&format!(
            "SELECT {FACE_COLUMNS} FROM faces {where_clause}
             ORDER BY video_id, timestamp_ms LIMIT {} OFFSET {}",
            filter.limit.max(1),
            filter.offset
        ))?;
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            args.iter().map(|b| b.as_ref()).collect();
        let faces = stmt
            .query_map(params_ref.as_slice(), face_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(faces)
    }

    /// All assigned faces as (person_id, source, embedding) for centroid
    /// materialization.
    pub fn assigned_face_embeddings(
        &self,
    ) -> Result<Vec<(String, AssignmentSource, Vec<u8>)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT person_id, assignment_source, embedding FROM faces
             WHERE person_id IS NOT NULL",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let source: Option<String> = row.get(1)?;
                Ok((
                    row.get::<_, String>(0)?,
                    source
                        .as_deref()
                        .and_then(AssignmentSource::from_str)
                        .unwrap_or(AssignmentSource::Legacy),
                    row.get::<_, Vec<u8>>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// (face_id, embedding) pairs for a person, for thumbnail re-picking.
    pub fn face_embeddings_for_person(
        &self,
        person_id: &str,
    ) -> Result<Vec<(String, Vec<u8>)>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT face_id, embedding FROM faces WHERE person_id = ?1")?;
        let rows = stmt
            .query_map([person_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Reassign one face and recompute both persons' counts atomically.
    pub fn set_face_person(
        &self,
        face_id: &str,
        person_id: Option<&str>,
        source: AssignmentSource,
        confidence: f64,
    ) -> Result<()> {
        let previous = self
            .get_face(face_id)?
            .ok_or_else(|| GazeError::FaceNotFound {
                face_id: face_id.to_string(),
            })?
            .person_id;

        self.retry_busy(|conn| {
            conn.execute_batch("BEGIN")?;
            let result = (|| {
                conn.execute(
                    "UPDATE faces SET person_id = ?2, assignment_source = ?3,
                         assignment_confidence = ?4, assigned_at_ms = ?5
                     WHERE face_id = ?1",
                    params![face_id, person_id, source.as_str(), confidence, now_ms()],
                )?;
                if let Some(ref prev) = previous {
                    recompute_face_count(conn, prev)?;
                }
                if let Some(new_person) = person_id {
                    recompute_face_count(conn, new_person)?;
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

    /// Faces of requested persons as (video_id, timestamp_ms, person_id,
    /// name), for the search person-window join.
    pub fn person_face_moments(
        &self,
        person_ids: &[String],
    ) -> Result<Vec<(String, i64, String, String)>> {
        if person_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock()?;
        let placeholders = vec!["?"; person_ids.len()].join(",");
        let mut stmt = conn.prepare(&format!(
            "SELECT DISTINCT f.video_id, f.timestamp_ms, f.person_id, p.name
             FROM faces f
             INNER JOIN persons p ON p.person_id = f.person_id
             WHERE f.person_id IN ({placeholders})
             ORDER BY f.video_id, f.timestamp_ms"
        ))?;
        let args: Vec<&dyn rusqlite::types::ToSql> = person_ids
            .iter()
            .map(|id| id as &dyn rusqlite::types::ToSql)
            .collect();
        let rows = stmt
            .query_map(args.as_slice(), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// All assigned faces in the given videos, for person enrichment of
    /// search results.
    pub fn assigned_face_moments_for_videos(
        &self,
        video_ids: &[String],
    ) -> Result<Vec<(String, i64, String, String)>> {
        if video_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock()?;
        let placeholders = vec!["?"; video_ids.len()].join(",");
        let mut stmt = conn.prepare(&format!(
            "SELECT f.video_id, f.timestamp_ms, f.person_id, p.name
             FROM faces f
             INNER JOIN persons p ON p.person_id = f.person_id
             WHERE f.video_id IN ({placeholders})
             ORDER BY f.video_id, f.timestamp_ms"
        ))?;
        let args: Vec<&dyn rusqlite::types::ToSql> = video_ids
            .iter()
            .map(|id| id as &dyn rusqlite::types::ToSql)
            .collect();
        let rows = stmt
            .query_map(args.as_slice(), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Persons
    // ------------------------------------------------------------------

    pub fn create_person(&self, name: &str) -> Result<String> {
        let person_id = uuid::Uuid::new_v4().to_string();
        let now = now_ms();
        self.retry_busy(|conn| {
            conn.execute(
                "INSERT INTO persons (person_id, name, face_count, recognition_mode,
                     created_at_ms, updated_at_ms)
                 VALUES (?1, ?2, 0, 'average', ?3, ?4)",
                params![person_id, name, now, now],
            )
        })?;
        Ok(person_id)
    }

    pub fn get_person(&self, person_id: &str) -> Result<Option<Person>> {
        let conn = self.lock()?;
        let person = conn
            .query_row(
                &format!("SELECT {PERSON_COLUMNS} FROM persons WHERE person_id = ?1"),
                [person_id],
                person_from_row,
            )
            .optional()?;
        Ok(person)
    }

    pub fn get_person_by_name(&self, name: &str) -> Result<Option<Person>> {
        let conn = self.lock()?;
        let person = conn
            .query_row(
                &format!("SELECT {PERSON_COLUMNS} FROM persons WHERE name = ?1"),
                [name],
                person_from_row,
            )
            .optional()?;
        Ok(person)
    }

    pub fn list_persons(&self) -> Result<Vec<Person>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare(&format!("SELECT {PERSON_COLUMNS} FROM persons ORDER BY name"))?;
        let persons = stmt
            .query_map([], person_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(persons)
    }

    pub fn rename_person(&self, person_id: &str, name: &str) -> Result<()> {
        self.retry_busy(|conn| {
            conn.execute(
                "UPDATE persons SET name = ?2, updated_at_ms = ?3 WHERE person_id = ?1",
                params![person_id, name, now_ms()],
            )
        })?;
        Ok(())
    }

    pub fn delete_person(&self, person_id: &str) -> Result<bool> {
        // Face links are ON DELETE SET NULL; references/negatives/thresholds
        // cascade away.
        let deleted = self.retry_busy(|conn| {
            conn.execute("DELETE FROM persons WHERE person_id = ?1", params![person_id])
        })?;
        Ok(deleted > 0)
    }

    /// Move every face from one person to another and drop the source
    /// person. References, negatives and pair thresholds of the source
    /// cascade away with it.
    pub fn merge_persons(&self, source_id: &str, target_id: &str) -> Result<usize> {
        if source_id == target_id {
            return Ok(0);
        }
        let moved = self.retry_busy(|conn| {
            conn.execute_batch("BEGIN")?;
            let result = (|| {
                let moved = conn.execute(
                    "UPDATE faces SET person_id = ?2 WHERE person_id = ?1",
                    params![source_id, target_id],
                )?;
                conn.execute("DELETE FROM persons WHERE person_id = ?1", params![source_id])?;
                recompute_face_count(conn, target_id)?;
                Ok(moved)
            })();
            match result {
                Ok(moved) => {
                    conn.execute_batch("COMMIT")?;
                    Ok(moved)
                }
                Err(e) => {
                    let _ = conn.execute_batch("ROLLBACK");
                    Err(e)
                }
            }
        })?;
        Ok(moved)
    }

    pub fn set_person_recognition_mode(
        &self,
        person_id: &str,
        mode: RecognitionMode,
    ) -> Result<()> {
        self.retry_busy(|conn| {
            conn.execute(
                "UPDATE persons SET recognition_mode = ?2, updated_at_ms = ?3
                 WHERE person_id = ?1",
                params![person_id, mode.as_str(), now_ms()],
            )
        })?;
        Ok(())
    }

    pub fn set_person_thumbnail(&self, person_id: &str, face_id: Option<&str>) -> Result<()> {
        self.retry_busy(|conn| {
            conn.execute(
                "UPDATE persons SET thumbnail_face_id = ?2, updated_at_ms = ?3
                 WHERE person_id = ?1",
                params![person_id, face_id, now_ms()],
            )
        })?;
        Ok(())
    }

    pub fn refresh_face_count(&self, person_id: &str) -> Result<()> {
        self.retry_busy(|conn| {
            recompute_face_count(conn, person_id)?;
            Ok(())
        })?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // References, negatives, pair thresholds
    // ------------------------------------------------------------------

    pub fn add_face_reference(&self, face_id: &str, person_id: &str, weight: f64) -> Result<()> {
        self.retry_busy(|conn| {
            conn.execute(
                "INSERT INTO face_references (face_id, person_id, weight, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(face_id, person_id) DO UPDATE SET weight = ?3",
                params![face_id, person_id, weight, now_ms()],
            )
        })?;
        Ok(())
    }

    pub fn remove_face_reference(&self, face_id: &str, person_id: &str) -> Result<bool> {
        let deleted = self.retry_busy(|conn| {
            conn.execute(
                "DELETE FROM face_references WHERE face_id = ?1 AND person_id = ?2",
                params![face_id, person_id],
            )
        })?;
        Ok(deleted > 0)
    }

    /// Reference embeddings per person: (person_id, face_id, weight, embedding).
    pub fn reference_embeddings(&self) -> Result<Vec<(String, String, f64, Vec<u8>)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT r.person_id, r.face_id, r.weight, f.embedding
             FROM face_references r
             INNER JOIN faces f ON f.face_id = r.face_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn list_face_references(&self, person_id: &str) -> Result<Vec<(String, f64)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT face_id, weight FROM face_references WHERE person_id = ?1
             ORDER BY created_at_ms",
        )?;
        let rows = stmt
            .query_map([person_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Idempotent negative insert.
    pub fn add_face_negative(&self, face_id: &str, person_id: &str) -> Result<()> {
        self.retry_busy(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO face_negatives (face_id, person_id, created_at_ms)
                 VALUES (?1, ?2, ?3)",
                params![face_id, person_id, now_ms()],
            )
        })?;
        Ok(())
    }

    /// Negative embeddings per person: (person_id, embedding).
    pub fn negative_embeddings(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT n.person_id, f.embedding
             FROM face_negatives n
             INNER JOIN faces f ON f.face_id = n.face_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn has_face_negative(&self, face_id: &str, person_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM face_negatives WHERE face_id = ?1 AND person_id = ?2",
                params![face_id, person_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    pub fn get_pair_threshold(&self, a: &str, b: &str) -> Result<Option<PairThreshold>> {
        let (first, second) = canonical_pair(a, b);
        let conn = self.lock()?;
        let pair = conn
            .query_row(
                "SELECT person_a_id, person_b_id, threshold, correction_count,
                        created_at_ms, updated_at_ms
                 FROM person_pair_thresholds
                 WHERE person_a_id = ?1 AND person_b_id = ?2",
                params![first, second],
                |row| {
                    Ok(PairThreshold {
                        person_a_id: row.get(0)?,
                        person_b_id: row.get(1)?,
                        threshold: row.get(2)?,
                        correction_count: row.get(3)?,
                        created_at_ms: row.get(4)?,
                        updated_at_ms: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(pair)
    }

    /// Record one correction for a confused pair: create at the initial
    /// threshold or bump by the step, capped.
    pub fn bump_pair_threshold(&self, a: &str, b: &str) -> Result<PairThreshold> {
        use crate::config::LearningConfig;
        let (first, second) = canonical_pair(a, b);
        let now = now_ms();
        self.retry_busy(|conn| {
            conn.execute(
                "INSERT INTO person_pair_thresholds
                     (person_a_id, person_b_id, threshold, correction_count,
                      created_at_ms, updated_at_ms)
                 VALUES (?1, ?2, ?3, 1, ?4, ?4)
                 ON CONFLICT(person_a_id, person_b_id) DO UPDATE SET
                     threshold = MIN(threshold + ?5, ?6),
                     correction_count = correction_count + 1,
                     updated_at_ms = ?4",
                params![
                    first,
                    second,
                    LearningConfig::PAIR_THRESHOLD_INITIAL as f64,
                    now,
                    LearningConfig::PAIR_THRESHOLD_STEP as f64,
                    LearningConfig::PAIR_THRESHOLD_MAX as f64,
                ],
            )
        })?;
        self.get_pair_threshold(first, second)?
            .ok_or_else(|| GazeError::Database {
                message: format!("pair threshold missing after upsert ({first}, {second})"),
                source: None,
            })
    }

    pub fn list_pair_thresholds(&self) -> Result<Vec<PairThreshold>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT person_a_id, person_b_id, threshold, correction_count,
                    created_at_ms, updated_at_ms
             FROM person_pair_thresholds",
        )?;
        let pairs = stmt
            .query_map([], |row| {
                Ok(PairThreshold {
                    person_a_id: row.get(0)?,
                    person_b_id: row.get(1)?,
                    threshold: row.get(2)?,
                    correction_count: row.get(3)?,
                    created_at_ms: row.get(4)?,
                    updated_at_ms: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::seed_media;
    use super::*;
    use crate::catalog::{Catalog, Frame, MediaType};

    fn seed_frame(catalog: &Catalog, media_id: &str) -> String {
        let frame = Frame {
            frame_id: Frame::frame_id_for(media_id, 0),
            video_id: media_id.to_string(),
            frame_index: 0,
            timestamp_ms: 0,
            thumbnail_path: "/t.jpg".into(),
            colors: None,
        };
        catalog.replace_frames(media_id, &[frame.clone()]).unwrap();
        frame.frame_id
    }

    fn face(media_id: &str, frame_id: &str, idx: usize, person_id: Option<&str>) -> FaceRow {
        FaceRow {
            face_id: FaceRow::face_id_for(media_id, 0, idx),
            video_id: media_id.to_string(),
            frame_id: frame_id.to_string(),
            timestamp_ms: 0,
            bbox_x: 1.0,
            bbox_y: 2.0,
            bbox_w: 30.0,
            bbox_h: 30.0,
            confidence: 0.9,
            embedding: vec![0u8; 2048],
            crop_path: Some("/f.jpg".into()),
            age: None,
            gender: None,
            person_id: person_id.map(str::to_string),
            cluster_id: None,
            assignment_source: person_id.map(|_| AssignmentSource::Auto),
            assignment_confidence: person_id.map(|_| 0.8),
            assigned_at_ms: person_id.map(|_| 1),
            created_at_ms: 1,
        }
    }

    #[test]
    fn test_face_count_invariant_after_replace() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_media(&catalog, "m1", MediaType::Video);
        let frame_id = seed_frame(&catalog, "m1");
        let person_id = catalog.create_person("Alice").unwrap();

        catalog
            .replace_faces(
                "m1",
                &[
                    face("m1", &frame_id, 0, Some(&person_id)),
                    face("m1", &frame_id, 1, Some(&person_id)),
                    face("m1", &frame_id, 2, None),
                ],
            )
            .unwrap();
        assert_eq!(catalog.get_person(&person_id).unwrap().unwrap().face_count, 2);

        // Re-running the stage drops the old rows and recounts.
        catalog
            .replace_faces("m1", &[face("m1", &frame_id, 0, Some(&person_id))])
            .unwrap();
        assert_eq!(catalog.get_person(&person_id).unwrap().unwrap().face_count, 1);

        catalog.replace_faces("m1", &[]).unwrap();
        assert_eq!(catalog.get_person(&person_id).unwrap().unwrap().face_count, 0);
    }

    #[test]
    fn test_set_face_person_moves_counts() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_media(&catalog, "m1", MediaType::Video);
        let frame_id = seed_frame(&catalog, "m1");
        let alice = catalog.create_person("Alice").unwrap();
        let bob = catalog.create_person("Bob").unwrap();

        catalog
            .replace_faces("m1", &[face("m1", &frame_id, 0, Some(&alice))])
            .unwrap();

        let face_id = FaceRow::face_id_for("m1", 0, 0);
        catalog
            .set_face_person(&face_id, Some(&bob), AssignmentSource::Manual, 1.0)
            .unwrap();

        assert_eq!(catalog.get_person(&alice).unwrap().unwrap().face_count, 0);
        assert_eq!(catalog.get_person(&bob).unwrap().unwrap().face_count, 1);

        let row = catalog.get_face(&face_id).unwrap().unwrap();
        assert_eq!(row.assignment_source, Some(AssignmentSource::Manual));
        assert_eq!(row.assignment_confidence, Some(1.0));
    }

    #[test]
    fn test_pair_threshold_create_and_bump() {
        let catalog = Catalog::open_in_memory().unwrap();
        let alice = catalog.create_person("Alice").unwrap();
        let bob = catalog.create_person("Bob").unwrap();

        let pair = catalog.bump_pair_threshold(&bob, &alice).unwrap();
        assert!((pair.threshold - 0.70).abs() < 1e-9);
        assert_eq!(pair.correction_count, 1);
        // Canonical ordering regardless of argument order.
        assert!(pair.person_a_id < pair.person_b_id);

        let pair = catalog.bump_pair_threshold(&alice, &bob).unwrap();
        assert!((pair.threshold - 0.72).abs() < 1e-9);
        assert_eq!(pair.correction_count, 2);
    }

    #[test]
    fn test_pair_threshold_caps() {
        let catalog = Catalog::open_in_memory().unwrap();
        let alice = catalog.create_person("Alice").unwrap();
        let bob = catalog.create_person("Bob").unwrap();

        let mut last = 0.0;
        for _ in 0..12 {
            last = catalog.bump_pair_threshold(&alice, &bob).unwrap().threshold;
        }
        assert!((last - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_negatives_idempotent() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_media(&catalog, "m1", MediaType::Video);
        let frame_id = seed_frame(&catalog, "m1");
        let alice = catalog.create_person("Alice").unwrap();
        catalog
            .replace_faces("m1", &[face("m1", &frame_id, 0, None)])
            .unwrap();

        let face_id = FaceRow::face_id_for("m1", 0, 0);
        catalog.add_face_negative(&face_id, &alice).unwrap();
        catalog.add_face_negative(&face_id, &alice).unwrap();

        assert!(catalog.has_face_negative(&face_id, &alice).unwrap());
        assert_eq!(catalog.negative_embeddings().unwrap().len(), 1);
    }

    #[test]
    fn test_references_round_trip() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_media(&catalog, "m1", MediaType::Video);
        let frame_id = seed_frame(&catalog, "m1");
        let alice = catalog.create_person("Alice").unwrap();
        catalog
            .replace_faces("m1", &[face("m1", &frame_id, 0, Some(&alice))])
            .unwrap();

        let face_id = FaceRow::face_id_for("m1", 0, 0);
        catalog.add_face_reference(&face_id, &alice, 1.0).unwrap();
        assert_eq!(catalog.list_face_references(&alice).unwrap().len(), 1);
        assert_eq!(catalog.reference_embeddings().unwrap().len(), 1);

        assert!(catalog.remove_face_reference(&face_id, &alice).unwrap());
        assert!(catalog.list_face_references(&alice).unwrap().is_empty());
    }

    #[test]
    fn test_merge_persons_moves_faces_and_counts() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_media(&catalog, "m1", MediaType::Video);
        let frame_id = seed_frame(&catalog, "m1");
        let alice = catalog.create_person("Alice").unwrap();
        let bob = catalog.create_person("Bob").unwrap();
        catalog
            .replace_faces(
                "m1",
                &[
                    face("m1", &frame_id, 0, Some(&alice)),
                    face("m1", &frame_id, 1, Some(&bob)),
                ],
            )
            .unwrap();

        let moved = catalog.merge_persons(&alice, &bob).unwrap();
        assert_eq!(moved, 1);
        assert!(catalog.get_person(&alice).unwrap().is_none());
        assert_eq!(catalog.get_person(&bob).unwrap().unwrap().face_count, 2);
    }

    #[test]
    fn test_person_unique_name() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.create_person("Alice").unwrap();
        assert!(catalog.create_person("Alice").is_err());
    }

    #[test]
    fn test_delete_person_nulls_faces() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_media(&catalog, "m1", MediaType::Video);
        let frame_id = seed_frame(&catalog, "m1");
        let alice = catalog.create_person("Alice").unwrap();
        catalog
            .replace_faces("m1", &[face("m1", &frame_id, 0, Some(&alice))])
            .unwrap();

        assert!(catalog.delete_person(&alice).unwrap());
        let row = catalog
            .get_face(&FaceRow::face_id_for("m1", 0, 0))
            .unwrap()
            .unwrap();
        assert!(row.person_id.is_none());
    }
}
