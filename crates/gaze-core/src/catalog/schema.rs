//! Catalog schema, additive migrations and idempotent backfills.
//!
//! Tables are created first, then each table's column set is introspected
//! and any missing column from the migration manifest is added (new columns
//! are nullable or have defaults). Indexes are created only after migrations
//! so they can reference newly-added columns.

use crate::error::Result;
use rusqlite::Connection;
use tracing::info;

pub(crate) const SCHEMA_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS libraries (
    library_id TEXT PRIMARY KEY,
    folder_path TEXT NOT NULL UNIQUE,
    name TEXT,
    recursive INTEGER NOT NULL DEFAULT 1,
    created_at_ms INTEGER NOT NULL
);

-- Unified media table (photos + videos)
CREATE TABLE IF NOT EXISTS media (
    media_id TEXT PRIMARY KEY,
    library_id TEXT NOT NULL,
    path TEXT NOT NULL,
    filename TEXT NOT NULL,
    file_ext TEXT,
    media_type TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    mtime_ms INTEGER NOT NULL,
    fingerprint TEXT NOT NULL,
    duration_ms INTEGER,
    width INTEGER,
    height INTEGER,
    status TEXT NOT NULL DEFAULT 'QUEUED',
    last_completed_stage TEXT,
    progress REAL NOT NULL DEFAULT 0.0,
    error_code TEXT,
    error_message TEXT,
    indexed_at_ms INTEGER,
    created_at_ms INTEGER NOT NULL,
    UNIQUE(library_id, path),
    FOREIGN KEY(library_id) REFERENCES libraries(library_id) ON DELETE CASCADE
);

-- Flexible key-value metadata for media
CREATE TABLE IF NOT EXISTS media_metadata (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    media_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT,
    UNIQUE(media_id, key),
    FOREIGN KEY(media_id) REFERENCES media(media_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS transcript_segments (
    segment_id INTEGER PRIMARY KEY AUTOINCREMENT,
    video_id TEXT NOT NULL,
    start_ms INTEGER NOT NULL,
    end_ms INTEGER NOT NULL,
    text TEXT NOT NULL,
    confidence REAL,
    FOREIGN KEY(video_id) REFERENCES media(media_id) ON DELETE CASCADE
);

CREATE VIRTUAL TABLE IF NOT EXISTS transcript_fts USING fts5(
    video_id,
    start_ms UNINDEXED,
    end_ms UNINDEXED,
    text,
    tokenize="unicode61"
);

CREATE TABLE IF NOT EXISTS frames (
    frame_id TEXT PRIMARY KEY,
    video_id TEXT NOT NULL,
    frame_index INTEGER NOT NULL,
    timestamp_ms INTEGER NOT NULL,
    thumbnail_path TEXT NOT NULL,
    FOREIGN KEY(video_id) REFERENCES media(media_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS detections (
    detection_id INTEGER PRIMARY KEY AUTOINCREMENT,
    video_id TEXT NOT NULL,
    frame_id TEXT NOT NULL,
    timestamp_ms INTEGER NOT NULL,
    label TEXT NOT NULL,
    confidence REAL NOT NULL,
    bbox_x REAL,
    bbox_y REAL,
    bbox_w REAL,
    bbox_h REAL,
    FOREIGN KEY(video_id) REFERENCES media(media_id) ON DELETE CASCADE,
    FOREIGN KEY(frame_id) REFERENCES frames(frame_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS jobs (
    job_id TEXT PRIMARY KEY,
    video_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'PENDING',
    current_stage TEXT,
    progress REAL NOT NULL DEFAULT 0.0,
    message TEXT,
    error_code TEXT,
    error_message TEXT,
    created_at_ms INTEGER NOT NULL,
    updated_at_ms INTEGER NOT NULL,
    FOREIGN KEY(video_id) REFERENCES media(media_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Named people for face recognition
CREATE TABLE IF NOT EXISTS persons (
    person_id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    thumbnail_face_id TEXT,
    face_count INTEGER NOT NULL DEFAULT 0,
    created_at_ms INTEGER NOT NULL,
    updated_at_ms INTEGER NOT NULL,
    FOREIGN KEY(thumbnail_face_id) REFERENCES faces(face_id) ON DELETE SET NULL
);

-- Individual face detections with embeddings
CREATE TABLE IF NOT EXISTS faces (
    face_id TEXT PRIMARY KEY,
    video_id TEXT NOT NULL,
    frame_id TEXT NOT NULL,
    timestamp_ms INTEGER NOT NULL,
    bbox_x REAL NOT NULL,
    bbox_y REAL NOT NULL,
    bbox_w REAL NOT NULL,
    bbox_h REAL NOT NULL,
    confidence REAL NOT NULL,
    -- 512-dim float32 = 2048 bytes
    embedding BLOB NOT NULL,
    crop_path TEXT,
    age INTEGER,
    gender TEXT,
    person_id TEXT,
    cluster_id TEXT,
    created_at_ms INTEGER NOT NULL,
    FOREIGN KEY(video_id) REFERENCES media(media_id) ON DELETE CASCADE,
    FOREIGN KEY(frame_id) REFERENCES frames(frame_id) ON DELETE CASCADE,
    FOREIGN KEY(person_id) REFERENCES persons(person_id) ON DELETE SET NULL
);

-- Reference faces marked by users as canonical examples
CREATE TABLE IF NOT EXISTS face_references (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    face_id TEXT NOT NULL,
    person_id TEXT NOT NULL,
    weight REAL NOT NULL DEFAULT 1.0,
    created_at_ms INTEGER NOT NULL,
    UNIQUE(face_id, person_id),
    FOREIGN KEY(face_id) REFERENCES faces(face_id) ON DELETE CASCADE,
    FOREIGN KEY(person_id) REFERENCES persons(person_id) ON DELETE CASCADE
);

-- Negative examples: faces that should NOT match a person
CREATE TABLE IF NOT EXISTS face_negatives (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    face_id TEXT NOT NULL,
    person_id TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL,
    UNIQUE(face_id, person_id),
    FOREIGN KEY(face_id) REFERENCES faces(face_id) ON DELETE CASCADE,
    FOREIGN KEY(person_id) REFERENCES persons(person_id) ON DELETE CASCADE
);

-- Per-person-pair thresholds for frequently confused pairs
CREATE TABLE IF NOT EXISTS person_pair_thresholds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    person_a_id TEXT NOT NULL,
    person_b_id TEXT NOT NULL,
    threshold REAL NOT NULL DEFAULT 0.70,
    correction_count INTEGER NOT NULL DEFAULT 1,
    created_at_ms INTEGER NOT NULL,
    updated_at_ms INTEGER NOT NULL,
    UNIQUE(person_a_id, person_b_id),
    FOREIGN KEY(person_a_id) REFERENCES persons(person_id) ON DELETE CASCADE,
    FOREIGN KEY(person_b_id) REFERENCES persons(person_id) ON DELETE CASCADE
);

-- User favorites for media
CREATE TABLE IF NOT EXISTS media_favorites (
    media_id TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL,
    PRIMARY KEY(media_id),
    FOREIGN KEY(media_id) REFERENCES media(media_id) ON DELETE CASCADE
);

-- User favorites for persons
CREATE TABLE IF NOT EXISTS person_favorites (
    person_id TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL,
    PRIMARY KEY(person_id),
    FOREIGN KEY(person_id) REFERENCES persons(person_id) ON DELETE CASCADE
);

-- User tags for media
CREATE TABLE IF NOT EXISTS media_tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    media_id TEXT NOT NULL,
    tag TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL,
    UNIQUE(media_id, tag),
    FOREIGN KEY(media_id) REFERENCES media(media_id) ON DELETE CASCADE
);
"#;

pub(crate) const SCHEMA_INDEXES: &str = r#"
-- Indexes (run after migrations to ensure columns exist)
CREATE INDEX IF NOT EXISTS idx_media_library ON media(library_id);
CREATE INDEX IF NOT EXISTS idx_media_type ON media(media_type);
CREATE INDEX IF NOT EXISTS idx_media_fingerprint ON media(fingerprint);
CREATE INDEX IF NOT EXISTS idx_media_status ON media(status);
CREATE INDEX IF NOT EXISTS idx_media_creation_time ON media(creation_time);
CREATE INDEX IF NOT EXISTS idx_media_metadata ON media_metadata(media_id, key);
CREATE INDEX IF NOT EXISTS idx_segments_video ON transcript_segments(video_id, start_ms);
CREATE INDEX IF NOT EXISTS idx_frames_video ON frames(video_id, timestamp_ms);
CREATE INDEX IF NOT EXISTS idx_detections_video ON detections(video_id, timestamp_ms);
CREATE INDEX IF NOT EXISTS idx_detections_label ON detections(label);
CREATE INDEX IF NOT EXISTS idx_jobs_video ON jobs(video_id);
CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
CREATE INDEX IF NOT EXISTS idx_faces_video ON faces(video_id);
CREATE INDEX IF NOT EXISTS idx_faces_frame ON faces(frame_id);
CREATE INDEX IF NOT EXISTS idx_faces_person ON faces(person_id);
CREATE INDEX IF NOT EXISTS idx_faces_timestamp ON faces(video_id, timestamp_ms);
CREATE INDEX IF NOT EXISTS idx_faces_assignment_source ON faces(assignment_source);
CREATE INDEX IF NOT EXISTS idx_persons_name ON persons(name);
CREATE INDEX IF NOT EXISTS idx_face_references_person ON face_references(person_id);
CREATE INDEX IF NOT EXISTS idx_face_negatives_person ON face_negatives(person_id);
CREATE INDEX IF NOT EXISTS idx_pair_thresholds_a ON person_pair_thresholds(person_a_id);
CREATE INDEX IF NOT EXISTS idx_pair_thresholds_b ON person_pair_thresholds(person_b_id);
CREATE INDEX IF NOT EXISTS idx_media_tags_media ON media_tags(media_id);
CREATE INDEX IF NOT EXISTS idx_media_tags_tag ON media_tags(tag);
"#;

/// Columns added after the initial schema. New columns must be nullable or
/// carry a default so the ALTER is always valid.
pub(crate) const MIGRATION_COLUMNS: &[(&str, &[(&str, &str)])] = &[
    (
        "media",
        &[
            ("fps", "REAL"),
            ("video_codec", "TEXT"),
            ("video_bitrate", "INTEGER"),
            ("audio_codec", "TEXT"),
            ("audio_channels", "INTEGER"),
            ("audio_sample_rate", "INTEGER"),
            ("container_format", "TEXT"),
            ("rotation", "INTEGER DEFAULT 0"),
            ("creation_time", "TEXT"),
            ("camera_make", "TEXT"),
            ("camera_model", "TEXT"),
            ("gps_lat", "REAL"),
            ("gps_lng", "REAL"),
            ("is_live_photo_component", "INTEGER DEFAULT 0"),
            ("live_photo_pair_id", "TEXT"),
        ],
    ),
    ("frames", &[("colors", "TEXT")]),
    (
        "faces",
        &[
            ("assignment_source", "TEXT"),
            ("assignment_confidence", "REAL"),
            ("assigned_at_ms", "INTEGER"),
        ],
    ),
    ("persons", &[("recognition_mode", "TEXT DEFAULT 'average'")]),
];

/// Add missing columns to existing tables.
pub(crate) fn migrate_schema(conn: &Connection) -> Result<()> {
    for (table_name, columns) in MIGRATION_COLUMNS {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({table_name})"))?;
        let existing: std::collections::HashSet<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .filter_map(|r| r.ok())
            .collect();

        for (col_name, col_type) in *columns {
            if !existing.contains(*col_name) {
                conn.execute(
                    &format!("ALTER TABLE {table_name} ADD COLUMN {col_name} {col_type}"),
                    [],
                )?;
                info!("Added column {} to {}", col_name, table_name);
            }
        }
    }
    Ok(())
}

/// Mark pre-migration face assignments as `legacy`. Only touches faces that
/// have a person but no provenance, so reruns are no-ops.
pub(crate) fn backfill_face_assignment_sources(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        UPDATE faces
        SET assignment_source = 'legacy',
            assigned_at_ms = created_at_ms
        WHERE person_id IS NOT NULL
          AND assignment_source IS NULL
        "#,
        [],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_applies_cleanly() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA_TABLES).unwrap();
        migrate_schema(&conn).unwrap();
        conn.execute_batch(SCHEMA_INDEXES).unwrap();

        // Second run is idempotent.
        conn.execute_batch(SCHEMA_TABLES).unwrap();
        migrate_schema(&conn).unwrap();
        conn.execute_batch(SCHEMA_INDEXES).unwrap();
    }

    #[test]
    fn test_migration_adds_missing_columns() {
        let conn = Connection::open_in_memory().unwrap();
        // Simulate a pre-migration media table without the live-photo columns.
        conn.execute_batch(
            "CREATE TABLE media (
                media_id TEXT PRIMARY KEY,
                library_id TEXT NOT NULL,
                path TEXT NOT NULL,
                filename TEXT NOT NULL,
                file_ext TEXT,
                media_type TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                mtime_ms INTEGER NOT NULL,
                fingerprint TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'QUEUED',
                progress REAL NOT NULL DEFAULT 0.0,
                created_at_ms INTEGER NOT NULL
            );
            CREATE TABLE frames (frame_id TEXT PRIMARY KEY, video_id TEXT NOT NULL,
                frame_index INTEGER, timestamp_ms INTEGER, thumbnail_path TEXT);
            CREATE TABLE faces (face_id TEXT PRIMARY KEY, person_id TEXT, created_at_ms INTEGER);
            CREATE TABLE persons (person_id TEXT PRIMARY KEY, name TEXT);",
        )
        .unwrap();

        migrate_schema(&conn).unwrap();

        let mut stmt = conn.prepare("PRAGMA table_info(media)").unwrap();
        let cols: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();
        assert!(cols.contains(&"live_photo_pair_id".to_string()));
        assert!(cols.contains(&"rotation".to_string()));
    }

    #[test]
    fn test_backfill_marks_legacy() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE faces (face_id TEXT PRIMARY KEY, person_id TEXT,
                assignment_source TEXT, assigned_at_ms INTEGER, created_at_ms INTEGER);",
        )
        .unwrap();
        conn.execute(
            "INSERT INTO faces (face_id, person_id, created_at_ms) VALUES ('f1', 'p1', 42)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO faces (face_id, person_id, assignment_source, created_at_ms)
             VALUES ('f2', 'p1', 'auto', 42)",
            [],
        )
        .unwrap();

        backfill_face_assignment_sources(&conn).unwrap();

        let src: String = conn
            .query_row(
                "SELECT assignment_source FROM faces WHERE face_id = 'f1'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(src, "legacy");

        let src2: String = conn
            .query_row(
                "SELECT assignment_source FROM faces WHERE face_id = 'f2'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(src2, "auto");
    }
}
