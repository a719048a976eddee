//! Centralized configuration for the Gaze engine.
//!
//! Compile-time constants live here; user-tunable options live in the
//! `settings` table and are read through [`crate::catalog::settings`].

use std::time::Duration;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const APP_NAME: &'static str = "Gaze";
    pub const LOG_FILE_MAX_BYTES: u64 = 10_485_760; // 10MB
    pub const LOG_FILE_BACKUP_COUNT: u32 = 5;
}

/// Database behavior.
pub struct DbConfig;

impl DbConfig {
    /// Long busy timeout so API readers do not spuriously fail while the
    /// pipeline holds the writer.
    pub const BUSY_TIMEOUT: Duration = Duration::from_secs(30);
    /// Bounded retry on SQLITE_BUSY: 100ms, 200ms, ... additive.
    pub const BUSY_RETRY_ATTEMPTS: u32 = 5;
    pub const BUSY_RETRY_BASE_DELAY: Duration = Duration::from_millis(100);
}

/// Pipeline behavior.
pub struct PipelineConfig;

impl PipelineConfig {
    pub const DEFAULT_FRAME_INTERVAL_SECONDS: f64 = 2.0;
    pub const DETECTION_MIN_CONFIDENCE: f32 = 0.25;
    pub const FACE_DET_THRESHOLD: f32 = 0.5;
    pub const FACE_MIN_SIDE_PX: u32 = 32;
    /// Transcription chunks shorter than this are skipped.
    pub const MIN_CHUNK_SECONDS: f64 = 0.5;
    pub const DEFAULT_CHUNK_SECONDS: f64 = 30.0;
    pub const DEFAULT_MIN_SILENCE_MS: u32 = 500;
    pub const DEFAULT_SILENCE_THRESHOLD_DB: i32 = -35;
    pub const AUDIO_SAMPLE_RATE: u32 = 16_000;
    pub const EMBEDDING_DIM: usize = 512;
}

/// Scheduler behavior.
pub struct SchedulerConfig;

impl SchedulerConfig {
    pub const DEFAULT_MAX_CONCURRENT_JOBS: u32 = 2;
    /// At most one new primary pipeline task admitted per tick, a governor
    /// against SQLite writer stampede.
    pub const ADMISSION_PER_TICK: u32 = 1;
    pub const TICK_INTERVAL: Duration = Duration::from_secs(5);
    pub const DRAIN_BATCH: u32 = 10;
}

/// Search behavior.
pub struct SearchConfig;

impl SearchConfig {
    /// CLIP results below this similarity are filtered out.
    pub const VISUAL_SIMILARITY_FLOOR: f32 = 0.18;
    /// Stricter floor when the query names a detectable object.
    pub const OBJECT_QUERY_SIMILARITY_FLOOR: f32 = 0.22;
    /// Top-k per vector shard, capped at the request limit.
    pub const SHARD_TOP_K: usize = 20;
    pub const DEFAULT_SHARD_CACHE_MAX: usize = 8;
    /// Faces are bucketed into windows of this width for person matching.
    pub const PERSON_WINDOW_MS: i64 = 5_000;
    /// Detections within this distance of a result count as label matches.
    pub const LABEL_WINDOW_MS: i64 = 3_000;
}

/// Face learning behavior.
pub struct LearningConfig;

impl LearningConfig {
    pub const BASE_THRESHOLD: f32 = 0.65;
    pub const PAIR_THRESHOLD_INITIAL: f32 = 0.70;
    pub const PAIR_THRESHOLD_STEP: f32 = 0.02;
    pub const PAIR_THRESHOLD_MIN: f32 = 0.65;
    pub const PAIR_THRESHOLD_MAX: f32 = 0.85;
    pub const WEIGHT_REFERENCE: f32 = 3.0;
    pub const WEIGHT_MANUAL: f32 = 2.0;
    pub const WEIGHT_AUTO: f32 = 1.0;
}

/// Network-related configuration for model downloads.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DOWNLOAD_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
    pub const MAX_RETRIES: u32 = 3;
    pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);
    pub const DOWNLOAD_TEMP_SUFFIX: &'static str = ".part";
}

/// Thumbnail presets.
pub struct ThumbnailConfig;

impl ThumbnailConfig {
    pub const FULL_MAX_DIM: u32 = 1280;
    pub const FULL_QUALITY: u8 = 85;
    pub const GRID_MAX_DIM: u32 = 256;
    pub const GRID_QUALITY: u8 = 50;
}

/// Indexing preset: how much work the pipeline does per item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexingPreset {
    Quick,
    Deep,
}

impl IndexingPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexingPreset::Quick => "quick",
            IndexingPreset::Deep => "deep",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "quick" => Some(IndexingPreset::Quick),
            "deep" => Some(IndexingPreset::Deep),
            _ => None,
        }
    }
}

impl Default for IndexingPreset {
    fn default() -> Self {
        IndexingPreset::Deep
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_round_trip() {
        assert_eq!(IndexingPreset::from_str("quick"), Some(IndexingPreset::Quick));
        assert_eq!(IndexingPreset::from_str("deep"), Some(IndexingPreset::Deep));
        assert_eq!(IndexingPreset::from_str("DEEP"), None);
        assert_eq!(IndexingPreset::Deep.as_str(), "deep");
    }

    #[test]
    fn test_threshold_bounds() {
        assert!(LearningConfig::PAIR_THRESHOLD_MIN <= LearningConfig::PAIR_THRESHOLD_INITIAL);
        assert!(LearningConfig::PAIR_THRESHOLD_INITIAL <= LearningConfig::PAIR_THRESHOLD_MAX);
    }
}
