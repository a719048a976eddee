//! Row types for the catalog store.
//!
//! All timestamps are epoch milliseconds unless stated. Entity identifiers
//! are UUID strings; frame and face ids are derived from the owning media id
//! so they stay stable across pipeline reruns.

use serde::{Deserialize, Serialize};

/// Pipeline stage names. Status strings on media and job rows reuse these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    ExtractingAudio,
    Transcribing,
    ExtractingFrames,
    Embedding,
    Detecting,
    DetectingFaces,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ExtractingAudio => "EXTRACTING_AUDIO",
            Stage::Transcribing => "TRANSCRIBING",
            Stage::ExtractingFrames => "EXTRACTING_FRAMES",
            Stage::Embedding => "EMBEDDING",
            Stage::Detecting => "DETECTING",
            Stage::DetectingFaces => "DETECTING_FACES",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "EXTRACTING_AUDIO" => Some(Stage::ExtractingAudio),
            "TRANSCRIBING" => Some(Stage::Transcribing),
            "EXTRACTING_FRAMES" => Some(Stage::ExtractingFrames),
            "EMBEDDING" => Some(Stage::Embedding),
            "DETECTING" => Some(Stage::Detecting),
            "DETECTING_FACES" => Some(Stage::DetectingFaces),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Processing state of a media item (and the matching job status values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaStatus {
    Queued,
    Running(Stage),
    Done,
    Failed,
    Cancelled,
}

impl MediaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaStatus::Queued => "QUEUED",
            MediaStatus::Running(stage) => stage.as_str(),
            MediaStatus::Done => "DONE",
            MediaStatus::Failed => "FAILED",
            MediaStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(MediaStatus::Queued),
            "DONE" => Some(MediaStatus::Done),
            "FAILED" => Some(MediaStatus::Failed),
            "CANCELLED" => Some(MediaStatus::Cancelled),
            other => Stage::from_str(other).map(MediaStatus::Running),
        }
    }

    /// Whether the status names an intermediate pipeline stage.
    pub fn is_intermediate(&self) -> bool {
        matches!(self, MediaStatus::Running(_))
    }
}

impl std::fmt::Display for MediaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Photo,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Photo => "photo",
            MediaType::Video => "video",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "photo" => Some(MediaType::Photo),
            "video" => Some(MediaType::Video),
            _ => None,
        }
    }
}

/// A registered root folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Library {
    pub library_id: String,
    pub folder_path: String,
    pub name: Option<String>,
    pub recursive: bool,
    pub created_at_ms: i64,
}

/// Technical and source metadata extracted for a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub duration_ms: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub fps: Option<f64>,
    pub video_codec: Option<String>,
    pub video_bitrate: Option<i64>,
    pub audio_codec: Option<String>,
    pub audio_channels: Option<i64>,
    pub audio_sample_rate: Option<i64>,
    pub container_format: Option<String>,
    pub rotation: i64,
    pub creation_time: Option<String>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub gps_lat: Option<f64>,
    pub gps_lng: Option<f64>,
    /// Extra tag bag mirrored into the key→value metadata table.
    pub extra: Vec<(String, String)>,
}

/// The unified record for one discovered file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub media_id: String,
    pub library_id: String,
    pub path: String,
    pub filename: String,
    pub file_ext: Option<String>,
    pub media_type: MediaType,
    pub file_size: i64,
    pub mtime_ms: i64,
    pub fingerprint: String,
    pub duration_ms: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub fps: Option<f64>,
    pub video_codec: Option<String>,
    pub video_bitrate: Option<i64>,
    pub audio_codec: Option<String>,
    pub audio_channels: Option<i64>,
    pub audio_sample_rate: Option<i64>,
    pub container_format: Option<String>,
    pub rotation: i64,
    pub creation_time: Option<String>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub gps_lat: Option<f64>,
    pub gps_lng: Option<f64>,
    pub is_live_photo_component: bool,
    pub live_photo_pair_id: Option<String>,
    pub status: MediaStatus,
    pub last_completed_stage: Option<Stage>,
    pub progress: f64,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub indexed_at_ms: Option<i64>,
    pub created_at_ms: i64,
}

/// A sampled still tied to a media item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub frame_id: String,
    pub video_id: String,
    pub frame_index: i64,
    pub timestamp_ms: i64,
    pub thumbnail_path: String,
    /// Comma-joined dominant color names, up to five.
    pub colors: Option<String>,
}

impl Frame {
    pub fn frame_id_for(media_id: &str, index: usize) -> String {
        format!("{media_id}_frame_{index:06}")
    }
}

/// An object-detector output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRow {
    pub video_id: String,
    pub frame_id: String,
    pub timestamp_ms: i64,
    pub label: String,
    pub confidence: f64,
    pub bbox_x: Option<f64>,
    pub bbox_y: Option<f64>,
    pub bbox_w: Option<f64>,
    pub bbox_h: Option<f64>,
}

/// A speech segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub video_id: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub text: String,
    pub confidence: Option<f64>,
}

/// Who or what caused a face's current person assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentSource {
    Legacy,
    Auto,
    Manual,
    Reference,
}

impl AssignmentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentSource::Legacy => "legacy",
            AssignmentSource::Auto => "auto",
            AssignmentSource::Manual => "manual",
            AssignmentSource::Reference => "reference",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "legacy" => Some(AssignmentSource::Legacy),
            "auto" => Some(AssignmentSource::Auto),
            "manual" => Some(AssignmentSource::Manual),
            "reference" => Some(AssignmentSource::Reference),
            _ => None,
        }
    }

    /// Weight of this face when folded into the person centroid.
    pub fn centroid_weight(&self) -> f32 {
        match self {
            AssignmentSource::Reference => crate::config::LearningConfig::WEIGHT_REFERENCE,
            AssignmentSource::Manual => crate::config::LearningConfig::WEIGHT_MANUAL,
            AssignmentSource::Auto | AssignmentSource::Legacy => {
                crate::config::LearningConfig::WEIGHT_AUTO
            }
        }
    }
}

/// A detected face crop plus its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRow {
    pub face_id: String,
    pub video_id: String,
    pub frame_id: String,
    pub timestamp_ms: i64,
    pub bbox_x: f64,
    pub bbox_y: f64,
    pub bbox_w: f64,
    pub bbox_h: f64,
    pub confidence: f64,
    /// 512 float32 values serialized little-endian.
    #[serde(skip)]
    pub embedding: Vec<u8>,
    pub crop_path: Option<String>,
    pub age: Option<i64>,
    pub gender: Option<String>,
    pub person_id: Option<String>,
    pub cluster_id: Option<String>,
    pub assignment_source: Option<AssignmentSource>,
    pub assignment_confidence: Option<f64>,
    pub assigned_at_ms: Option<i64>,
    pub created_at_ms: i64,
}

impl FaceRow {
    pub fn face_id_for(media_id: &str, frame_index: usize, face_index: usize) -> String {
        format!("{media_id}_face_{frame_index:06}_{face_index:02}")
    }
}

/// How a person's auto-recognition score is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionMode {
    Average,
    ReferenceOnly,
    Weighted,
}

impl RecognitionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecognitionMode::Average => "average",
            RecognitionMode::ReferenceOnly => "reference_only",
            RecognitionMode::Weighted => "weighted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "average" => Some(RecognitionMode::Average),
            "reference_only" => Some(RecognitionMode::ReferenceOnly),
            "weighted" => Some(RecognitionMode::Weighted),
            _ => None,
        }
    }
}

impl Default for RecognitionMode {
    fn default() -> Self {
        RecognitionMode::Average
    }
}

/// A named identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub person_id: String,
    pub name: String,
    pub thumbnail_face_id: Option<String>,
    pub face_count: i64,
    pub recognition_mode: RecognitionMode,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// Explicit canonical example marked by the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceReference {
    pub face_id: String,
    pub person_id: String,
    pub weight: f64,
    pub created_at_ms: i64,
}

/// Explicit "not this person".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceNegative {
    pub face_id: String,
    pub person_id: String,
    pub created_at_ms: i64,
}

/// Learned minimum similarity between two frequently-confused persons.
/// The pair is stored in sorted order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairThreshold {
    pub person_a_id: String,
    pub person_b_id: String,
    pub threshold: f64,
    pub correction_count: i64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// Status values for job rows: PENDING, a stage name, DONE, FAILED, CANCELLED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running(Stage),
    Done,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running(stage) => stage.as_str(),
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(JobStatus::Pending),
            "DONE" => Some(JobStatus::Done),
            "FAILED" => Some(JobStatus::Failed),
            "CANCELLED" => Some(JobStatus::Cancelled),
            other => Stage::from_str(other).map(JobStatus::Running),
        }
    }
}

/// Per-pipeline-run record, the WebSocket-visible surface of progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub video_id: String,
    pub status: JobStatus,
    pub current_stage: Option<Stage>,
    pub progress: f64,
    pub message: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// Statistics record returned by a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub files_found: u64,
    pub files_new: u64,
    pub files_changed: u64,
    pub files_unchanged: u64,
    pub files_deleted: u64,
}

/// Current epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
