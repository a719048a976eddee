//! Error types for the Gaze engine.
//!
//! `GazeError` is the library-wide error enum; `ErrorCode` is the small
//! closed set shared by media rows, job rows and emitted events.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Gaze operations.
#[derive(Debug, Error)]
pub enum GazeError {
    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    /// SQLite reported the database as busy after the retry budget ran out.
    /// The pipeline converts this into a cooperative requeue, never a failure.
    #[error("Database busy after {attempts} attempts")]
    DatabaseBusy { attempts: u32 },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Path is not a directory: {0}")]
    NotADirectory(PathBuf),

    // Media toolchain errors
    #[error("ffmpeg failed: {message}")]
    Ffmpeg { message: String },

    #[error("ffprobe failed for {path}: {message}")]
    Ffprobe { path: PathBuf, message: String },

    // ML executor errors
    #[error("Transcription failed: {message}")]
    Transcription { message: String },

    #[error("Embedding failed: {message}")]
    Embedding { message: String },

    #[error("Object detection failed: {message}")]
    Detection { message: String },

    #[error("Face detection failed: {message}")]
    FaceDetection { message: String },

    #[error("Model not available: {name}")]
    ModelUnavailable { name: String },

    // Network errors
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Download failed for {url}: {message}")]
    DownloadFailed { url: String, message: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Image errors
    #[error("Image error at {path:?}: {message}")]
    Image { message: String, path: Option<PathBuf> },

    // Vector shard errors
    #[error("Vector shard error at {path:?}: {message}")]
    Shard { message: String, path: PathBuf },

    // Scanner / library errors
    #[error("Library not found: {library_id}")]
    LibraryNotFound { library_id: String },

    #[error("Scan already in progress for library {library_id}")]
    AlreadyScanning { library_id: String },

    #[error("Media not found: {media_id}")]
    MediaNotFound { media_id: String },

    #[error("Person not found: {person_id}")]
    PersonNotFound { person_id: String },

    #[error("Face not found: {face_id}")]
    FaceNotFound { face_id: String },

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Gaze operations.
pub type Result<T> = std::result::Result<T, GazeError>;

impl From<std::io::Error> for GazeError {
    fn from(err: std::io::Error) -> Self {
        GazeError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for GazeError {
    fn from(err: serde_json::Error) -> Self {
        GazeError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for GazeError {
    fn from(err: rusqlite::Error) -> Self {
        GazeError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for GazeError {
    fn from(err: reqwest::Error) -> Self {
        GazeError::Network {
            message: err.to_string(),
        }
    }
}

impl GazeError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        GazeError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Whether this error is a transient SQLite busy/locked condition.
    pub fn is_busy(&self) -> bool {
        match self {
            GazeError::DatabaseBusy { .. } => true,
            GazeError::Database {
                source: Some(rusqlite::Error::SqliteFailure(e, _)),
                ..
            } => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Closed error-code set shared by media rows, job rows and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    FileNotFound,
    FfmpegError,
    TranscriptionError,
    EmbeddingError,
    DetectionError,
    FaceDetectionError,
    Cancelled,
    UnknownError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ErrorCode::FfmpegError => "FFMPEG_ERROR",
            ErrorCode::TranscriptionError => "TRANSCRIPTION_ERROR",
            ErrorCode::EmbeddingError => "EMBEDDING_ERROR",
            ErrorCode::DetectionError => "DETECTION_ERROR",
            ErrorCode::FaceDetectionError => "FACE_DETECTION_ERROR",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "FILE_NOT_FOUND" => Some(ErrorCode::FileNotFound),
            "FFMPEG_ERROR" => Some(ErrorCode::FfmpegError),
            "TRANSCRIPTION_ERROR" => Some(ErrorCode::TranscriptionError),
            "EMBEDDING_ERROR" => Some(ErrorCode::EmbeddingError),
            "DETECTION_ERROR" => Some(ErrorCode::DetectionError),
            "FACE_DETECTION_ERROR" => Some(ErrorCode::FaceDetectionError),
            "CANCELLED" => Some(ErrorCode::Cancelled),
            "UNKNOWN_ERROR" => Some(ErrorCode::UnknownError),
            _ => None,
        }
    }

    /// Human-readable message surfaced on media and job rows.
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::FileNotFound => {
                "The media file could not be found. It may have been moved or deleted."
            }
            ErrorCode::FfmpegError => {
                "FFmpeg failed to process the file. It may be corrupted or in an unsupported format."
            }
            ErrorCode::TranscriptionError => {
                "Speech recognition failed. The audio may be corrupted or contain no speech."
            }
            ErrorCode::EmbeddingError => {
                "Visual analysis failed. The frames could not be processed."
            }
            ErrorCode::DetectionError => {
                "Object detection failed. The model may not be loaded correctly."
            }
            ErrorCode::FaceDetectionError => {
                "Face detection failed. The model may not be loaded correctly."
            }
            ErrorCode::Cancelled => "The indexing job was cancelled by user request.",
            ErrorCode::UnknownError => "An unexpected error occurred during processing.",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GazeError::MediaNotFound {
            media_id: "abc".into(),
        };
        assert_eq!(err.to_string(), "Media not found: abc");
    }

    #[test]
    fn test_error_code_round_trip() {
        for code in [
            ErrorCode::FileNotFound,
            ErrorCode::FfmpegError,
            ErrorCode::TranscriptionError,
            ErrorCode::EmbeddingError,
            ErrorCode::DetectionError,
            ErrorCode::FaceDetectionError,
            ErrorCode::Cancelled,
            ErrorCode::UnknownError,
        ] {
            assert_eq!(ErrorCode::from_str(code.as_str()), Some(code));
        }
        assert_eq!(ErrorCode::from_str("NOPE"), None);
    }

    #[test]
    fn test_is_busy() {
        assert!(GazeError::DatabaseBusy { attempts: 5 }.is_busy());
        assert!(!GazeError::Cancelled.is_busy());
    }
}
