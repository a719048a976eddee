//! Engine event bus.
//!
//! Scans, the pipeline, and model downloads publish typed events onto a
//! broadcast channel; the WebSocket layer subscribes and serializes them
//! into wire frames. Events for a given job are emitted in-order by the
//! single pipeline task that owns it.

use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Buffered events per subscriber before lagging drops old ones.
const CHANNEL_CAPACITY: usize = 256;

/// Engine-wide event, serialized as `{"type": ..., ...fields}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    ScanProgress {
        library_id: String,
        files_found: u64,
        files_new: u64,
        files_changed: u64,
        files_deleted: u64,
    },
    ScanComplete {
        library_id: String,
        files_found: u64,
        files_new: u64,
        files_changed: u64,
        files_unchanged: u64,
        files_deleted: u64,
    },
    JobProgress {
        job_id: String,
        video_id: String,
        stage: String,
        progress: f32,
        message: Option<String>,
    },
    JobComplete {
        job_id: String,
        video_id: String,
    },
    JobFailed {
        job_id: String,
        video_id: String,
        stage: String,
        error_code: ErrorCode,
        error_message: String,
    },
    ModelDownloadProgress {
        name: String,
        downloaded_bytes: u64,
        total_bytes: Option<u64>,
    },
    ModelDownloadComplete {
        name: String,
    },
    ModelDownloadError {
        name: String,
        message: String,
    },
}

/// Clonable handle onto the engine event stream.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Dropped silently when nobody is listening.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(EngineEvent::JobComplete {
            job_id: "j1".into(),
            video_id: "v1".into(),
        });

        match rx.recv().await.unwrap() {
            EngineEvent::JobComplete { job_id, video_id } => {
                assert_eq!(job_id, "j1");
                assert_eq!(video_id, "v1");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_ok() {
        let bus = EventBus::new();
        bus.emit(EngineEvent::ScanComplete {
            library_id: "lib".into(),
            files_found: 0,
            files_new: 0,
            files_changed: 0,
            files_unchanged: 0,
            files_deleted: 0,
        });
    }

    #[test]
    fn test_wire_shape() {
        let event = EngineEvent::JobFailed {
            job_id: "j".into(),
            video_id: "v".into(),
            stage: "EMBEDDING".into(),
            error_code: ErrorCode::EmbeddingError,
            error_message: "boom".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "job_failed");
        assert_eq!(json["error_code"], "EMBEDDING_ERROR");
    }
}
