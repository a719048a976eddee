//! The indexing pipeline: a resumable, cancellable state machine per media
//! item.
//!
//! The scheduler hands each queued item to [`IndexingPipeline::run_primary`],
//! which advances it through its stage list, writing derived rows and
//! artifacts and emitting progress events. Videos on the deep preset get the
//! audio-bearing enhanced stages as a separate run after the item reaches
//! `DONE`, so the UI sees items indexed quickly and transcripts arrive
//! later.

mod scheduler;
mod stages;

pub use scheduler::JobScheduler;

use crate::cancel::CancellationToken;
use crate::catalog::{Catalog, MediaItem, MediaStatus, MediaType, SettingsView, Stage};
use crate::config::IndexingPreset;
use crate::error::{ErrorCode, GazeError, Result};
use crate::events::{EngineEvent, EventBus};
use crate::ml::MlToolkit;
use crate::paths::DataPaths;
use tracing::{info, warn};

/// The ordered stage list for one item. A pure function of media type,
/// preset and the face-recognition gate; the pipeline loop never branches on
/// these inputs anywhere else.
pub fn stages(media_type: MediaType, preset: IndexingPreset, face_enabled: bool) -> Vec<Stage> {
    let mut list = vec![Stage::ExtractingFrames, Stage::Embedding];
    if preset == IndexingPreset::Deep {
        list.push(Stage::Detecting);
        if face_enabled {
            list.push(Stage::DetectingFaces);
        }
    }
    let _ = media_type; // photos and videos share the primary list
    list
}

/// Audio-bearing stages, run after `DONE` for deep-preset videos only.
pub fn enhanced_stages(media_type: MediaType, preset: IndexingPreset) -> Vec<Stage> {
    match (media_type, preset) {
        (MediaType::Video, IndexingPreset::Deep) => {
            vec![Stage::ExtractingAudio, Stage::Transcribing]
        }
        _ => Vec::new(),
    }
}

/// Map a stage failure onto the closed error-code set. The error's own kind
/// wins; the stage decides the fallback.
pub fn map_error_code(stage: Stage, error: &GazeError) -> ErrorCode {
    match error {
        GazeError::FileNotFound(_) => ErrorCode::FileNotFound,
        GazeError::Ffmpeg { .. } | GazeError::Ffprobe { .. } => ErrorCode::FfmpegError,
        GazeError::Transcription { .. } => ErrorCode::TranscriptionError,
        GazeError::Embedding { .. } => ErrorCode::EmbeddingError,
        GazeError::Detection { .. } => ErrorCode::DetectionError,
        GazeError::FaceDetection { .. } => ErrorCode::FaceDetectionError,
        GazeError::Cancelled => ErrorCode::Cancelled,
        _ => match stage {
            Stage::ExtractingAudio | Stage::ExtractingFrames => ErrorCode::FfmpegError,
            Stage::Transcribing => ErrorCode::TranscriptionError,
            Stage::Embedding => ErrorCode::EmbeddingError,
            Stage::Detecting => ErrorCode::DetectionError,
            Stage::DetectingFaces => ErrorCode::FaceDetectionError,
        },
    }
}

/// Terminal outcome of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Done,
    Failed,
    Cancelled,
    /// Transient database contention: the item went back to the queue.
    Requeued,
}

/// Per-item pipeline driver. Cloneable; all fields are shared handles.
#[derive(Clone)]
pub struct IndexingPipeline {
    catalog: Catalog,
    paths: DataPaths,
    toolkit: MlToolkit,
    events: EventBus,
}

impl IndexingPipeline {
    pub fn new(catalog: Catalog, paths: DataPaths, toolkit: MlToolkit, events: EventBus) -> Self {
        Self {
            catalog,
            paths,
            toolkit,
            events,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Run the primary stage list for one item.
    pub async fn run_primary(
        &self,
        media_id: &str,
        cancel: CancellationToken,
    ) -> PipelineOutcome {
        let settings = match self.catalog.settings_view() {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to read settings for {}: {}", media_id, e);
                SettingsView::default()
            }
        };
        let Some(item) = self.load_item(media_id) else {
            return PipelineOutcome::Failed;
        };

        let stage_list = stages(
            item.media_type,
            settings.indexing_preset,
            settings.face_recognition_enabled,
        );
        let start_from = self.resume_index(&item, &stage_list);

        let outcome = self
            .drive(&item, &settings, &stage_list, start_from, &cancel, true)
            .await;

        if outcome == PipelineOutcome::Done {
            info!("Completed indexing for {}", media_id);
        }
        outcome
    }

    /// Run the enhanced (audio) stages for a deep-preset video that already
    /// reached `DONE`. Failures mark the job but never un-finish the item.
    pub async fn run_enhanced(
        &self,
        media_id: &str,
        cancel: CancellationToken,
    ) -> PipelineOutcome {
        let settings = match self.catalog.settings_view() {
            Ok(settings) => settings,
            Err(_) => SettingsView::default(),
        };
        let Some(item) = self.load_item(media_id) else {
            return PipelineOutcome::Failed;
        };
        let stage_list = enhanced_stages(item.media_type, settings.indexing_preset);
        if stage_list.is_empty() {
            return PipelineOutcome::Done;
        }
        self.drive(&item, &settings, &stage_list, 0, &cancel, false)
            .await
    }

    fn load_item(&self, media_id: &str) -> Option<MediaItem> {
        match self.catalog.get_media(media_id) {
            Ok(Some(item)) => Some(item),
            Ok(None) => {
                warn!("Media {} not found; dropping pipeline run", media_id);
                None
            }
            Err(e) => {
                warn!("Failed to load media {}: {}", media_id, e);
                None
            }
        }
    }

    /// Where to resume: after `last_completed_stage` when its artifacts are
    /// still on disk, else from the top. Frames can be missing even when the
    /// catalog says they exist (wipe-derived leaves rows gone but status
    /// fields stale), hence the artifact-existence check.
    fn resume_index(&self, item: &MediaItem, stage_list: &[Stage]) -> usize {
        let Some(last) = item.last_completed_stage else {
            return 0;
        };
        let Some(position) = stage_list.iter().position(|s| *s == last) else {
            return 0;
        };

        if last == Stage::ExtractingFrames {
            let frames = crate::media::ffmpeg::list_frame_files(
                &self.paths.media_thumbnails_dir(&item.media_id),
            )
            .unwrap_or_default();
            if frames.is_empty() {
                info!(
                    "Frames missing on disk for {}; restarting stage list",
                    item.media_id
                );
                return 0;
            }
        }
        position + 1
    }

    /// Advance one item through `stage_list[start_from..]`, owning the job
    /// row and terminal status writes.
    async fn drive(
        &self,
        item: &MediaItem,
        settings: &SettingsView,
        stage_list: &[Stage],
        start_from: usize,
        cancel: &CancellationToken,
        primary: bool,
    ) -> PipelineOutcome {
        let media_id = &item.media_id;
        let job_id = uuid::Uuid::new_v4().to_string();
        if let Err(e) = self.catalog.create_job(&job_id, media_id) {
            warn!("Failed to create job for {}: {}", media_id, e);
            return PipelineOutcome::Failed;
        }

        let total = stage_list.len();

        for (offset, stage) in stage_list.iter().enumerate().skip(start_from) {
            // Cancellation converges from two directions: the task token and
            // a status flip on the media row.
            let row_cancelled = matches!(
                self.catalog.media_status(media_id),
                Ok(Some(MediaStatus::Cancelled))
            );
            if cancel.is_cancelled() || row_cancelled {
                return self.finalize_cancelled(media_id, &job_id, *stage, primary);
            }

            let progress = (offset + 1) as f64 / total as f64;
            if primary {
                if let Err(e) = self
                    .catalog
                    .set_media_status(media_id, MediaStatus::Running(*stage))
                {
                    warn!("Status write failed for {}: {}", media_id, e);
                }
            }
            let _ = self.catalog.set_job_stage(&job_id, *stage, progress);

            match self
                .run_stage(item, settings, *stage, &job_id, cancel)
                .await
            {
                Ok(()) => {}
                Err(GazeError::Cancelled) => {
                    return self.finalize_cancelled(media_id, &job_id, *stage, primary);
                }
                Err(e) if e.is_busy() => {
                    // Cooperative backoff: hand the item back to the queue
                    // instead of failing it.
                    warn!(
                        "Database busy during {} for {}; requeueing",
                        stage, media_id
                    );
                    let _ = self.catalog.requeue_media(media_id);
                    let _ = self
                        .catalog
                        .mark_job_failed(&job_id, "UNKNOWN_ERROR", "Requeued after database contention");
                    return PipelineOutcome::Requeued;
                }
                Err(e) => {
                    return self.finalize_failed(media_id, &job_id, *stage, &e, primary);
                }
            }

            if primary {
                let _ = self.catalog.set_last_completed_stage(media_id, *stage);
                let _ = self.catalog.set_media_progress(media_id, progress);
            }
            let _ = self.catalog.set_job_stage(&job_id, *stage, progress);
            self.events.emit(EngineEvent::JobProgress {
                job_id: job_id.clone(),
                video_id: media_id.clone(),
                stage: stage.as_str().to_string(),
                progress: progress as f32,
                message: None,
            });
        }

        if primary {
            if let Err(e) = self.catalog.mark_media_done(media_id) {
                warn!("Failed to mark {} done: {}", media_id, e);
            }
        }
        let _ = self.catalog.mark_job_done(&job_id);
        self.events.emit(EngineEvent::JobComplete {
            job_id,
            video_id: media_id.clone(),
        });
        PipelineOutcome::Done
    }

    fn finalize_cancelled(
        &self,
        media_id: &str,
        job_id: &str,
        stage: Stage,
        primary: bool,
    ) -> PipelineOutcome {
        info!("Indexing cancelled for {}", media_id);
        if primary {
            let _ = self.catalog.mark_media_cancelled(media_id);
        }
        let _ = self.catalog.mark_job_cancelled(job_id);
        self.events.emit(EngineEvent::JobFailed {
            job_id: job_id.to_string(),
            video_id: media_id.to_string(),
            stage: stage.as_str().to_string(),
            error_code: ErrorCode::Cancelled,
            error_message: ErrorCode::Cancelled.message().to_string(),
        });
        PipelineOutcome::Cancelled
    }

    fn finalize_failed(
        &self,
        media_id: &str,
        job_id: &str,
        stage: Stage,
        error: &GazeError,
        primary: bool,
    ) -> PipelineOutcome {
        let code = map_error_code(stage, error);
        let message = format!("{} Details: {}", code.message(), error);
        warn!("Indexing failed for {} at {}: {}", media_id, stage, error);

        if primary {
            let _ = self
                .catalog
                .mark_media_failed(media_id, code.as_str(), &message);
        }
        let _ = self.catalog.mark_job_failed(job_id, code.as_str(), &message);
        self.events.emit(EngineEvent::JobFailed {
            job_id: job_id.to_string(),
            video_id: media_id.to_string(),
            stage: stage.as_str().to_string(),
            error_code: code,
            error_message: message,
        });
        PipelineOutcome::Failed
    }

    async fn run_stage(
        &self,
        item: &MediaItem,
        settings: &SettingsView,
        stage: Stage,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match stage {
            Stage::ExtractingAudio => self.stage_extract_audio(item).await,
            Stage::Transcribing => {
                self.stage_transcribe(item, settings, job_id, cancel).await
            }
            Stage::ExtractingFrames => self.stage_extract_frames(item, settings).await,
            Stage::Embedding => self.stage_embed(item).await,
            Stage::Detecting => self.stage_detect(item).await,
            Stage::DetectingFaces => self.stage_detect_faces(item).await,
        }
    }

    pub(crate) fn emit_stage_progress(
        &self,
        job_id: &str,
        media_id: &str,
        stage: Stage,
        progress: f32,
        message: String,
    ) {
        self.events.emit(EngineEvent::JobProgress {
            job_id: job_id.to_string(),
            video_id: media_id.to_string(),
            stage: stage.as_str().to_string(),
            progress,
            message: Some(message),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_sets_photo() {
        assert_eq!(
            stages(MediaType::Photo, IndexingPreset::Quick, true),
            vec![Stage::ExtractingFrames, Stage::Embedding]
        );
        assert_eq!(
            stages(MediaType::Photo, IndexingPreset::Deep, true),
            vec![
                Stage::ExtractingFrames,
                Stage::Embedding,
                Stage::Detecting,
                Stage::DetectingFaces
            ]
        );
    }

    #[test]
    fn test_face_gate_skips_face_stage() {
        assert_eq!(
            stages(MediaType::Video, IndexingPreset::Deep, false),
            vec![Stage::ExtractingFrames, Stage::Embedding, Stage::Detecting]
        );
    }

    #[test]
    fn test_enhanced_stages_only_deep_video() {
        assert_eq!(
            enhanced_stages(MediaType::Video, IndexingPreset::Deep),
            vec![Stage::ExtractingAudio, Stage::Transcribing]
        );
        assert!(enhanced_stages(MediaType::Video, IndexingPreset::Quick).is_empty());
        assert!(enhanced_stages(MediaType::Photo, IndexingPreset::Deep).is_empty());
    }

    #[test]
    fn test_error_code_mapping() {
        let err = GazeError::Ffmpeg {
            message: "broken".into(),
        };
        assert_eq!(map_error_code(Stage::ExtractingFrames, &err), ErrorCode::FfmpegError);

        let err = GazeError::FileNotFound("/x".into());
        assert_eq!(map_error_code(Stage::Embedding, &err), ErrorCode::FileNotFound);

        let err = GazeError::Other("mystery".into());
        assert_eq!(
            map_error_code(Stage::Transcribing, &err),
            ErrorCode::TranscriptionError
        );
        assert_eq!(
            map_error_code(Stage::DetectingFaces, &err),
            ErrorCode::FaceDetectionError
        );
    }
}
