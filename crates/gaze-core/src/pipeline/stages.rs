//! Per-stage contracts of the indexing pipeline.

use super::IndexingPipeline;
use crate::cancel::CancellationToken;
use crate::catalog::{
    now_ms, AssignmentSource, DetectionRow, FaceRow, Frame, MediaItem, MediaType, SettingsView,
    Stage, TranscriptSegment,
};
use crate::config::PipelineConfig;
use crate::error::{GazeError, Result};
use crate::learning::FaceLearning;
use crate::media::colors::extract_dominant_colors;
use crate::media::ffmpeg;
use crate::media::thumbnail::{make_thumbnail, ThumbnailPreset};
use crate::ml::embedding_to_bytes;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Side of the square face crop written next to each face row.
const FACE_CROP_SIZE: u32 = 160;
/// Padding factor applied around the detector bbox before cropping.
const FACE_CROP_MARGIN: f32 = 0.2;

impl IndexingPipeline {
    // ------------------------------------------------------------------
    // EXTRACTING_AUDIO (video only, enhanced)
    // ------------------------------------------------------------------

    pub(super) async fn stage_extract_audio(&self, item: &MediaItem) -> Result<()> {
        let source = PathBuf::from(&item.path);
        let audio_path = self.paths.audio_path(&item.media_id);

        // A zero-byte WAV is a failed previous extraction; treat as missing.
        if let Ok(meta) = tokio::fs::metadata(&audio_path).await {
            if meta.len() > 0 {
                debug!("Audio already extracted: {}", audio_path.display());
                return Ok(());
            }
            let _ = tokio::fs::remove_file(&audio_path).await;
        }

        if !source.exists() {
            return Err(GazeError::FileNotFound(source));
        }
        ffmpeg::extract_audio(&source, &audio_path, PipelineConfig::AUDIO_SAMPLE_RATE).await?;

        let size = tokio::fs::metadata(&audio_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if size == 0 {
            return Err(GazeError::Ffmpeg {
                message: format!("audio output empty: {}", audio_path.display()),
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // TRANSCRIBING (video only, enhanced)
    // ------------------------------------------------------------------

    pub(super) async fn stage_transcribe(
        &self,
        item: &MediaItem,
        settings: &SettingsView,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let Some(transcriber) = self.toolkit.transcriber.clone() else {
            warn!("No transcriber model; skipping transcription for {}", item.media_id);
            return Ok(());
        };

        let audio_path = self.paths.audio_path(&item.media_id);
        if !audio_path.exists() {
            // One re-extract attempt before failing the stage.
            warn!(
                "Audio missing at transcription start; re-extracting for {}",
                item.media_id
            );
            self.stage_extract_audio(item).await?;
        }

        // Non-silent spans via the silence-detection heuristic; the whole
        // file when detection finds nothing.
        let mut spans = if settings.transcription_vad_enabled {
            ffmpeg::detect_nonsilent_spans(
                &audio_path,
                settings.transcription_min_silence_ms,
                settings.transcription_silence_threshold_db,
            )
            .await?
        } else {
            Vec::new()
        };
        if spans.is_empty() {
            let duration = ffmpeg::wav_duration_seconds(&audio_path).unwrap_or(0.0);
            if duration > 0.0 {
                spans.push((0.0, duration));
            }
        }

        let chunks = ffmpeg::chunk_spans(&spans, settings.transcription_chunk_seconds);
        let total_chunks = chunks.len();
        let language = settings.transcription_language.clone();
        let mut segments: Vec<TranscriptSegment> = Vec::new();

        for (index, (start, end)) in chunks.into_iter().enumerate() {
            cancel.check()?;
            if end - start < PipelineConfig::MIN_CHUNK_SECONDS {
                debug!("Skipping chunk {index}: too short ({:.2}s)", end - start);
                continue;
            }

            // Unique per-chunk temp WAV, cleaned up no matter what.
            let chunk_path = self
                .paths
                .temp_dir()
                .join(format!("{}_chunk_{index:04}.wav", item.media_id));
            let chunk_result = async {
                ffmpeg::cut_segment(&audio_path, &chunk_path, start, end).await?;
                let transcriber = transcriber.clone();
                let chunk_for_task = chunk_path.clone();
                let language_hint = language.clone();
                let raw = tokio::task::spawn_blocking(move || {
                    transcriber.transcribe(&chunk_for_task, language_hint.as_deref())
                })
                .await
                .map_err(|e| GazeError::Transcription {
                    message: format!("transcription task panicked: {e}"),
                })??;
                Ok::<_, GazeError>(raw)
            }
            .await;
            let _ = tokio::fs::remove_file(&chunk_path).await;

            match chunk_result {
                Ok(raw) => {
                    let offset_ms = (start * 1000.0) as i64;
                    for segment in raw {
                        segments.push(TranscriptSegment {
                            video_id: item.media_id.clone(),
                            start_ms: segment.start_ms + offset_ms,
                            end_ms: segment.end_ms + offset_ms,
                            text: segment.text,
                            confidence: segment.confidence,
                        });
                    }
                }
                Err(e) => {
                    // One bad chunk never sinks the whole transcription.
                    warn!(
                        "Chunk {index} ({start:.2}-{end:.2}s) failed for {}: {}",
                        item.media_id, e
                    );
                }
            }

            self.emit_stage_progress(
                job_id,
                &item.media_id,
                Stage::Transcribing,
                (index + 1) as f32 / total_chunks.max(1) as f32,
                format!("Transcribing chunk {}/{}", index + 1, total_chunks),
            );
        }

        self.catalog.replace_transcript(&item.media_id, &segments)?;
        info!(
            "Transcription completed: {} segments for {}",
            segments.len(),
            item.media_id
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // EXTRACTING_FRAMES
    // ------------------------------------------------------------------

    pub(super) async fn stage_extract_frames(
        &self,
        item: &MediaItem,
        settings: &SettingsView,
    ) -> Result<()> {
        let source = PathBuf::from(&item.path);
        if !source.exists() {
            return Err(GazeError::FileNotFound(source));
        }
        let thumbs_dir = self.paths.media_thumbnails_dir(&item.media_id);
        tokio::fs::create_dir_all(&thumbs_dir)
            .await
            .map_err(|e| GazeError::io_with_path(e, &thumbs_dir))?;

        let interval = settings.frame_interval_seconds;
        let frame_paths = match item.media_type {
            MediaType::Photo => {
                let frame_path = thumbs_dir.join("frame_000001.jpg");
                let quality = settings.thumbnail_quality;
                let source_for_task = source.clone();
                let frame_for_task = frame_path.clone();
                tokio::task::spawn_blocking(move || {
                    make_thumbnail(
                        &source_for_task,
                        &frame_for_task,
                        ThumbnailPreset::Full,
                        Some(quality),
                    )
                })
                .await
                .map_err(|e| GazeError::Other(format!("thumbnail task panicked: {e}")))??;
                vec![frame_path]
            }
            MediaType::Video => {
                let existing = ffmpeg::list_frame_files(&thumbs_dir)?;
                if existing.is_empty() {
                    ffmpeg::extract_frames(&source, &thumbs_dir, interval).await?
                } else {
                    existing
                }
            }
        };
        if frame_paths.is_empty() {
            return Err(GazeError::Ffmpeg {
                message: format!("no frames produced for {}", item.media_id),
            });
        }

        // One grid thumbnail per item, derived from the first frame; never
        // counted as a frame.
        let first = frame_paths[0].clone();
        let grid_path = grid_path_for(&first);
        let grid_source = first.clone();
        tokio::task::spawn_blocking(move || {
            make_thumbnail(&grid_source, &grid_path, ThumbnailPreset::Grid, None)
        })
        .await
        .map_err(|e| GazeError::Other(format!("grid thumbnail task panicked: {e}")))??;

        // Frame rows with dominant colors. A failed color extraction writes
        // a null-colors row.
        let mut frames = Vec::with_capacity(frame_paths.len());
        for (index, frame_path) in frame_paths.iter().enumerate() {
            let path_for_task = frame_path.clone();
            let colors = tokio::task::spawn_blocking(move || {
                extract_dominant_colors(&path_for_task, 5)
            })
            .await
            .ok()
            .and_then(|r| r.ok())
            .filter(|list| !list.is_empty())
            .map(|list| list.join(","));
            let timestamp_ms = match item.media_type {
                MediaType::Photo => 0,
                MediaType::Video => (index as f64 * interval * 1000.0) as i64,
            };
            frames.push(Frame {
                frame_id: Frame::frame_id_for(&item.media_id, index),
                video_id: item.media_id.clone(),
                frame_index: index as i64,
                timestamp_ms,
                thumbnail_path: frame_path.to_string_lossy().to_string(),
                colors,
            });
        }
        self.catalog.replace_frames(&item.media_id, &frames)?;
        info!(
            "Frame extraction completed: {} frames for {}",
            frames.len(),
            item.media_id
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // EMBEDDING
    // ------------------------------------------------------------------

    pub(super) async fn stage_embed(&self, item: &MediaItem) -> Result<()> {
        let Some(embedder) = self.toolkit.embedder.clone() else {
            warn!("No embedder model; skipping embeddings for {}", item.media_id);
            return Ok(());
        };

        let thumbs_dir = self.paths.media_thumbnails_dir(&item.media_id);
        let frame_paths = ffmpeg::list_frame_files(&thumbs_dir)?;
        if frame_paths.is_empty() {
            return Err(GazeError::FileNotFound(thumbs_dir));
        }

        let shard_path = self.paths.shard_path(&item.media_id);
        let vectors = tokio::task::spawn_blocking(move || {
            let mut vectors = Vec::with_capacity(frame_paths.len());
            for frame_path in &frame_paths {
                vectors.push(embedder.embed_image(frame_path)?);
            }
            Ok::<_, GazeError>(vectors)
        })
        .await
        .map_err(|e| GazeError::Embedding {
            message: format!("embedding task panicked: {e}"),
        })??;

        crate::search::shards::write_shard(&shard_path, &vectors)?;
        info!(
            "Embedding completed: {} vectors for {}",
            vectors.len(),
            item.media_id
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // DETECTING
    // ------------------------------------------------------------------

    pub(super) async fn stage_detect(&self, item: &MediaItem) -> Result<()> {
        let Some(detector) = self.toolkit.detector.clone() else {
            warn!("No detector model; skipping object detection for {}", item.media_id);
            return Ok(());
        };

        let frames = self.catalog.list_frames(&item.media_id)?;
        if frames.is_empty() {
            return Err(GazeError::FileNotFound(
                self.paths.media_thumbnails_dir(&item.media_id),
            ));
        }

        let media_id = item.media_id.clone();
        let rows = tokio::task::spawn_blocking(move || {
            let mut rows: Vec<DetectionRow> = Vec::new();
            for frame in &frames {
                let detections = detector.detect(
                    Path::new(&frame.thumbnail_path),
                    PipelineConfig::DETECTION_MIN_CONFIDENCE,
                )?;
                for det in detections {
                    rows.push(DetectionRow {
                        video_id: media_id.clone(),
                        frame_id: frame.frame_id.clone(),
                        timestamp_ms: frame.timestamp_ms,
                        label: det.label,
                        confidence: det.confidence as f64,
                        bbox_x: det.bbox.map(|b| b.0 as f64),
                        bbox_y: det.bbox.map(|b| b.1 as f64),
                        bbox_w: det.bbox.map(|b| b.2 as f64),
                        bbox_h: det.bbox.map(|b| b.3 as f64),
                    });
                }
            }
            Ok::<_, GazeError>(rows)
        })
        .await
        .map_err(|e| GazeError::Detection {
            message: format!("detection task panicked: {e}"),
        })??;

        let count = rows.len();
        self.catalog.replace_detections(&item.media_id, &rows)?;
        info!("Object detection completed: {} detections for {}", count, item.media_id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // DETECTING_FACES
    // ------------------------------------------------------------------

    pub(super) async fn stage_detect_faces(&self, item: &MediaItem) -> Result<()> {
        let Some(analyzer) = self.toolkit.faces.clone() else {
            warn!("No face model; skipping face detection for {}", item.media_id);
            return Ok(());
        };

        let frames = self.catalog.list_frames(&item.media_id)?;
        if frames.is_empty() {
            return Err(GazeError::FileNotFound(
                self.paths.media_thumbnails_dir(&item.media_id),
            ));
        }

        let learning = FaceLearning::load(&self.catalog)?;
        debug!(
            "Loaded {} known persons for auto-recognition",
            learning.known_person_count()
        );

        let faces_dir = self.paths.media_faces_dir(&item.media_id);
        tokio::fs::create_dir_all(&faces_dir)
            .await
            .map_err(|e| GazeError::io_with_path(e, &faces_dir))?;

        let media_id = item.media_id.clone();
        let created_at = now_ms();
        let rows = tokio::task::spawn_blocking(move || {
            let mut rows: Vec<FaceRow> = Vec::new();
            let mut auto_recognized = 0usize;

            for (frame_index, frame) in frames.iter().enumerate() {
                let frame_path = Path::new(&frame.thumbnail_path);
                let detected = analyzer.detect_faces(
                    frame_path,
                    PipelineConfig::FACE_MIN_SIDE_PX,
                    PipelineConfig::FACE_DET_THRESHOLD,
                )?;

                for (face_index, face) in detected.into_iter().enumerate() {
                    let face_id = FaceRow::face_id_for(&media_id, frame_index, face_index);
                    let crop_path = faces_dir.join(format!("{face_id}.jpg"));
                    if let Err(e) = save_face_crop(frame_path, face.bbox, &crop_path) {
                        warn!("Failed to save face crop {}: {}", crop_path.display(), e);
                    }

                    let matched = learning.recognize(&face.embedding);
                    if matched.is_some() {
                        auto_recognized += 1;
                    }

                    rows.push(FaceRow {
                        face_id,
                        video_id: media_id.clone(),
                        frame_id: frame.frame_id.clone(),
                        timestamp_ms: frame.timestamp_ms,
                        bbox_x: face.bbox.0 as f64,
                        bbox_y: face.bbox.1 as f64,
                        bbox_w: face.bbox.2 as f64,
                        bbox_h: face.bbox.3 as f64,
                        confidence: face.confidence as f64,
                        embedding: embedding_to_bytes(&face.embedding),
                        crop_path: Some(crop_path.to_string_lossy().to_string()),
                        age: face.age,
                        gender: face.gender,
                        person_id: matched.as_ref().map(|m| m.person_id.clone()),
                        cluster_id: None,
                        assignment_source: matched.as_ref().map(|_| AssignmentSource::Auto),
                        assignment_confidence: matched.as_ref().map(|m| m.confidence as f64),
                        assigned_at_ms: matched.as_ref().map(|_| created_at),
                        created_at_ms: created_at,
                    });
                }
            }
            Ok::<_, GazeError>((rows, auto_recognized))
        })
        .await
        .map_err(|e| GazeError::FaceDetection {
            message: format!("face detection task panicked: {e}"),
        })?;
        let (rows, auto_recognized) = rows?;

        let count = rows.len();
        self.catalog.replace_faces(&item.media_id, &rows)?;
        info!(
            "Face detection completed: {} faces for {} ({} auto-recognized)",
            count, item.media_id, auto_recognized
        );
        Ok(())
    }
}

/// `frame_NNNNNN.jpg` → `frame_NNNNNN_grid.jpg` next to it.
fn grid_path_for(frame_path: &Path) -> PathBuf {
    let stem = frame_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "frame".to_string());
    frame_path.with_file_name(format!("{stem}_grid.jpg"))
}

/// Save a padded, square-resized crop for one face.
fn save_face_crop(frame_path: &Path, bbox: (f32, f32, f32, f32), crop_path: &Path) -> Result<()> {
    let img = image::open(frame_path).map_err(|e| GazeError::Image {
        message: e.to_string(),
        path: Some(frame_path.to_path_buf()),
    })?;

    let (x, y, w, h) = bbox;
    let margin = w.max(h) * FACE_CROP_MARGIN;
    let side = w.max(h) + 2.0 * margin;
    let cx = x + w / 2.0;
    let cy = y + h / 2.0;

    let left = (cx - side / 2.0).max(0.0) as u32;
    let top = (cy - side / 2.0).max(0.0) as u32;
    let side_px = (side as u32)
        .min(img.width().saturating_sub(left))
        .min(img.height().saturating_sub(top))
        .max(1);

    let crop = img
        .crop_imm(left, top, side_px, side_px)
        .resize_exact(FACE_CROP_SIZE, FACE_CROP_SIZE, image::imageops::FilterType::Triangle);
    crop.to_rgb8()
        .save(crop_path)
        .map_err(|e| GazeError::Image {
            message: e.to_string(),
            path: Some(crop_path.to_path_buf()),
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_path_for() {
        assert_eq!(
            grid_path_for(Path::new("/t/m1/frame_000001.jpg")),
            PathBuf::from("/t/m1/frame_000001_grid.jpg")
        );
    }

    #[test]
    fn test_save_face_crop_square() {
        let temp = tempfile::TempDir::new().unwrap();
        let frame = temp.path().join("frame.png");
        image::RgbImage::from_pixel(320, 240, image::Rgb([10, 200, 30]))
            .save(&frame)
            .unwrap();

        let crop = temp.path().join("face.jpg");
        save_face_crop(&frame, (100.0, 80.0, 40.0, 50.0), &crop).unwrap();

        let (w, h) = image::image_dimensions(&crop).unwrap();
        assert_eq!((w, h), (FACE_CROP_SIZE, FACE_CROP_SIZE));
    }

    #[test]
    fn test_save_face_crop_at_edge() {
        let temp = tempfile::TempDir::new().unwrap();
        let frame = temp.path().join("frame.png");
        image::RgbImage::from_pixel(100, 100, image::Rgb([1, 2, 3]))
            .save(&frame)
            .unwrap();

        let crop = temp.path().join("face.jpg");
        // Box hanging off the bottom-right corner still crops.
        save_face_crop(&frame, (90.0, 90.0, 30.0, 30.0), &crop).unwrap();
        assert!(crop.exists());
    }
}
