//! ML executor interfaces and the model toolkit.
//!
//! Each executor is a trait so the pipeline can run against stubs in tests.
//! Concrete implementations live beside the traits: an ONNX CLIP embedder,
//! an ONNX object detector, a YuNet+SFace face analyzer and a subprocess
//! Whisper transcriber. A missing model never fails an item: the toolkit
//! simply carries `None` for that executor and the stage no-ops with a
//! warning.

pub mod detector;
pub mod embedder;
pub mod face_onnx;
pub mod labels;
pub mod transcribe;

use crate::config::PipelineConfig;
use crate::error::{GazeError, Result};
use crate::paths::DataPaths;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// One object-detector output.
#[derive(Debug, Clone)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    /// Pixel-space (x, y, w, h) in the source image.
    pub bbox: Option<(f32, f32, f32, f32)>,
}

/// One detected face.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    /// Pixel-space (x, y, w, h).
    pub bbox: (f32, f32, f32, f32),
    pub confidence: f32,
    /// 512-D unit-norm embedding.
    pub embedding: Vec<f32>,
    pub age: Option<i64>,
    pub gender: Option<String>,
}

/// One raw transcriber segment, relative to the chunk it came from.
#[derive(Debug, Clone)]
pub struct RawSegment {
    pub start_ms: i64,
    pub end_ms: i64,
    pub text: String,
    pub confidence: Option<f64>,
}

/// Image (and text) embedding in a shared 512-D space.
pub trait ImageEmbedder: Send + Sync {
    fn embed_image(&self, image_path: &Path) -> Result<Vec<f32>>;
    fn embed_text(&self, text: &str) -> Result<Vec<f32>>;
}

/// Object detection over the fixed category set.
pub trait ObjectDetector: Send + Sync {
    fn detect(&self, image_path: &Path, min_confidence: f32) -> Result<Vec<Detection>>;
}

/// Face detection plus recognition embedding.
pub trait FaceAnalyzer: Send + Sync {
    fn detect_faces(
        &self,
        image_path: &Path,
        min_face_side_px: u32,
        det_threshold: f32,
    ) -> Result<Vec<DetectedFace>>;
}

/// Speech-to-text over one WAV chunk.
pub trait Transcriber: Send + Sync {
    fn transcribe(&self, wav_path: &Path, language: Option<&str>) -> Result<Vec<RawSegment>>;
}

/// The loaded executors. Every slot is optional.
#[derive(Clone, Default)]
pub struct MlToolkit {
    pub embedder: Option<Arc<dyn ImageEmbedder>>,
    pub detector: Option<Arc<dyn ObjectDetector>>,
    pub faces: Option<Arc<dyn FaceAnalyzer>>,
    pub transcriber: Option<Arc<dyn Transcriber>>,
}

impl MlToolkit {
    /// Load every executor whose model files are present under the models
    /// directory. Load failures degrade to a warning and an empty slot.
    pub fn load(paths: &DataPaths, transcription_backend: &str) -> Self {
        let models_dir = paths.models_dir();
        let mut toolkit = MlToolkit::default();

        match embedder::ClipEmbedder::load(&models_dir) {
            Ok(Some(embedder)) => {
                info!("CLIP embedder loaded");
                toolkit.embedder = Some(Arc::new(embedder));
            }
            Ok(None) => warn!("CLIP model files missing; visual embedding disabled"),
            Err(e) => warn!("Failed to load CLIP embedder: {e}"),
        }

        match detector::YoloDetector::load(&models_dir) {
            Ok(Some(detector)) => {
                info!("Object detector loaded");
                toolkit.detector = Some(Arc::new(detector));
            }
            Ok(None) => warn!("Detector model missing; object detection disabled"),
            Err(e) => warn!("Failed to load object detector: {e}"),
        }

        match face_onnx::YunetSfaceAnalyzer::load(&models_dir) {
            Ok(Some(analyzer)) => {
                info!("Face analyzer loaded");
                toolkit.faces = Some(Arc::new(analyzer));
            }
            Ok(None) => warn!("Face model files missing; face detection disabled"),
            Err(e) => warn!("Failed to load face analyzer: {e}"),
        }

        match transcribe::WhisperCliTranscriber::load(&models_dir, transcription_backend) {
            Ok(Some(transcriber)) => {
                info!("Transcriber loaded");
                toolkit.transcriber = Some(Arc::new(transcriber));
            }
            Ok(None) => warn!("Whisper backend unavailable; transcription disabled"),
            Err(e) => warn!("Failed to load transcriber: {e}"),
        }

        toolkit
    }
}

// ----------------------------------------------------------------------
// Embedding byte serialization
// ----------------------------------------------------------------------

/// Serialize a 512-D float32 embedding as little-endian bytes.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Deserialize an embedding blob, validating the expected dimension.
pub fn bytes_to_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() != PipelineConfig::EMBEDDING_DIM * 4 {
        return Err(GazeError::Validation {
            field: "embedding".into(),
            message: format!(
                "expected {} bytes, got {}",
                PipelineConfig::EMBEDDING_DIM * 4,
                bytes.len()
            ),
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// L2-normalize in place; zero vectors are left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity of two equal-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_bytes_round_trip() {
        let mut v = vec![0.0f32; PipelineConfig::EMBEDDING_DIM];
        v[0] = 1.5;
        v[511] = -0.25;
        let bytes = embedding_to_bytes(&v);
        assert_eq!(bytes.len(), 2048);
        let back = bytes_to_embedding(&bytes).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_bad_blob_length_rejected() {
        assert!(bytes_to_embedding(&[0u8; 100]).is_err());
    }

    #[test]
    fn test_normalize_unit() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }
}
