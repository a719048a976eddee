//! ONNX face analyzer: YuNet-style detection plus an ArcFace-style 512-D
//! recognition embedding.
//!
//! Expects `face_detector.onnx` (YuNet export: cls/obj/bbox/kps outputs at
//! strides 8/16/32, BGR 0-255 input) and `face_recognizer.onnx` (112×112
//! aligned crop → 512-D embedding) under the models directory.

use super::{normalize, DetectedFace, FaceAnalyzer};
use crate::config::PipelineConfig;
use crate::error::{GazeError, Result};
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use ort::session::Session;
use std::path::Path;
use std::sync::Mutex;

const DET_INPUT_SIZE: u32 = 640;
const REC_INPUT_SIZE: u32 = 112;
const STRIDES: [usize; 3] = [8, 16, 32];
const NMS_IOU: f32 = 0.45;
/// Padding added around the detector box before the recognition crop.
const CROP_MARGIN: f32 = 0.2;

fn face_err(e: impl std::fmt::Display) -> GazeError {
    GazeError::FaceDetection {
        message: e.to_string(),
    }
}

pub struct YunetSfaceAnalyzer {
    detector: Mutex<Session>,
    det_input: String,
    recognizer: Mutex<Session>,
    rec_input: String,
    rec_output: String,
}

#[derive(Debug, Clone, Copy)]
struct RawFace {
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    score: f32,
}

fn iou(a: &RawFace, b: &RawFace) -> f32 {
    let ix = ((a.x + a.w).min(b.x + b.w) - a.x.max(b.x)).max(0.0);
    let iy = ((a.y + a.h).min(b.y + b.h) - a.y.max(b.y)).max(0.0);
    let inter = ix * iy;
    let union = a.w * a.h + b.w * b.h - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

fn nms(mut faces: Vec<RawFace>) -> Vec<RawFace> {
    faces.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<RawFace> = Vec::new();
    for face in faces {
        if !kept.iter().any(|k| iou(k, &face) > NMS_IOU) {
            kept.push(face);
        }
    }
    kept
}

impl YunetSfaceAnalyzer {
    pub fn load(models_dir: &Path) -> Result<Option<Self>> {
        let det_path = models_dir.join("face_detector.onnx");
        let rec_path = models_dir.join("face_recognizer.onnx");
        if !det_path.exists() || !rec_path.exists() {
            return Ok(None);
        }

        let detector = Session::builder()
            .map_err(face_err)?
            .commit_from_file(&det_path)
            .map_err(face_err)?;
        let recognizer = Session::builder()
            .map_err(face_err)?
            .commit_from_file(&rec_path)
            .map_err(face_err)?;

        let det_input = detector
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| face_err("face detector has no inputs"))?;
        let rec_input = recognizer
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| face_err("face recognizer has no inputs"))?;
        let rec_output = recognizer
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| face_err("face recognizer has no outputs"))?;

        Ok(Some(Self {
            detector: Mutex::new(detector),
            det_input,
            recognizer: Mutex::new(recognizer),
            rec_input,
            rec_output,
        }))
    }

    /// BGR 0-255 NCHW tensor, as OpenCV's blobFromImage produces.
    fn bgr_tensor(img: &DynamicImage, size: u32) -> Array4<f32> {
        let resized = img
            .resize_exact(size, size, FilterType::Triangle)
            .to_rgb8();
        let s = size as usize;
        let mut input = Array4::<f32>::zeros((1, 3, s, s));
        for (x, y, pixel) in resized.enumerate_pixels() {
            // channel order B, G, R
            input[[0, 0, y as usize, x as usize]] = pixel.0[2] as f32;
            input[[0, 1, y as usize, x as usize]] = pixel.0[1] as f32;
            input[[0, 2, y as usize, x as usize]] = pixel.0[0] as f32;
        }
        input
    }

    /// Decode one stride level's (cls, obj, bbox) tensors, flattened
    /// row-major, into raw boxes in detector input space. Scores are
    /// cls × obj, both already sigmoid-activated.
    fn decode_stride(
        cls: &[f32],
        obj: &[f32],
        bbox: &[f32],
        stride: usize,
        det_threshold: f32,
    ) -> Vec<RawFace> {
        let input_w = DET_INPUT_SIZE as f32;
        let feat_w = (DET_INPUT_SIZE as usize) / stride;
        let stride_f = stride as f32;
        let count = cls.len().min(obj.len());
        let mut faces = Vec::new();

        for i in 0..count {
            let score = cls[i] * obj[i];
            if score < det_threshold {
                continue;
            }
            if bbox.len() < (i + 1) * 4 {
                break;
            }
            let row = i / feat_w;
            let col = i % feat_w;
            let anchor_cx = (col as f32 + 0.5) * stride_f;
            let anchor_cy = (row as f32 + 0.5) * stride_f;

            let cx = anchor_cx + bbox[i * 4] * stride_f;
            let cy = anchor_cy + bbox[i * 4 + 1] * stride_f;
            let w = bbox[i * 4 + 2] * stride_f;
            let h = bbox[i * 4 + 3] * stride_f;

            faces.push(RawFace {
                x: (cx - w / 2.0).clamp(0.0, input_w),
                y: (cy - h / 2.0).clamp(0.0, input_w),
                w,
                h,
                score,
            });
        }
        faces
    }

    /// ArcFace-standard preprocessing: (x − 127.5) / 127.5, RGB NCHW.
    fn embed_crop(&self, crop: &DynamicImage) -> Result<Vec<f32>> {
        let resized = crop
            .resize_exact(REC_INPUT_SIZE, REC_INPUT_SIZE, FilterType::Triangle)
            .to_rgb8();
        let s = REC_INPUT_SIZE as usize;
        let mut input = Array4::<f32>::zeros((1, 3, s, s));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for channel in 0..3 {
                input[[0, channel, y as usize, x as usize]] =
                    (pixel.0[channel] as f32 - 127.5) / 127.5;
            }
        }

        let session = self.recognizer.lock().map_err(|e| face_err(e.to_string()))?;
        let inputs = ort::inputs![self.rec_input.as_str() => input.view()].map_err(face_err)?;
        let outputs = session.run(inputs).map_err(face_err)?;
        let tensor = outputs[self.rec_output.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(face_err)?;

        let mut embedding: Vec<f32> = tensor.iter().copied().collect();
        if embedding.len() != PipelineConfig::EMBEDDING_DIM {
            return Err(face_err(format!(
                "recognizer produced {} dims, expected {}",
                embedding.len(),
                PipelineConfig::EMBEDDING_DIM
            )));
        }
        normalize(&mut embedding);
        Ok(embedding)
    }
}

impl FaceAnalyzer for YunetSfaceAnalyzer {
    fn detect_faces(
        &self,
        image_path: &Path,
        min_face_side_px: u32,
        det_threshold: f32,
    ) -> Result<Vec<DetectedFace>> {
        let img = image::open(image_path).map_err(|e| GazeError::Image {
            message: e.to_string(),
            path: Some(image_path.to_path_buf()),
        })?;
        let (orig_w, orig_h) = (img.width() as f32, img.height() as f32);

        let input = Self::bgr_tensor(&img, DET_INPUT_SIZE);
        let raw = {
            let session = self.detector.lock().map_err(|e| face_err(e.to_string()))?;
            let inputs =
                ort::inputs![self.det_input.as_str() => input.view()].map_err(face_err)?;
            let outputs = session.run(inputs).map_err(face_err)?;

            let mut faces = Vec::new();
            for stride in STRIDES {
                let cls: Vec<f32> = outputs[format!("cls_{stride}").as_str()]
                    .try_extract_tensor::<f32>()
                    .map_err(face_err)?
                    .iter()
                    .copied()
                    .collect();
                let obj: Vec<f32> = outputs[format!("obj_{stride}").as_str()]
                    .try_extract_tensor::<f32>()
                    .map_err(face_err)?
                    .iter()
                    .copied()
                    .collect();
                let bbox: Vec<f32> = outputs[format!("bbox_{stride}").as_str()]
                    .try_extract_tensor::<f32>()
                    .map_err(face_err)?
                    .iter()
                    .copied()
                    .collect();
                faces.extend(Self::decode_stride(&cls, &obj, &bbox, stride, det_threshold));
            }
            nms(faces)
        };

        let scale_x = orig_w / DET_INPUT_SIZE as f32;
        let scale_y = orig_h / DET_INPUT_SIZE as f32;

        let mut results = Vec::new();
        for face in raw {
            let x = face.x * scale_x;
            let y = face.y * scale_y;
            let w = face.w * scale_x;
            let h = face.h * scale_y;
            if (w as u32) < min_face_side_px || (h as u32) < min_face_side_px {
                continue;
            }

            // Pad the crop before recognition.
            let margin_x = w * CROP_MARGIN;
            let margin_y = h * CROP_MARGIN;
            let cx = (x - margin_x).max(0.0) as u32;
            let cy = (y - margin_y).max(0.0) as u32;
            let cw = ((w + 2.0 * margin_x) as u32).min(img.width().saturating_sub(cx)).max(1);
            let ch = ((h + 2.0 * margin_y) as u32).min(img.height().saturating_sub(cy)).max(1);
            let crop = img.crop_imm(cx, cy, cw, ch);

            let embedding = self.embed_crop(&crop)?;
            results.push(DetectedFace {
                bbox: (x, y, w, h),
                confidence: face.score,
                embedding,
                age: None,
                gender: None,
            });
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_without_models_is_none() {
        let temp = tempfile::TempDir::new().unwrap();
        assert!(YunetSfaceAnalyzer::load(temp.path()).unwrap().is_none());
    }

    #[test]
    fn test_nms_overlapping_faces() {
        let a = RawFace { x: 0.0, y: 0.0, w: 10.0, h: 10.0, score: 0.9 };
        let b = RawFace { x: 1.0, y: 1.0, w: 10.0, h: 10.0, score: 0.8 };
        let c = RawFace { x: 100.0, y: 100.0, w: 10.0, h: 10.0, score: 0.7 };
        let kept = nms(vec![a, b, c]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_decode_stride_anchors() {
        // One confident anchor at grid (0, 1) on stride 8: center (12, 4).
        let mut cls = vec![0.0f32; 4];
        let mut obj = vec![0.0f32; 4];
        let mut bbox = vec![0.0f32; 16];
        cls[1] = 0.9;
        obj[1] = 0.9;
        bbox[4..8].copy_from_slice(&[0.0, 0.0, 2.0, 2.0]); // 16x16 box

        let faces = YunetSfaceAnalyzer::decode_stride(&cls, &obj, &bbox, 8, 0.5);
        assert_eq!(faces.len(), 1);
        assert!((faces[0].w - 16.0).abs() < 1e-4);
        assert!((faces[0].x - 4.0).abs() < 1e-4); // cx 12 - w/2
    }

    #[test]
    fn test_decode_stride_threshold() {
        let cls = vec![0.6f32];
        let obj = vec![0.6f32];
        let bbox = vec![0.0f32; 4];
        // score = 0.36 < 0.5
        assert!(YunetSfaceAnalyzer::decode_stride(&cls, &obj, &bbox, 8, 0.5).is_empty());
    }

    #[test]
    fn test_bgr_tensor_channel_swap() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            4,
            4,
            image::Rgb([255, 0, 0]),
        ));
        let tensor = YunetSfaceAnalyzer::bgr_tensor(&img, 4);
        // Red pixel: B channel 0, R channel 255.
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        assert_eq!(tensor[[0, 2, 0, 0]], 255.0);
    }
}
