//! ONNX object detector over the fixed category set.
//!
//! Expects `detector.onnx` under the models directory: a YOLO-style export
//! with input `[1, 3, 640, 640]` and output `[1, 4 + classes, anchors]`.

use super::labels::CATEGORIES;
use super::{Detection, ObjectDetector};
use crate::error::{GazeError, Result};
use image::imageops::FilterType;
use ndarray::Array4;
use ort::session::Session;
use std::path::Path;
use std::sync::Mutex;

const INPUT_SIZE: u32 = 640;
const IOU_THRESHOLD: f32 = 0.45;

fn det_err(e: impl std::fmt::Display) -> GazeError {
    GazeError::Detection {
        message: e.to_string(),
    }
}

pub struct YoloDetector {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

/// A decoded candidate box in letterboxed input space.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    class: usize,
    confidence: f32,
    // center-format box
    cx: f32,
    cy: f32,
    w: f32,
    h: f32,
}

impl YoloDetector {
    pub fn load(models_dir: &Path) -> Result<Option<Self>> {
        let model_path = models_dir.join("detector.onnx");
        if !model_path.exists() {
            return Ok(None);
        }
        let session = Session::builder()
            .map_err(det_err)?
            .commit_from_file(&model_path)
            .map_err(det_err)?;
        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| det_err("detector model has no inputs"))?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| det_err("detector model has no outputs"))?;
        Ok(Some(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
        }))
    }
}

/// Decode the raw `[4 + classes, anchors]` prediction block into candidates
/// above the confidence floor.
fn decode_predictions(
    data: &[f32],
    anchors: usize,
    classes: usize,
    min_confidence: f32,
) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let at = |row: usize, anchor: usize| data[row * anchors + anchor];

    for anchor in 0..anchors {
        let mut best_class = 0usize;
        let mut best_score = 0f32;
        for class in 0..classes {
            let score = at(4 + class, anchor);
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }
        if best_score >= min_confidence {
            candidates.push(Candidate {
                class: best_class,
                confidence: best_score,
                cx: at(0, anchor),
                cy: at(1, anchor),
                w: at(2, anchor),
                h: at(3, anchor),
            });
        }
    }
    candidates
}

fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let (ax1, ay1, ax2, ay2) = (a.cx - a.w / 2.0, a.cy - a.h / 2.0, a.cx + a.w / 2.0, a.cy + a.h / 2.0);
    let (bx1, by1, bx2, by2) = (b.cx - b.w / 2.0, b.cy - b.h / 2.0, b.cx + b.w / 2.0, b.cy + b.h / 2.0);
    let ix = (ax2.min(bx2) - ax1.max(bx1)).max(0.0);
    let iy = (ay2.min(by2) - ay1.max(by1)).max(0.0);
    let inter = ix * iy;
    let union = a.w * a.h + b.w * b.h - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Greedy per-class non-maximum suppression.
fn apply_nms(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let overlaps = kept
            .iter()
            .any(|k| k.class == candidate.class && iou(k, &candidate) > IOU_THRESHOLD);
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

impl ObjectDetector for YoloDetector {
    fn detect(&self, image_path: &Path, min_confidence: f32) -> Result<Vec<Detection>> {
        let img = image::open(image_path).map_err(|e| GazeError::Image {
            message: e.to_string(),
            path: Some(image_path.to_path_buf()),
        })?;
        let (orig_w, orig_h) = (img.width() as f32, img.height() as f32);

        let resized = img
            .resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::Nearest)
            .to_rgb8();
        let size = INPUT_SIZE as usize;
        let mut input = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for channel in 0..3 {
                input[[0, channel, y as usize, x as usize]] = pixel.0[channel] as f32 / 255.0;
            }
        }

        let session = self.session.lock().map_err(|e| det_err(e.to_string()))?;
        let inputs = ort::inputs![self.input_name.as_str() => input.view()].map_err(det_err)?;
        let outputs = session.run(inputs).map_err(det_err)?;
        let tensor = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(det_err)?;

        let shape = tensor.shape().to_vec();
        if shape.len() != 3 || shape[1] < 5 {
            return Err(det_err(format!("unexpected detector output shape {shape:?}")));
        }
        let classes = (shape[1] - 4).min(CATEGORIES.len());
        let anchors = shape[2];
        let data: Vec<f32> = tensor.iter().copied().collect();

        let kept = apply_nms(decode_predictions(&data, anchors, classes, min_confidence));

        let scale_x = orig_w / INPUT_SIZE as f32;
        let scale_y = orig_h / INPUT_SIZE as f32;
        Ok(kept
            .into_iter()
            .map(|c| Detection {
                label: CATEGORIES[c.class].to_string(),
                confidence: c.confidence,
                bbox: Some((
                    ((c.cx - c.w / 2.0) * scale_x).max(0.0),
                    ((c.cy - c.h / 2.0) * scale_y).max(0.0),
                    c.w * scale_x,
                    c.h * scale_y,
                )),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_without_model_is_none() {
        let temp = tempfile::TempDir::new().unwrap();
        assert!(YoloDetector::load(temp.path()).unwrap().is_none());
    }

    #[test]
    fn test_decode_predictions_thresholds() {
        // 2 anchors, 2 classes: rows are cx, cy, w, h, class0, class1.
        let anchors = 2;
        #[rustfmt::skip]
        let data = vec![
            10.0, 20.0, // cx
            10.0, 20.0, // cy
            4.0, 4.0,   // w
            4.0, 4.0,   // h
            0.9, 0.1,   // class 0 scores
            0.05, 0.2,  // class 1 scores
        ];
        let candidates = decode_predictions(&data, anchors, 2, 0.25);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].class, 0);
        assert!((candidates[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlap() {
        let a = Candidate { class: 0, confidence: 0.9, cx: 10.0, cy: 10.0, w: 8.0, h: 8.0 };
        let b = Candidate { class: 0, confidence: 0.8, cx: 11.0, cy: 10.0, w: 8.0, h: 8.0 };
        let c = Candidate { class: 0, confidence: 0.7, cx: 50.0, cy: 50.0, w: 8.0, h: 8.0 };
        let kept = apply_nms(vec![a, b, c]);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_different_classes() {
        let a = Candidate { class: 0, confidence: 0.9, cx: 10.0, cy: 10.0, w: 8.0, h: 8.0 };
        let b = Candidate { class: 1, confidence: 0.8, cx: 10.0, cy: 10.0, w: 8.0, h: 8.0 };
        assert_eq!(apply_nms(vec![a, b]).len(), 2);
    }
}
