//! ONNX CLIP embedder: images and text into one 512-D space.
//!
//! Expects three files under the models directory:
//! `clip_image.onnx`, `clip_text.onnx`, `clip_tokenizer.json`. Each session
//! is guarded by its own mutex so a single inference holds the lock for the
//! whole model call.

use super::{normalize, ImageEmbedder};
use crate::error::{GazeError, Result};
use image::imageops::FilterType;
use ndarray::{Array2, Array4};
use ort::session::Session;
use std::path::Path;
use std::sync::Mutex;
use tokenizers::Tokenizer;

const IMAGE_SIZE: u32 = 224;
const CONTEXT_LENGTH: usize = 77;

/// CLIP channel normalization constants.
const MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

fn ort_err(e: impl std::fmt::Display) -> GazeError {
    GazeError::Embedding {
        message: e.to_string(),
    }
}

pub struct ClipEmbedder {
    image_session: Mutex<Session>,
    image_input: String,
    image_output: String,
    text_session: Mutex<Session>,
    text_inputs: Vec<String>,
    text_output: String,
    tokenizer: Tokenizer,
}

impl ClipEmbedder {
    /// Load the embedder if all model files exist; `Ok(None)` when any is
    /// missing.
    pub fn load(models_dir: &Path) -> Result<Option<Self>> {
        let image_path = models_dir.join("clip_image.onnx");
        let text_path = models_dir.join("clip_text.onnx");
        let tokenizer_path = models_dir.join("clip_tokenizer.json");
        if !image_path.exists() || !text_path.exists() || !tokenizer_path.exists() {
            return Ok(None);
        }

        let image_session = Session::builder()
            .map_err(ort_err)?
            .commit_from_file(&image_path)
            .map_err(ort_err)?;
        let text_session = Session::builder()
            .map_err(ort_err)?
            .commit_from_file(&text_path)
            .map_err(ort_err)?;
        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(ort_err)?;

        let image_input = image_session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| ort_err("image model has no inputs"))?;
        let image_output = image_session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| ort_err("image model has no outputs"))?;
        let text_inputs: Vec<String> =
            text_session.inputs.iter().map(|i| i.name.clone()).collect();
        let text_output = text_session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| ort_err("text model has no outputs"))?;
        if text_inputs.is_empty() {
            return Err(ort_err("text model has no inputs"));
        }

        Ok(Some(Self {
            image_session: Mutex::new(image_session),
            image_input,
            image_output,
            text_session: Mutex::new(text_session),
            text_inputs,
            text_output,
            tokenizer,
        }))
    }

    /// Resize-shortest-side + center-crop + normalize into NCHW.
    fn preprocess(image_path: &Path) -> Result<Array4<f32>> {
        let img = image::open(image_path).map_err(|e| GazeError::Image {
            message: e.to_string(),
            path: Some(image_path.to_path_buf()),
        })?;

        let (w, h) = (img.width(), img.height());
        let scale = IMAGE_SIZE as f32 / w.min(h).max(1) as f32;
        let resized = img.resize_exact(
            ((w as f32 * scale).round() as u32).max(IMAGE_SIZE),
            ((h as f32 * scale).round() as u32).max(IMAGE_SIZE),
            FilterType::Triangle,
        );
        let left = (resized.width() - IMAGE_SIZE) / 2;
        let top = (resized.height() - IMAGE_SIZE) / 2;
        let cropped = resized.crop_imm(left, top, IMAGE_SIZE, IMAGE_SIZE).to_rgb8();

        let size = IMAGE_SIZE as usize;
        let mut input = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in cropped.enumerate_pixels() {
            for channel in 0..3 {
                input[[0, channel, y as usize, x as usize]] =
                    (pixel.0[channel] as f32 / 255.0 - MEAN[channel]) / STD[channel];
            }
        }
        Ok(input)
    }

    /// Token ids padded/truncated to the CLIP context length, plus mask.
    fn tokenize(&self, text: &str) -> Result<(Array2<i64>, Array2<i64>)> {
        let encoding = self.tokenizer.encode(text, true).map_err(ort_err)?;
        let mut ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        ids.truncate(CONTEXT_LENGTH);
        let real_len = ids.len();
        ids.resize(CONTEXT_LENGTH, 0);

        let mut mask = vec![0i64; CONTEXT_LENGTH];
        for m in mask.iter_mut().take(real_len) {
            *m = 1;
        }

        let ids = Array2::from_shape_vec((1, CONTEXT_LENGTH), ids)
            .map_err(ort_err)?;
        let mask = Array2::from_shape_vec((1, CONTEXT_LENGTH), mask)
            .map_err(ort_err)?;
        Ok((ids, mask))
    }
}

impl ImageEmbedder for ClipEmbedder {
    fn embed_image(&self, image_path: &Path) -> Result<Vec<f32>> {
        let input = Self::preprocess(image_path)?;

        let session = self.image_session.lock().map_err(|e| ort_err(e.to_string()))?;
        let session_inputs =
            ort::inputs![self.image_input.as_str() => input.view()].map_err(ort_err)?;
        let outputs = session.run(session_inputs).map_err(ort_err)?;
        let tensor = outputs[self.image_output.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(ort_err)?;

        let mut embedding: Vec<f32> = tensor.iter().copied().collect();
        normalize(&mut embedding);
        Ok(embedding)
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let (ids, mask) = self.tokenize(text)?;

        let session = self.text_session.lock().map_err(|e| ort_err(e.to_string()))?;
        // Text exports may or may not take an attention mask.
        let outputs = if self.text_inputs.len() >= 2 {
            let inputs = ort::inputs![
                self.text_inputs[0].as_str() => ids.view(),
                self.text_inputs[1].as_str() => mask.view(),
            ]
            .map_err(ort_err)?;
            session.run(inputs).map_err(ort_err)?
        } else {
            let inputs =
                ort::inputs![self.text_inputs[0].as_str() => ids.view()].map_err(ort_err)?;
            session.run(inputs).map_err(ort_err)?
        };
        let tensor = outputs[self.text_output.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(ort_err)?;

        let mut embedding: Vec<f32> = tensor.iter().copied().collect();
        normalize(&mut embedding);
        Ok(embedding)
    }
}
