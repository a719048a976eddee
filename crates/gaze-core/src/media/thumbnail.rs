//! Image thumbnailer with EXIF orientation handling.
//!
//! Two presets: the full thumbnail (1280 px, q85) used as a photo's single
//! frame, and the grid thumbnail (256 px, q50) used for fast grid rendering.

use crate::config::ThumbnailConfig;
use crate::error::{GazeError, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailPreset {
    Full,
    Grid,
}

impl ThumbnailPreset {
    fn max_dim(&self) -> u32 {
        match self {
            ThumbnailPreset::Full => ThumbnailConfig::FULL_MAX_DIM,
            ThumbnailPreset::Grid => ThumbnailConfig::GRID_MAX_DIM,
        }
    }

    fn quality(&self) -> u8 {
        match self {
            ThumbnailPreset::Full => ThumbnailConfig::FULL_QUALITY,
            ThumbnailPreset::Grid => ThumbnailConfig::GRID_QUALITY,
        }
    }
}

/// Read the EXIF orientation tag (1-8), defaulting to 1.
fn exif_orientation(path: &Path) -> u32 {
    let Ok(file) = File::open(path) else {
        return 1;
    };
    let mut reader = BufReader::new(file);
    let Ok(exif) = exif::Reader::new().read_from_container(&mut reader) else {
        return 1;
    };
    exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .unwrap_or(1)
}

/// Apply an EXIF orientation to decoded pixels.
fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Produce an oriented, downscaled JPEG thumbnail at `output`, overwriting,
/// with a quality override (clamped 1-95) or the preset default.
pub fn make_thumbnail(
    input: &Path,
    output: &Path,
    preset: ThumbnailPreset,
    quality_override: Option<u8>,
) -> Result<(u32, u32)> {
    let img = image::open(input).map_err(|e| GazeError::Image {
        message: e.to_string(),
        path: Some(input.to_path_buf()),
    })?;

    let oriented = apply_orientation(img, exif_orientation(input));
    let max_dim = preset.max_dim();
    let scaled = if oriented.width() > max_dim || oriented.height() > max_dim {
        oriented.resize(max_dim, max_dim, FilterType::Lanczos3)
    } else {
        oriented
    };
    let dims = (scaled.width(), scaled.height());

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent).map_err(|e| GazeError::io_with_path(e, parent))?;
    }
    let quality = quality_override
        .map(|q| q.clamp(1, 95))
        .unwrap_or_else(|| preset.quality());
    let mut file = File::create(output).map_err(|e| GazeError::io_with_path(e, output))?;
    let encoder = JpegEncoder::new_with_quality(&mut file, quality);
    scaled
        .to_rgb8()
        .write_with_encoder(encoder)
        .map_err(|e| GazeError::Image {
            message: e.to_string(),
            path: Some(output.to_path_buf()),
        })?;

    Ok(dims)
}

/// Original pixel dimensions of an image file, post-orientation.
pub fn image_dimensions(path: &Path) -> Result<(u32, u32)> {
    let (w, h) = image::image_dimensions(path).map_err(|e| GazeError::Image {
        message: e.to_string(),
        path: Some(path.to_path_buf()),
    })?;
    // Orientations 5-8 swap the axes.
    Ok(if matches!(exif_orientation(path), 5..=8) {
        (h, w)
    } else {
        (w, h)
    })
}
