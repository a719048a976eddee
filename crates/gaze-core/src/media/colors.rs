//! Dominant-color extraction and the closed color palette.
//!
//! The palette is a fixed 11-name set. Low-saturation pixels are bucketed by
//! value into black/gray/white; everything else maps through a piecewise hue
//! table (OpenCV-style 0-180 hue scale). Per frame, up to five dominant
//! colors come from a small k-means over downscaled pixels, with a histogram
//! fallback when clustering is not worthwhile.

use crate::error::Result;
use image::imageops::FilterType;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Canonical color names, hue-based first.
const HUE_COLORS: &[(&str, &[(u16, u16)])] = &[
    ("red", &[(0, 10), (170, 180)]), // red wraps around
    ("orange", &[(10, 25)]),
    ("yellow", &[(25, 35)]),
    ("green", &[(35, 85)]),
    ("cyan", &[(85, 100)]),
    ("blue", &[(100, 130)]),
    ("purple", &[(130, 150)]),
    ("pink", &[(150, 170)]),
];

/// Minimum saturation to count as a color rather than grayscale.
const MIN_SATURATION: u8 = 30;

/// Search aliases per canonical color.
const COLOR_ALIASES: &[(&str, &[&str])] = &[
    ("red", &["red", "scarlet", "crimson", "maroon"]),
    ("orange", &["orange", "tangerine"]),
    ("yellow", &["yellow", "gold", "golden"]),
    ("green", &["green", "lime", "olive", "teal"]),
    ("cyan", &["cyan", "aqua", "turquoise"]),
    ("blue", &["blue", "navy", "azure", "cobalt"]),
    ("purple", &["purple", "violet", "magenta", "lavender"]),
    ("pink", &["pink", "rose", "salmon"]),
    ("black", &["black", "dark"]),
    ("gray", &["gray", "grey", "silver"]),
    ("white", &["white", "cream", "ivory"]),
];

/// Downscale bound before clustering.
const CLUSTER_MAX_DIM: u32 = 150;
const KMEANS_ITERATIONS: usize = 8;

/// Map a color word (canonical or alias) to its canonical name.
pub fn canonical_color(word: &str) -> Option<&'static str> {
    let needle = word.trim().to_lowercase();
    for (canonical, aliases) in COLOR_ALIASES {
        if aliases.contains(&needle.as_str()) {
            return Some(canonical);
        }
    }
    None
}

/// Scan a free-text query for the first color word.
pub fn extract_color_from_query(query: &str) -> Option<&'static str> {
    query.to_lowercase().split_whitespace().find_map(canonical_color)
}

/// RGB → HSV in OpenCV ranges (H 0-180, S 0-255, V 0-255).
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (u16, u8, u8) {
    let rf = r as f32 / 255.0;
    let gf = g as f32 / 255.0;
    let bf = b as f32 / 255.0;
    let max_c = rf.max(gf).max(bf);
    let min_c = rf.min(gf).min(bf);
    let diff = max_c - min_c;

    let h = if diff == 0.0 {
        0.0
    } else if max_c == rf {
        (60.0 * ((gf - bf) / diff) + 360.0) % 360.0
    } else if max_c == gf {
        (60.0 * ((bf - rf) / diff) + 120.0) % 360.0
    } else {
        (60.0 * ((rf - gf) / diff) + 240.0) % 360.0
    };

    let s = if max_c == 0.0 { 0.0 } else { diff / max_c };

    ((h / 2.0) as u16, (s * 255.0) as u8, (max_c * 255.0) as u8)
}

/// Classify HSV into a palette name.
pub fn classify_color(h: u16, s: u8, v: u8) -> &'static str {
    if s < MIN_SATURATION {
        return if v < 50 {
            "black"
        } else if v < 180 {
            "gray"
        } else {
            "white"
        };
    }
    for (name, ranges) in HUE_COLORS {
        for (lo, hi) in *ranges {
            if h >= *lo && h <= *hi {
                return name;
            }
        }
    }
    "gray"
}

/// Extract up to `num_colors` dominant palette names from an image.
///
/// A missing file or decode failure yields an empty list; color extraction
/// is never allowed to fail an indexing stage.
pub fn extract_dominant_colors(image_path: &Path, num_colors: usize) -> Result<Vec<String>> {
    if !image_path.exists() {
        return Ok(Vec::new());
    }

    let img = match image::open(image_path) {
        Ok(img) => img,
        Err(e) => {
            warn!("Failed to decode {} for colors: {}", image_path.display(), e);
            return Ok(Vec::new());
        }
    };

    let img = img.resize(CLUSTER_MAX_DIM, CLUSTER_MAX_DIM, FilterType::Triangle);
    let rgb = img.to_rgb8();
    let pixels: Vec<[f32; 3]> = rgb
        .pixels()
        .map(|p| [p.0[0] as f32, p.0[1] as f32, p.0[2] as f32])
        .collect();

    if pixels.len() < 2 {
        return Ok(Vec::new());
    }

    let k = (num_colors + 2).min(pixels.len());
    let clusters = kmeans(&pixels, k);

    let mut colors: Vec<String> = Vec::new();
    for (center, _count) in clusters {
        if colors.len() >= num_colors {
            break;
        }
        let (h, s, v) = rgb_to_hsv(center[0] as u8, center[1] as u8, center[2] as u8);
        let name = classify_color(h, s, v);
        if !colors.iter().any(|c| c == name) {
            colors.push(name.to_string());
        }
    }
    Ok(colors)
}

/// Histogram fallback: classify every pixel and rank palette names directly.
pub fn extract_colors_histogram(image_path: &Path, num_colors: usize) -> Result<Vec<String>> {
    let img = match image::open(image_path) {
        Ok(img) => img,
        Err(_) => return Ok(Vec::new()),
    };
    let img = img.resize(100, 100, FilterType::Triangle);
    let rgb = img.to_rgb8();

    let mut counts: HashMap<&'static str, usize> = HashMap::new();
    for p in rgb.pixels() {
        let (h, s, v) = rgb_to_hsv(p.0[0], p.0[1], p.0[2]);
        *counts.entry(classify_color(h, s, v)).or_insert(0) += 1;
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(ranked
        .into_iter()
        .take(num_colors)
        .map(|(name, _)| name.to_string())
        .collect())
}

/// Fixed-seed k-means over RGB pixels; returns (center, count) sorted by
/// cluster size descending.
fn kmeans(pixels: &[[f32; 3]], k: usize) -> Vec<([f32; 3], usize)> {
    // Deterministic init: spread seeds across the pixel list.
    let mut centers: Vec<[f32; 3]> = (0..k)
        .map(|i| pixels[i * pixels.len() / k])
        .collect();
    let mut assignment = vec![0usize; pixels.len()];

    for _ in 0..KMEANS_ITERATIONS {
        let mut moved = false;
        for (pi, pixel) in pixels.iter().enumerate() {
            let mut best = 0usize;
            let mut best_dist = f32::MAX;
            for (ci, center) in centers.iter().enumerate() {
                let dist = (pixel[0] - center[0]).powi(2)
                    + (pixel[1] - center[1]).powi(2)
                    + (pixel[2] - center[2]).powi(2);
                if dist < best_dist {
                    best_dist = dist;
                    best = ci;
                }
            }
            if assignment[pi] != best {
                assignment[pi] = best;
                moved = true;
            }
        }

        let mut sums = vec![[0f32; 3]; k];
        let mut counts = vec![0usize; k];
        for (pi, pixel) in pixels.iter().enumerate() {
            let c = assignment[pi];
            sums[c][0] += pixel[0];
            sums[c][1] += pixel[1];
            sums[c][2] += pixel[2];
            counts[c] += 1;
        }
        for ci in 0..k {
            if counts[ci] > 0 {
                centers[ci] = [
                    sums[ci][0] / counts[ci] as f32,
                    sums[ci][1] / counts[ci] as f32,
                    sums[ci][2] / counts[ci] as f32,
                ];
            }
        }
        if !moved {
            break;
        }
    }

    let mut counts = vec![0usize; k];
    for &c in &assignment {
        counts[c] += 1;
    }
    let mut clusters: Vec<([f32; 3], usize)> =
        centers.into_iter().zip(counts).filter(|(_, n)| *n > 0).collect();
    clusters.sort_by(|a, b| b.1.cmp(&a.1));
    clusters
}
