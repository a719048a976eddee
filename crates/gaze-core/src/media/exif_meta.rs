//! EXIF metadata extraction for photos.

use crate::catalog::MediaMetadata;
use crate::error::Result;
use exif::{In, Tag, Value};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::debug;

/// EXIF datetime ("2023:06:15 10:30:00") normalized to ISO-8601.
fn normalize_exif_datetime(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches('"');
    chrono::NaiveDateTime::parse_from_str(trimmed, "%Y:%m:%d %H:%M:%S")
        .ok()
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
}

fn ascii_value(exif: &exif::Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Ascii(parts) => {
            let joined = parts
                .iter()
                .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
                .collect::<Vec<_>>()
                .join(" ");
            if joined.is_empty() {
                None
            } else {
                Some(joined)
            }
        }
        _ => Some(field.display_value().to_string()),
    }
}

/// Degrees/minutes/seconds rational triple → decimal degrees.
fn gps_coordinate(exif: &exif::Exif, value_tag: Tag, ref_tag: Tag) -> Option<f64> {
    let field = exif.get_field(value_tag, In::PRIMARY)?;
    let Value::Rational(parts) = &field.value else {
        return None;
    };
    if parts.is_empty() {
        return None;
    }
    let degrees = parts.first().map(|r| r.to_f64()).unwrap_or(0.0);
    let minutes = parts.get(1).map(|r| r.to_f64()).unwrap_or(0.0);
    let seconds = parts.get(2).map(|r| r.to_f64()).unwrap_or(0.0);
    let mut value = degrees + minutes / 60.0 + seconds / 3600.0;

    if let Some(reference) = ascii_value(exif, ref_tag) {
        if reference.starts_with('S') || reference.starts_with('W') {
            value = -value;
        }
    }
    Some(value)
}

/// Extract photo metadata: EXIF source fields plus pixel dimensions. Photos
/// without EXIF simply leave `creation_time` and friends unset.
pub fn photo_metadata(path: &Path) -> Result<MediaMetadata> {
    let mut meta = MediaMetadata::default();

    if let Ok((w, h)) = super::thumbnail::image_dimensions(path) {
        meta.width = Some(w as i64);
        meta.height = Some(h as i64);
    }

    let Ok(file) = File::open(path) else {
        return Ok(meta);
    };
    let mut reader = BufReader::new(file);
    let Ok(exif) = exif::Reader::new().read_from_container(&mut reader) else {
        debug!("No EXIF in {}", path.display());
        return Ok(meta);
    };

    meta.creation_time = ascii_value(&exif, Tag::DateTimeOriginal)
        .or_else(|| ascii_value(&exif, Tag::DateTime))
        .and_then(|raw| normalize_exif_datetime(&raw));
    meta.camera_make = ascii_value(&exif, Tag::Make);
    meta.camera_model = ascii_value(&exif, Tag::Model);
    meta.gps_lat = gps_coordinate(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef);
    meta.gps_lng = gps_coordinate(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef);

    for (tag, key) in [
        (Tag::Software, "software"),
        (Tag::LensModel, "lens_model"),
        (Tag::FNumber, "f_number"),
        (Tag::ExposureTime, "exposure_time"),
        (Tag::PhotographicSensitivity, "iso"),
    ] {
        if let Some(field) = exif.get_field(tag, In::PRIMARY) {
            meta.extra
                .push((key.to_string(), field.display_value().to_string()));
        }
    }

    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_exif_datetime() {
        assert_eq!(
            normalize_exif_datetime("2023:06:15 10:30:00"),
            Some("2023-06-15T10:30:00".to_string())
        );
        assert_eq!(normalize_exif_datetime("not a date"), None);
    }

    #[test]
    fn test_photo_without_exif_has_dimensions_only() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("plain.png");
        image::RgbImage::from_pixel(64, 48, image::Rgb([1, 2, 3]))
            .save(&path)
            .unwrap();

        let meta = photo_metadata(&path).unwrap();
        assert_eq!(meta.width, Some(64));
        assert_eq!(meta.height, Some(48));
        assert!(meta.creation_time.is_none());
        assert!(meta.camera_make.is_none());
    }

    #[test]
    fn test_missing_file_is_empty_metadata() {
        let meta = photo_metadata(Path::new("/missing/photo.jpg")).unwrap();
        assert!(meta.width.is_none());
    }
}
