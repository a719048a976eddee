//! ffprobe wrapper: technical and source metadata for a media file.

use crate::catalog::MediaMetadata;
use crate::error::{GazeError, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    format_name: Option<String>,
    bit_rate: Option<String>,
    #[serde(default)]
    tags: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<i64>,
    height: Option<i64>,
    bit_rate: Option<String>,
    channels: Option<i64>,
    sample_rate: Option<String>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    #[serde(default)]
    side_data_list: Vec<serde_json::Value>,
    #[serde(default)]
    tags: serde_json::Map<String, serde_json::Value>,
}

static ISO6709_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([+-]\d+\.?\d*)([+-]\d+\.?\d*)").unwrap());
static LEADING_FLOAT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([+-]?\d+\.?\d*)").unwrap());

fn tag<'a>(tags: &'a serde_json::Map<String, serde_json::Value>, keys: &[&str]) -> Option<&'a str> {
    for key in keys {
        if let Some(value) = tags
            .get(*key)
            .or_else(|| tags.get(&key.to_uppercase()))
            .and_then(|v| v.as_str())
        {
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    None
}

fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 {
            return Some((num / den * 1000.0).round() / 1000.0);
        }
        return None;
    }
    s.parse().ok()
}

/// Rotation from display-matrix side data or a `rotate` tag, normalized to
/// |r| mod 360.
fn parse_rotation(stream: &FfprobeStream) -> i64 {
    for side_data in &stream.side_data_list {
        if side_data.get("side_data_type").and_then(|v| v.as_str()) == Some("Display Matrix") {
            if let Some(rotation) = side_data.get("rotation").and_then(|v| {
                v.as_i64()
                    .or_else(|| v.as_str().and_then(|s| s.parse::<f64>().ok().map(|f| f as i64)))
            }) {
                return rotation.abs() % 360;
            }
        }
    }
    if let Some(rotate) = tag(&stream.tags, &["rotate"]) {
        if let Ok(rotation) = rotate.parse::<i64>() {
            return rotation.abs() % 360;
        }
    }
    0
}

fn parse_gps_coordinate(value: &str) -> Option<f64> {
    if let Ok(v) = value.trim().parse::<f64>() {
        return Some(v);
    }
    LEADING_FLOAT_RE
        .captures(value.trim())
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Normalize a container creation-time tag to ISO-8601 without timezone
/// suffix noise, leaving unparseable values untouched.
fn normalize_creation_time(raw: &str) -> String {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return dt.naive_local().format("%Y-%m-%dT%H:%M:%S").to_string();
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return dt.format("%Y-%m-%dT%H:%M:%S").to_string();
    }
    raw.to_string()
}

/// Probe a media file. Probe failures degrade to an empty metadata struct so
/// scanning can still register the file.
pub async fn probe_media(path: &Path) -> Result<MediaMetadata> {
    if !path.exists() {
        return Err(GazeError::FileNotFound(path.to_path_buf()));
    }
    let ffprobe =
        which::which("ffprobe").map_err(|_| GazeError::Ffprobe {
            path: path.to_path_buf(),
            message: "ffprobe not found on PATH".into(),
        })?;

    let output = Command::new(ffprobe)
        .args(["-v", "error", "-show_format", "-show_streams", "-of", "json"])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| GazeError::io_with_path(e, path))?;

    let mut meta = MediaMetadata::default();
    if !output.status.success() {
        warn!(
            "ffprobe failed for {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return Ok(meta);
    }

    let probe: FfprobeOutput = match serde_json::from_slice(&output.stdout) {
        Ok(probe) => probe,
        Err(e) => {
            warn!("Failed to parse ffprobe output for {}: {}", path.display(), e);
            return Ok(meta);
        }
    };

    if let Some(format) = &probe.format {
        if let Some(duration) = format.duration.as_deref().and_then(|d| d.parse::<f64>().ok()) {
            meta.duration_ms = Some((duration * 1000.0) as i64);
        }
        meta.container_format = format.format_name.clone();

        if let Some(creation) = tag(
            &format.tags,
            &["creation_time", "date", "com.apple.quicktime.creationdate"],
        ) {
            meta.creation_time = Some(normalize_creation_time(creation));
        }
        meta.camera_make = tag(
            &format.tags,
            &["make", "com.apple.quicktime.make", "manufacturer"],
        )
        .map(str::to_string);
        meta.camera_model = tag(
            &format.tags,
            &["model", "com.apple.quicktime.model", "product"],
        )
        .map(str::to_string);

        if let Some(location) = tag(
            &format.tags,
            &["location", "com.apple.quicktime.location.ISO6709"],
        ) {
            if let Some(caps) = ISO6709_RE.captures(location) {
                meta.gps_lat = caps.get(1).and_then(|m| m.as_str().parse().ok());
                meta.gps_lng = caps.get(2).and_then(|m| m.as_str().parse().ok());
            }
        }
        if meta.gps_lat.is_none() {
            meta.gps_lat = tag(&format.tags, &["location-lat", "latitude"])
                .and_then(parse_gps_coordinate);
        }
        if meta.gps_lng.is_none() {
            meta.gps_lng = tag(&format.tags, &["location-lon", "longitude"])
                .and_then(parse_gps_coordinate);
        }

        for key in [
            "title",
            "encoder",
            "handler_name",
            "copyright",
            "description",
            "artist",
            "album",
        ] {
            if let Some(value) = tag(&format.tags, &[key]) {
                meta.extra.push((key.to_string(), value.to_string()));
            }
        }
    }

    let format_bitrate = probe
        .format
        .as_ref()
        .and_then(|f| f.bit_rate.as_deref())
        .and_then(|b| b.parse::<i64>().ok());

    let mut video_seen = false;
    let mut audio_seen = false;
    for stream in &probe.streams {
        match stream.codec_type.as_deref() {
            Some("video") if !video_seen => {
                video_seen = true;
                meta.width = stream.width;
                meta.height = stream.height;
                meta.video_codec = stream.codec_name.clone();
                meta.video_bitrate = stream
                    .bit_rate
                    .as_deref()
                    .and_then(|b| b.parse().ok())
                    .or(format_bitrate);
                meta.fps = stream
                    .avg_frame_rate
                    .as_deref()
                    .or(stream.r_frame_rate.as_deref())
                    .and_then(parse_frame_rate);
                meta.rotation = parse_rotation(stream);
                if meta.creation_time.is_none() {
                    if let Some(creation) = tag(&stream.tags, &["creation_time"]) {
                        meta.creation_time = Some(normalize_creation_time(creation));
                    }
                }
            }
            Some("audio") if !audio_seen => {
                audio_seen = true;
                meta.audio_codec = stream.codec_name.clone();
                meta.audio_channels = stream.channels;
                meta.audio_sample_rate =
                    stream.sample_rate.as_deref().and_then(|s| s.parse().ok());
            }
            _ => {}
        }
    }

    debug!(
        "Probed {}: {:?}ms {}x{} codec={:?}",
        path.display(),
        meta.duration_ms,
        meta.width.unwrap_or(0),
        meta.height.unwrap_or(0),
        meta.video_codec
    );
    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("30000/1001"), Some(29.97));
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
    }

    #[test]
    fn test_iso6709() {
        let caps = ISO6709_RE.captures("+40.4463-073.5789/").unwrap();
        assert_eq!(caps.get(1).unwrap().as_str(), "+40.4463");
        assert_eq!(caps.get(2).unwrap().as_str(), "-073.5789");
    }

    #[test]
    fn test_parse_gps_coordinate() {
        assert_eq!(parse_gps_coordinate("40.5"), Some(40.5));
        assert_eq!(parse_gps_coordinate("+40.5 deg N"), Some(40.5));
        assert_eq!(parse_gps_coordinate("north"), None);
    }

    #[test]
    fn test_normalize_creation_time() {
        assert_eq!(
            normalize_creation_time("2023-06-15T10:30:00.000000Z"),
            "2023-06-15T10:30:00"
        );
        assert_eq!(
            normalize_creation_time("2023-06-15 10:30:00"),
            "2023-06-15T10:30:00"
        );
        assert_eq!(normalize_creation_time("whenever"), "whenever");
    }

    #[test]
    fn test_rotation_from_tag() {
        let stream: FfprobeStream = serde_json::from_value(serde_json::json!({
            "codec_type": "video",
            "tags": {"rotate": "-90"}
        }))
        .unwrap();
        assert_eq!(parse_rotation(&stream), 90);
    }

    #[test]
    fn test_rotation_from_display_matrix() {
        let stream: FfprobeStream = serde_json::from_value(serde_json::json!({
            "codec_type": "video",
            "side_data_list": [
                {"side_data_type": "Display Matrix", "rotation": -270}
            ]
        }))
        .unwrap();
        assert_eq!(parse_rotation(&stream), 270);
    }

    #[tokio::test]
    async fn test_probe_missing_file() {
        let result = probe_media(Path::new("/nope/missing.mp4")).await;
        assert!(matches!(result, Err(GazeError::FileNotFound(_))));
    }
}
