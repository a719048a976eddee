//! ffmpeg subprocess wrappers: audio extraction, frame extraction, segment
//! cutting and silence detection.

use crate::config::PipelineConfig;
use crate::error::{GazeError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::process::Command;
use tracing::{debug, info, warn};

fn ffmpeg_path() -> Result<PathBuf> {
    which::which("ffmpeg").map_err(|_| GazeError::Ffmpeg {
        message: "ffmpeg not found on PATH".into(),
    })
}

async fn run_ffmpeg(args: &[&str]) -> Result<std::process::Output> {
    let ffmpeg = ffmpeg_path()?;
    let output = Command::new(ffmpeg)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(GazeError::from)?;
    Ok(output)
}

/// Extract the audio track as mono 16-bit PCM WAV, overwriting any existing
/// output.
pub async fn extract_audio(input: &Path, output: &Path, sample_rate: u32) -> Result<()> {
    if !input.exists() {
        return Err(GazeError::FileNotFound(input.to_path_buf()));
    }
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| GazeError::io_with_path(e, parent))?;
    }

    debug!("Extracting audio {} -> {}", input.display(), output.display());
    let rate = sample_rate.to_string();
    let result = run_ffmpeg(&[
        "-i",
        &input.to_string_lossy(),
        "-vn",
        "-acodec",
        "pcm_s16le",
        "-ar",
        &rate,
        "-ac",
        "1",
        "-y",
        &output.to_string_lossy(),
    ])
    .await?;

    if !result.status.success() {
        return Err(GazeError::Ffmpeg {
            message: format!(
                "audio extraction failed: {}",
                String::from_utf8_lossy(&result.stderr).trim()
            ),
        });
    }
    if !output.exists() {
        return Err(GazeError::Ffmpeg {
            message: format!("audio output was not created: {}", output.display()),
        });
    }
    info!("Audio extracted: {}", output.display());
    Ok(())
}

/// Extract one JPEG per `interval_seconds` named `frame_%06d.jpg`, 1-based.
/// Returns the sorted frame paths.
pub async fn extract_frames(
    input: &Path,
    output_dir: &Path,
    interval_seconds: f64,
) -> Result<Vec<PathBuf>> {
    if !input.exists() {
        return Err(GazeError::FileNotFound(input.to_path_buf()));
    }
    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|e| GazeError::io_with_path(e, output_dir))?;

    let pattern = output_dir.join("frame_%06d.jpg");
    let filter = format!("fps=1/{interval_seconds}");
    let result = run_ffmpeg(&[
        "-i",
        &input.to_string_lossy(),
        "-vf",
        &filter,
        "-q:v",
        "2",
        "-y",
        &pattern.to_string_lossy(),
    ])
    .await?;

    if !result.status.success() {
        // Frame extraction on odd containers sometimes exits nonzero after
        // producing usable frames; surface the error only when nothing came
        // out.
        warn!(
            "ffmpeg frame extraction reported: {}",
            String::from_utf8_lossy(&result.stderr).trim()
        );
    }

    let frames = list_frame_files(output_dir)?;
    if frames.is_empty() && !result.status.success() {
        return Err(GazeError::Ffmpeg {
            message: format!(
                "frame extraction produced no frames: {}",
                String::from_utf8_lossy(&result.stderr).trim()
            ),
        });
    }
    info!("Extracted {} frames to {}", frames.len(), output_dir.display());
    Ok(frames)
}

/// Sorted `frame_*.jpg` paths in a directory, grid thumbnails excluded.
pub fn list_frame_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    if !dir.exists() {
        return Ok(frames);
    }
    for entry in std::fs::read_dir(dir).map_err(|e| GazeError::io_with_path(e, dir))? {
        let entry = entry.map_err(|e| GazeError::io_with_path(e, dir))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with("frame_") && name.ends_with(".jpg") && !name.ends_with("_grid.jpg") {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}

/// Cut a time range out of a WAV into a new mono 16 kHz WAV.
pub async fn cut_segment(
    input: &Path,
    output: &Path,
    start_seconds: f64,
    end_seconds: f64,
) -> Result<()> {
    if !input.exists() {
        return Err(GazeError::FileNotFound(input.to_path_buf()));
    }
    let result = run_ffmpeg(&[
        "-i",
        &input.to_string_lossy(),
        "-ss",
        &format!("{start_seconds:.3}"),
        "-to",
        &format!("{end_seconds:.3}"),
        "-acodec",
        "pcm_s16le",
        "-ar",
        "16000",
        "-ac",
        "1",
        "-y",
        &output.to_string_lossy(),
    ])
    .await?;

    if !result.status.success() {
        return Err(GazeError::Ffmpeg {
            message: format!(
                "segment cut failed: {}",
                String::from_utf8_lossy(&result.stderr).trim()
            ),
        });
    }
    Ok(())
}

static SILENCE_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"silence_start:\s*([0-9.]+)").unwrap());
static SILENCE_END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"silence_end:\s*([0-9.]+)").unwrap());

/// WAV duration from the RIFF header: data length / byte rate.
pub fn wav_duration_seconds(path: &Path) -> Option<f64> {
    let data = std::fs::read(path).ok()?;
    if data.len() < 44 || &data[0..4] != b"RIFF" || &data[8..12] != b"WAVE" {
        return None;
    }
    let byte_rate = u32::from_le_bytes(data[28..32].try_into().ok()?) as f64;
    if byte_rate <= 0.0 {
        return None;
    }
    // Find the data chunk; fmt may be followed by other chunks.
    let mut offset = 12usize;
    while offset + 8 <= data.len() {
        let chunk_id = &data[offset..offset + 4];
        let chunk_len = u32::from_le_bytes(data[offset + 4..offset + 8].try_into().ok()?) as usize;
        if chunk_id == b"data" {
            return Some(chunk_len as f64 / byte_rate);
        }
        offset += 8 + chunk_len + (chunk_len & 1);
    }
    None
}

/// Detect non-silent spans with ffmpeg silencedetect. Returns ordered
/// (start_s, end_s) spans; spans shorter than 0.2 s are dropped.
pub async fn detect_nonsilent_spans(
    audio_path: &Path,
    min_silence_ms: u32,
    silence_threshold_db: i32,
) -> Result<Vec<(f64, f64)>> {
    if !audio_path.exists() {
        return Ok(Vec::new());
    }
    let min_silence_s = (min_silence_ms.max(100)) as f64 / 1000.0;
    let filter = format!("silencedetect=noise={silence_threshold_db}dB:d={min_silence_s}");

    let result = run_ffmpeg(&[
        "-i",
        &audio_path.to_string_lossy(),
        "-af",
        &filter,
        "-f",
        "null",
        "-",
    ])
    .await?;

    let stderr = String::from_utf8_lossy(&result.stderr);
    let mut silence_starts: Vec<f64> = Vec::new();
    let mut silence_ends: Vec<f64> = Vec::new();
    for line in stderr.lines() {
        if let Some(caps) = SILENCE_START_RE.captures(line) {
            if let Ok(v) = caps[1].parse() {
                silence_starts.push(v);
            }
        } else if let Some(caps) = SILENCE_END_RE.captures(line) {
            if let Ok(v) = caps[1].parse() {
                silence_ends.push(v);
            }
        }
    }

    let Some(duration) = wav_duration_seconds(audio_path) else {
        return Ok(Vec::new());
    };
    Ok(spans_from_silences(&silence_starts, &silence_ends, duration))
}

/// Invert silence intervals into non-silent spans over [0, duration].
fn spans_from_silences(
    silence_starts: &[f64],
    silence_ends: &[f64],
    duration: f64,
) -> Vec<(f64, f64)> {
    let mut spans = Vec::new();
    let mut current = 0.0f64;
    for (idx, &start) in silence_starts.iter().enumerate() {
        if start > current {
            spans.push((current, start));
        }
        if let Some(&end) = silence_ends.get(idx) {
            current = current.max(end);
        }
    }
    if current < duration {
        spans.push((current, duration));
    }
    spans.retain(|(s, e)| e - s >= 0.2);
    spans
}

/// Sub-divide non-silent spans into chunks no longer than `chunk_seconds`.
/// Chunks shorter than the transcriber's minimum are kept here and filtered
/// by the caller so progress accounting stays exact.
pub fn chunk_spans(spans: &[(f64, f64)], chunk_seconds: f64) -> Vec<(f64, f64)> {
    let mut chunks = Vec::new();
    let max_len = chunk_seconds.max(PipelineConfig::MIN_CHUNK_SECONDS);
    for &(start, end) in spans {
        let mut cursor = start;
        while cursor < end {
            let chunk_end = (cursor + max_len).min(end);
            chunks.push((cursor, chunk_end));
            cursor = chunk_end;
        }
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_from_silences_basic() {
        // silence from 2..3 inside a 5s file
        let spans = spans_from_silences(&[2.0], &[3.0], 5.0);
        assert_eq!(spans, vec![(0.0, 2.0), (3.0, 5.0)]);
    }

    #[test]
    fn test_spans_silence_at_start() {
        let spans = spans_from_silences(&[0.0], &[1.5], 4.0);
        assert_eq!(spans, vec![(1.5, 4.0)]);
    }

    #[test]
    fn test_spans_no_silence() {
        let spans = spans_from_silences(&[], &[], 3.0);
        assert_eq!(spans, vec![(0.0, 3.0)]);
    }

    #[test]
    fn test_tiny_spans_dropped() {
        let spans = spans_from_silences(&[0.1], &[3.0], 3.05);
        assert!(spans.is_empty());
    }

    #[test]
    fn test_chunk_spans() {
        let chunks = chunk_spans(&[(0.0, 70.0)], 30.0);
        assert_eq!(chunks, vec![(0.0, 30.0), (30.0, 60.0), (60.0, 70.0)]);

        let chunks = chunk_spans(&[(0.0, 10.0), (20.0, 25.0)], 30.0);
        assert_eq!(chunks, vec![(0.0, 10.0), (20.0, 25.0)]);
    }

    #[test]
    fn test_wav_duration() {
        // Minimal 16kHz mono 16-bit WAV with one second of samples.
        let sample_rate = 16_000u32;
        let byte_rate = sample_rate * 2;
        let data_len = byte_rate; // one second
        let mut wav = Vec::new();
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&(36 + data_len).to_le_bytes());
        wav.extend_from_slice(b"WAVE");
        wav.extend_from_slice(b"fmt ");
        wav.extend_from_slice(&16u32.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
        wav.extend_from_slice(&1u16.to_le_bytes()); // mono
        wav.extend_from_slice(&sample_rate.to_le_bytes());
        wav.extend_from_slice(&byte_rate.to_le_bytes());
        wav.extend_from_slice(&2u16.to_le_bytes());
        wav.extend_from_slice(&16u16.to_le_bytes());
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&data_len.to_le_bytes());
        wav.extend(std::iter::repeat(0u8).take(data_len as usize));

        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("a.wav");
        std::fs::write(&path, &wav).unwrap();

        let duration = wav_duration_seconds(&path).unwrap();
        assert!((duration - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_list_frame_files_skips_grid() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(temp.path().join("frame_000001.jpg"), b"x").unwrap();
        std::fs::write(temp.path().join("frame_000002.jpg"), b"x").unwrap();
        std::fs::write(temp.path().join("frame_000001_grid.jpg"), b"x").unwrap();
        std::fs::write(temp.path().join("notes.txt"), b"x").unwrap();

        let frames = list_frame_files(temp.path()).unwrap();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].ends_with("frame_000001.jpg"));
    }
}
