//! Subprocess Whisper transcriber.
//!
//! Drives a whisper.cpp CLI (`whisper-cli`, with `whisper` and `main` as
//! fallback names) against a GGML model file under the models directory.
//! Two backend selections exist behind the `transcription_backend` setting:
//! `cli` forces the subprocess backend, `disabled` turns transcription off,
//! and the default `auto` uses the CLI when both binary and model are
//! present.

use super::{RawSegment, Transcriber};
use crate::error::{GazeError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

const CLI_NAMES: &[&str] = &["whisper-cli", "whisper", "main"];
const MODEL_NAMES: &[&str] = &["whisper.bin", "ggml-base.bin", "ggml-small.bin", "ggml-tiny.bin"];

#[derive(Debug, Deserialize)]
struct WhisperJson {
    #[serde(default)]
    transcription: Vec<WhisperJsonSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperJsonSegment {
    offsets: WhisperJsonOffsets,
    text: String,
}

#[derive(Debug, Deserialize)]
struct WhisperJsonOffsets {
    from: i64,
    to: i64,
}

pub struct WhisperCliTranscriber {
    binary: PathBuf,
    model: PathBuf,
}

impl WhisperCliTranscriber {
    /// Locate binary and model; `Ok(None)` when either is missing or the
    /// backend is disabled.
    pub fn load(models_dir: &Path, backend: &str) -> Result<Option<Self>> {
        if backend == "disabled" {
            return Ok(None);
        }

        let binary = CLI_NAMES.iter().find_map(|name| which::which(name).ok());
        let model = MODEL_NAMES
            .iter()
            .map(|name| models_dir.join(name))
            .find(|path| path.exists());

        match (binary, model) {
            (Some(binary), Some(model)) => Ok(Some(Self { binary, model })),
            _ if backend == "cli" => Err(GazeError::Transcription {
                message: "transcription backend 'cli' selected but binary or model missing"
                    .into(),
            }),
            _ => Ok(None),
        }
    }
}

impl Transcriber for WhisperCliTranscriber {
    fn transcribe(&self, wav_path: &Path, language: Option<&str>) -> Result<Vec<RawSegment>> {
        if !wav_path.exists() {
            return Err(GazeError::FileNotFound(wav_path.to_path_buf()));
        }

        // -oj writes `<input>.json` next to the input file.
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-m")
            .arg(&self.model)
            .arg("-f")
            .arg(wav_path)
            .arg("-oj")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(lang) = language {
            cmd.arg("-l").arg(lang);
        }

        let output = cmd.output().map_err(|e| GazeError::Transcription {
            message: format!("failed to run whisper cli: {e}"),
        })?;
        if !output.status.success() {
            return Err(GazeError::Transcription {
                message: format!(
                    "whisper cli failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let json_path = PathBuf::from(format!("{}.json", wav_path.display()));
        let raw = std::fs::read_to_string(&json_path)
            .map_err(|e| GazeError::io_with_path(e, &json_path))?;
        let _ = std::fs::remove_file(&json_path);

        let parsed: WhisperJson =
            serde_json::from_str(&raw).map_err(|e| GazeError::Transcription {
                message: format!("failed to parse whisper output: {e}"),
            })?;

        let segments = parsed
            .transcription
            .into_iter()
            .filter_map(|seg| {
                let text = seg.text.trim().to_string();
                if text.is_empty() {
                    None
                } else {
                    Some(RawSegment {
                        start_ms: seg.offsets.from,
                        end_ms: seg.offsets.to,
                        text,
                        confidence: None,
                    })
                }
            })
            .collect::<Vec<_>>();
        debug!("Transcribed {}: {} segments", wav_path.display(), segments.len());
        Ok(segments)
    }
}
