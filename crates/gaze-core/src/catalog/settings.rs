//! Process-wide settings, stored as a key → JSON-value mapping.

use super::Catalog;
use crate::config::{IndexingPreset, PipelineConfig, SchedulerConfig, SearchConfig};
use crate::error::Result;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

/// The recognized option keys. Unknown keys are rejected by the API layer.
pub const RECOGNIZED_SETTINGS: &[&str] = &[
    "max_concurrent_jobs",
    "thumbnail_quality",
    "frame_interval_seconds",
    "faiss_cache_max",
    "indexing_preset",
    "prioritize_recent_media",
    "transcription_model",
    "transcription_language",
    "transcription_backend",
    "transcription_vad_enabled",
    "transcription_min_silence_ms",
    "transcription_silence_threshold_db",
    "transcription_chunk_seconds",
    "offline_mode",
    "face_recognition_enabled",
];

/// Typed snapshot of the settings the pipeline and scheduler consult.
#[derive(Debug, Clone)]
pub struct SettingsView {
    pub max_concurrent_jobs: u32,
    pub thumbnail_quality: u8,
    pub frame_interval_seconds: f64,
    pub faiss_cache_max: usize,
    pub indexing_preset: IndexingPreset,
    pub prioritize_recent_media: bool,
    pub transcription_model: String,
    pub transcription_language: Option<String>,
    pub transcription_backend: String,
    pub transcription_vad_enabled: bool,
    pub transcription_min_silence_ms: u32,
    pub transcription_silence_threshold_db: i32,
    pub transcription_chunk_seconds: f64,
    pub offline_mode: bool,
    pub face_recognition_enabled: bool,
}

impl Default for SettingsView {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: SchedulerConfig::DEFAULT_MAX_CONCURRENT_JOBS,
            thumbnail_quality: 85,
            frame_interval_seconds: PipelineConfig::DEFAULT_FRAME_INTERVAL_SECONDS,
            faiss_cache_max: SearchConfig::DEFAULT_SHARD_CACHE_MAX,
            indexing_preset: IndexingPreset::default(),
            prioritize_recent_media: false,
            transcription_model: "base".into(),
            transcription_language: None,
            transcription_backend: "auto".into(),
            transcription_vad_enabled: true,
            transcription_min_silence_ms: PipelineConfig::DEFAULT_MIN_SILENCE_MS,
            transcription_silence_threshold_db: PipelineConfig::DEFAULT_SILENCE_THRESHOLD_DB,
            transcription_chunk_seconds: PipelineConfig::DEFAULT_CHUNK_SECONDS,
            offline_mode: false,
            face_recognition_enabled: true,
        }
    }
}

impl Catalog {
    pub fn get_setting(&self, key: &str) -> Result<Option<Value>> {
        let conn = self.lock()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.map(|s| serde_json::from_str(&s).unwrap_or(Value::String(s))))
    }

    pub fn set_setting(&self, key: &str, value: &Value) -> Result<()> {
        let serialized = serde_json::to_string(value)?;
        self.retry_busy(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
                params![key, serialized],
            )
        })?;
        Ok(())
    }

    pub fn list_settings(&self) -> Result<Vec<(String, Value)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows
            .into_iter()
            .map(|(k, v)| {
                let value = serde_json::from_str(&v).unwrap_or(Value::String(v));
                (k, value)
            })
            .collect())
    }

    /// Read the typed settings snapshot, falling back to defaults for any
    /// missing or malformed key.
    pub fn settings_view(&self) -> Result<SettingsView> {
        let mut view = SettingsView::default();
        for (key, value) in self.list_settings()? {
            match key.as_str() {
                "max_concurrent_jobs" => {
                    if let Some(n) = value.as_u64() {
                        view.max_concurrent_jobs = n.max(1) as u32;
                    }
                }
                "thumbnail_quality" => {
                    if let Some(n) = value.as_u64() {
                        view.thumbnail_quality = n.clamp(1, 95) as u8;
                    }
                }
                "frame_interval_seconds" => {
                    if let Some(n) = value.as_f64() {
                        if n > 0.0 {
                            view.frame_interval_seconds = n;
                        }
                    }
                }
                "faiss_cache_max" => {
                    if let Some(n) = value.as_u64() {
                        view.faiss_cache_max = (n.max(1)) as usize;
                    }
                }
                "indexing_preset" => {
                    if let Some(s) = value.as_str() {
                        if let Some(preset) = IndexingPreset::from_str(s) {
                            view.indexing_preset = preset;
                        }
                    }
                }
                "prioritize_recent_media" => {
                    if let Some(b) = value.as_bool() {
                        view.prioritize_recent_media = b;
                    }
                }
                "transcription_model" => {
                    if let Some(s) = value.as_str() {
                        view.transcription_model = s.to_string();
                    }
                }
                "transcription_language" => {
                    view.transcription_language = value.as_str().map(str::to_string);
                }
                "transcription_backend" => {
                    if let Some(s) = value.as_str() {
                        view.transcription_backend = s.to_string();
                    }
                }
                "transcription_vad_enabled" => {
                    if let Some(b) = value.as_bool() {
                        view.transcription_vad_enabled = b;
                    }
                }
                "transcription_min_silence_ms" => {
                    if let Some(n) = value.as_u64() {
                        view.transcription_min_silence_ms = n as u32;
                    }
                }
                "transcription_silence_threshold_db" => {
                    if let Some(n) = value.as_i64() {
                        view.transcription_silence_threshold_db = n as i32;
                    }
                }
                "transcription_chunk_seconds" => {
                    if let Some(n) = value.as_f64() {
                        if n > 0.0 {
                            view.transcription_chunk_seconds = n;
                        }
                    }
                }
                "offline_mode" => {
                    if let Some(b) = value.as_bool() {
                        view.offline_mode = b;
                    }
                }
                "face_recognition_enabled" => {
                    if let Some(b) = value.as_bool() {
                        view.face_recognition_enabled = b;
                    }
                }
                _ => {}
            }
        }
        Ok(view)
    }
}
