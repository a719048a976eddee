//! Resumable model downloads with bounded retry.
//!
//! Downloads go to `<target>.part` and are renamed into place once complete.
//! An interrupted download resumes with a Range request. Retries back off
//! exponentially (2s, 4s, 8s). `offline_mode` callers simply never invoke
//! this.

use crate::config::NetworkConfig;
use crate::error::{GazeError, Result};
use crate::events::{EngineEvent, EventBus};
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Download `url` to `target`, emitting progress events under `name`.
pub async fn download_model(
    url: &str,
    target: &Path,
    name: &str,
    events: &EventBus,
) -> Result<()> {
    if target.exists() {
        return Ok(());
    }
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| GazeError::io_with_path(e, parent))?;
    }

    let client = reqwest::Client::builder()
        .timeout(NetworkConfig::DOWNLOAD_REQUEST_TIMEOUT)
        .build()?;

    let mut last_error: Option<GazeError> = None;
    for attempt in 0..NetworkConfig::MAX_RETRIES {
        if attempt > 0 {
            let delay = NetworkConfig::RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
            warn!(
                "Retrying download of {} in {:?} (attempt {}/{})",
                name,
                delay,
                attempt + 1,
                NetworkConfig::MAX_RETRIES
            );
            tokio::time::sleep(delay).await;
        }

        match download_once(&client, url, target, name, events).await {
            Ok(()) => {
                events.emit(EngineEvent::ModelDownloadComplete {
                    name: name.to_string(),
                });
                info!("Downloaded {} to {}", name, target.display());
                return Ok(());
            }
            Err(e) => {
                warn!("Download attempt failed for {}: {}", name, e);
                last_error = Some(e);
            }
        }
    }

    let error = last_error.unwrap_or_else(|| GazeError::DownloadFailed {
        url: url.to_string(),
        message: "retry budget exhausted".into(),
    });
    events.emit(EngineEvent::ModelDownloadError {
        name: name.to_string(),
        message: error.to_string(),
    });
    Err(error)
}

async fn download_once(
    client: &reqwest::Client,
    url: &str,
    target: &Path,
    name: &str,
    events: &EventBus,
) -> Result<()> {
    let part_path = target.with_extension(format!(
        "{}{}",
        target
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default(),
        NetworkConfig::DOWNLOAD_TEMP_SUFFIX
    ));

    let resume_from = tokio::fs::metadata(&part_path)
        .await
        .map(|m| m.len())
        .unwrap_or(0);

    let mut request = client.get(url);
    if resume_from > 0 {
        request = request.header("Range", format!("bytes={resume_from}-"));
    }
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(GazeError::DownloadFailed {
            url: url.to_string(),
            message: format!("HTTP {status}"),
        });
    }

    // A 200 to a ranged request means the server ignored the range; start
    // over.
    let appending = resume_from > 0 && status == reqwest::StatusCode::PARTIAL_CONTENT;
    let total_bytes = response.content_length().map(|len| {
        if appending {
            len + resume_from
        } else {
            len
        }
    });

    let mut file = if appending {
        tokio::fs::OpenOptions::new()
            .append(true)
            .open(&part_path)
            .await
            .map_err(|e| GazeError::io_with_path(e, &part_path))?
    } else {
        tokio::fs::File::create(&part_path)
            .await
            .map_err(|e| GazeError::io_with_path(e, &part_path))?
    };

    let mut downloaded = if appending { resume_from } else { 0 };
    let mut last_emit = std::time::Instant::now();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)
            .await
            .map_err(|e| GazeError::io_with_path(e, &part_path))?;
        downloaded += chunk.len() as u64;

        if last_emit.elapsed() >= Duration::from_millis(500) {
            last_emit = std::time::Instant::now();
            events.emit(EngineEvent::ModelDownloadProgress {
                name: name.to_string(),
                downloaded_bytes: downloaded,
                total_bytes,
            });
        }
    }
    file.flush()
        .await
        .map_err(|e| GazeError::io_with_path(e, &part_path))?;
    drop(file);

    tokio::fs::rename(&part_path, target)
        .await
        .map_err(|e| GazeError::io_with_path(e, target))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_existing_target_short_circuits() {
        let temp = tempfile::TempDir::new().unwrap();
        let target = temp.path().join("model.onnx");
        std::fs::write(&target, b"weights").unwrap();

        let events = EventBus::new();
        download_model("http://127.0.0.1:1/never", &target, "model", &events)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"weights");
    }
}
