//! Logging setup: console plus a size-rotating file.
//!
//! The file writer rotates at 10 MiB, keeping five numbered backups
//! (`gaze.log.1` is the most recent rollover).

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const MAX_BYTES: u64 = 10 * 1024 * 1024;
const BACKUPS: u32 = 5;

struct RotatingFile {
    path: PathBuf,
    file: std::fs::File,
    written: u64,
}

impl RotatingFile {
    fn open(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            path: path.to_path_buf(),
            file,
            written,
        })
    }

    fn rotate(&mut self) -> std::io::Result<()> {
        // Shift gaze.log.N up, dropping the oldest.
        for index in (1..BACKUPS).rev() {
            let from = self.path.with_extension(format!("log.{index}"));
            let to = self.path.with_extension(format!("log.{}", index + 1));
            if from.exists() {
                let _ = std::fs::rename(&from, &to);
            }
        }
        let first = self.path.with_extension("log.1");
        let _ = std::fs::rename(&self.path, &first);

        self.file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.written + buf.len() as u64 > MAX_BYTES {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

struct SharedWriter(std::sync::Arc<Mutex<RotatingFile>>);

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.0.lock() {
            Ok(mut file) => file.write(buf),
            Err(_) => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.0.lock() {
            Ok(mut file) => file.flush(),
            Err(_) => Ok(()),
        }
    }
}

/// Install the global subscriber. Safe to call once per process.
pub fn init(log_path: &Path) -> anyhow::Result<()> {
    let rotating = RotatingFile::open(log_path)?;
    let shared = std::sync::Arc::new(Mutex::new(rotating));

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(move || SharedWriter(shared.clone()));

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_shifts_backups() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("gaze.log");
        let mut file = RotatingFile::open(&path).unwrap();

        file.write_all(b"first generation").unwrap();
        file.rotate().unwrap();
        file.write_all(b"second generation").unwrap();

        assert!(path.exists());
        assert!(path.with_extension("log.1").exists());
        let rolled = std::fs::read_to_string(path.with_extension("log.1")).unwrap();
        assert_eq!(rolled, "first generation");
    }
}
