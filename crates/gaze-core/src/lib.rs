//! Gaze Core - Headless media indexing engine.
//!
//! This crate turns local folders of photos and videos into a searchable
//! library: a scanner reconciles on-disk state against a SQLite catalog, a
//! resumable per-item pipeline extracts frames, embeddings, detections,
//! faces and transcripts, and a search planner fuses transcript, visual,
//! object, color and person signals into one ranked result set. It can be
//! used programmatically without any HTTP layer.
//!
//! # Example
//!
//! ```rust,no_run
//! use gaze_core::GazeEngine;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = GazeEngine::open("/path/to/data").await?;
//!     let library_id = engine.add_library("/home/me/Pictures", None, true)?;
//!     let stats = engine.scan_library(&library_id).await?;
//!     println!("found {} files", stats.files_found);
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod catalog;
pub mod config;
mod engine;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod learning;
pub mod media;
pub mod ml;
pub mod net;
pub mod paths;
pub mod pipeline;
pub mod scanner;
pub mod search;

pub use cancel::CancellationToken;
pub use catalog::{Catalog, MediaFilter, MediaItem, MediaStatus, MediaType, ScanStats, Stage};
pub use config::IndexingPreset;
pub use engine::{EngineStats, GazeEngine};
pub use error::{ErrorCode, GazeError, Result};
pub use events::{EngineEvent, EventBus};
pub use paths::DataPaths;
pub use search::{SearchMode, SearchRequest, SearchResponse, SearchResult};
