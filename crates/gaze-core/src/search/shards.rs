//! Per-item vector shards.
//!
//! A shard is a flat inner-product index over L2-normalized 512-D vectors,
//! one entry per frame, ordinal = the frame's 0-based index. Shards are
//! written atomically after the embedding stage and read-only afterwards;
//! searchers share open shards through a bounded LRU under a mutex.
//!
//! Layout: magic `GZSH`, u32 version, u32 dim, u32 count, then
//! count × dim little-endian f32.

use crate::error::{GazeError, Result};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

const MAGIC: &[u8; 4] = b"GZSH";
const VERSION: u32 = 1;

fn shard_err(path: &Path, message: impl Into<String>) -> GazeError {
    GazeError::Shard {
        message: message.into(),
        path: path.to_path_buf(),
    }
}

/// An open, immutable shard.
#[derive(Debug)]
pub struct Shard {
    dim: usize,
    count: usize,
    data: Vec<f32>,
}

impl Shard {
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Top-k inner-product search. For unit vectors this is cosine
    /// similarity. Returns (ordinal, score) sorted by score descending.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        if query.len() != self.dim || k == 0 {
            return Vec::new();
        }
        let mut scored: Vec<(usize, f32)> = (0..self.count)
            .map(|ordinal| {
                let start = ordinal * self.dim;
                let row = &self.data[start..start + self.dim];
                let score: f32 = row.iter().zip(query).map(|(a, b)| a * b).sum();
                (ordinal, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);
        scored
    }
}

/// Write a shard atomically (temp file + rename).
pub fn write_shard(path: &Path, vectors: &[Vec<f32>]) -> Result<()> {
    let dim = vectors.first().map(|v| v.len()).unwrap_or(0);
    for (i, v) in vectors.iter().enumerate() {
        if v.len() != dim {
            return Err(shard_err(
                path,
                format!("vector {i} has dim {}, expected {dim}", v.len()),
            ));
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| GazeError::io_with_path(e, parent))?;
    }
    let tmp_path = path.with_extension("shard.tmp");
    {
        let mut file = std::fs::File::create(&tmp_path)
            .map_err(|e| GazeError::io_with_path(e, &tmp_path))?;
        file.write_all(MAGIC)
            .and_then(|_| file.write_all(&VERSION.to_le_bytes()))
            .and_then(|_| file.write_all(&(dim as u32).to_le_bytes()))
            .and_then(|_| file.write_all(&(vectors.len() as u32).to_le_bytes()))
            .map_err(|e| GazeError::io_with_path(e, &tmp_path))?;
        for vector in vectors {
            for value in vector {
                file.write_all(&value.to_le_bytes())
                    .map_err(|e| GazeError::io_with_path(e, &tmp_path))?;
            }
        }
        file.flush().map_err(|e| GazeError::io_with_path(e, &tmp_path))?;
    }
    std::fs::rename(&tmp_path, path).map_err(|e| GazeError::io_with_path(e, path))?;
    Ok(())
}

/// Read a whole shard into memory.
pub fn read_shard(path: &Path) -> Result<Shard> {
    let mut file = std::fs::File::open(path).map_err(|e| GazeError::io_with_path(e, path))?;
    let mut header = [0u8; 16];
    file.read_exact(&mut header)
        .map_err(|_| shard_err(path, "truncated header"))?;

    if &header[0..4] != MAGIC {
        return Err(shard_err(path, "bad magic"));
    }
    let version = u32::from_le_bytes(header[4..8].try_into().expect("4 bytes"));
    if version != VERSION {
        return Err(shard_err(path, format!("unsupported version {version}")));
    }
    let dim = u32::from_le_bytes(header[8..12].try_into().expect("4 bytes")) as usize;
    let count = u32::from_le_bytes(header[12..16].try_into().expect("4 bytes")) as usize;

    let mut raw = Vec::new();
    file.read_to_end(&mut raw)
        .map_err(|e| GazeError::io_with_path(e, path))?;
    let expected = dim * count * 4;
    if raw.len() != expected {
        return Err(shard_err(
            path,
            format!("expected {expected} data bytes, got {}", raw.len()),
        ));
    }

    let data = raw
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(Shard { dim, count, data })
}

struct CacheInner {
    capacity: usize,
    map: HashMap<PathBuf, Arc<Shard>>,
    /// Most-recent last.
    order: Vec<PathBuf>,
}

/// Bounded LRU of open shards, shared by concurrent searchers.
pub struct ShardCache {
    inner: Mutex<CacheInner>,
}

impl ShardCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                capacity: capacity.max(1),
                map: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    /// Change capacity, evicting oldest entries if needed.
    pub fn set_capacity(&self, capacity: usize) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.capacity = capacity.max(1);
            while inner.order.len() > inner.capacity {
                let evicted = inner.order.remove(0);
                inner.map.remove(&evicted);
                debug!("Shard cache evicted: {}", evicted.display());
            }
        }
    }

    /// Get an open shard, loading it on miss.
    pub fn get(&self, path: &Path) -> Result<Arc<Shard>> {
        {
            let mut inner = self
                .inner
                .lock()
                .map_err(|_| shard_err(path, "shard cache poisoned"))?;
            if let Some(shard) = inner.map.get(path).cloned() {
                // Refresh recency.
                inner.order.retain(|p| p != path);
                inner.order.push(path.to_path_buf());
                return Ok(shard);
            }
        }

        let shard = Arc::new(read_shard(path)?);
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| shard_err(path, "shard cache poisoned"))?;
        inner.map.insert(path.to_path_buf(), shard.clone());
        inner.order.retain(|p| p != path);
        inner.order.push(path.to_path_buf());
        while inner.order.len() > inner.capacity {
            let evicted = inner.order.remove(0);
            inner.map.remove(&evicted);
            debug!("Shard cache evicted: {}", evicted.display());
        }
        Ok(shard)
    }

    /// Drop a cached shard (after wipe or re-index).
    pub fn invalidate(&self, path: &Path) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.map.remove(path);
            inner.order.retain(|p| p != path);
        }
    }
}
