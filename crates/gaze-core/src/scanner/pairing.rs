//! Live-photo pair detection.
//!
//! A live photo is a still (`.heic/.heif/.jpg/.jpeg`) plus a same-stem
//! `.mov` clip under five seconds. Both sides link through the still's
//! fingerprint as `live_photo_pair_id`; the clip is flagged as a component
//! so default listings hide it.

use std::path::{Path, PathBuf};

/// A `.mov` longer than this is a normal video, not a live-photo component.
pub const LIVE_PHOTO_MAX_DURATION_MS: i64 = 5_000;

/// Still extensions eligible for pairing.
const PAIRABLE_PHOTO_EXTENSIONS: &[&str] = &["heic", "heif", "jpg", "jpeg"];

fn ext_lower(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

pub(crate) fn is_pairable_photo(path: &Path) -> bool {
    ext_lower(path)
        .map(|ext| PAIRABLE_PHOTO_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

pub(crate) fn is_mov(path: &Path) -> bool {
    ext_lower(path).map(|ext| ext == "mov").unwrap_or(false)
}

/// Case-insensitive same-stem sibling lookup.
fn sibling_with_ext(path: &Path, accept: impl Fn(&Path) -> bool) -> Option<PathBuf> {
    let stem = path.file_stem()?.to_string_lossy().to_lowercase();
    let dir = path.parent()?;
    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let candidate = entry.path();
        if candidate == path {
            continue;
        }
        let candidate_stem = match candidate.file_stem() {
            Some(s) => s.to_string_lossy().to_lowercase(),
            None => continue,
        };
        if candidate_stem == stem && accept(&candidate) {
            return Some(candidate);
        }
    }
    None
}

/// For a still: the `.mov` sibling that would make it a live photo.
pub fn find_live_sibling_mov(photo_path: &Path) -> Option<PathBuf> {
    sibling_with_ext(photo_path, is_mov)
}

/// For a `.mov`: the still sibling that owns the pair.
pub fn find_live_sibling_photo(mov_path: &Path) -> Option<PathBuf> {
    sibling_with_ext(mov_path, is_pairable_photo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_pairable_extensions() {
        assert!(is_pairable_photo(Path::new("IMG.heic")));
        assert!(is_pairable_photo(Path::new("IMG.JPEG")));
        assert!(!is_pairable_photo(Path::new("IMG.png")));
        assert!(is_mov(Path::new("IMG.MOV")));
        assert!(!is_mov(Path::new("IMG.mp4")));
    }

    #[test]
    fn test_sibling_lookup_case_insensitive() {
        let temp = TempDir::new().unwrap();
        let photo = temp.path().join("IMG_0042.HEIC");
        let clip = temp.path().join("img_0042.mov");
        std::fs::write(&photo, b"still").unwrap();
        std::fs::write(&clip, b"clip").unwrap();

        assert_eq!(find_live_sibling_mov(&photo), Some(clip.clone()));
        assert_eq!(find_live_sibling_photo(&clip), Some(photo));
    }

    #[test]
    fn test_no_sibling() {
        let temp = TempDir::new().unwrap();
        let photo = temp.path().join("alone.jpg");
        std::fs::write(&photo, b"still").unwrap();
        std::fs::write(temp.path().join("other.mov"), b"clip").unwrap();

        assert_eq!(find_live_sibling_mov(&photo), None);
    }
}
