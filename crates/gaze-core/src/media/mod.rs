//! External media toolchain: ffprobe/ffmpeg wrappers, thumbnails, EXIF and
//! colors.

pub mod colors;
pub mod exif_meta;
pub mod ffmpeg;
pub mod probe;
pub mod thumbnail;
