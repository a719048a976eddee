//! Network layer: model weight downloads.

pub mod download;
