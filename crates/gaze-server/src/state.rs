//! Shared application state.

use gaze_core::GazeEngine;

pub struct AppState {
    pub engine: GazeEngine,
    pub token: String,
}

impl AppState {
    pub fn new(engine: GazeEngine, token: String) -> Self {
        Self { engine, token }
    }
}
