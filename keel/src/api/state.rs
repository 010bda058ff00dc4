//! Shared application state threaded through every axum handler.

use std::sync::Arc;

use crate::engine::Engine;

pub type AppState = Arc<Engine>;
