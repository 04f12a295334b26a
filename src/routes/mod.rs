pub mod api;

use std::sync::Arc;

use crate::engine::Engine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    /// SHA-256 of the configured API token; None runs the API open.
    pub api_token_hash: Option<String>,
}
