pub mod candidates;
pub mod import;
pub mod scrape;
pub mod sources;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};

use crate::auth::require_api_token;
use crate::routes::AppState;

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        // Sources
        .route("/sources", get(sources::list).post(sources::create))
        .route("/sources/{id}", get(sources::get).put(sources::update))
        // Scrape control
        .route(
            "/sources/{id}/scrape",
            post(scrape::start).get(scrape::status),
        )
        .route("/sources/{id}/scrape/stop", post(scrape::stop))
        // Candidates
        .route("/candidates", get(candidates::list))
        .route("/candidates/import", post(import::import))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_token,
        ))
        .with_state(state);

    Router::new().nest("/api/v1", protected)
}
