pub mod error;
pub mod routes;

use std::sync::Arc;

use audio_vault_core::AudioVault;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub type AppState = Arc<AudioVault>;

pub fn router(vault: AppState, max_chunk_bytes: usize) -> Router {
    Router::new()
        .route("/api/health", get(routes::health_check))
        .route("/upload_chunk", post(routes::upload_chunk))
        .route("/check_chunks/:file_id", get(routes::check_chunks))
        .route("/assemble", post(routes::assemble))
        .route("/jobs/:id", get(routes::job_status))
        .route("/history", get(routes::history))
        .route("/rename/:id", post(routes::rename_file))
        .route("/delete/:id", delete(routes::delete_file))
        .route("/stream/:filename", get(routes::stream_audio))
        .layer(DefaultBodyLimit::max(max_chunk_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(vault)
}
