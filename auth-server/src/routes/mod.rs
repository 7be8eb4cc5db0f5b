//! HTTP Routes for the Auth Server
//!
//! Provides REST API endpoints for proof verification and metadata extraction.

pub mod auth;
pub mod health;

use axum::Router;

use crate::state::AppState;

/// Create all routes
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .merge(health::routes())
        .nest("/api/v1", auth::routes())
        .with_state(state)
}
