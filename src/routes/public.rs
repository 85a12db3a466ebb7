use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints that need no credentials. Note reads are public by design: anyone may
/// read any note and its images.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness probe for load balancers.
        .route("/health", get(|| async { "ok" }))
        // POST /register
        // Creates an account from {name, email, password}.
        .route("/register", post(handlers::register_user))
        // POST /login
        // Verifies credentials and issues a 24h bearer token.
        .route("/login", post(handlers::login))
        // GET /notes
        // Lists all notes with their images eager-loaded.
        .route("/notes", get(handlers::list_notes))
        // GET /notes/{id}
        // A single note with its images, or 404.
        .route("/notes/{id}", get(handlers::get_note))
}
