use crate::{AppState, auth, handlers};
use axum::{
    Router, middleware,
    routing::{delete, post, put},
};

/// Authenticated Router Module
///
/// Every mutating route. `require_auth` is attached to each method router with
/// `route_layer`, so it guards the registered methods only: an unsupported method on a
/// shared path (e.g. `PATCH /notes`) still answers 405. Ownership is then enforced per
/// handler by owner-constrained repository statements (direct for notes, through the
/// parent note for images).
pub fn authenticated_routes(state: AppState) -> Router<AppState> {
    let require_auth = middleware::from_fn_with_state(state, auth::require_auth);

    Router::<AppState>::new()
        // POST /notes
        // Creates a note owned by the caller.
        .route(
            "/notes",
            post(handlers::create_note).route_layer(require_auth.clone()),
        )
        // PUT/DELETE /notes/{id}
        // Owner-only. A note owned by someone else answers 404.
        .route(
            "/notes/{id}",
            put(handlers::update_note)
                .delete(handlers::delete_note)
                .route_layer(require_auth.clone()),
        )
        // POST /notes/image
        // Multipart upload (`file`, optional `note_id`); returns the public URL.
        .route(
            "/notes/image",
            post(handlers::upload_image).route_layer(require_auth.clone()),
        )
        // DELETE /notes/image/{id}
        // Only the owner of the parent note may delete an image.
        .route(
            "/notes/image/{id}",
            delete(handlers::delete_image).route_layer(require_auth),
        )
}
