use axum::{
    Router,
    extract::{DefaultBodyLimit, FromRef},
    http::{HeaderName, HeaderValue},
    middleware,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    services::ServeDir,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

// --- Module Structure ---

// Control plane: identity, credentials and the two interceptors.
pub mod audit;
pub mod auth;
pub mod password;
pub mod token;

// Application services and components.
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repository;
pub mod storage;

// Routing segregation (Public, Authenticated).
pub mod routes;
use routes::{authenticated, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use error::{ApiError, ApiResult};
pub use repository::{PostgresRepository, RepositoryState};
pub use storage::{LocalFileStore, MockFileStore, StorageState};
pub use token::{TokenService, TokenState};

/// ApiDoc
///
/// OpenAPI document for every route decorated with `#[utoipa::path]`, served at
/// `/api-docs/openapi.json` and browsable under `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::register_user, handlers::login, handlers::list_notes, handlers::get_note,
        handlers::create_note, handlers::update_note, handlers::delete_note,
        handlers::upload_image, handlers::delete_image
    ),
    components(
        schemas(
            models::Note, models::Image, models::RegisterRequest, models::LoginRequest,
            models::CreateNoteRequest, models::UpdateNoteRequest, models::MessageResponse,
            models::TokenResponse, models::NotesResponse, models::NoteResponse,
            models::NoteCreatedResponse, models::UploadResponse, models::UploadImageForm,
        )
    ),
    tags(
        (name = "notes-share", description = "Multi-user notes API")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single shared container for every service a request may need. Cloned per request;
/// every field is an `Arc` or cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Persistence for users, notes, images and audit records.
    pub repo: RepositoryState,
    /// Backing store for uploaded image files.
    pub storage: StorageState,
    /// Token issuance and validation, keyed by the process-wide signing secret.
    pub tokens: TokenState,
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

// Interceptors pull only the component they need out of the shared state.

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for StorageState {
    fn from_ref(app_state: &AppState) -> StorageState {
        app_state.storage.clone()
    }
}

impl FromRef<AppState> for TokenState {
    fn from_ref(app_state: &AppState) -> TokenState {
        app_state.tokens.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// create_router
///
/// Assembles the routing tree. Layer order, innermost first:
///
/// 1. `require_auth` on each authenticated method router (`route_layer`, so unmatched
///    paths still 404 and unsupported methods still 405 instead of 401).
/// 2. `audit_exchange` around every API route and the JSON 404 fallback. It sits outside
///    the auth interceptor, so rejected requests are recorded too.
/// 3. Swagger UI and the static `/uploads` directory are merged afterwards and are not audited.
/// 4. Request id, tracing and CORS wrap everything.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    let x_request_id = HeaderName::from_static("x-request-id");
    let upload_dir = state.config.upload_dir.clone();
    let max_body_bytes = state.config.max_body_bytes;

    Router::new()
        .merge(public::public_routes())
        .merge(authenticated::authenticated_routes(state.clone()))
        .fallback(handlers::route_not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            audit::audit_exchange,
        ))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        // Added after the audit layer, so neither is audited.
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest_service("/uploads", ServeDir::new(upload_dir))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// `*` (or no configured origin) allows any origin; otherwise only the listed ones.
/// Origins that are not valid header values are skipped with a warning.
fn cors_layer(config: &AppConfig) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if config.allows_any_origin() {
        return cors.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

/// trace_span_logger
///
/// Span factory for `TraceLayer`: every log line of one request carries its `x-request-id`.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
