//! Router Module Index
//!
//! Routes are split by access level. Access control is applied at the module level
//! (via Axum layers in `create_router`), so a handler cannot be exposed without it by
//! accident.

/// Routes accessible to anonymous clients: registration, login and note reads.
pub mod public;

/// Routes behind the `require_auth` interceptor. Every handler here receives a
/// validated `AuthUser` and re-derives ownership in the repository.
pub mod authenticated;
