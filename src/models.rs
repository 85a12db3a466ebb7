use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

// --- Core Application Schemas (Mapped to Database) ---

/// User
///
/// A registered identity from the `users` table. The password hash never leaves the
/// server: it is skipped on serialization.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    // Stored trimmed and lower-cased; unique.
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Note
///
/// A text note from the `notes` table. `user_id` is the owner and is fixed at creation.
/// `images` is not a column: the repository fills it when loading notes.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Note {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub content: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    pub images: Vec<Image>,
}

/// Image
///
/// An uploaded file from the `images` table. Carries no owner of its own: ownership
/// is whatever owns the parent note.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Image {
    pub id: Uuid,
    // None for an upload that was never linked to a note.
    pub note_id: Option<Uuid>,
    pub url: String,
    // File name under the upload root; used for best-effort removal.
    #[serde(skip)]
    pub stored_name: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// AuditRecord
///
/// One completed request/response exchange from the append-only `audit_records` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditRecord {
    pub id: Uuid,
    pub method: String,
    pub path: String,
    // Header name -> list of values.
    pub headers: sqlx::types::Json<serde_json::Value>,
    pub request_body: Vec<u8>,
    pub response_body: String,
    pub status_code: i32,
    pub created_at: DateTime<Utc>,
}

// --- Repository Inputs ---

/// Fields needed to insert a user; the password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

/// Fields needed to insert an image row for a file already written to storage.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub note_id: Option<Uuid>,
    pub url: String,
    pub stored_name: String,
}

/// An audit entry before it is persisted.
#[derive(Debug, Clone)]
pub struct NewAuditRecord {
    pub method: String,
    pub path: String,
    pub headers: serde_json::Value,
    pub request_body: Vec<u8>,
    pub response_body: String,
    pub status_code: i32,
}

// --- Request Payloads (Input Schemas) ---

/// RegisterRequest
///
/// Input payload for `POST /register`. The password is hashed before it reaches the
/// repository and is never written to logs.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// LoginRequest
///
/// Input payload for `POST /login`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// CreateNoteRequest
///
/// Input payload for `POST /notes`. The owner is always the caller.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateNoteRequest {
    pub title: String,
    #[serde(default)]
    pub content: String,
}

/// UpdateNoteRequest
///
/// Partial update payload for `PUT /notes/{id}`. Absent fields keep their value.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateNoteRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

// --- Response Payloads (Output Schemas) ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct NotesResponse {
    pub notes: Vec<Note>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct NoteResponse {
    pub note: Note,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct NoteCreatedResponse {
    pub message: String,
    pub id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UploadResponse {
    pub message: String,
    pub image_url: String,
}

/// Multipart form accepted by `POST /notes/image`. Documentation only; the handler
/// reads the fields from `Multipart` directly.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct UploadImageForm {
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
    pub note_id: Option<Uuid>,
}
