use crate::{
    AppState,
    auth::AuthUser,
    error::{ApiError, ApiResult},
    models::{
        CreateNoteRequest, LoginRequest, MessageResponse, NewImage, NewUser, NoteCreatedResponse,
        NoteResponse, NotesResponse, RegisterRequest, TokenResponse, UpdateNoteRequest,
        UploadImageForm, UploadResponse,
    },
    password::{hash_password_blocking, verify_password_blocking, verify_password_decoy},
    repository::{ImageInsert, RepositoryError},
    storage::StorageState,
};
use axum::{
    Json,
    extract::{
        Multipart, Path, State,
        multipart::MultipartRejection,
        rejection::{JsonRejection, PathRejection},
    },
};
use uuid::Uuid;

const NOTE_NOT_FOUND: &str = "Note not found";
const IMAGE_NOT_FOUND: &str = "Image not found or unauthorized";

/// Unwraps a JSON body, turning any extractor rejection into the uniform 400.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| {
            tracing::debug!(reason = %rejection, "rejected request body");
            ApiError::invalid_request()
        })
}

/// An id that does not parse cannot name an existing resource, so it is a 404.
fn path_id(id: Result<Path<Uuid>, PathRejection>, not_found: &'static str) -> ApiResult<Uuid> {
    id.map(|Path(id)| id).map_err(|_| ApiError::NotFound(not_found))
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Best-effort removal of a backing file. The database row is authoritative, so a
/// failure here is logged and swallowed.
async fn remove_file_quietly(storage: &StorageState, stored_name: &str) {
    if let Err(e) = storage.remove(stored_name).await {
        tracing::warn!(error = %e, stored_name, "failed to remove stored file");
    }
}

// --- Handlers ---

/// Fallback for any path no route matches. Mounted inside the audit layer.
pub async fn route_not_found() -> ApiError {
    ApiError::NotFound("Not found")
}

/// register_user
///
/// [Public Route] Creates an account. The password is hashed with Argon2id before it
/// reaches the repository and is never logged.
#[utoipa::path(
    post,
    path = "/register",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Registered", body = MessageResponse),
        (status = 400, description = "Invalid input"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn register_user(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let req = json_body(payload)?;

    let name = req.name.trim().to_string();
    let email = normalize_email(&req.email);
    if name.is_empty() || email.is_empty() || req.password.is_empty() {
        return Err(ApiError::Validation(
            "Name, email and password are required".to_string(),
        ));
    }
    if !email.contains('@') {
        return Err(ApiError::Validation("Invalid email address".to_string()));
    }

    let password_hash = hash_password_blocking(req.password).await?;
    let user = state
        .repo
        .create_user(NewUser {
            name,
            email,
            password_hash,
        })
        .await?;

    tracing::info!(user_id = %user.id, "user registered");
    Ok(Json(MessageResponse::new("User registered successfully")))
}

/// login
///
/// [Public Route] Exchanges email + password for a bearer token valid for 24 hours.
/// Unknown email and wrong password produce the same 401.
#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued", body = TokenResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Json<TokenResponse>> {
    let req = json_body(payload)?;
    let email = normalize_email(&req.email);

    let user = match state.repo.find_user_by_email(&email).await? {
        Some(user) => user,
        None => {
            verify_password_decoy(req.password).await;
            return Err(ApiError::InvalidCredentials);
        }
    };

    if !verify_password_blocking(req.password, user.password_hash.clone()).await {
        tracing::info!(user_id = %user.id, "login rejected: wrong password");
        return Err(ApiError::InvalidCredentials);
    }

    let token = state
        .tokens
        .issue(user.id, &user.email)
        .map_err(|e| ApiError::internal(e.to_string()))?;

    tracing::info!(user_id = %user.id, "user logged in");
    Ok(Json(TokenResponse { token }))
}

/// list_notes
///
/// [Public Route] Every note, newest first, with its images.
#[utoipa::path(
    get,
    path = "/notes",
    responses((status = 200, description = "All notes", body = NotesResponse))
)]
pub async fn list_notes(State(state): State<AppState>) -> ApiResult<Json<NotesResponse>> {
    let notes = state.repo.list_notes().await?;
    Ok(Json(NotesResponse { notes }))
}

/// get_note
///
/// [Public Route] A single note with its images.
#[utoipa::path(
    get,
    path = "/notes/{id}",
    params(("id" = Uuid, Path, description = "Note ID")),
    responses(
        (status = 200, description = "Found", body = NoteResponse),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_note(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<NoteResponse>> {
    let id = path_id(id, NOTE_NOT_FOUND)?;
    match state.repo.get_note(id).await? {
        Some(note) => Ok(Json(NoteResponse { note })),
        None => Err(ApiError::NotFound(NOTE_NOT_FOUND)),
    }
}

/// create_note
///
/// [Authenticated Route] Creates a note owned by the caller. Any owner in the body is
/// ignored; ownership always comes from the token.
#[utoipa::path(
    post,
    path = "/notes",
    request_body = CreateNoteRequest,
    responses(
        (status = 200, description = "Created", body = NoteCreatedResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Unauthenticated")
    )
)]
pub async fn create_note(
    user: AuthUser,
    State(state): State<AppState>,
    payload: Result<Json<CreateNoteRequest>, JsonRejection>,
) -> ApiResult<Json<NoteCreatedResponse>> {
    let mut req = json_body(payload)?;
    req.title = req.title.trim().to_string();
    if req.title.is_empty() {
        return Err(ApiError::Validation("Title is required".to_string()));
    }

    let note = state.repo.create_note(user.id, req).await?;

    tracing::info!(user_id = %user.id, note_id = %note.id, "note created");
    Ok(Json(NoteCreatedResponse {
        message: "Note created".to_string(),
        id: note.id,
    }))
}

/// update_note
///
/// [Authenticated Route] Partial update of the caller's own note.
///
/// *Authorization*: the repository update is constrained by `id AND user_id`. A note
/// owned by someone else is reported exactly like a missing one.
#[utoipa::path(
    put,
    path = "/notes/{id}",
    params(("id" = Uuid, Path, description = "Note ID")),
    request_body = UpdateNoteRequest,
    responses(
        (status = 200, description = "Updated", body = MessageResponse),
        (status = 400, description = "Invalid input"),
        (status = 404, description = "Not Found or Not Yours")
    )
)]
pub async fn update_note(
    user: AuthUser,
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateNoteRequest>, JsonRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let id = path_id(id, NOTE_NOT_FOUND)?;
    let mut req = json_body(payload)?;
    if let Some(title) = req.title.as_mut() {
        *title = title.trim().to_string();
        if title.is_empty() {
            return Err(ApiError::Validation("Title must not be empty".to_string()));
        }
    }

    match state.repo.update_note_owned(id, user.id, req).await? {
        Some(_) => {
            tracing::info!(user_id = %user.id, note_id = %id, "note updated");
            Ok(Json(MessageResponse::new("Note updated")))
        }
        None => Err(ApiError::NotFound(NOTE_NOT_FOUND)),
    }
}

/// delete_note
///
/// [Authenticated Route] Deletes the caller's own note together with its images.
/// Backing files of those images are removed best-effort afterwards.
#[utoipa::path(
    delete,
    path = "/notes/{id}",
    params(("id" = Uuid, Path, description = "Note ID")),
    responses(
        (status = 200, description = "Deleted", body = MessageResponse),
        (status = 404, description = "Not Found or Not Yours")
    )
)]
pub async fn delete_note(
    user: AuthUser,
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let id = path_id(id, NOTE_NOT_FOUND)?;

    let Some(stored_names) = state.repo.delete_note_owned(id, user.id).await? else {
        return Err(ApiError::NotFound(NOTE_NOT_FOUND));
    };
    for stored_name in &stored_names {
        remove_file_quietly(&state.storage, stored_name).await;
    }

    tracing::info!(user_id = %user.id, note_id = %id, images = stored_names.len(), "note deleted");
    Ok(Json(MessageResponse::new("Note deleted")))
}

/// upload_image
///
/// [Authenticated Route] Stores an uploaded file under a timestamp-prefixed unique name
/// and records it, optionally linked to `note_id`.
///
/// *Authorization*: with `upload_requires_note_owner` on (the default), `note_id` must be
/// one of the caller's notes. If the row cannot be created the stored file is removed.
#[utoipa::path(
    post,
    path = "/notes/image",
    request_body(content = UploadImageForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Uploaded", body = UploadResponse),
        (status = 400, description = "Missing file or bad note_id"),
        (status = 404, description = "Note not found")
    )
)]
pub async fn upload_image(
    user: AuthUser,
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<UploadResponse>> {
    let mut multipart = multipart.map_err(|_| ApiError::invalid_request())?;
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut note_id: Option<Uuid> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::invalid_request())?
    {
        match field.name() {
            Some("file") => {
                let name = field.file_name().unwrap_or("upload.bin").to_string();
                let bytes = field.bytes().await.map_err(|_| ApiError::invalid_request())?;
                file = Some((name, bytes.to_vec()));
            }
            Some("note_id") => {
                let raw = field.text().await.map_err(|_| ApiError::invalid_request())?;
                let raw = raw.trim();
                if !raw.is_empty() {
                    note_id = Some(
                        Uuid::parse_str(raw)
                            .map_err(|_| ApiError::Validation("Invalid note_id".to_string()))?,
                    );
                }
            }
            _ => continue,
        }
    }

    let Some((original_name, bytes)) = file else {
        return Err(ApiError::Validation("File not found".to_string()));
    };

    let stored = state.storage.save(&original_name, &bytes).await?;
    let owner = state.config.upload_requires_note_owner.then_some(user.id);

    let inserted = state
        .repo
        .create_image(
            NewImage {
                note_id,
                url: stored.url.clone(),
                stored_name: stored.stored_name.clone(),
            },
            owner,
        )
        .await;

    match inserted {
        Ok(ImageInsert::Created(image)) => {
            tracing::info!(
                user_id = %user.id,
                image_id = %image.id,
                note_id = ?image.note_id,
                size_bytes = bytes.len(),
                "image uploaded"
            );
            Ok(Json(UploadResponse {
                message: "Upload success".to_string(),
                image_url: stored.url,
            }))
        }
        // A note deleted between the insert and its foreign-key check is still a missing note.
        Ok(ImageInsert::NoteNotFound) | Err(RepositoryError::MissingReference("note")) => {
            remove_file_quietly(&state.storage, &stored.stored_name).await;
            Err(ApiError::NotFound(NOTE_NOT_FOUND))
        }
        Err(e) => {
            remove_file_quietly(&state.storage, &stored.stored_name).await;
            Err(e.into())
        }
    }
}

/// delete_image
///
/// [Authenticated Route] Deletes an image whose parent note the caller owns.
///
/// *Authorization*: transitive. The image has no owner column; the repository deletes
/// through the Image -> Note -> User join, so unlinked images and other users' images
/// both come back as 404.
#[utoipa::path(
    delete,
    path = "/notes/image/{id}",
    params(("id" = Uuid, Path, description = "Image ID")),
    responses(
        (status = 200, description = "Deleted", body = MessageResponse),
        (status = 404, description = "Not Found or Not Yours")
    )
)]
pub async fn delete_image(
    user: AuthUser,
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let id = path_id(id, IMAGE_NOT_FOUND)?;

    let Some(image) = state.repo.delete_image_owned(id, user.id).await? else {
        return Err(ApiError::NotFound(IMAGE_NOT_FOUND));
    };
    remove_file_quietly(&state.storage, &image.stored_name).await;

    tracing::info!(user_id = %user.id, image_id = %id, "image deleted");
    Ok(Json(MessageResponse::new("Image deleted")))
}
