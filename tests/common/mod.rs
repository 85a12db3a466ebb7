#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use chrono::Utc;
use notes_share::{
    AppConfig, AppState, MockFileStore, TokenService, create_router,
    models::{CreateNoteRequest, Image, NewAuditRecord, NewImage, NewUser, Note, UpdateNoteRequest, User},
    repository::{ImageInsert, RepoResult, Repository, RepositoryError, RepositoryState},
    storage::StorageState,
    token::TokenState,
};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use uuid::Uuid;

// --- IN-MEMORY REPOSITORY ---

#[derive(Default)]
struct MemoryState {
    users: Vec<User>,
    notes: Vec<Note>,
    images: Vec<Image>,
    audit: Vec<NewAuditRecord>,
}

/// MemoryRepository
///
/// A `Repository` over plain vectors with the same ownership rules as the Postgres
/// implementation: owner-scoped mutations match on `id AND user_id`, image deletion goes
/// through the parent note.
#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<MemoryState>,
    /// When true, every audit insert fails.
    pub fail_audit: bool,
    /// When true, linking an image to a note fails the foreign-key check, as when the
    /// note is deleted concurrently with the upload.
    pub note_vanishes_on_link: bool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failing_audit() -> Self {
        Self {
            fail_audit: true,
            ..Self::default()
        }
    }

    pub fn with_vanishing_notes() -> Self {
        Self {
            note_vanishes_on_link: true,
            ..Self::default()
        }
    }

    pub fn audit_records(&self) -> Vec<NewAuditRecord> {
        self.state.lock().unwrap().audit.clone()
    }

    pub fn images(&self) -> Vec<Image> {
        self.state.lock().unwrap().images.clone()
    }

    pub fn note(&self, id: Uuid) -> Option<Note> {
        let state = self.state.lock().unwrap();
        state.notes.iter().find(|n| n.id == id).cloned()
    }

    /// Inserts a note directly, bypassing the HTTP layer.
    pub fn seed_note(&self, user_id: Uuid, title: &str) -> Uuid {
        let now = Utc::now();
        let note = Note {
            id: Uuid::new_v4(),
            user_id,
            title: title.to_string(),
            content: String::new(),
            created_at: now,
            updated_at: now,
            images: vec![],
        };
        let id = note.id;
        self.state.lock().unwrap().notes.push(note);
        id
    }

    pub fn seed_image(&self, note_id: Option<Uuid>, stored_name: &str) -> Uuid {
        let image = Image {
            id: Uuid::new_v4(),
            note_id,
            url: format!("http://localhost:8080/uploads/{stored_name}"),
            stored_name: stored_name.to_string(),
            created_at: Utc::now(),
        };
        let id = image.id;
        self.state.lock().unwrap().images.push(image);
        id
    }

    fn with_images(note: &Note, images: &[Image]) -> Note {
        let mut note = note.clone();
        note.images = images
            .iter()
            .filter(|i| i.note_id == Some(note.id))
            .cloned()
            .collect();
        note
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_user(&self, user: NewUser) -> RepoResult<User> {
        let mut state = self.state.lock().unwrap();
        if state.users.iter().any(|u| u.email == user.email) {
            return Err(RepositoryError::Conflict(
                "Email already registered".to_string(),
            ));
        }
        let created = User {
            id: Uuid::new_v4(),
            name: user.name,
            email: user.email,
            password_hash: user.password_hash,
            created_at: Utc::now(),
        };
        state.users.push(created.clone());
        Ok(created)
    }

    async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let state = self.state.lock().unwrap();
        Ok(state.users.iter().find(|u| u.email == email).cloned())
    }

    async fn list_notes(&self) -> RepoResult<Vec<Note>> {
        let state = self.state.lock().unwrap();
        let mut notes: Vec<Note> = state
            .notes
            .iter()
            .map(|n| Self::with_images(n, &state.images))
            .collect();
        notes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notes)
    }

    async fn get_note(&self, id: Uuid) -> RepoResult<Option<Note>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .notes
            .iter()
            .find(|n| n.id == id)
            .map(|n| Self::with_images(n, &state.images)))
    }

    async fn create_note(&self, user_id: Uuid, req: CreateNoteRequest) -> RepoResult<Note> {
        let mut state = self.state.lock().unwrap();
        if !state.users.iter().any(|u| u.id == user_id) {
            return Err(RepositoryError::MissingReference("user"));
        }
        let now = Utc::now();
        let note = Note {
            id: Uuid::new_v4(),
            user_id,
            title: req.title,
            content: req.content,
            created_at: now,
            updated_at: now,
            images: vec![],
        };
        state.notes.push(note.clone());
        Ok(note)
    }

    async fn update_note_owned(
        &self,
        id: Uuid,
        user_id: Uuid,
        req: UpdateNoteRequest,
    ) -> RepoResult<Option<Note>> {
        let mut state = self.state.lock().unwrap();
        let Some(note) = state
            .notes
            .iter_mut()
            .find(|n| n.id == id && n.user_id == user_id)
        else {
            return Ok(None);
        };
        if let Some(title) = req.title {
            note.title = title;
        }
        if let Some(content) = req.content {
            note.content = content;
        }
        note.updated_at = Utc::now();
        Ok(Some(note.clone()))
    }

    async fn delete_note_owned(&self, id: Uuid, user_id: Uuid) -> RepoResult<Option<Vec<String>>> {
        let mut state = self.state.lock().unwrap();
        let before = state.notes.len();
        state.notes.retain(|n| !(n.id == id && n.user_id == user_id));
        if state.notes.len() == before {
            return Ok(None);
        }
        let (removed, kept): (Vec<Image>, Vec<Image>) = state
            .images
            .drain(..)
            .partition(|i| i.note_id == Some(id));
        state.images = kept;
        Ok(Some(removed.into_iter().map(|i| i.stored_name).collect()))
    }

    async fn create_image(&self, image: NewImage, owner: Option<Uuid>) -> RepoResult<ImageInsert> {
        if self.note_vanishes_on_link && image.note_id.is_some() {
            return Err(RepositoryError::MissingReference("note"));
        }
        let mut state = self.state.lock().unwrap();
        if let Some(note_id) = image.note_id {
            let linkable = state
                .notes
                .iter()
                .any(|n| n.id == note_id && owner.is_none_or(|owner| n.user_id == owner));
            if !linkable {
                return Ok(ImageInsert::NoteNotFound);
            }
        }
        let created = Image {
            id: Uuid::new_v4(),
            note_id: image.note_id,
            url: image.url,
            stored_name: image.stored_name,
            created_at: Utc::now(),
        };
        state.images.push(created.clone());
        Ok(ImageInsert::Created(created))
    }

    async fn delete_image_owned(&self, id: Uuid, user_id: Uuid) -> RepoResult<Option<Image>> {
        let mut state = self.state.lock().unwrap();
        let owned_notes: Vec<Uuid> = state
            .notes
            .iter()
            .filter(|n| n.user_id == user_id)
            .map(|n| n.id)
            .collect();
        let Some(pos) = state.images.iter().position(|i| {
            i.id == id && i.note_id.is_some_and(|note_id| owned_notes.contains(&note_id))
        }) else {
            return Ok(None);
        };
        Ok(Some(state.images.remove(pos)))
    }

    async fn insert_audit_record(&self, record: NewAuditRecord) -> RepoResult<()> {
        if self.fail_audit {
            return Err(RepositoryError::Database(sqlx::Error::PoolClosed));
        }
        self.state.lock().unwrap().audit.push(record);
        Ok(())
    }
}

// --- TEST APPLICATION ---

pub const TEST_SECRET: &str = "integration-test-secret";

pub struct TestApp {
    pub router: Router,
    pub repo: Arc<MemoryRepository>,
    pub storage: MockFileStore,
    pub tokens: TokenState,
    pub state: AppState,
}

impl TestApp {
    /// Registers a user straight in the repository and returns its id and a valid token.
    /// Skips Argon2 so scenario tests stay fast; the login flow has its own test.
    pub async fn user_with_token(&self, name: &str) -> (Uuid, String) {
        let user = self
            .repo
            .create_user(NewUser {
                name: name.to_string(),
                email: format!("{}@example.com", name.to_lowercase()),
                password_hash: "unused".to_string(),
            })
            .await
            .unwrap();
        let token = self.tokens.issue(user.id, &user.email).unwrap();
        (user.id, token)
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        send(&self.router, request).await
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        jwt_secret: TEST_SECRET.to_string(),
        ..AppConfig::default()
    }
}

pub fn spawn_app() -> TestApp {
    spawn_app_with(test_config(), MemoryRepository::new(), MockFileStore::new())
}

pub fn spawn_app_with(config: AppConfig, repo: MemoryRepository, storage: MockFileStore) -> TestApp {
    let repo = Arc::new(repo);
    let tokens: TokenState = Arc::new(TokenService::new(&config.jwt_secret));
    let state = AppState {
        repo: repo.clone() as RepositoryState,
        storage: Arc::new(storage.clone()) as StorageState,
        tokens: tokens.clone(),
        config,
    };
    TestApp {
        router: create_router(state.clone()),
        repo,
        storage,
        tokens,
        state,
    }
}

// --- REQUEST HELPERS ---

pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn empty_request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

pub const BOUNDARY: &str = "test-boundary-7MA4YWxkTrZu0gW";

/// Builds a `multipart/form-data` upload with an optional `file` part and `note_id` part.
pub fn multipart_request(
    token: Option<&str>,
    file: Option<(&str, &[u8])>,
    note_id: Option<&str>,
) -> Request<Body> {
    let mut body: Vec<u8> = Vec::new();
    if let Some(note_id) = note_id {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"note_id\"\r\n\r\n{note_id}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    let mut builder = Request::builder()
        .method("POST")
        .uri("/notes/image")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body)).unwrap()
}
