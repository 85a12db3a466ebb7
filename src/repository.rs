use crate::models::{
    CreateNoteRequest, Image, NewAuditRecord, NewImage, NewUser, Note, UpdateNoteRequest, User,
};
use async_trait::async_trait;
use sqlx::PgPool;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use uuid::Uuid;

/// RepositoryError
///
/// Data-layer failures, already classified so handlers can map them to a response kind.
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// A unique constraint rejected the write (e.g. duplicate email).
    #[error("{0}")]
    Conflict(String),

    /// A foreign key pointed at a row that does not exist.
    #[error("missing referenced {0}")]
    MissingReference(&'static str),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type RepoResult<T> = Result<T, RepositoryError>;

/// Outcome of attaching an uploaded image to a note.
#[derive(Debug)]
pub enum ImageInsert {
    Created(Image),
    /// The requested note does not exist, or (when ownership is enforced) is not the caller's.
    NoteNotFound,
}

/// Repository Trait
///
/// Abstract contract for all persistence operations, shared as `Arc<dyn Repository>`.
///
/// Every owner-scoped mutation is a single conditional statement (or one transaction):
/// the ownership check and the write cannot be separated by a concurrent request.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    async fn create_user(&self, user: NewUser) -> RepoResult<User>;
    async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>>;

    // --- Notes (public reads, images eager-loaded) ---
    async fn list_notes(&self) -> RepoResult<Vec<Note>>;
    async fn get_note(&self, id: Uuid) -> RepoResult<Option<Note>>;

    // --- Notes (owner actions) ---
    async fn create_note(&self, user_id: Uuid, req: CreateNoteRequest) -> RepoResult<Note>;
    /// Partial update constrained by `id AND user_id`. `None` when nothing matched.
    async fn update_note_owned(
        &self,
        id: Uuid,
        user_id: Uuid,
        req: UpdateNoteRequest,
    ) -> RepoResult<Option<Note>>;
    /// Deletes the note and its images. Returns the stored file names of the removed
    /// images, or `None` when the note does not exist or is not owned by `user_id`.
    async fn delete_note_owned(&self, id: Uuid, user_id: Uuid) -> RepoResult<Option<Vec<String>>>;

    // --- Images ---
    /// Inserts an image row. With a `note_id`, the row is only created if the note exists
    /// and, when `owner` is `Some`, belongs to that user.
    async fn create_image(&self, image: NewImage, owner: Option<Uuid>) -> RepoResult<ImageInsert>;
    /// Deletes an image whose parent note is owned by `user_id` (Image -> Note -> User join).
    async fn delete_image_owned(&self, id: Uuid, user_id: Uuid) -> RepoResult<Option<Image>>;

    // --- Audit ---
    async fn insert_audit_record(&self, record: NewAuditRecord) -> RepoResult<()>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

/// PostgresRepository
///
/// The concrete implementation of the `Repository` trait, backed by PostgreSQL.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Loads the images of the given notes in one query and attaches them.
    async fn attach_images(&self, notes: &mut [Note]) -> RepoResult<()> {
        if notes.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = notes.iter().map(|n| n.id).collect();
        let images = sqlx::query_as::<_, Image>(
            r#"
            SELECT id, note_id, url, stored_name, created_at
            FROM images
            WHERE note_id = ANY($1)
            ORDER BY created_at ASC
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_note: HashMap<Uuid, Vec<Image>> = HashMap::new();
        for image in images {
            if let Some(note_id) = image.note_id {
                by_note.entry(note_id).or_default().push(image);
            }
        }
        for note in notes.iter_mut() {
            note.images = by_note.remove(&note.id).unwrap_or_default();
        }
        Ok(())
    }
}

/// Classifies constraint violations; everything else stays a database error.
fn classify(err: sqlx::Error, reference: &'static str) -> RepositoryError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return RepositoryError::Conflict("Email already registered".to_string());
        }
        if db_err.is_foreign_key_violation() {
            return RepositoryError::MissingReference(reference);
        }
    }
    RepositoryError::Database(err)
}

/// Folds the result of the conditional image insert into an `ImageInsert`.
///
/// A foreign-key failure means the note vanished between the `SELECT` and the FK check,
/// which is the same outcome as the note never matching.
pub fn image_insert_outcome(created: RepoResult<Option<Image>>) -> RepoResult<ImageInsert> {
    match created {
        Ok(Some(image)) => Ok(ImageInsert::Created(image)),
        Ok(None) | Err(RepositoryError::MissingReference("note")) => Ok(ImageInsert::NoteNotFound),
        Err(e) => Err(e),
    }
}

const NOTE_COLUMNS: &str = "id, user_id, title, content, created_at, updated_at";

#[async_trait]
impl Repository for PostgresRepository {
    async fn create_user(&self, user: NewUser) -> RepoResult<User> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, name, email, password_hash, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING id, name, email, password_hash, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user.name)
        .bind(user.email)
        .bind(user.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(e, "user"))
    }

    async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, name, email, password_hash, created_at FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn list_notes(&self) -> RepoResult<Vec<Note>> {
        let mut notes = sqlx::query_as::<_, Note>(&format!(
            "SELECT {NOTE_COLUMNS} FROM notes ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        self.attach_images(&mut notes).await?;
        Ok(notes)
    }

    async fn get_note(&self, id: Uuid) -> RepoResult<Option<Note>> {
        let note = sqlx::query_as::<_, Note>(&format!(
            "SELECT {NOTE_COLUMNS} FROM notes WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match note {
            Some(note) => {
                let mut notes = [note];
                self.attach_images(&mut notes).await?;
                let [note] = notes;
                Ok(Some(note))
            }
            None => Ok(None),
        }
    }

    async fn create_note(&self, user_id: Uuid, req: CreateNoteRequest) -> RepoResult<Note> {
        sqlx::query_as::<_, Note>(&format!(
            r#"
            INSERT INTO notes (id, user_id, title, content, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            RETURNING {NOTE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(req.title)
        .bind(req.content)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(e, "user"))
    }

    /// Uses `COALESCE` so only provided fields change; `WHERE id AND user_id` is the
    /// ownership check, evaluated atomically with the write.
    async fn update_note_owned(
        &self,
        id: Uuid,
        user_id: Uuid,
        req: UpdateNoteRequest,
    ) -> RepoResult<Option<Note>> {
        let note = sqlx::query_as::<_, Note>(&format!(
            r#"
            UPDATE notes
            SET title = COALESCE($3, title),
                content = COALESCE($4, content),
                updated_at = NOW()
            WHERE id = $1 AND user_id = $2
            RETURNING {NOTE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(user_id)
        .bind(req.title)
        .bind(req.content)
        .fetch_optional(&self.pool)
        .await?;

        match note {
            Some(note) => {
                let mut notes = [note];
                self.attach_images(&mut notes).await?;
                let [note] = notes;
                Ok(Some(note))
            }
            None => Ok(None),
        }
    }

    async fn delete_note_owned(&self, id: Uuid, user_id: Uuid) -> RepoResult<Option<Vec<String>>> {
        let mut tx = self.pool.begin().await?;

        // Locks the note row so a concurrent upload cannot link a new image mid-delete.
        let owned = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM notes WHERE id = $1 AND user_id = $2 FOR UPDATE",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        if owned.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        let stored_names = sqlx::query_scalar::<_, String>(
            "DELETE FROM images WHERE note_id = $1 RETURNING stored_name",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM notes WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(stored_names))
    }

    async fn create_image(&self, image: NewImage, owner: Option<Uuid>) -> RepoResult<ImageInsert> {
        let id = Uuid::new_v4();

        let Some(note_id) = image.note_id else {
            let created = sqlx::query_as::<_, Image>(
                r#"
                INSERT INTO images (id, note_id, url, stored_name, created_at)
                VALUES ($1, NULL, $2, $3, NOW())
                RETURNING id, note_id, url, stored_name, created_at
                "#,
            )
            .bind(id)
            .bind(image.url)
            .bind(image.stored_name)
            .fetch_one(&self.pool)
            .await?;
            return Ok(ImageInsert::Created(created));
        };

        // Conditional insert: the row only exists if the parent note matched, so the
        // existence/ownership check and the write are one statement.
        let created = sqlx::query_as::<_, Image>(
            r#"
            INSERT INTO images (id, note_id, url, stored_name, created_at)
            SELECT $1, n.id, $3, $4, NOW()
            FROM notes n
            WHERE n.id = $2 AND ($5::uuid IS NULL OR n.user_id = $5)
            RETURNING id, note_id, url, stored_name, created_at
            "#,
        )
        .bind(id)
        .bind(note_id)
        .bind(image.url)
        .bind(image.stored_name)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify(e, "note"));

        image_insert_outcome(created)
    }

    async fn delete_image_owned(&self, id: Uuid, user_id: Uuid) -> RepoResult<Option<Image>> {
        let image = sqlx::query_as::<_, Image>(
            r#"
            DELETE FROM images i
            USING notes n
            WHERE i.id = $1 AND i.note_id = n.id AND n.user_id = $2
            RETURNING i.id, i.note_id, i.url, i.stored_name, i.created_at
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(image)
    }

    async fn insert_audit_record(&self, record: NewAuditRecord) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_records
                (id, method, path, headers, request_body, response_body, status_code, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.method)
        .bind(record.path)
        .bind(sqlx::types::Json(record.headers))
        .bind(record.request_body)
        .bind(record.response_body)
        .bind(record.status_code)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
