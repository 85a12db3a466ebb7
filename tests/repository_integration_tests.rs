//! The database tests run against a live Postgres and are ignored by default:
//! `DATABASE_URL=postgres://... cargo test -- --ignored`

use notes_share::{
    models::{
        CreateNoteRequest, Image, NewAuditRecord, NewImage, NewUser, UpdateNoteRequest, User,
    },
    repository::{
        ImageInsert, PostgresRepository, Repository, RepositoryError, image_insert_outcome,
    },
};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

// --- Test Context and Setup ---

struct DbTestContext {
    pool: PgPool,
}

impl DbTestContext {
    async fn setup() -> Self {
        dotenv::dotenv().ok();

        let db_url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set to run integration tests");

        let pool = PgPool::connect(&db_url)
            .await
            .expect("Failed to connect to database for integration tests.");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run database migrations.");

        DbTestContext { pool }
    }

    fn repository(&self) -> PostgresRepository {
        PostgresRepository::new(self.pool.clone())
    }
}

// --- Test Data Helpers ---

async fn create_test_user(repo: &PostgresRepository) -> User {
    repo.create_user(NewUser {
        name: "Tester".to_string(),
        email: format!("{}@test.com", Uuid::new_v4()),
        password_hash: "hash".to_string(),
    })
    .await
    .expect("Failed to create test user")
}

fn new_image(note_id: Option<Uuid>) -> NewImage {
    let stored_name = format!("{}_pic.png", Uuid::new_v4().simple());
    NewImage {
        note_id,
        url: format!("http://localhost:8080/uploads/{stored_name}"),
        stored_name,
    }
}

fn note_request(title: &str) -> CreateNoteRequest {
    CreateNoteRequest {
        title: title.to_string(),
        content: "content".to_string(),
    }
}

// --- Users ---

#[tokio::test]
#[ignore]
async fn test_duplicate_email_is_conflict() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let user = create_test_user(&repo).await;

    let result = repo
        .create_user(NewUser {
            name: "Again".to_string(),
            email: user.email.clone(),
            password_hash: "hash".to_string(),
        })
        .await;

    assert!(matches!(result, Err(RepositoryError::Conflict(_))));
    let found = repo.find_user_by_email(&user.email).await.unwrap().unwrap();
    assert_eq!(found.id, user.id);
}

// --- Notes ---

#[tokio::test]
#[ignore]
async fn test_note_for_unknown_user_is_missing_reference() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();

    let result = repo.create_note(Uuid::new_v4(), note_request("orphan")).await;
    assert!(matches!(result, Err(RepositoryError::MissingReference("user"))));
}

#[tokio::test]
#[ignore]
async fn test_update_is_scoped_to_owner() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let owner = create_test_user(&repo).await;
    let stranger = create_test_user(&repo).await;
    let note = repo.create_note(owner.id, note_request("original")).await.unwrap();

    let denied = repo
        .update_note_owned(
            note.id,
            stranger.id,
            UpdateNoteRequest {
                title: Some("stolen".to_string()),
                content: None,
            },
        )
        .await
        .unwrap();
    assert!(denied.is_none());

    let updated = repo
        .update_note_owned(
            note.id,
            owner.id,
            UpdateNoteRequest {
                title: None,
                content: Some("new body".to_string()),
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.title, "original");
    assert_eq!(updated.content, "new body");
    assert!(updated.updated_at >= note.updated_at);
}

#[tokio::test]
#[ignore]
async fn test_delete_note_removes_its_images() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let owner = create_test_user(&repo).await;
    let stranger = create_test_user(&repo).await;
    let note = repo.create_note(owner.id, note_request("doomed")).await.unwrap();
    let image = new_image(Some(note.id));
    let stored_name = image.stored_name.clone();
    repo.create_image(image, Some(owner.id)).await.unwrap();

    assert!(repo.delete_note_owned(note.id, stranger.id).await.unwrap().is_none());

    let removed = repo.delete_note_owned(note.id, owner.id).await.unwrap().unwrap();
    assert_eq!(removed, vec![stored_name]);
    assert!(repo.get_note(note.id).await.unwrap().is_none());
}

// --- Images ---

#[tokio::test]
#[ignore]
async fn test_image_link_respects_owner() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let owner = create_test_user(&repo).await;
    let stranger = create_test_user(&repo).await;
    let note = repo.create_note(owner.id, note_request("pics")).await.unwrap();

    let denied = repo
        .create_image(new_image(Some(note.id)), Some(stranger.id))
        .await
        .unwrap();
    assert!(matches!(denied, ImageInsert::NoteNotFound));

    let unknown = repo
        .create_image(new_image(Some(Uuid::new_v4())), None)
        .await
        .unwrap();
    assert!(matches!(unknown, ImageInsert::NoteNotFound));

    let ImageInsert::Created(image) = repo
        .create_image(new_image(Some(note.id)), Some(owner.id))
        .await
        .unwrap()
    else {
        panic!("owner should be able to attach an image");
    };

    let loaded = repo.get_note(note.id).await.unwrap().unwrap();
    assert_eq!(loaded.images.len(), 1);
    assert_eq!(loaded.images[0].id, image.id);

    assert!(repo.delete_image_owned(image.id, stranger.id).await.unwrap().is_none());
    let deleted = repo.delete_image_owned(image.id, owner.id).await.unwrap().unwrap();
    assert_eq!(deleted.id, image.id);
}

#[test]
fn test_vanished_note_on_image_link_is_not_found() {
    assert!(matches!(
        image_insert_outcome(Err(RepositoryError::MissingReference("note"))),
        Ok(ImageInsert::NoteNotFound)
    ));
    assert!(matches!(image_insert_outcome(Ok(None)), Ok(ImageInsert::NoteNotFound)));
    assert!(matches!(
        image_insert_outcome(Ok(Some(Image::default()))),
        Ok(ImageInsert::Created(_))
    ));
    assert!(matches!(
        image_insert_outcome(Err(RepositoryError::Database(sqlx::Error::PoolClosed))),
        Err(RepositoryError::Database(_))
    ));
}

#[tokio::test]
#[ignore]
async fn test_unlinked_image_is_not_deletable() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let user = create_test_user(&repo).await;

    let ImageInsert::Created(image) = repo.create_image(new_image(None), Some(user.id)).await.unwrap()
    else {
        panic!("unlinked upload should be stored");
    };
    assert_eq!(image.note_id, None);
    assert!(repo.delete_image_owned(image.id, user.id).await.unwrap().is_none());
}

// --- Audit ---

#[tokio::test]
#[ignore]
async fn test_audit_record_is_persisted() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let path = format!("/notes/{}", Uuid::new_v4());

    repo.insert_audit_record(NewAuditRecord {
        method: "GET".to_string(),
        path: path.clone(),
        headers: json!({"accept": ["application/json"]}),
        request_body: vec![],
        response_body: r#"{"error":"Note not found"}"#.to_string(),
        status_code: 404,
    })
    .await
    .unwrap();

    let (status, headers): (i32, sqlx::types::Json<serde_json::Value>) = sqlx::query_as(
        "SELECT status_code, headers FROM audit_records WHERE path = $1",
    )
    .bind(&path)
    .fetch_one(&ctx.pool)
    .await
    .unwrap();
    assert_eq!(status, 404);
    assert_eq!(headers.0["accept"][0], "application/json");
}
