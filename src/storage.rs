use async_trait::async_trait;
use chrono::Utc;
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex},
};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Unavailable(String),
}

/// StoredFile
///
/// Where an uploaded file ended up: its name under the upload root and the public URL
/// clients fetch it from.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    pub stored_name: String,
    pub url: String,
}

// 1. FileStore Contract
/// FileStore
///
/// Abstract contract for the upload storage backend. Handlers only see this trait, so
/// the local-disk store used in production can be swapped for the in-memory mock in tests.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Persists `bytes` under a collision-free name derived from `original_name`.
    async fn save(&self, original_name: &str, bytes: &[u8]) -> Result<StoredFile, StorageError>;

    /// Removes a previously stored file. Removing a missing file is an error.
    async fn remove(&self, stored_name: &str) -> Result<(), StorageError>;
}

/// StorageState
///
/// The concrete type used to share the storage backend across the application state.
pub type StorageState = Arc<dyn FileStore>;

/// sanitize_file_name
///
/// Reduces a client-supplied file name to its last path component and replaces every
/// character outside `[A-Za-z0-9._-]` with `_`. Blocks path traversal (`..`, `/`, `\`).
pub fn sanitize_file_name(original: &str) -> String {
    let last = original
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();
    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload.bin".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Builds `<unix-seconds>_<8 hex>_<sanitized name>`: timestamp-prefixed, and unique even
/// for two uploads of the same name in the same second.
pub fn unique_file_name(original: &str) -> String {
    let nonce = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}",
        Utc::now().timestamp(),
        &nonce[..8],
        sanitize_file_name(original)
    )
}

// 2. The Real Implementation (local disk)
/// LocalFileStore
///
/// Writes uploads under `root`; the router serves that directory at `/uploads`.
#[derive(Clone)]
pub struct LocalFileStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Creates the upload root if missing. Called once at startup.
    pub async fn ensure_root_exists(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    pub fn url_for(&self, stored_name: &str) -> String {
        format!("{}/uploads/{}", self.public_base_url, stored_name)
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn save(&self, original_name: &str, bytes: &[u8]) -> Result<StoredFile, StorageError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let stored_name = unique_file_name(original_name);
        tokio::fs::write(self.root.join(&stored_name), bytes).await?;
        Ok(StoredFile {
            url: self.url_for(&stored_name),
            stored_name,
        })
    }

    async fn remove(&self, stored_name: &str) -> Result<(), StorageError> {
        // Stored names are generated by `save`, but never let one escape the root.
        let name = sanitize_file_name(stored_name);
        tokio::fs::remove_file(self.root.join(name)).await?;
        Ok(())
    }
}

// 3. The Mock Implementation (For Tests)
/// MockFileStore
///
/// In-memory `FileStore` used by the test suites. Keeps the saved bytes so tests can
/// assert that uploads landed and deletions removed them.
#[derive(Clone, Default)]
pub struct MockFileStore {
    /// When true, `save` fails with a simulated outage.
    pub should_fail: bool,
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MockFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub fn contains(&self, stored_name: &str) -> bool {
        self.files
            .lock()
            .map(|files| files.contains_key(stored_name))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.files.lock().map(|files| files.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FileStore for MockFileStore {
    async fn save(&self, original_name: &str, bytes: &[u8]) -> Result<StoredFile, StorageError> {
        if self.should_fail {
            return Err(StorageError::Unavailable(
                "Mock Storage Error: Simulation requested".to_string(),
            ));
        }
        let stored_name = unique_file_name(original_name);
        self.files
            .lock()
            .map_err(|_| StorageError::Unavailable("mock store poisoned".to_string()))?
            .insert(stored_name.clone(), bytes.to_vec());
        Ok(StoredFile {
            url: format!("http://localhost:8080/uploads/{stored_name}"),
            stored_name,
        })
    }

    async fn remove(&self, stored_name: &str) -> Result<(), StorageError> {
        let removed = self
            .files
            .lock()
            .map_err(|_| StorageError::Unavailable("mock store poisoned".to_string()))?
            .remove(stored_name);
        match removed {
            Some(_) => Ok(()),
            None => Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no such mock file",
            ))),
        }
    }
}
