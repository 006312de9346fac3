use crate::config::EmberchatPaths;
use blake3::Hasher;
use bytes::Bytes;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("file data may not be empty")]
    EmptyPayload,
    #[error("invalid file name: {0}")]
    InvalidName(String),
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("unknown file scope: {0}")]
    UnknownScope(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Which lifecycle area a file lives in. `Public` files are routable via
/// `/files/<name>`; `Archived` files are retained privately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileScope {
    Public,
    Archived,
}

impl FileScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileScope::Public => "public",
            FileScope::Archived => "archived",
        }
    }
}

impl FromStr for FileScope {
    type Err = StoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "public" => Ok(FileScope::Public),
            "archived" => Ok(FileScope::Archived),
            other => Err(StoreError::UnknownScope(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SavedFile {
    pub name: String,
    pub url: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct StoredFileInfo {
    pub name: String,
    pub size_bytes: u64,
    pub created: SystemTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    pub name: String,
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Adapter over the on-disk blob areas. Owns no mutable state; every method
/// is plain filesystem I/O against the public or archive directory.
#[derive(Clone)]
pub struct FileStore {
    paths: EmberchatPaths,
    public_base_url: String,
}

impl FileStore {
    pub fn new(paths: EmberchatPaths, public_base_url: String) -> Self {
        Self {
            paths,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// The durable URL a stored name serves from. This exact string is what
    /// the resolution map records and what archival later invalidates.
    pub fn public_url(&self, name: &str) -> String {
        format!("{}/files/{}", self.public_base_url, name)
    }

    pub fn public_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        validate_stored_name(name)?;
        Ok(self.paths.public_dir.join(name))
    }

    fn area_dir(&self, scope: FileScope) -> &Path {
        match scope {
            FileScope::Public => &self.paths.public_dir,
            FileScope::Archived => &self.paths.archive_dir,
        }
    }

    /// Writes an uploaded payload into the public area and returns its
    /// durable URL. The stored name is derived from the content hash so a
    /// re-upload of identical bytes lands on the same name.
    pub async fn save_upload(
        &self,
        data: Bytes,
        original_name: Option<&str>,
        mime: Option<&str>,
    ) -> Result<SavedFile, StoreError> {
        if data.is_empty() {
            return Err(StoreError::EmptyPayload);
        }

        let mut hasher = Hasher::new();
        hasher.update(&data);
        let digest = hasher.finalize().to_hex().to_string();

        let extension = original_name
            .map(sanitize_filename)
            .as_deref()
            .and_then(|name| {
                Path::new(name)
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.to_lowercase())
            })
            .filter(|ext| !ext.is_empty())
            .or_else(|| infer::get(&data).map(|kind| kind.extension().to_string()));

        let name = match extension {
            Some(ext) => format!("{}.{ext}", &digest[..16]),
            None => digest[..16].to_string(),
        };

        let absolute_path = self.paths.public_dir.join(&name);
        if let Some(parent) = absolute_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&absolute_path, &data).await?;

        tracing::debug!(
            name = %name,
            size_bytes = data.len(),
            mime = ?mime,
            "stored uploaded blob in public area"
        );

        Ok(SavedFile {
            url: self.public_url(&name),
            name,
            size_bytes: data.len() as u64,
        })
    }

    /// Enumerates an area with sizes and creation times. Entries whose
    /// metadata cannot be read are logged and skipped.
    pub async fn list_area(&self, scope: FileScope) -> Result<Vec<StoredFileInfo>, StoreError> {
        let dir = self.area_dir(scope);
        let mut listing = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    tracing::warn!(name = ?raw, "skipping file with non-utf8 name");
                    continue;
                }
            };
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(err) => {
                    tracing::warn!(name = %name, error = ?err, "failed to stat file, skipping");
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }
            listing.push(StoredFileInfo {
                name,
                size_bytes: metadata.len(),
                created: file_created(&metadata),
            });
        }
        listing.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listing)
    }

    /// Atomically moves a public file into the archive area. Rename, not
    /// copy-then-delete: the file is never visible in both areas.
    pub async fn archive(&self, name: &str) -> Result<(), StoreError> {
        validate_stored_name(name)?;
        let source = self.paths.public_dir.join(name);
        let target = self.paths.archive_dir.join(name);
        match fs::rename(&source, &target).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(name.to_string()))
            }
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    pub async fn delete_one(&self, scope: FileScope, name: &str) -> Result<(), StoreError> {
        validate_stored_name(name)?;
        let path = self.area_dir(scope).join(name);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(name.to_string()))
            }
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    /// Deletes every file in an area, reporting success or failure per item.
    /// One failed removal never aborts the rest.
    pub async fn delete_all(&self, scope: FileScope) -> Result<Vec<DeleteOutcome>, StoreError> {
        let files = self.list_area(scope).await?;
        let mut outcomes = Vec::with_capacity(files.len());
        for file in files {
            let outcome = match self.delete_one(scope, &file.name).await {
                Ok(()) => DeleteOutcome {
                    name: file.name,
                    deleted: true,
                    error: None,
                },
                Err(err) => {
                    tracing::warn!(name = %file.name, error = ?err, "failed to delete file");
                    DeleteOutcome {
                        name: file.name,
                        deleted: false,
                        error: Some(err.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

/// Creation time with a fallback for filesystems that do not record birth
/// times; a sweep then ages on last modification instead.
fn file_created(metadata: &std::fs::Metadata) -> SystemTime {
    metadata
        .created()
        .or_else(|_| metadata.modified())
        .unwrap_or_else(|_| SystemTime::now())
}

fn validate_stored_name(name: &str) -> Result<(), StoreError> {
    let is_bare = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\');
    if is_bare {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

fn sanitize_filename(name: &str) -> String {
    Path::new(name)
        .file_name()
        .and_then(|file| file.to_str())
        .unwrap_or("upload")
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmberchatPaths;
    use tempfile::tempdir;
    use tokio::runtime::Runtime;

    fn setup_store(base: &Path) -> FileStore {
        let paths = EmberchatPaths::from_base_dir(base).expect("paths");
        std::fs::create_dir_all(&paths.public_dir).expect("public dir");
        std::fs::create_dir_all(&paths.archive_dir).expect("archive dir");
        FileStore::new(paths, "http://127.0.0.1:8080".into())
    }

    #[test]
    fn save_and_list_uploads() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let temp = tempdir().expect("tempdir");
            let store = setup_store(temp.path());

            let saved = store
                .save_upload(Bytes::from_static(b"hello"), Some("note.TXT"), None)
                .await
                .expect("save upload");
            assert!(saved.name.ends_with(".txt"));
            assert_eq!(saved.size_bytes, 5);
            assert_eq!(saved.url, store.public_url(&saved.name));

            let listing = store.list_area(FileScope::Public).await.expect("list");
            assert_eq!(listing.len(), 1);
            assert_eq!(listing[0].name, saved.name);
            assert_eq!(listing[0].size_bytes, 5);

            // Identical bytes land on the same content-derived name.
            let again = store
                .save_upload(Bytes::from_static(b"hello"), Some("other.txt"), None)
                .await
                .expect("save again");
            assert_eq!(again.name, saved.name);
        });
    }

    #[test]
    fn empty_payload_is_rejected() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let temp = tempdir().expect("tempdir");
            let store = setup_store(temp.path());
            let err = store
                .save_upload(Bytes::new(), Some("empty.bin"), None)
                .await
                .expect_err("must reject");
            assert!(matches!(err, StoreError::EmptyPayload));
        });
    }

    #[test]
    fn extension_inferred_from_bytes_when_name_is_unusable() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let temp = tempdir().expect("tempdir");
            let store = setup_store(temp.path());
            // Minimal PNG magic; infer recognizes the signature.
            let png = Bytes::from_static(&[
                0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D,
            ]);
            let saved = store.save_upload(png, None, None).await.expect("save");
            assert!(saved.name.ends_with(".png"));
        });
    }

    #[test]
    fn archive_moves_between_areas() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let temp = tempdir().expect("tempdir");
            let store = setup_store(temp.path());
            let saved = store
                .save_upload(Bytes::from_static(b"payload"), Some("p.bin"), None)
                .await
                .expect("save");

            store.archive(&saved.name).await.expect("archive");

            assert!(store.list_area(FileScope::Public).await.unwrap().is_empty());
            let archived = store.list_area(FileScope::Archived).await.unwrap();
            assert_eq!(archived.len(), 1);
            assert_eq!(archived[0].name, saved.name);

            let err = store.archive(&saved.name).await.expect_err("already gone");
            assert!(matches!(err, StoreError::NotFound(_)));
        });
    }

    #[test]
    fn delete_all_reports_per_item_outcomes() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let temp = tempdir().expect("tempdir");
            let store = setup_store(temp.path());
            store
                .save_upload(Bytes::from_static(b"one"), Some("a.bin"), None)
                .await
                .expect("save one");
            store
                .save_upload(Bytes::from_static(b"two"), Some("b.bin"), None)
                .await
                .expect("save two");

            let outcomes = store.delete_all(FileScope::Public).await.expect("clear");
            assert_eq!(outcomes.len(), 2);
            assert!(outcomes.iter().all(|o| o.deleted));
            assert!(store.list_area(FileScope::Public).await.unwrap().is_empty());
        });
    }

    #[test]
    fn traversal_names_are_rejected() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let temp = tempdir().expect("tempdir");
            let store = setup_store(temp.path());
            let err = store.archive("../escape").await.expect_err("must reject");
            assert!(matches!(err, StoreError::InvalidName(_)));
            assert!(store.public_path("a/../b").is_err());
            assert!(store.public_path("ok.png").is_ok());
        });
    }

    #[test]
    fn unknown_scope_fails_to_parse() {
        assert!(matches!(
            "everything".parse::<FileScope>(),
            Err(StoreError::UnknownScope(_))
        ));
        assert_eq!("public".parse::<FileScope>().unwrap(), FileScope::Public);
        assert_eq!("archived".parse::<FileScope>().unwrap(), FileScope::Archived);
    }
}
