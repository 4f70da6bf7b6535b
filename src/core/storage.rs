//! Local directory for transient image artifacts.
//!
//! Uploaded images are written under a single flat directory with generated
//! names (`<uuid>.<ext>`). Names supplied by clients are validated before any
//! filesystem access so they can never escape the directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid filename: {0}")]
    InvalidName(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Whether `filename` is a plain file name inside the upload directory.
pub fn is_valid_filename(filename: &str) -> bool {
    !filename.is_empty()
        && !filename.contains("..")
        && !filename.contains('/')
        && !filename.contains('\\')
        && !filename.starts_with('.')
}

/// Upload directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    /// Open the store, creating the directory if needed.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, filename: &str) -> StorageResult<PathBuf> {
        if !is_valid_filename(filename) {
            return Err(StorageError::InvalidName(filename.to_string()));
        }
        Ok(self.root.join(filename))
    }

    /// Write `bytes` under a new generated name and return that name.
    pub async fn save(&self, bytes: &[u8], extension: &str) -> StorageResult<String> {
        let filename = format!("{}.{}", Uuid::new_v4(), extension);
        let path = self.path_for(&filename)?;
        tokio::fs::write(&path, bytes).await?;
        tracing::debug!("Saved upload {} ({} bytes)", filename, bytes.len());
        Ok(filename)
    }

    /// Delete a stored file.
    pub async fn remove(&self, filename: &str) -> StorageResult<()> {
        let path = self.path_for(filename)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!("Removed upload {}", filename);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(filename.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Names of all stored files, sorted.
    pub async fn list(&self) -> StorageResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
