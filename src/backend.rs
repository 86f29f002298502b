use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::models::Category;
use crate::remote::RemoteError;
use crate::storage::{LocalStore, StorageError};
use crate::tree::Mutation;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        operation: &'static str,
        backend: &'static str,
    },
}

/// How a backend wants changes delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// The whole tree is written after a quiet period.
    Snapshot,
    /// Each mutation is written as soon as it is applied.
    PerRecord,
}

#[async_trait]
pub trait Backend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn persistence(&self) -> Persistence;

    /// `Ok(None)` means nothing has been stored yet.
    async fn load(&self) -> Result<Option<Vec<Category>>, BackendError>;

    async fn save(&self, _categories: &[Category]) -> Result<(), BackendError> {
        Ok(())
    }

    /// `tree` is the state after `mutation` was applied.
    async fn record(&self, _mutation: &Mutation, _tree: &[Category]) -> Result<(), BackendError> {
        Ok(())
    }

    async fn export(&self, categories: &[Category], dir: &Path) -> Result<PathBuf, BackendError>;

    /// Replaces stored data with the file contents and returns the resulting tree.
    async fn import(&self, source: &Path) -> Result<Vec<Category>, BackendError>;

    async fn clear(&self) -> Result<(), BackendError> {
        Err(BackendError::Unsupported {
            operation: "clear",
            backend: self.name(),
        })
    }
}

#[async_trait]
impl Backend for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    fn persistence(&self) -> Persistence {
        Persistence::Snapshot
    }

    async fn load(&self) -> Result<Option<Vec<Category>>, BackendError> {
        Ok(LocalStore::load(self))
    }

    async fn save(&self, categories: &[Category]) -> Result<(), BackendError> {
        Ok(LocalStore::save(self, categories)?)
    }

    async fn export(&self, _categories: &[Category], dir: &Path) -> Result<PathBuf, BackendError> {
        Ok(self.export_as_json(dir)?)
    }

    async fn import(&self, source: &Path) -> Result<Vec<Category>, BackendError> {
        if !self.import_from_json(source) {
            return Err(StorageError::InvalidFormat(format!(
                "could not import {}",
                source.display()
            ))
            .into());
        }
        LocalStore::load(self).ok_or_else(|| {
            StorageError::InvalidFormat("imported data could not be read back".to_string()).into()
        })
    }

    async fn clear(&self) -> Result<(), BackendError> {
        Ok(LocalStore::clear(self)?)
    }
}
