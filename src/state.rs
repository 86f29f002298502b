use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use crate::autosave::{Autosave, AUTOSAVE_QUIET_PERIOD};
use crate::backend::{Backend, BackendError, Persistence};
use crate::events::StatePayload;
use crate::models::{Category, CategoryPatch, Project, ProjectPatch, Task, TaskPatch};
use crate::timefmt::{self, Timestamp};
use crate::tree::{self, EntityKind, Mutation, TreeError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("data is still loading")]
    Loading,
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::Tree(TreeError::NotFound { .. }))
    }

    pub fn not_found_kind(&self) -> Option<EntityKind> {
        match self {
            StoreError::Tree(TreeError::NotFound { kind, .. }) => Some(*kind),
            _ => None,
        }
    }
}

/// Where a successful mutation stands with respect to the backend.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SyncState {
    /// Will be written by the next autosave.
    Scheduled,
    Synced,
    /// Applied in memory only; the backend write failed.
    Unsynced(String),
}

/// Owner of the in-memory tree. Clones share the same state.
///
/// Call [`DataStore::close`] before the last clone goes away: a change still waiting for the
/// autosave is lost otherwise.
#[derive(Clone)]
pub struct DataStore {
    inner: Arc<Shared>,
}

struct Shared {
    backend: Arc<dyn Backend>,
    data: Mutex<StoreData>,
    updates: watch::Sender<StatePayload>,
    autosave: Mutex<Option<Arc<Autosave>>>,
}

#[derive(Debug)]
struct StoreData {
    categories: Arc<Vec<Category>>,
    loading: bool,
    last_saved: Option<Timestamp>,
    last_sync_error: Option<String>,
}

impl DataStore {
    pub fn new<B: Backend>(backend: B) -> Self {
        Self::from_arc(Arc::new(backend))
    }

    pub fn from_arc(backend: Arc<dyn Backend>) -> Self {
        let data = StoreData {
            categories: Arc::new(Vec::new()),
            loading: true,
            last_saved: None,
            last_sync_error: None,
        };
        let (updates, _) = watch::channel(StatePayload {
            loading: true,
            ..StatePayload::default()
        });
        Self {
            inner: Arc::new(Shared {
                backend,
                data: Mutex::new(data),
                updates,
                autosave: Mutex::new(None),
            }),
        }
    }

    /// Builds the store and loads it.
    pub async fn open<B: Backend>(backend: B) -> Self {
        let store = Self::new(backend);
        store.load().await;
        store
    }

    pub async fn load(&self) {
        self.lock().loading = true;
        self.publish();

        let backend = &self.inner.backend;
        let categories = match backend.load().await {
            Ok(Some(categories)) => {
                log::info!(
                    "loaded data backend={} categories={}",
                    backend.name(),
                    categories.len()
                );
                categories
            }
            Ok(None) => {
                log::info!("no stored data backend={}, using defaults", backend.name());
                tree::default_categories(timefmt::now())
            }
            Err(err) => {
                log::error!("failed to load data backend={} err={err}", backend.name());
                tree::default_categories(timefmt::now())
            }
        };

        {
            let mut guard = self.lock();
            guard.categories = Arc::new(categories);
            guard.loading = false;
        }
        self.publish();
        self.start_autosave();
        self.schedule_save();
    }

    pub fn categories(&self) -> Arc<Vec<Category>> {
        self.lock().categories.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.lock().loading
    }

    pub fn last_saved(&self) -> Option<Timestamp> {
        self.lock().last_saved
    }

    pub fn last_sync_error(&self) -> Option<String> {
        self.lock().last_sync_error.clone()
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.backend.name()
    }

    pub fn snapshot(&self) -> StatePayload {
        let guard = self.lock();
        StatePayload {
            categories: guard.categories.as_ref().clone(),
            loading: guard.loading,
            last_saved: guard.last_saved,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<StatePayload> {
        self.inner.updates.subscribe()
    }

    pub async fn add_category(&self, category: Category) -> Result<SyncState, StoreError> {
        self.mutate(Mutation::AddCategory(category)).await
    }

    pub async fn update_category(
        &self,
        category_id: &str,
        patch: CategoryPatch,
    ) -> Result<SyncState, StoreError> {
        self.mutate(Mutation::UpdateCategory {
            category_id: category_id.to_string(),
            patch,
        })
        .await
    }

    pub async fn delete_category(&self, category_id: &str) -> Result<SyncState, StoreError> {
        self.mutate(Mutation::DeleteCategory {
            category_id: category_id.to_string(),
        })
        .await
    }

    pub async fn add_project(
        &self,
        category_id: &str,
        project: Project,
    ) -> Result<SyncState, StoreError> {
        self.mutate(Mutation::AddProject {
            category_id: category_id.to_string(),
            project,
        })
        .await
    }

    pub async fn update_project(
        &self,
        category_id: &str,
        project_id: &str,
        patch: ProjectPatch,
    ) -> Result<SyncState, StoreError> {
        self.mutate(Mutation::UpdateProject {
            category_id: category_id.to_string(),
            project_id: project_id.to_string(),
            patch,
        })
        .await
    }

    pub async fn delete_project(
        &self,
        category_id: &str,
        project_id: &str,
    ) -> Result<SyncState, StoreError> {
        self.mutate(Mutation::DeleteProject {
            category_id: category_id.to_string(),
            project_id: project_id.to_string(),
        })
        .await
    }

    pub async fn add_task(
        &self,
        category_id: &str,
        project_id: &str,
        task: Task,
    ) -> Result<SyncState, StoreError> {
        self.mutate(Mutation::AddTask {
            category_id: category_id.to_string(),
            project_id: project_id.to_string(),
            task,
        })
        .await
    }

    pub async fn update_task(
        &self,
        category_id: &str,
        project_id: &str,
        task_id: &str,
        patch: TaskPatch,
    ) -> Result<SyncState, StoreError> {
        self.mutate(Mutation::UpdateTask {
            category_id: category_id.to_string(),
            project_id: project_id.to_string(),
            task_id: task_id.to_string(),
            patch,
        })
        .await
    }

    pub async fn delete_task(
        &self,
        category_id: &str,
        project_id: &str,
        task_id: &str,
    ) -> Result<SyncState, StoreError> {
        self.mutate(Mutation::DeleteTask {
            category_id: category_id.to_string(),
            project_id: project_id.to_string(),
            task_id: task_id.to_string(),
        })
        .await
    }

    /// Writes the current data to a dated JSON file in `dir`.
    pub async fn export_data(&self, dir: &Path) -> Result<PathBuf, StoreError> {
        self.flush().await;
        let categories = self.categories();
        let path = self.inner.backend.export(&categories, dir).await?;
        log::info!("exported data to {}", path.display());
        Ok(path)
    }

    /// Replaces all data with the contents of `source`. On failure nothing changes.
    pub async fn import_data(&self, source: &Path) -> bool {
        self.flush().await;
        match self.inner.backend.import(source).await {
            Ok(categories) => {
                self.lock().categories = Arc::new(categories);
                self.publish();
                self.schedule_save();
                true
            }
            Err(err) => {
                log::error!("import failed source={} err={err}", source.display());
                false
            }
        }
    }

    /// Removes stored data and starts over from the default categories.
    pub async fn clear_all_data(&self) -> Result<(), StoreError> {
        self.inner.backend.clear().await?;
        {
            let mut guard = self.lock();
            guard.categories = Arc::new(tree::default_categories(timefmt::now()));
            guard.last_saved = None;
        }
        log::info!("cleared all data backend={}", self.backend_name());
        self.publish();
        self.schedule_save();
        Ok(())
    }

    /// Writes any pending change now.
    pub async fn flush(&self) {
        if let Some(autosave) = self.autosave() {
            autosave.flush().await;
        }
    }

    /// Flushes pending changes and stops the autosave task. Later mutations stay in memory.
    pub async fn close(&self) {
        let autosave = self
            .inner
            .autosave
            .lock()
            .expect("autosave poisoned")
            .take();
        if let Some(autosave) = autosave {
            autosave.stop().await;
        }
    }

    async fn mutate(&self, mutation: Mutation) -> Result<SyncState, StoreError> {
        let tree = {
            let mut guard = self.lock();
            if guard.loading {
                return Err(StoreError::Loading);
            }
            let next = Arc::new(tree::apply(&guard.categories, &mutation, timefmt::now())?);
            guard.categories = next.clone();
            next
        };
        self.publish();

        match self.inner.backend.persistence() {
            Persistence::Snapshot => {
                self.schedule_save();
                Ok(SyncState::Scheduled)
            }
            Persistence::PerRecord => match self.inner.backend.record(&mutation, &tree).await {
                Ok(()) => Ok(SyncState::Synced),
                Err(err) => {
                    log::warn!(
                        "backend write failed, keeping local change op={} err={err}",
                        mutation.name()
                    );
                    let reason = err.to_string();
                    self.lock().last_sync_error = Some(reason.clone());
                    Ok(SyncState::Unsynced(reason))
                }
            },
        }
    }

    fn start_autosave(&self) {
        if self.inner.backend.persistence() != Persistence::Snapshot {
            return;
        }
        let mut slot = self.inner.autosave.lock().expect("autosave poisoned");
        if slot.is_some() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let autosave = Autosave::spawn(AUTOSAVE_QUIET_PERIOD, move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    DataStore { inner }.write_snapshot().await;
                }
            }
        });
        *slot = Some(Arc::new(autosave));
    }

    fn schedule_save(&self) {
        if let Some(autosave) = self.autosave() {
            autosave.notify();
        }
    }

    async fn write_snapshot(&self) {
        let categories = self.categories();
        match self.inner.backend.save(&categories).await {
            Ok(()) => {
                {
                    let mut guard = self.lock();
                    guard.last_saved = Some(timefmt::now());
                    guard.last_sync_error = None;
                }
                log::debug!("autosaved categories={}", categories.len());
                self.publish();
            }
            Err(err) => {
                log::error!("autosave failed backend={} err={err}", self.backend_name());
                self.lock().last_sync_error = Some(err.to_string());
            }
        }
    }

    fn autosave(&self) -> Option<Arc<Autosave>> {
        self.inner
            .autosave
            .lock()
            .expect("autosave poisoned")
            .clone()
    }

    fn publish(&self) {
        self.inner.updates.send_replace(self.snapshot());
    }

    fn lock(&self) -> MutexGuard<'_, StoreData> {
        self.inner.data.lock().expect("state poisoned")
    }
}
