//! Relational backend: categories, projects and tasks live in three tables scoped to the
//! signed-in user.

mod client;
#[cfg(test)]
mod memory;
mod rows;

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::backend::{Backend, BackendError, Persistence};
use crate::models::Category;
use crate::storage::{export_file_name, parse_import};
use crate::timefmt::{self, Timestamp};
use crate::tree::{self, Mutation};

#[cfg(feature = "remote")]
pub use client::PostgrestClient;
pub use client::{Table, TableClient};
#[cfg(test)]
pub use memory::MemoryTables;
pub use rows::{assemble_tree, CategoryRow, ProjectRow, TaskRow};

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("http error: {0}")]
    Http(String),
    #[error("remote returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid row: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("missing configuration: {0}")]
    Config(&'static str),
    #[error("remote rejected request: {0}")]
    Rejected(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub const ENV_URL: &str = "NORBU_SUPABASE_URL";
pub const ENV_ANON_KEY: &str = "NORBU_SUPABASE_ANON_KEY";
pub const ENV_ACCESS_TOKEN: &str = "NORBU_ACCESS_TOKEN";
pub const ENV_USER_ID: &str = "NORBU_USER_ID";

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    pub url: String,
    pub anon_key: String,
    pub access_token: String,
    pub user_id: String,
}

impl RemoteConfig {
    pub fn from_env() -> Result<Self, RemoteError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RemoteError> {
        let read = |key: &'static str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or(RemoteError::Config(key))
        };
        Ok(Self {
            url: read(ENV_URL)?,
            anon_key: read(ENV_ANON_KEY)?,
            access_token: read(ENV_ACCESS_TOKEN)?,
            user_id: read(ENV_USER_ID)?,
        })
    }
}

pub struct RemoteBackend<C> {
    client: C,
    user_id: String,
}

impl<C: TableClient> RemoteBackend<C> {
    pub fn new(client: C, user_id: impl Into<String>) -> Self {
        Self {
            client,
            user_id: user_id.into(),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn read_tree(&self) -> Result<Vec<Category>, RemoteError> {
        let (categories, projects, tasks) = tokio::try_join!(
            self.client.select(Table::Categories, &self.user_id),
            self.client.select(Table::Projects, &self.user_id),
            self.client.select(Table::Tasks, &self.user_id),
        )?;
        Ok(assemble_tree(
            decode_rows(categories)?,
            decode_rows(projects)?,
            decode_rows(tasks)?,
        ))
    }

    async fn seed_defaults(&self) -> Result<(), RemoteError> {
        let rows = tree::default_categories(timefmt::now())
            .iter()
            .map(|category| {
                let mut row = CategoryRow::from_category(category, &self.user_id);
                // Let the server pick the ids.
                row.id = None;
                row
            })
            .collect::<Vec<_>>();
        self.client
            .insert(Table::Categories, encode_rows(&rows)?)
            .await?;
        log::info!("seeded default categories user_id={}", self.user_id);
        Ok(())
    }

    async fn insert_category(&self, category: &Category) -> Result<(), RemoteError> {
        let (category_row, project_rows, task_rows) =
            rows::flatten_category(category, &self.user_id);
        self.client
            .insert(Table::Categories, encode_rows(&[category_row])?)
            .await?;
        self.client
            .insert(Table::Projects, encode_rows(&project_rows)?)
            .await?;
        self.client
            .insert(Table::Tasks, encode_rows(&task_rows)?)
            .await?;
        Ok(())
    }

    /// Deletes every category the user owns, then inserts `categories` in order.
    async fn replace_rows(&self, categories: &[Category]) -> Result<(), RemoteError> {
        for existing in self.read_tree().await? {
            self.client
                .delete(Table::Categories, &self.user_id, &existing.id)
                .await?;
        }
        for category in categories {
            self.insert_category(category).await?;
        }
        Ok(())
    }

    /// Carries the ancestors' `updated_at` from `tree` into their rows.
    async fn stamp_parents(
        &self,
        tree: &[Category],
        category_id: &str,
        project_id: Option<&str>,
    ) -> Result<(), RemoteError> {
        if let Some(project) = project_id.and_then(|id| tree::find_project(tree, category_id, id)) {
            self.update(Table::Projects, &project.id, Map::new(), project.updated_at)
                .await?;
        }
        if let Some(category) = tree::find_category(tree, category_id) {
            self.update(Table::Categories, category_id, Map::new(), category.updated_at)
                .await?;
        }
        Ok(())
    }

    async fn write_mutation(&self, mutation: &Mutation, tree: &[Category]) -> Result<(), RemoteError> {
        match mutation {
            Mutation::AddCategory(category) => {
                let stored = tree::find_category(tree, &category.id).unwrap_or(category);
                self.insert_category(stored).await
            }
            Mutation::UpdateCategory { category_id, patch } => {
                let Some(category) = tree::find_category(tree, category_id) else {
                    return Ok(());
                };
                let mut changes = Map::new();
                if patch.name.is_some() {
                    changes.insert("name".into(), category.name.clone().into());
                }
                if patch.icon.is_some() {
                    changes.insert("icon".into(), category.icon.clone().into());
                }
                if patch.color.is_some() {
                    changes.insert("color".into(), category.color.clone().into());
                }
                self.update(Table::Categories, category_id, changes, category.updated_at)
                    .await
            }
            Mutation::DeleteCategory { category_id } => {
                self.client
                    .delete(Table::Categories, &self.user_id, category_id)
                    .await
            }
            Mutation::AddProject {
                category_id,
                project,
            } => {
                let Some(stored) = tree::find_project(tree, category_id, &project.id) else {
                    return Ok(());
                };
                let (project_row, task_rows) = rows::flatten_project(stored, &self.user_id);
                self.client
                    .insert(Table::Projects, encode_rows(&[project_row])?)
                    .await?;
                self.client
                    .insert(Table::Tasks, encode_rows(&task_rows)?)
                    .await?;
                self.stamp_parents(tree, category_id, None).await
            }
            Mutation::UpdateProject {
                category_id,
                project_id,
                patch,
            } => {
                let Some(project) = tree::find_project(tree, category_id, project_id) else {
                    return Ok(());
                };
                let mut changes = Map::new();
                if patch.name.is_some() {
                    changes.insert("name".into(), project.name.clone().into());
                }
                if patch.description.is_some() {
                    changes.insert("description".into(), project.description.clone().into());
                }
                if patch.color.is_some() {
                    changes.insert("color".into(), project.color.clone().into());
                }
                if patch.deadline.is_some() {
                    let deadline = project.deadline.as_ref().map(timefmt::format_iso);
                    changes.insert("deadline".into(), deadline.into());
                }
                self.update(Table::Projects, project_id, changes, project.updated_at)
                    .await?;
                self.stamp_parents(tree, category_id, None).await
            }
            Mutation::DeleteProject {
                category_id,
                project_id,
            } => {
                self.client
                    .delete(Table::Projects, &self.user_id, project_id)
                    .await?;
                self.stamp_parents(tree, category_id, None).await
            }
            Mutation::AddTask {
                category_id,
                project_id,
                task,
            } => {
                let stored =
                    tree::find_task(tree, category_id, project_id, &task.id).unwrap_or(task);
                let row = TaskRow::from_task(stored, project_id, &self.user_id);
                self.client
                    .insert(Table::Tasks, encode_rows(&[row])?)
                    .await?;
                self.stamp_parents(tree, category_id, Some(project_id.as_str())).await
            }
            Mutation::UpdateTask {
                category_id,
                project_id,
                task_id,
                patch,
            } => {
                let Some(task) = tree::find_task(tree, category_id, project_id, task_id) else {
                    return Ok(());
                };
                let mut changes = Map::new();
                if patch.title.is_some() {
                    changes.insert("title".into(), task.title.clone().into());
                }
                if patch.completed.is_some() {
                    changes.insert("completed".into(), task.completed.into());
                }
                if patch.priority.is_some() {
                    changes.insert("priority".into(), task.priority.as_str().into());
                }
                self.update(Table::Tasks, task_id, changes, task.updated_at)
                    .await?;
                self.stamp_parents(tree, category_id, Some(project_id.as_str())).await
            }
            Mutation::DeleteTask {
                category_id,
                project_id,
                task_id,
            } => {
                self.client
                    .delete(Table::Tasks, &self.user_id, task_id)
                    .await?;
                self.stamp_parents(tree, category_id, Some(project_id.as_str())).await
            }
        }
    }

    async fn update(
        &self,
        table: Table,
        id: &str,
        mut changes: Map<String, Value>,
        updated_at: Timestamp,
    ) -> Result<(), RemoteError> {
        changes.insert(
            "updated_at".into(),
            timefmt::format_iso(&updated_at).into(),
        );
        self.client
            .update(table, &self.user_id, id, Value::Object(changes))
            .await
    }
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, RemoteError> {
    Ok(serde_json::from_value(Value::Array(rows))?)
}

fn encode_rows<T: Serialize>(rows: &[T]) -> Result<Vec<Value>, RemoteError> {
    rows.iter()
        .map(|row| serde_json::to_value(row).map_err(RemoteError::from))
        .collect()
}

#[async_trait]
impl<C: TableClient> Backend for RemoteBackend<C> {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn persistence(&self) -> Persistence {
        Persistence::PerRecord
    }

    async fn load(&self) -> Result<Option<Vec<Category>>, BackendError> {
        let tree = self.read_tree().await?;
        if !tree.is_empty() {
            return Ok(Some(tree));
        }
        self.seed_defaults().await?;
        Ok(Some(self.read_tree().await?))
    }

    async fn record(&self, mutation: &Mutation, tree: &[Category]) -> Result<(), BackendError> {
        self.write_mutation(mutation, tree).await?;
        log::debug!("remote write ok op={}", mutation.name());
        Ok(())
    }

    async fn export(&self, categories: &[Category], dir: &Path) -> Result<PathBuf, BackendError> {
        let json = serde_json::to_vec_pretty(categories).map_err(RemoteError::from)?;
        fs::create_dir_all(dir).map_err(RemoteError::from)?;
        let path = dir.join(export_file_name(&timefmt::now()));
        fs::write(&path, json).map_err(RemoteError::from)?;
        Ok(path)
    }

    /// Replaces every row owned by the user with the file contents. The file is checked in
    /// full before any row is touched; if writing it fails, the previous rows are put back.
    async fn import(&self, source: &Path) -> Result<Vec<Category>, BackendError> {
        let text = fs::read_to_string(source).map_err(RemoteError::from)?;
        let categories = parse_import(&text)?;
        let previous = self.read_tree().await?;
        if let Err(err) = self.replace_rows(&categories).await {
            log::error!(
                "import write failed, restoring previous rows user_id={} err={err}",
                self.user_id
            );
            if let Err(restore_err) = self.replace_rows(&previous).await {
                log::error!(
                    "restoring previous rows failed user_id={} err={restore_err}",
                    self.user_id
                );
            }
            return Err(err.into());
        }
        Ok(self.read_tree().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, Project, Task, TaskPatch};
    use serde_json::json;
    use std::time::Duration;

    fn backend() -> RemoteBackend<MemoryTables> {
        RemoteBackend::new(MemoryTables::new(), "u1")
    }

    fn project(id: &str, category_id: &str) -> Project {
        let now = timefmt::now();
        Project {
            id: id.to_string(),
            name: "Trip".to_string(),
            description: None,
            color: None,
            deadline: None,
            created_at: now,
            updated_at: now,
            tasks: Vec::new(),
            category_id: category_id.to_string(),
        }
    }

    fn task(id: &str) -> Task {
        let now = timefmt::now();
        Task {
            id: id.to_string(),
            title: "Book flight".to_string(),
            completed: false,
            priority: Priority::High,
            created_at: now,
            updated_at: now,
        }
    }

    async fn apply(backend: &RemoteBackend<MemoryTables>, tree: &[Category], m: Mutation) -> Vec<Category> {
        let next = tree::apply(tree, &m, timefmt::now()).unwrap();
        backend.record(&m, &next).await.unwrap();
        next
    }

    #[test]
    fn config_requires_every_variable() {
        let full = |key: &str| Some(format!("value-of-{key}"));
        let config = RemoteConfig::from_lookup(full).unwrap();
        assert_eq!(config.user_id, "value-of-NORBU_USER_ID");

        let missing_token = |key: &str| (key != ENV_ACCESS_TOKEN).then(|| "x".to_string());
        let err = RemoteConfig::from_lookup(missing_token).unwrap_err();
        assert!(matches!(err, RemoteError::Config(ENV_ACCESS_TOKEN)));

        let blank = |_: &str| Some("  ".to_string());
        assert!(RemoteConfig::from_lookup(blank).is_err());
    }

    #[tokio::test]
    async fn first_load_seeds_defaults_with_server_ids() {
        let backend = backend();
        let tree = backend.load().await.unwrap().unwrap();
        let names: Vec<_> = tree.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Personal", "Work"]);
        assert!(tree.iter().all(|c| c.projects.is_empty()));
        assert!(tree.iter().all(|c| c.id != "personal" && c.id != "work"));

        // A second load does not seed again.
        let again = backend.load().await.unwrap().unwrap();
        assert_eq!(again.len(), 2);
    }

    #[tokio::test]
    async fn mutations_are_written_through_and_reload_matches() {
        let backend = backend();
        let tree = backend.load().await.unwrap().unwrap();
        let personal = tree[0].id.clone();

        let tree = apply(
            &backend,
            &tree,
            Mutation::AddProject {
                category_id: personal.clone(),
                project: project("p1", &personal),
            },
        )
        .await;
        let tree = apply(
            &backend,
            &tree,
            Mutation::AddTask {
                category_id: personal.clone(),
                project_id: "p1".to_string(),
                task: task("t1"),
            },
        )
        .await;
        let tree = apply(
            &backend,
            &tree,
            Mutation::UpdateTask {
                category_id: personal.clone(),
                project_id: "p1".to_string(),
                task_id: "t1".to_string(),
                patch: TaskPatch {
                    completed: Some(true),
                    ..TaskPatch::default()
                },
            },
        )
        .await;

        let reloaded = backend.load().await.unwrap().unwrap();
        let stored = tree::find_task(&reloaded, &personal, "p1", "t1").unwrap();
        let local = tree::find_task(&tree, &personal, "p1", "t1").unwrap();
        assert!(stored.completed);
        assert_eq!(stored, local);
    }

    #[tokio::test]
    async fn deleting_a_category_cascades_remotely() {
        let backend = backend();
        let tree = backend.load().await.unwrap().unwrap();
        let work = tree[1].id.clone();
        let tree = apply(
            &backend,
            &tree,
            Mutation::AddProject {
                category_id: work.clone(),
                project: project("p1", &work),
            },
        )
        .await;
        let tree = apply(
            &backend,
            &tree,
            Mutation::AddTask {
                category_id: work.clone(),
                project_id: "p1".to_string(),
                task: task("t1"),
            },
        )
        .await;
        apply(
            &backend,
            &tree,
            Mutation::DeleteCategory {
                category_id: work.clone(),
            },
        )
        .await;

        assert!(backend.client().rows(Table::Projects).is_empty());
        assert!(backend.client().rows(Table::Tasks).is_empty());
        assert_eq!(backend.client().rows(Table::Categories).len(), 1);
    }

    #[tokio::test]
    async fn write_failures_surface_to_caller() {
        let backend = backend();
        let tree = backend.load().await.unwrap().unwrap();
        backend.client().set_offline(true);
        let m = Mutation::DeleteCategory {
            category_id: tree[0].id.clone(),
        };
        let next = tree::apply(&tree, &m, timefmt::now()).unwrap();
        let err = backend.record(&m, &next).await.unwrap_err();
        assert!(matches!(err, BackendError::Remote(RemoteError::Rejected(_))));
    }

    #[tokio::test]
    async fn import_replaces_rows_and_export_writes_categories_array() {
        let backend = backend();
        backend.load().await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.json");
        fs::write(
            &source,
            r##"{"categories": [{
                "id": "home", "name": "Home", "icon": "h", "color": "#123456",
                "createdAt": "2024-01-01T00:00:00.000Z", "updatedAt": "2024-01-01T00:00:00.000Z",
                "projects": [{
                  "id": "p1", "name": "Garden", "categoryId": "home",
                  "createdAt": "2024-01-01T00:00:00.000Z", "updatedAt": "2024-01-01T00:00:00.000Z",
                  "tasks": [{"id": "t1", "title": "Weed", "completed": false, "priority": "low",
                             "createdAt": "2024-01-01T00:00:00.000Z", "updatedAt": "2024-01-01T00:00:00.000Z"}]
                }]
            }]}"##,
        )
        .unwrap();

        let tree = backend.import(&source).await.unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].id, "home");
        assert_eq!(tree[0].projects[0].tasks[0].title, "Weed");

        let path = backend.export(&tree, dir.path()).await.unwrap();
        let exported: Vec<Category> =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(exported, tree);

        let bad = dir.path().join("bad.json");
        fs::write(&bad, r#"{"foo": 1}"#).unwrap();
        assert!(backend.import(&bad).await.is_err());
        assert_eq!(backend.load().await.unwrap().unwrap(), tree);
    }

    fn import_file(dir: &Path, name: &str, categories: Value) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, json!({ "categories": categories }).to_string()).unwrap();
        path
    }

    fn home(project_category: &str, task_ids: &[&str]) -> Value {
        let at = "2024-01-01T00:00:00.000Z";
        let tasks: Vec<Value> = task_ids
            .iter()
            .map(|id| {
                json!({"id": id, "title": "Weed", "completed": false, "priority": "low",
                       "createdAt": at, "updatedAt": at})
            })
            .collect();
        json!([{
            "id": "home", "name": "Home", "icon": "h", "color": "#123456",
            "createdAt": at, "updatedAt": at,
            "projects": [{
                "id": "p1", "name": "Garden", "categoryId": project_category,
                "createdAt": at, "updatedAt": at, "tasks": tasks
            }]
        }])
    }

    #[tokio::test]
    async fn child_writes_refresh_parent_rows() {
        let backend = backend();
        let tree = backend.load().await.unwrap().unwrap();
        let personal = tree[0].id.clone();

        let tree = apply(
            &backend,
            &tree,
            Mutation::AddProject {
                category_id: personal.clone(),
                project: project("p1", &personal),
            },
        )
        .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let tree = apply(
            &backend,
            &tree,
            Mutation::AddTask {
                category_id: personal.clone(),
                project_id: "p1".to_string(),
                task: task("t1"),
            },
        )
        .await;

        let reloaded = backend.load().await.unwrap().unwrap();
        assert_eq!(
            tree::find_project(&reloaded, &personal, "p1").unwrap().updated_at,
            tree::find_project(&tree, &personal, "p1").unwrap().updated_at
        );
        assert_eq!(reloaded, tree);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let tree = apply(
            &backend,
            &tree,
            Mutation::DeleteTask {
                category_id: personal.clone(),
                project_id: "p1".to_string(),
                task_id: "t1".to_string(),
            },
        )
        .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let tree = apply(
            &backend,
            &tree,
            Mutation::DeleteProject {
                category_id: personal.clone(),
                project_id: "p1".to_string(),
            },
        )
        .await;
        assert_eq!(backend.load().await.unwrap().unwrap(), tree);
    }

    #[tokio::test]
    async fn invalid_import_touches_no_rows() {
        let backend = backend();
        let before = backend.load().await.unwrap().unwrap();
        let writes = backend.client().write_count();

        let dir = tempfile::tempdir().unwrap();
        let source = import_file(dir.path(), "twins.json", home("home", &["t1", "t1"]));
        let err = backend.import(&source).await.unwrap_err();
        assert!(err.to_string().contains("duplicate task id: t1"));
        assert_eq!(backend.client().write_count(), writes);
        assert_eq!(backend.load().await.unwrap().unwrap(), before);

        // A stale categoryId is re-linked, not rejected.
        let source = import_file(dir.path(), "moved.json", home("personal", &["t1"]));
        let tree = backend.import(&source).await.unwrap();
        assert_eq!(tree[0].projects[0].category_id, "home");
        assert_eq!(tree[0].projects[0].tasks.len(), 1);
    }

    #[tokio::test]
    async fn failed_import_write_restores_previous_rows() {
        let backend = backend();
        // Another user already owns task id t1.
        let client = backend.client();
        client
            .insert(
                Table::Categories,
                vec![json!({"id": "c2", "user_id": "u2", "created_at": "2024-01-01T00:00:00.000Z"})],
            )
            .await
            .unwrap();
        client
            .insert(
                Table::Projects,
                vec![json!({"id": "p2", "user_id": "u2", "category_id": "c2"})],
            )
            .await
            .unwrap();
        client
            .insert(
                Table::Tasks,
                vec![json!({"id": "t1", "user_id": "u2", "project_id": "p2"})],
            )
            .await
            .unwrap();

        let tree = backend.load().await.unwrap().unwrap();
        let personal = tree[0].id.clone();
        let before = apply(
            &backend,
            &tree,
            Mutation::AddProject {
                category_id: personal.clone(),
                project: project("p9", &personal),
            },
        )
        .await;

        let dir = tempfile::tempdir().unwrap();
        let source = import_file(dir.path(), "clash.json", home("home", &["t1"]));
        let err = backend.import(&source).await.unwrap_err();
        assert!(err.to_string().contains("duplicate key in tasks: t1"));
        assert_eq!(backend.load().await.unwrap().unwrap(), before);
        assert_eq!(client.rows(Table::Tasks).len(), 1);
    }
}
