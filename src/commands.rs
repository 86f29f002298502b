use std::fs;
use std::path::Path;

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::events::StatePayload;
use crate::models::{
    new_id, Category, CategoryPatch, Language, Preferences, Priority, Project, ProjectPatch, Task,
    TaskPatch,
};
use crate::state::{DataStore, StoreError, SyncState};
use crate::storage::{LocalStore, StorageError};
use crate::timefmt::{self, Timestamp};
use crate::tree;
use crate::views::{self, FilteredTask, SummaryGroup, SummaryPeriod, TaskFilter};

#[derive(Debug, Serialize)]
pub struct CommandResult<T> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

fn ok<T>(data: T) -> CommandResult<T> {
    CommandResult {
        ok: true,
        data: Some(data),
        error: None,
    }
}

fn err<T>(message: &str) -> CommandResult<T> {
    CommandResult {
        ok: false,
        data: None,
        error: Some(message.to_string()),
    }
}

fn store_err<T>(error: StoreError) -> CommandResult<T> {
    match error {
        StoreError::Tree(inner) => err(&inner.to_string()),
        StoreError::Backend(inner) => err(&format!("backend error: {inner}")),
        StoreError::Loading => err("data is still loading"),
    }
}

/// A changed entity together with how far its write got.
#[derive(Debug, Serialize)]
pub struct Applied<T> {
    pub item: T,
    pub sync: SyncState,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCategory {
    pub name: String,
    pub icon: String,
    pub color: String,
}

impl NewCategory {
    fn build(self, now: Timestamp) -> Category {
        Category {
            id: new_id(),
            name: self.name.trim().to_string(),
            icon: self.icon,
            color: self.color,
            projects: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default, with = "timefmt::iso_option")]
    pub deadline: Option<Timestamp>,
}

impl NewProject {
    fn build(self, category_id: &str, now: Timestamp) -> Project {
        Project {
            id: new_id(),
            name: self.name.trim().to_string(),
            description: self.description.filter(|d| !d.trim().is_empty()),
            color: self.color,
            deadline: self.deadline,
            created_at: now,
            updated_at: now,
            tasks: Vec::new(),
            category_id: category_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub priority: Priority,
}

impl NewTask {
    fn build(self, now: Timestamp) -> Task {
        Task {
            id: new_id(),
            title: self.title.trim().to_string(),
            completed: false,
            priority: self.priority,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskList {
    pub filter: TaskFilter,
    pub open_count: usize,
    pub tasks: Vec<FilteredTask>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesPatch {
    pub language: Option<Language>,
    pub dark_mode: Option<bool>,
}

pub fn load_state(store: &DataStore) -> CommandResult<StatePayload> {
    ok(store.snapshot())
}

pub fn list_tasks(store: &DataStore, filter: TaskFilter) -> CommandResult<TaskList> {
    let categories = store.categories();
    ok(TaskList {
        filter,
        open_count: views::open_task_count(&categories),
        tasks: views::filter_tasks(&categories, filter),
    })
}

pub async fn create_category(
    store: &DataStore,
    input: NewCategory,
) -> CommandResult<Applied<Category>> {
    let category = input.build(timefmt::now());
    let id = category.id.clone();
    match store.add_category(category).await {
        Ok(sync) => applied_category(store, &id, sync),
        Err(error) => store_err(error),
    }
}

pub async fn update_category(
    store: &DataStore,
    category_id: &str,
    patch: CategoryPatch,
) -> CommandResult<Applied<Category>> {
    match store.update_category(category_id, patch).await {
        Ok(sync) => applied_category(store, category_id, sync),
        Err(error) => store_err(error),
    }
}

pub async fn delete_category(store: &DataStore, category_id: &str) -> CommandResult<SyncState> {
    match store.delete_category(category_id).await {
        Ok(sync) => ok(sync),
        Err(error) => store_err(error),
    }
}

pub async fn create_project(
    store: &DataStore,
    category_id: &str,
    input: NewProject,
) -> CommandResult<Applied<Project>> {
    let project = input.build(category_id, timefmt::now());
    let id = project.id.clone();
    match store.add_project(category_id, project).await {
        Ok(sync) => applied_project(store, category_id, &id, sync),
        Err(error) => store_err(error),
    }
}

pub async fn update_project(
    store: &DataStore,
    category_id: &str,
    project_id: &str,
    patch: ProjectPatch,
) -> CommandResult<Applied<Project>> {
    match store.update_project(category_id, project_id, patch).await {
        Ok(sync) => applied_project(store, category_id, project_id, sync),
        Err(error) => store_err(error),
    }
}

pub async fn delete_project(
    store: &DataStore,
    category_id: &str,
    project_id: &str,
) -> CommandResult<SyncState> {
    match store.delete_project(category_id, project_id).await {
        Ok(sync) => ok(sync),
        Err(error) => store_err(error),
    }
}

pub async fn create_task(
    store: &DataStore,
    category_id: &str,
    project_id: &str,
    input: NewTask,
) -> CommandResult<Applied<Task>> {
    let task = input.build(timefmt::now());
    let id = task.id.clone();
    match store.add_task(category_id, project_id, task).await {
        Ok(sync) => applied_task(store, category_id, project_id, &id, sync),
        Err(error) => store_err(error),
    }
}

pub async fn update_task(
    store: &DataStore,
    category_id: &str,
    project_id: &str,
    task_id: &str,
    patch: TaskPatch,
) -> CommandResult<Applied<Task>> {
    match store
        .update_task(category_id, project_id, task_id, patch)
        .await
    {
        Ok(sync) => applied_task(store, category_id, project_id, task_id, sync),
        Err(error) => store_err(error),
    }
}

pub async fn toggle_task(
    store: &DataStore,
    category_id: &str,
    project_id: &str,
    task_id: &str,
) -> CommandResult<Applied<Task>> {
    let completed = {
        let categories = store.categories();
        match tree::find_task(&categories, category_id, project_id, task_id) {
            Some(task) => task.completed,
            None => return err(&format!("task not found: {task_id}")),
        }
    };
    let patch = TaskPatch {
        completed: Some(!completed),
        ..TaskPatch::default()
    };
    update_task(store, category_id, project_id, task_id, patch).await
}

pub async fn delete_task(
    store: &DataStore,
    category_id: &str,
    project_id: &str,
    task_id: &str,
) -> CommandResult<SyncState> {
    match store.delete_task(category_id, project_id, task_id).await {
        Ok(sync) => ok(sync),
        Err(error) => store_err(error),
    }
}

pub async fn export_data(store: &DataStore, dir: &Path) -> CommandResult<String> {
    match store.export_data(dir).await {
        Ok(path) => ok(path.to_string_lossy().to_string()),
        Err(error) => err(&format!("export error: {error}")),
    }
}

pub async fn import_data(store: &DataStore, source: &Path) -> CommandResult<bool> {
    if store.import_data(source).await {
        ok(true)
    } else {
        err(&format!("could not import {}", source.display()))
    }
}

pub async fn clear_all_data(store: &DataStore) -> CommandResult<bool> {
    match store.clear_all_data().await {
        Ok(()) => ok(true),
        Err(error) => store_err(error),
    }
}

pub fn completed_summary<Tz: TimeZone>(
    store: &DataStore,
    period: SummaryPeriod,
    now: &DateTime<Tz>,
) -> CommandResult<Vec<SummaryGroup>> {
    ok(views::completed_summary(&store.categories(), period, now))
}

/// Writes the summary as a Markdown checklist into `dir` and returns the file path.
pub fn export_summary_markdown<Tz: TimeZone>(
    store: &DataStore,
    dir: &Path,
    period: SummaryPeriod,
    now: &DateTime<Tz>,
) -> CommandResult<String>
where
    Tz::Offset: std::fmt::Display,
{
    let groups = views::completed_summary(&store.categories(), period, now);
    let out = render_summary_markdown(&groups, period, now);
    let path = dir.join(format!(
        "norbu-todo-summary-{}-{}.md",
        period_label(period),
        now.format("%Y-%m-%d")
    ));
    if let Err(error) = write_atomic_bytes(&path, out.as_bytes()) {
        return err(&format!("export error: {error}"));
    }
    ok(path.to_string_lossy().to_string())
}

fn period_label(period: SummaryPeriod) -> &'static str {
    match period {
        SummaryPeriod::Week => "week",
        SummaryPeriod::Month => "month",
        SummaryPeriod::Year => "year",
    }
}

fn render_summary_markdown<Tz: TimeZone>(
    groups: &[SummaryGroup],
    period: SummaryPeriod,
    now: &DateTime<Tz>,
) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let total: usize = groups.iter().map(|g| g.tasks.len()).sum();
    let mut out = String::new();
    out.push_str(&format!("# Completed this {}\n\n", period_label(period)));
    out.push_str(&format!(
        "Generated at: {}\n\n",
        now.format("%Y-%m-%d %H:%M:%S")
    ));
    out.push_str(&format!("Total: {total}\n\n"));
    if groups.is_empty() {
        out.push_str("_Empty_\n");
        return out;
    }
    for group in groups {
        out.push_str(&format!("## {}\n\n", group.project_name));
        for task in &group.tasks {
            let done_at = task.updated_at.with_timezone(&now.timezone());
            out.push_str(&format!(
                "- [x] {} ({}, {})\n",
                task.title,
                task.priority.as_str(),
                done_at.format("%Y-%m-%d")
            ));
        }
        out.push('\n');
    }
    out
}

fn write_atomic_bytes(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let tmp = path.with_extension("tmp");
    fs::create_dir_all(
        path.parent()
            .ok_or_else(|| StorageError::Io(std::io::Error::other("invalid export path")))?,
    )?;
    fs::write(&tmp, bytes)?;
    fs::rename(tmp, path)?;
    Ok(())
}

pub fn load_preferences(settings: &LocalStore) -> CommandResult<Preferences> {
    ok(settings.load_preferences())
}

pub fn update_preferences(
    settings: &LocalStore,
    patch: PreferencesPatch,
) -> CommandResult<Preferences> {
    let mut preferences = settings.load_preferences();
    if let Some(language) = patch.language {
        preferences.language = language;
    }
    if let Some(dark_mode) = patch.dark_mode {
        preferences.dark_mode = dark_mode;
    }
    if let Err(error) = settings.save_preferences(&preferences) {
        return err(&format!("storage error: {error}"));
    }
    ok(preferences)
}

fn applied_category(
    store: &DataStore,
    category_id: &str,
    sync: SyncState,
) -> CommandResult<Applied<Category>> {
    match tree::find_category(&store.categories(), category_id) {
        Some(item) => ok(Applied {
            item: item.clone(),
            sync,
        }),
        None => err(&format!("category not found: {category_id}")),
    }
}

fn applied_project(
    store: &DataStore,
    category_id: &str,
    project_id: &str,
    sync: SyncState,
) -> CommandResult<Applied<Project>> {
    match tree::find_project(&store.categories(), category_id, project_id) {
        Some(item) => ok(Applied {
            item: item.clone(),
            sync,
        }),
        None => err(&format!("project not found: {project_id}")),
    }
}

fn applied_task(
    store: &DataStore,
    category_id: &str,
    project_id: &str,
    task_id: &str,
    sync: SyncState,
) -> CommandResult<Applied<Task>> {
    match tree::find_task(&store.categories(), category_id, project_id, task_id) {
        Some(item) => ok(Applied {
            item: item.clone(),
            sync,
        }),
        None => err(&format!("task not found: {task_id}")),
    }
}
