use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{Category, Priority, Project, Task};
use crate::timefmt::{self, Timestamp};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct CategoryRow {
    // Absent on insert when the server assigns the id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub user_id: String,
    pub name: String,
    pub icon: String,
    pub color: String,
    #[serde(with = "timefmt::iso")]
    pub created_at: Timestamp,
    #[serde(with = "timefmt::iso")]
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ProjectRow {
    pub id: String,
    pub user_id: String,
    pub category_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default, with = "timefmt::iso_option")]
    pub deadline: Option<Timestamp>,
    #[serde(with = "timefmt::iso")]
    pub created_at: Timestamp,
    #[serde(with = "timefmt::iso")]
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct TaskRow {
    pub id: String,
    pub user_id: String,
    pub project_id: String,
    pub title: String,
    pub completed: bool,
    pub priority: Priority,
    #[serde(with = "timefmt::iso")]
    pub created_at: Timestamp,
    #[serde(with = "timefmt::iso")]
    pub updated_at: Timestamp,
}

impl CategoryRow {
    pub fn from_category(category: &Category, user_id: &str) -> Self {
        Self {
            id: Some(category.id.clone()),
            user_id: user_id.to_string(),
            name: category.name.clone(),
            icon: category.icon.clone(),
            color: category.color.clone(),
            created_at: category.created_at,
            updated_at: category.updated_at,
        }
    }
}

impl ProjectRow {
    pub fn from_project(project: &Project, user_id: &str) -> Self {
        Self {
            id: project.id.clone(),
            user_id: user_id.to_string(),
            category_id: project.category_id.clone(),
            name: project.name.clone(),
            description: project.description.clone(),
            color: project.color.clone(),
            deadline: project.deadline,
            created_at: project.created_at,
            updated_at: project.updated_at,
        }
    }
}

impl TaskRow {
    pub fn from_task(task: &Task, project_id: &str, user_id: &str) -> Self {
        Self {
            id: task.id.clone(),
            user_id: user_id.to_string(),
            project_id: project_id.to_string(),
            title: task.title.clone(),
            completed: task.completed,
            priority: task.priority,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

/// Flattens a category subtree into rows, parents before children.
pub fn flatten_category(
    category: &Category,
    user_id: &str,
) -> (CategoryRow, Vec<ProjectRow>, Vec<TaskRow>) {
    let mut projects = Vec::new();
    let mut tasks = Vec::new();
    for project in &category.projects {
        let (project_row, task_rows) = flatten_project(project, user_id);
        projects.push(project_row);
        tasks.extend(task_rows);
    }
    (CategoryRow::from_category(category, user_id), projects, tasks)
}

pub fn flatten_project(project: &Project, user_id: &str) -> (ProjectRow, Vec<TaskRow>) {
    let tasks = project
        .tasks
        .iter()
        .map(|task| TaskRow::from_task(task, &project.id, user_id))
        .collect();
    (ProjectRow::from_project(project, user_id), tasks)
}

/// Rebuilds the tree from the three flat tables, keeping row order. Rows whose parent is
/// missing are dropped.
pub fn assemble_tree(
    categories: Vec<CategoryRow>,
    projects: Vec<ProjectRow>,
    tasks: Vec<TaskRow>,
) -> Vec<Category> {
    let mut tree: Vec<Category> = Vec::with_capacity(categories.len());
    let mut category_index: HashMap<String, usize> = HashMap::new();
    for row in categories {
        let Some(id) = row.id else {
            log::warn!("skipping category row without id name={}", row.name);
            continue;
        };
        category_index.insert(id.clone(), tree.len());
        tree.push(Category {
            id,
            name: row.name,
            icon: row.icon,
            color: row.color,
            projects: Vec::new(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        });
    }

    let mut project_index: HashMap<String, (usize, usize)> = HashMap::new();
    for row in projects {
        let Some(&category_pos) = category_index.get(&row.category_id) else {
            log::warn!(
                "dropping orphan project id={} category_id={}",
                row.id,
                row.category_id
            );
            continue;
        };
        let category = &mut tree[category_pos];
        project_index.insert(row.id.clone(), (category_pos, category.projects.len()));
        category.projects.push(Project {
            id: row.id,
            name: row.name,
            description: row.description,
            color: row.color,
            deadline: row.deadline,
            created_at: row.created_at,
            updated_at: row.updated_at,
            tasks: Vec::new(),
            category_id: row.category_id,
        });
    }

    for row in tasks {
        let Some(&(category_pos, project_pos)) = project_index.get(&row.project_id) else {
            log::warn!(
                "dropping orphan task id={} project_id={}",
                row.id,
                row.project_id
            );
            continue;
        };
        tree[category_pos].projects[project_pos].tasks.push(Task {
            id: row.id,
            title: row.title,
            completed: row.completed,
            priority: row.priority,
            created_at: row.created_at,
            updated_at: row.updated_at,
        });
    }

    tree
}
