//! Pure edits on the category -> project -> task tree.
//!
//! Every edit takes the current tree by reference and returns a fresh one; the input is never
//! touched. `updated_at` is stamped on the edited entity and on each ancestor.

use std::fmt;

use crate::models::{
    Category, CategoryPatch, Project, ProjectPatch, Task, TaskPatch, PERSONAL_CATEGORY_ID,
    WORK_CATEGORY_ID,
};
use crate::timefmt::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Category,
    Project,
    Task,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Category => f.write_str("category"),
            EntityKind::Project => f.write_str("project"),
            EntityKind::Task => f.write_str("task"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },
    #[error("{kind} already exists: {id}")]
    Duplicate { kind: EntityKind, id: String },
    #[error("invalid input: {0}")]
    Invalid(String),
}

fn not_found(kind: EntityKind, id: &str) -> TreeError {
    TreeError::NotFound {
        kind,
        id: id.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    AddCategory(Category),
    UpdateCategory {
        category_id: String,
        patch: CategoryPatch,
    },
    DeleteCategory {
        category_id: String,
    },
    AddProject {
        category_id: String,
        project: Project,
    },
    UpdateProject {
        category_id: String,
        project_id: String,
        patch: ProjectPatch,
    },
    DeleteProject {
        category_id: String,
        project_id: String,
    },
    AddTask {
        category_id: String,
        project_id: String,
        task: Task,
    },
    UpdateTask {
        category_id: String,
        project_id: String,
        task_id: String,
        patch: TaskPatch,
    },
    DeleteTask {
        category_id: String,
        project_id: String,
        task_id: String,
    },
}

impl Mutation {
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::AddCategory(_) => "add_category",
            Mutation::UpdateCategory { .. } => "update_category",
            Mutation::DeleteCategory { .. } => "delete_category",
            Mutation::AddProject { .. } => "add_project",
            Mutation::UpdateProject { .. } => "update_project",
            Mutation::DeleteProject { .. } => "delete_project",
            Mutation::AddTask { .. } => "add_task",
            Mutation::UpdateTask { .. } => "update_task",
            Mutation::DeleteTask { .. } => "delete_task",
        }
    }

    fn validate(&self) -> Result<(), TreeError> {
        let result = match self {
            Mutation::AddCategory(category) => category.validate(),
            Mutation::UpdateCategory { patch, .. } => patch.validate(),
            Mutation::AddProject { project, .. } => project.validate(),
            Mutation::UpdateProject { patch, .. } => patch.validate(),
            Mutation::AddTask { task, .. } => task.validate(),
            Mutation::UpdateTask { patch, .. } => patch.validate(),
            Mutation::DeleteCategory { .. }
            | Mutation::DeleteProject { .. }
            | Mutation::DeleteTask { .. } => Ok(()),
        };
        result.map_err(TreeError::Invalid)
    }
}

/// Applies `mutation` to a copy of `tree`.
pub fn apply(
    tree: &[Category],
    mutation: &Mutation,
    now: Timestamp,
) -> Result<Vec<Category>, TreeError> {
    mutation.validate()?;
    let mut next = tree.to_vec();
    match mutation {
        Mutation::AddCategory(category) => {
            if next.iter().any(|c| c.id == category.id) {
                return Err(TreeError::Duplicate {
                    kind: EntityKind::Category,
                    id: category.id.clone(),
                });
            }
            let mut category = category.clone();
            category.name = category.name.trim().to_string();
            for project in &mut category.projects {
                project.category_id = category.id.clone();
            }
            next.push(category);
        }
        Mutation::UpdateCategory { category_id, patch } => {
            let category = category_mut(&mut next, category_id)?;
            if let Some(name) = &patch.name {
                category.name = name.trim().to_string();
            }
            if let Some(icon) = &patch.icon {
                category.icon = icon.clone();
            }
            if let Some(color) = &patch.color {
                category.color = color.clone();
            }
            touch(&mut category.updated_at, now);
        }
        Mutation::DeleteCategory { category_id } => {
            let before = next.len();
            next.retain(|c| &c.id != category_id);
            if next.len() == before {
                return Err(not_found(EntityKind::Category, category_id));
            }
        }
        Mutation::AddProject {
            category_id,
            project,
        } => {
            if find_project_anywhere(&next, &project.id) {
                return Err(TreeError::Duplicate {
                    kind: EntityKind::Project,
                    id: project.id.clone(),
                });
            }
            let category = category_mut(&mut next, category_id)?;
            let mut project = project.clone();
            project.name = project.name.trim().to_string();
            project.category_id = category.id.clone();
            category.projects.push(project);
            touch(&mut category.updated_at, now);
        }
        Mutation::UpdateProject {
            category_id,
            project_id,
            patch,
        } => {
            let category = category_mut(&mut next, category_id)?;
            let project = project_mut(category, project_id)?;
            if let Some(name) = &patch.name {
                project.name = name.trim().to_string();
            }
            if let Some(description) = &patch.description {
                project.description = description.clone();
            }
            if let Some(color) = &patch.color {
                project.color = color.clone();
            }
            if let Some(deadline) = &patch.deadline {
                project.deadline = *deadline;
            }
            touch(&mut project.updated_at, now);
            touch(&mut category.updated_at, now);
        }
        Mutation::DeleteProject {
            category_id,
            project_id,
        } => {
            let category = category_mut(&mut next, category_id)?;
            let before = category.projects.len();
            category.projects.retain(|p| &p.id != project_id);
            if category.projects.len() == before {
                return Err(not_found(EntityKind::Project, project_id));
            }
            touch(&mut category.updated_at, now);
        }
        Mutation::AddTask {
            category_id,
            project_id,
            task,
        } => {
            if find_task_anywhere(&next, &task.id) {
                return Err(TreeError::Duplicate {
                    kind: EntityKind::Task,
                    id: task.id.clone(),
                });
            }
            let category = category_mut(&mut next, category_id)?;
            let project = project_mut(category, project_id)?;
            let mut task = task.clone();
            task.title = task.title.trim().to_string();
            project.tasks.push(task);
            touch(&mut project.updated_at, now);
            touch(&mut category.updated_at, now);
        }
        Mutation::UpdateTask {
            category_id,
            project_id,
            task_id,
            patch,
        } => {
            let category = category_mut(&mut next, category_id)?;
            let project = project_mut(category, project_id)?;
            let task = project
                .tasks
                .iter_mut()
                .find(|t| &t.id == task_id)
                .ok_or_else(|| not_found(EntityKind::Task, task_id))?;
            if let Some(title) = &patch.title {
                task.title = title.trim().to_string();
            }
            if let Some(completed) = patch.completed {
                task.completed = completed;
            }
            if let Some(priority) = patch.priority {
                task.priority = priority;
            }
            touch(&mut task.updated_at, now);
            touch(&mut project.updated_at, now);
            touch(&mut category.updated_at, now);
        }
        Mutation::DeleteTask {
            category_id,
            project_id,
            task_id,
        } => {
            let category = category_mut(&mut next, category_id)?;
            let project = project_mut(category, project_id)?;
            let before = project.tasks.len();
            project.tasks.retain(|t| &t.id != task_id);
            if project.tasks.len() == before {
                return Err(not_found(EntityKind::Task, task_id));
            }
            touch(&mut project.updated_at, now);
            touch(&mut category.updated_at, now);
        }
    }
    Ok(next)
}

// Never moves a timestamp backwards, even if the wall clock does.
fn touch(updated_at: &mut Timestamp, now: Timestamp) {
    if now > *updated_at {
        *updated_at = now;
    }
}

fn category_mut<'a>(tree: &'a mut [Category], id: &str) -> Result<&'a mut Category, TreeError> {
    tree.iter_mut()
        .find(|c| c.id == id)
        .ok_or_else(|| not_found(EntityKind::Category, id))
}

fn project_mut<'a>(category: &'a mut Category, id: &str) -> Result<&'a mut Project, TreeError> {
    category
        .projects
        .iter_mut()
        .find(|p| p.id == id)
        .ok_or_else(|| not_found(EntityKind::Project, id))
}

fn find_project_anywhere(tree: &[Category], id: &str) -> bool {
    tree.iter().flat_map(|c| &c.projects).any(|p| p.id == id)
}

fn find_task_anywhere(tree: &[Category], id: &str) -> bool {
    tree.iter()
        .flat_map(|c| &c.projects)
        .flat_map(|p| &p.tasks)
        .any(|t| t.id == id)
}

pub fn find_category<'a>(tree: &'a [Category], id: &str) -> Option<&'a Category> {
    tree.iter().find(|c| c.id == id)
}

pub fn find_project<'a>(tree: &'a [Category], category_id: &str, id: &str) -> Option<&'a Project> {
    find_category(tree, category_id)?
        .projects
        .iter()
        .find(|p| p.id == id)
}

pub fn find_task<'a>(
    tree: &'a [Category],
    category_id: &str,
    project_id: &str,
    id: &str,
) -> Option<&'a Task> {
    find_project(tree, category_id, project_id)?
        .tasks
        .iter()
        .find(|t| t.id == id)
}

pub fn total_task_count(tree: &[Category]) -> usize {
    tree.iter().map(Category::task_count).sum()
}

/// The two categories a first-time user starts with.
pub fn default_categories(now: Timestamp) -> Vec<Category> {
    vec![
        Category {
            id: PERSONAL_CATEGORY_ID.to_string(),
            name: "Personal".to_string(),
            icon: "👤".to_string(),
            color: "#DC4C3E".to_string(),
            projects: Vec::new(),
            created_at: now,
            updated_at: now,
        },
        Category {
            id: WORK_CATEGORY_ID.to_string(),
            name: "Work".to_string(),
            icon: "💼".to_string(),
            color: "#2563EB".to_string(),
            projects: Vec::new(),
            created_at: now,
            updated_at: now,
        },
    ]
}
