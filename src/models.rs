use serde::{Deserialize, Deserializer, Serialize};

use crate::timefmt::{self, Timestamp};

pub const PERSONAL_CATEGORY_ID: &str = "personal";
pub const WORK_CATEGORY_ID: &str = "work";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub completed: bool,
    pub priority: Priority,
    #[serde(with = "timefmt::iso")]
    pub created_at: Timestamp,
    #[serde(with = "timefmt::iso")]
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(
        default,
        with = "timefmt::iso_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub deadline: Option<Timestamp>,
    #[serde(with = "timefmt::iso")]
    pub created_at: Timestamp,
    #[serde(with = "timefmt::iso")]
    pub updated_at: Timestamp,
    pub tasks: Vec<Task>,
    pub category_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    pub icon: String,
    pub color: String,
    pub projects: Vec<Project>,
    #[serde(with = "timefmt::iso")]
    pub created_at: Timestamp,
    #[serde(with = "timefmt::iso")]
    pub updated_at: Timestamp,
}

impl Category {
    pub fn task_count(&self) -> usize {
        self.projects.iter().map(|project| project.tasks.len()).sum()
    }
}

/// Partial update for a category. `None` leaves the field as it is.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CategoryPatch {
    pub name: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
}

/// Partial update for a project. Clearable fields use `Some(None)` to reset.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPatch {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub color: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option_timestamp")]
    pub deadline: Option<Option<Timestamp>>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    pub title: Option<String>,
    pub completed: Option<bool>,
    pub priority: Option<Priority>,
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn double_option_timestamp<'de, D>(deserializer: D) -> Result<Option<Option<Timestamp>>, D::Error>
where
    D: Deserializer<'de>,
{
    timefmt::iso_option::deserialize(deserializer).map(Some)
}

fn require_text(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    Ok(())
}

/// `#RGB` or `#RRGGBB`.
pub fn is_hex_color(value: &str) -> bool {
    let Some(digits) = value.strip_prefix('#') else {
        return false;
    };
    matches!(digits.len(), 3 | 6) && digits.chars().all(|c| c.is_ascii_hexdigit())
}

fn require_color(field: &str, value: &str) -> Result<(), String> {
    if !is_hex_color(value) {
        return Err(format!("{field} must be a hex color, got {value:?}"));
    }
    Ok(())
}

impl Category {
    pub fn validate(&self) -> Result<(), String> {
        require_text("category id", &self.id)?;
        require_text("category name", &self.name)?;
        require_color("category color", &self.color)?;
        for project in &self.projects {
            project.validate()?;
        }
        Ok(())
    }
}

impl Project {
    pub fn validate(&self) -> Result<(), String> {
        require_text("project id", &self.id)?;
        require_text("project name", &self.name)?;
        if let Some(color) = &self.color {
            require_color("project color", color)?;
        }
        for task in &self.tasks {
            task.validate()?;
        }
        Ok(())
    }
}

impl Task {
    pub fn validate(&self) -> Result<(), String> {
        require_text("task id", &self.id)?;
        require_text("task title", &self.title)
    }
}

impl CategoryPatch {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(name) = &self.name {
            require_text("category name", name)?;
        }
        if let Some(color) = &self.color {
            require_color("category color", color)?;
        }
        Ok(())
    }
}

impl ProjectPatch {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(name) = &self.name {
            require_text("project name", name)?;
        }
        if let Some(Some(color)) = &self.color {
            require_color("project color", color)?;
        }
        Ok(())
    }
}

impl TaskPatch {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(title) = &self.title {
            require_text("task title", title)?;
        }
        Ok(())
    }
}

/// Random identifier for newly created entities.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredData {
    pub categories: Vec<Category>,
    pub version: String,
    #[serde(with = "timefmt::iso")]
    pub last_updated: Timestamp,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Zh,
    Bo,
}

impl Language {
    pub fn from_locale(locale: &str) -> Self {
        let locale = locale.trim().to_lowercase();
        if locale.starts_with("zh") {
            Language::Zh
        } else if locale.starts_with("bo") {
            Language::Bo
        } else {
            Language::En
        }
    }

    pub fn detect() -> Self {
        Self::from_locale(&sys_locale::get_locale().unwrap_or_default())
    }
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "en" => Ok(Language::En),
            "zh" => Ok(Language::Zh),
            "bo" => Ok(Language::Bo),
            other => Err(format!("unsupported language: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Preferences {
    #[serde(default = "Language::detect")]
    pub language: Language,
    #[serde(default)]
    pub dark_mode: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            language: Language::detect(),
            dark_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PreferencesFile {
    pub schema_version: u32,
    pub preferences: Preferences,
}
