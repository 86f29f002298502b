use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::models::{Category, Preferences, PreferencesFile, StoredData};
use crate::timefmt::{self, Timestamp};

pub const DATA_FILE: &str = "norbu-todo-data.json";
pub const DATA_VERSION: &str = "1.0.0";
const PREFERENCES_FILE: &str = "settings.json";
const PREFERENCES_SCHEMA_VERSION: u32 = 1;
const EXPORT_PREFIX: &str = "norbu-todo-backup";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no data to export")]
    Empty,
    #[error("invalid data format: {0}")]
    InvalidFormat(String),
}

/// Single-key durable store: the whole tree lives in one JSON document under `root`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_path(&self) -> PathBuf {
        self.root.join(DATA_FILE)
    }

    pub fn ensure_dirs(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    pub fn save(&self, categories: &[Category]) -> Result<(), StorageError> {
        let data = StoredData {
            categories: categories.to_vec(),
            version: DATA_VERSION.to_string(),
            last_updated: timefmt::now(),
        };
        self.ensure_dirs()?;
        self.write_atomic(self.data_path(), &data)
    }

    /// `None` when nothing is stored or the stored document cannot be read.
    pub fn load(&self) -> Option<Vec<Category>> {
        match self.load_json::<StoredData>(self.data_path()) {
            Ok(data) => Some(data.categories),
            Err(StorageError::Io(err)) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                log::error!(
                    "failed to load stored data path={} err={err}",
                    self.data_path().display()
                );
                None
            }
        }
    }

    pub fn has_data(&self) -> bool {
        self.data_path().is_file()
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        match fs::remove_file(self.data_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Writes the stored document, pretty-printed, to a dated file inside `dir`.
    pub fn export_as_json(&self, dir: &Path) -> Result<PathBuf, StorageError> {
        let raw = match self.read_text(&self.data_path()) {
            Ok(raw) => raw,
            Err(StorageError::Io(err)) if err.kind() == ErrorKind::NotFound => {
                return Err(StorageError::Empty)
            }
            Err(err) => return Err(err),
        };
        let value: serde_json::Value = serde_json::from_str(&raw)?;
        fs::create_dir_all(dir)?;
        let path = dir.join(export_file_name(&timefmt::now()));
        self.write_atomic(path.clone(), &value)?;
        Ok(path)
    }

    /// Replaces the stored data with the contents of `source`. Prior data is left untouched
    /// when the file cannot be read or does not hold a `categories` array.
    pub fn import_from_json(&self, source: &Path) -> bool {
        let result = self
            .read_text(source)
            .and_then(|text| parse_import(&text))
            .and_then(|categories| self.save(&categories));
        match result {
            Ok(()) => {
                log::info!("imported data from {}", source.display());
                true
            }
            Err(err) => {
                log::error!("failed to import {} err={err}", source.display());
                false
            }
        }
    }

    pub fn load_preferences(&self) -> Preferences {
        match self.load_json::<PreferencesFile>(self.root.join(PREFERENCES_FILE)) {
            Ok(file) => file.preferences,
            Err(StorageError::Io(err)) if err.kind() == ErrorKind::NotFound => {
                Preferences::default()
            }
            Err(err) => {
                log::warn!("failed to load preferences, using defaults err={err}");
                Preferences::default()
            }
        }
    }

    pub fn save_preferences(&self, preferences: &Preferences) -> Result<(), StorageError> {
        let file = PreferencesFile {
            schema_version: PREFERENCES_SCHEMA_VERSION,
            preferences: preferences.clone(),
        };
        self.ensure_dirs()?;
        self.write_atomic(self.root.join(PREFERENCES_FILE), &file)
    }

    fn read_text(&self, path: &Path) -> Result<String, StorageError> {
        let mut file = File::open(path)?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        Ok(buf)
    }

    fn load_json<T: DeserializeOwned>(&self, path: PathBuf) -> Result<T, StorageError> {
        let buf = self.read_text(&path)?;
        Ok(serde_json::from_str(&buf)?)
    }

    fn write_atomic<T: Serialize>(&self, path: PathBuf, data: &T) -> Result<(), StorageError> {
        let temp_path = path.with_extension("tmp");
        let json = serde_json::to_vec_pretty(data)?;
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(temp_path, path)?;
        Ok(())
    }
}

pub fn export_file_name(now: &Timestamp) -> String {
    format!("{EXPORT_PREFIX}-{}.json", now.format("%Y-%m-%d"))
}

/// Accepts any JSON object carrying a `categories` array; every date inside is parsed.
///
/// Each project is re-linked to the category it sits in. Blank names, bad colors and ids
/// repeated anywhere in the file reject the whole import.
pub fn parse_import(text: &str) -> Result<Vec<Category>, StorageError> {
    let mut value: serde_json::Value = serde_json::from_str(text)?;
    let categories = match value.get_mut("categories") {
        Some(categories) if categories.is_array() => categories.take(),
        _ => {
            return Err(StorageError::InvalidFormat(
                "expected an object with a `categories` array".to_string(),
            ))
        }
    };
    let mut categories: Vec<Category> = serde_json::from_value(categories)?;
    for category in &mut categories {
        for project in &mut category.projects {
            project.category_id = category.id.clone();
        }
    }
    check_import(&categories)?;
    Ok(categories)
}

fn check_import(categories: &[Category]) -> Result<(), StorageError> {
    let mut category_ids = HashSet::new();
    let mut project_ids = HashSet::new();
    let mut task_ids = HashSet::new();
    for category in categories {
        category.validate().map_err(StorageError::InvalidFormat)?;
        unique(&mut category_ids, "category", &category.id)?;
        for project in &category.projects {
            unique(&mut project_ids, "project", &project.id)?;
            for task in &project.tasks {
                unique(&mut task_ids, "task", &task.id)?;
            }
        }
    }
    Ok(())
}

fn unique<'a>(seen: &mut HashSet<&'a str>, kind: &str, id: &'a str) -> Result<(), StorageError> {
    if !seen.insert(id) {
        return Err(StorageError::InvalidFormat(format!("duplicate {kind} id: {id}")));
    }
    Ok(())
}
