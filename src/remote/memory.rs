use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::client::{Table, TableClient};
use super::RemoteError;

/// In-process stand-in for the remote tables: assigns missing ids, enforces foreign keys and
/// cascades deletes the way the hosted schema does.
#[derive(Default)]
pub struct MemoryTables {
    tables: Mutex<HashMap<Table, Vec<Value>>>,
    offline: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every write fails; reads keep working.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Successful insert/update/delete calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn rows(&self, table: Table) -> Vec<Value> {
        let guard = self.tables.lock().expect("tables poisoned");
        guard.get(&table).cloned().unwrap_or_default()
    }

    fn ensure_online(&self) -> Result<(), RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Rejected("remote unavailable".to_string()));
        }
        Ok(())
    }
}

fn field<'a>(row: &'a Value, name: &str) -> Option<&'a str> {
    row.get(name).and_then(Value::as_str)
}

fn remove_cascade(tables: &mut HashMap<Table, Vec<Value>>, table: Table, ids: &[String]) {
    if ids.is_empty() {
        return;
    }
    let rows = tables.entry(table).or_default();
    rows.retain(|row| !field(row, "id").is_some_and(|id| ids.iter().any(|x| x == id)));

    let Some(child) = table.child() else {
        return;
    };
    let Some((fk, _)) = child.parent() else {
        return;
    };
    let child_ids: Vec<String> = tables
        .get(&child)
        .map(|rows| {
            rows.iter()
                .filter(|row| field(row, fk).is_some_and(|parent| ids.iter().any(|x| x == parent)))
                .filter_map(|row| field(row, "id").map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    remove_cascade(tables, child, &child_ids);
}

#[async_trait]
impl TableClient for MemoryTables {
    async fn select(&self, table: Table, user_id: &str) -> Result<Vec<Value>, RemoteError> {
        let guard = self.tables.lock().expect("tables poisoned");
        let mut rows: Vec<Value> = guard
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| field(row, "user_id") == Some(user_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        // ISO-8601 UTC text with a fixed layout sorts chronologically.
        rows.sort_by(|a, b| field(a, "created_at").cmp(&field(b, "created_at")));
        Ok(rows)
    }

    // A batch is stored whole or not at all.
    async fn insert(&self, table: Table, rows: Vec<Value>) -> Result<Vec<Value>, RemoteError> {
        self.ensure_online()?;
        let mut guard = self.tables.lock().expect("tables poisoned");
        let mut stored: Vec<Value> = Vec::with_capacity(rows.len());
        for mut row in rows {
            let Some(object) = row.as_object_mut() else {
                return Err(RemoteError::Rejected(format!(
                    "{} rows must be objects",
                    table.name()
                )));
            };
            if !object.get("id").is_some_and(Value::is_string) {
                object.insert("id".to_string(), Value::String(uuid::Uuid::new_v4().to_string()));
            }
            let id = field(&row, "id").unwrap_or_default();
            let taken = guard
                .get(&table)
                .into_iter()
                .flatten()
                .chain(&stored)
                .any(|r| field(r, "id") == Some(id));
            if taken {
                return Err(RemoteError::Rejected(format!(
                    "duplicate key in {}: {id}",
                    table.name()
                )));
            }
            if let Some((fk, parent)) = table.parent() {
                let parent_id = field(&row, fk).unwrap_or_default();
                let parent_exists = guard
                    .get(&parent)
                    .is_some_and(|rows| rows.iter().any(|r| field(r, "id") == Some(parent_id)));
                if !parent_exists {
                    return Err(RemoteError::Rejected(format!(
                        "foreign key violation on {}.{fk}: {parent_id}",
                        table.name()
                    )));
                }
            }
            stored.push(row);
        }
        guard.entry(table).or_default().extend(stored.iter().cloned());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn update(
        &self,
        table: Table,
        user_id: &str,
        id: &str,
        changes: Value,
    ) -> Result<(), RemoteError> {
        self.ensure_online()?;
        let Value::Object(changes) = changes else {
            return Err(RemoteError::Rejected("changes must be an object".to_string()));
        };
        let mut guard = self.tables.lock().expect("tables poisoned");
        let rows = guard.entry(table).or_default();
        for row in rows.iter_mut() {
            if field(row, "id") != Some(id) || field(row, "user_id") != Some(user_id) {
                continue;
            }
            if let Some(object) = row.as_object_mut() {
                for (key, value) in &changes {
                    object.insert(key.clone(), value.clone());
                }
            }
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, table: Table, user_id: &str, id: &str) -> Result<(), RemoteError> {
        self.ensure_online()?;
        let mut guard = self.tables.lock().expect("tables poisoned");
        let owned = guard.get(&table).is_some_and(|rows| {
            rows.iter()
                .any(|r| field(r, "id") == Some(id) && field(r, "user_id") == Some(user_id))
        });
        if owned {
            remove_cascade(&mut guard, table, &[id.to_string()]);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn category(id: &str, user: &str) -> Value {
        json!({"id": id, "user_id": user, "name": id, "icon": "*", "color": "#000",
               "created_at": "2024-01-01T00:00:00.000Z", "updated_at": "2024-01-01T00:00:00.000Z"})
    }

    #[tokio::test]
    async fn insert_assigns_ids_and_checks_foreign_keys() {
        let tables = MemoryTables::new();
        let mut row = category("x", "u1");
        row.as_object_mut().unwrap().remove("id");
        let stored = tables.insert(Table::Categories, vec![row]).await.unwrap();
        assert!(field(&stored[0], "id").is_some());

        let err = tables
            .insert(
                Table::Projects,
                vec![json!({"id": "p1", "user_id": "u1", "category_id": "nope"})],
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("foreign key"));
    }

    #[tokio::test]
    async fn select_is_scoped_to_user() {
        let tables = MemoryTables::new();
        tables
            .insert(Table::Categories, vec![category("a", "u1"), category("b", "u2")])
            .await
            .unwrap();
        let rows = tables.select(Table::Categories, "u1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(field(&rows[0], "id"), Some("a"));
    }

    #[tokio::test]
    async fn delete_cascades_to_projects_and_tasks() {
        let tables = MemoryTables::new();
        tables
            .insert(Table::Categories, vec![category("c1", "u1")])
            .await
            .unwrap();
        tables
            .insert(
                Table::Projects,
                vec![json!({"id": "p1", "user_id": "u1", "category_id": "c1"})],
            )
            .await
            .unwrap();
        tables
            .insert(
                Table::Tasks,
                vec![json!({"id": "t1", "user_id": "u1", "project_id": "p1"})],
            )
            .await
            .unwrap();

        // Another user's id does not match.
        tables.delete(Table::Categories, "u2", "c1").await.unwrap();
        assert_eq!(tables.rows(Table::Tasks).len(), 1);

        tables.delete(Table::Categories, "u1", "c1").await.unwrap();
        assert!(tables.rows(Table::Categories).is_empty());
        assert!(tables.rows(Table::Projects).is_empty());
        assert!(tables.rows(Table::Tasks).is_empty());
    }

    #[tokio::test]
    async fn rejected_batch_stores_nothing() {
        let tables = MemoryTables::new();
        tables
            .insert(Table::Categories, vec![category("a", "u2")])
            .await
            .unwrap();
        let err = tables
            .insert(
                Table::Categories,
                vec![category("b", "u1"), category("a", "u1")],
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("duplicate key"));
        assert!(tables.select(Table::Categories, "u1").await.unwrap().is_empty());
        assert_eq!(tables.write_count(), 1);
    }

    #[tokio::test]
    async fn offline_rejects_writes_but_serves_reads() {
        let tables = MemoryTables::new();
        tables.set_offline(true);
        assert!(tables
            .insert(Table::Categories, vec![category("c1", "u1")])
            .await
            .is_err());
        assert!(tables.select(Table::Categories, "u1").await.unwrap().is_empty());
        assert_eq!(tables.write_count(), 0);
    }
}
