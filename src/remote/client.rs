use async_trait::async_trait;
use serde_json::Value;

use super::RemoteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Categories,
    Projects,
    Tasks,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Categories => "categories",
            Table::Projects => "projects",
            Table::Tasks => "tasks",
        }
    }

    /// Foreign key column and the table it points at.
    pub fn parent(self) -> Option<(&'static str, Table)> {
        match self {
            Table::Categories => None,
            Table::Projects => Some(("category_id", Table::Categories)),
            Table::Tasks => Some(("project_id", Table::Projects)),
        }
    }

    pub fn child(self) -> Option<Table> {
        match self {
            Table::Categories => Some(Table::Projects),
            Table::Projects => Some(Table::Tasks),
            Table::Tasks => None,
        }
    }
}

/// Row-level access to the three user-scoped tables. Rows travel as JSON objects with
/// snake_case columns.
#[async_trait]
pub trait TableClient: Send + Sync + 'static {
    /// Rows owned by `user_id`, oldest `created_at` first.
    async fn select(&self, table: Table, user_id: &str) -> Result<Vec<Value>, RemoteError>;

    /// Returns the stored rows, including server-assigned ids.
    async fn insert(&self, table: Table, rows: Vec<Value>) -> Result<Vec<Value>, RemoteError>;

    async fn update(
        &self,
        table: Table,
        user_id: &str,
        id: &str,
        changes: Value,
    ) -> Result<(), RemoteError>;

    /// Dependent rows go with it (foreign keys cascade).
    async fn delete(&self, table: Table, user_id: &str, id: &str) -> Result<(), RemoteError>;
}

#[cfg(feature = "remote")]
pub use http::PostgrestClient;

#[cfg(feature = "remote")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::{Method, RequestBuilder, Response};
    use serde_json::Value;

    use super::{Table, TableClient};
    use crate::remote::{RemoteConfig, RemoteError};

    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    impl From<reqwest::Error> for RemoteError {
        fn from(value: reqwest::Error) -> Self {
            RemoteError::Http(value.to_string())
        }
    }

    /// PostgREST endpoint (`<url>/rest/v1/<table>`), as exposed by Supabase.
    pub struct PostgrestClient {
        http: reqwest::Client,
        base_url: String,
        anon_key: String,
        access_token: String,
    }

    impl PostgrestClient {
        pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
            let http = reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()?;
            Ok(Self {
                http,
                base_url: config.url.trim_end_matches('/').to_string(),
                anon_key: config.anon_key.clone(),
                access_token: config.access_token.clone(),
            })
        }

        fn request(&self, method: Method, table: Table) -> RequestBuilder {
            let url = format!("{}/rest/v1/{}", self.base_url, table.name());
            self.http
                .request(method, url)
                .header("apikey", &self.anon_key)
                .bearer_auth(&self.access_token)
        }
    }

    async fn check(resp: Response) -> Result<Response, RemoteError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(RemoteError::Status {
            status: status.as_u16(),
            body,
        })
    }

    fn eq(value: &str) -> String {
        format!("eq.{value}")
    }

    #[async_trait]
    impl TableClient for PostgrestClient {
        async fn select(&self, table: Table, user_id: &str) -> Result<Vec<Value>, RemoteError> {
            let resp = self
                .request(Method::GET, table)
                .query(&[
                    ("select", "*".to_string()),
                    ("user_id", eq(user_id)),
                    ("order", "created_at.asc".to_string()),
                ])
                .send()
                .await?;
            Ok(check(resp).await?.json().await?)
        }

        async fn insert(&self, table: Table, rows: Vec<Value>) -> Result<Vec<Value>, RemoteError> {
            if rows.is_empty() {
                return Ok(Vec::new());
            }
            let resp = self
                .request(Method::POST, table)
                .header("Prefer", "return=representation")
                .json(&rows)
                .send()
                .await?;
            Ok(check(resp).await?.json().await?)
        }

        async fn update(
            &self,
            table: Table,
            user_id: &str,
            id: &str,
            changes: Value,
        ) -> Result<(), RemoteError> {
            let resp = self
                .request(Method::PATCH, table)
                .query(&[("id", eq(id)), ("user_id", eq(user_id))])
                .json(&changes)
                .send()
                .await?;
            check(resp).await?;
            Ok(())
        }

        async fn delete(&self, table: Table, user_id: &str, id: &str) -> Result<(), RemoteError> {
            let resp = self
                .request(Method::DELETE, table)
                .query(&[("id", eq(id)), ("user_id", eq(user_id))])
                .send()
                .await?;
            check(resp).await?;
            Ok(())
        }
    }
}
