use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Request, Response, StatusCode, Url};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::model::{Category, CategoryType, Material};
use crate::remote::model::{ErrorBody, UpsertedRow};

pub mod model;

static UNSAFE_PATH_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[/\\\x00-\x1f\x7f]").expect("valid path regex"));

/// Failure talking to the backend, classified so callers can tell *why*.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("object already exists: {0}")]
    Duplicate(String),
    #[error("backend error {status}: {message}")]
    Api { status: u16, message: String },
}

impl RemoteError {
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteError::Network(_) => "network",
            RemoteError::Auth(_) => "auth",
            RemoteError::Permission(_) => "permission",
            RemoteError::Duplicate(_) => "duplicate",
            RemoteError::Api { .. } => "api",
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, RemoteError::Duplicate(_))
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            return RemoteError::Network(err.to_string());
        }
        match err.status() {
            Some(status) => classify(status, &err.to_string()),
            None => RemoteError::Network(err.to_string()),
        }
    }
}

/// Map an HTTP failure to a [`RemoteError`]: status code first, then message keywords.
pub fn classify(status: StatusCode, body: &str) -> RemoteError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .clone()
        .or(parsed.msg.clone())
        .or(parsed.error.clone())
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| body.trim().to_string());
    // Storage reports duplicates as 400 with `statusCode: "409"` in the body.
    let embedded_status = parsed.status_code.as_ref().and_then(|v| match v {
        Value::String(s) => s.parse::<u16>().ok(),
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        _ => None,
    });
    let lowered = format!(
        "{} {}",
        parsed.error.as_deref().unwrap_or_default(),
        message
    )
    .to_lowercase();

    if status == StatusCode::CONFLICT
        || embedded_status == Some(409)
        || lowered.contains("duplicate")
        || lowered.contains("already exists")
    {
        return RemoteError::Duplicate(message);
    }
    if status == StatusCode::UNAUTHORIZED || lowered.contains("jwt") || lowered.contains("auth") {
        return RemoteError::Auth(message);
    }
    if status == StatusCode::FORBIDDEN
        || lowered.contains("permission")
        || lowered.contains("denied")
    {
        return RemoteError::Permission(message);
    }
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::GATEWAY_TIMEOUT
        || lowered.contains("network")
        || lowered.contains("timeout")
    {
        return RemoteError::Network(message);
    }
    RemoteError::Api {
        status: status.as_u16(),
        message,
    }
}

/// Storage key for a material's payload: `{category}/{local_id}_{file_name}`.
pub fn object_path(category: CategoryType, local_id: &str, file_name: &str) -> String {
    let safe_name = UNSAFE_PATH_CHARS.replace_all(file_name.trim(), "_");
    format!("{}/{}_{}", category.as_str(), local_id, safe_name)
}

/// The remote half of synchronization: object storage plus the metadata table.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Store `bytes` at `path`, overwriting when the backend allows it.
    async fn upload_object(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), RemoteError>;

    fn public_url(&self, path: &str) -> String;

    /// Insert-or-update one metadata row keyed by `local_id`. Returns the
    /// server-assigned id when the backend echoes one.
    async fn upsert_material(&self, row: &Value) -> Result<Option<String>, RemoteError>;

    /// Insert-or-update one category row keyed by `id`.
    async fn upsert_category(&self, row: &Value) -> Result<(), RemoteError>;

    /// Cheap reachability check used for online/offline detection.
    async fn ping(&self) -> Result<(), RemoteError>;
}

#[derive(Clone)]
pub struct SupabaseClient {
    http: Client,
    base_url: Url,
    anon_key: String,
    bucket: String,
    table: String,
    categories_table: String,
}

impl fmt::Debug for SupabaseClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupabaseClient")
            .field("base_url", &self.base_url)
            .field("bucket", &self.bucket)
            .field("table", &self.table)
            .field("categories_table", &self.categories_table)
            .finish_non_exhaustive()
    }
}

impl SupabaseClient {
    pub fn new(
        base_url: &str,
        anon_key: String,
        bucket: String,
        table: String,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url.trim())
            .with_context(|| format!("invalid Supabase URL {}", base_url))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("Supabase URL {} cannot be used as a base", base_url));
        }
        let http = Client::builder()
            .user_agent("materials-sync/0.1")
            .timeout(timeout)
            .no_proxy()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            anon_key,
            bucket,
            table,
            categories_table: "categories".to_string(),
        })
    }

    pub fn with_categories_table(mut self, table: impl Into<String>) -> Self {
        self.categories_table = table.into();
        self
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(
            &cfg.supabase.url,
            cfg.supabase.anon_key.clone(),
            cfg.supabase.bucket.clone(),
            cfg.supabase.table.clone(),
            cfg.app.request_timeout(),
        )
        .map(|client| client.with_categories_table(cfg.supabase.categories_table.clone()))
    }

    /// Base URL extended by path segments, each percent-encoded on its own.
    fn endpoint<'a, I>(&self, segments: I) -> Result<Url>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Supabase URL cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn object_endpoint(&self, prefix: &[&str], path: &str) -> Result<Url> {
        let segments = prefix
            .iter()
            .copied()
            .chain(std::iter::once(self.bucket.as_str()))
            .chain(path.split('/').filter(|s| !s.is_empty()));
        self.endpoint(segments)
    }

    pub fn build_upload_request(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<Request> {
        let url = self.object_endpoint(&["storage", "v1", "object"], path)?;
        self.http
            .post(url)
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
            .header("x-upsert", "true")
            .header("Content-Type", content_type)
            .body(bytes.to_vec())
            .build()
            .context("failed to build storage upload request")
    }

    pub fn build_upsert_request(&self, row: &Value) -> Result<Request> {
        let mut url = self.endpoint(["rest", "v1", self.table.as_str()])?;
        url.query_pairs_mut().append_pair("on_conflict", "local_id");
        self.http
            .post(url)
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&Value::Array(vec![row.clone()]))
            .build()
            .context("failed to build upsert request")
    }

    pub fn build_category_upsert_request(&self, row: &Value) -> Result<Request> {
        let mut url = self.endpoint(["rest", "v1", self.categories_table.as_str()])?;
        url.query_pairs_mut().append_pair("on_conflict", "id");
        self.http
            .post(url)
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&Value::Array(vec![row.clone()]))
            .build()
            .context("failed to build category upsert request")
    }

    async fn execute(&self, request: Request) -> Result<Response, RemoteError> {
        debug!(method = %request.method(), url = %request.url(), "sending supabase request");
        let res = self.http.execute(request).await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!(%status, body = %body, "supabase request failed");
            return Err(classify(status, &body));
        }
        Ok(res)
    }
}

fn request_build_error(err: anyhow::Error) -> RemoteError {
    RemoteError::Api {
        status: 0,
        message: format!("{:#}", err),
    }
}

#[async_trait]
impl RemoteBackend for SupabaseClient {
    async fn upload_object(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), RemoteError> {
        let request = self
            .build_upload_request(path, bytes, content_type)
            .map_err(request_build_error)?;
        self.execute(request).await?;
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        self.object_endpoint(&["storage", "v1", "object", "public"], path)
            .map(|url| url.to_string())
            .unwrap_or_else(|_| {
                format!(
                    "{}/storage/v1/object/public/{}/{}",
                    self.base_url.as_str().trim_end_matches('/'),
                    self.bucket,
                    path
                )
            })
    }

    async fn upsert_material(&self, row: &Value) -> Result<Option<String>, RemoteError> {
        let request = self.build_upsert_request(row).map_err(request_build_error)?;
        let res = self.execute(request).await?;
        let body = res.text().await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        let rows: Vec<UpsertedRow> = serde_json::from_str(&body).unwrap_or_default();
        Ok(rows.first().and_then(UpsertedRow::server_id))
    }

    async fn upsert_category(&self, row: &Value) -> Result<(), RemoteError> {
        let request = self
            .build_category_upsert_request(row)
            .map_err(request_build_error)?;
        self.execute(request).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        let url = self
            .endpoint(["auth", "v1", "health"])
            .map_err(request_build_error)?;
        // Any HTTP answer means the backend is reachable.
        self.http
            .get(url)
            .header("apikey", &self.anon_key)
            .send()
            .await?;
        Ok(())
    }
}

/// Metadata row pushed for a material; payload bytes are never included.
pub fn build_material_row(
    material: &Material,
    file_url: Option<&str>,
    updated_at: DateTime<Utc>,
) -> Value {
    json!({
        "local_id": material.local_id,
        "title": material.title,
        "description": material.description,
        "category_type": material.category_type.as_str(),
        "bible_book": material.bible_book,
        "file_name": material.file_name,
        "file_size": material.file_size,
        "file_type": material.file_type,
        "file_url": file_url,
        "tags": material.tags,
        "metadata": Value::Object(material.metadata.clone()),
        "created_at": material.created_at.to_rfc3339(),
        "updated_at": updated_at.to_rfc3339(),
        "is_deleted": material.is_deleted,
    })
}

/// Category row in the backend's column naming.
pub fn build_category_row(category: &Category, updated_at: DateTime<Utc>) -> Value {
    json!({
        "id": category.id,
        "name": category.name,
        "type": category.kind.as_str(),
        "parentId": category.parent_id,
        "order": category.sort_order,
        "created_at": category.created_at.to_rfc3339(),
        "updated_at": updated_at.to_rfc3339(),
        "sync_status": "synced",
    })
}
