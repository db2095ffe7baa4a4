use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use uuid::Uuid;

/// Reconciliation state of a material between the local store and the backend.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Synced,
    #[default]
    Pending,
    Syncing,
    Conflict,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Pending => "pending",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Conflict => "conflict",
            SyncStatus::Error => "error",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "synced" => Some(SyncStatus::Synced),
            "pending" => Some(SyncStatus::Pending),
            "syncing" => Some(SyncStatus::Syncing),
            "conflict" => Some(SyncStatus::Conflict),
            "error" => Some(SyncStatus::Error),
            _ => None,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Where a durable copy of a material is known to exist.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageLocation {
    #[default]
    Local,
    Server,
    Both,
}

impl StorageLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageLocation::Local => "local",
            StorageLocation::Server => "server",
            StorageLocation::Both => "both",
        }
    }

    pub fn parse_location(s: &str) -> Option<Self> {
        match s {
            "local" => Some(StorageLocation::Local),
            "server" => Some(StorageLocation::Server),
            "both" => Some(StorageLocation::Both),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CategoryType {
    Bible,
    General,
}

impl CategoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryType::Bible => "bible",
            CategoryType::General => "general",
        }
    }

    pub fn parse_category(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bible" => Some(CategoryType::Bible),
            "general" => Some(CategoryType::General),
            _ => None,
        }
    }
}

impl fmt::Display for CategoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Intent-log marker: the next push step owed for a material.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    UploadPending,
    MetadataPending,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::UploadPending => "upload_pending",
            SyncPhase::MetadataPending => "metadata_pending",
        }
    }

    pub fn parse_phase(s: &str) -> Option<Self> {
        match s {
            "upload_pending" => Some(SyncPhase::UploadPending),
            "metadata_pending" => Some(SyncPhase::MetadataPending),
            _ => None,
        }
    }
}

/// A single uploaded document: metadata plus an optional binary payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Material {
    #[serde(default)]
    pub local_id: String,
    #[serde(default)]
    pub server_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub category_type: CategoryType,
    #[serde(default)]
    pub bible_book: Option<String>,
    pub file_name: String,
    #[serde(default)]
    pub file_size: i64,
    #[serde(default = "default_content_type")]
    pub file_type: String,
    /// Payload bytes never travel through serde; backups carry them as files.
    #[serde(skip)]
    pub file_data: Option<Vec<u8>>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub sync_status: SyncStatus,
    #[serde(default = "initial_version")]
    pub sync_version: i64,
    #[serde(default)]
    pub sync_phase: Option<SyncPhase>,
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub storage_location: StorageLocation,
}

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

fn initial_version() -> i64 {
    1
}

impl Material {
    /// A freshly uploaded material: new identifier, `pending`, stored locally only.
    pub fn new(title: &str, category_type: CategoryType, file_name: &str) -> Self {
        let now = Utc::now();
        Self {
            local_id: new_local_id(),
            server_id: None,
            title: title.to_string(),
            description: None,
            category_type,
            bible_book: None,
            file_name: file_name.to_string(),
            file_size: 0,
            file_type: guess_content_type(file_name).to_string(),
            file_data: None,
            file_url: None,
            tags: Vec::new(),
            metadata: Map::new(),
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::Pending,
            sync_version: initial_version(),
            sync_phase: None,
            last_sync: None,
            is_deleted: false,
            storage_location: StorageLocation::Local,
        }
    }

    pub fn with_payload(mut self, data: Vec<u8>) -> Self {
        self.file_size = data.len() as i64;
        self.file_data = Some(data);
        self
    }

    pub fn with_book(mut self, book: &str) -> Self {
        self.bible_book = Some(book.to_string());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// True while the payload still has to reach object storage.
    pub fn needs_upload(&self) -> bool {
        self.file_data.is_some()
            && !self.file_name.is_empty()
            && self.file_url.as_deref().map_or(true, |u| u.trim().is_empty())
    }
}

/// Fields a user may change on an existing material. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct MaterialPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub category_type: Option<CategoryType>,
    pub bible_book: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<Map<String, Value>>,
    /// Replacement payload as `(file_name, bytes)`.
    pub file: Option<(String, Vec<u8>)>,
}

impl MaterialPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.category_type.is_none()
            && self.bible_book.is_none()
            && self.tags.is_none()
            && self.metadata.is_none()
            && self.file.is_none()
    }

    /// Apply to `material` in place; does not touch sync bookkeeping.
    pub fn apply(self, material: &mut Material) {
        if let Some(title) = self.title {
            material.title = title;
        }
        if let Some(description) = self.description {
            material.description = description;
        }
        if let Some(category) = self.category_type {
            material.category_type = category;
        }
        if let Some(book) = self.bible_book {
            material.bible_book = book;
        }
        if let Some(tags) = self.tags {
            material.tags = tags;
        }
        if let Some(metadata) = self.metadata {
            material.metadata = metadata;
        }
        if let Some((file_name, data)) = self.file {
            material.file_type = guess_content_type(&file_name).to_string();
            material.file_name = file_name;
            material.file_size = data.len() as i64;
            material.file_data = Some(data);
            material.file_url = None;
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueOp {
    Create,
    Update,
    Delete,
}

impl QueueOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueOp::Create => "create",
            QueueOp::Update => "update",
            QueueOp::Delete => "delete",
        }
    }

    pub fn parse_op(s: &str) -> Option<Self> {
        match s {
            "create" => Some(QueueOp::Create),
            "update" => Some(QueueOp::Update),
            "delete" => Some(QueueOp::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(QueueStatus::Pending),
            "processing" => Some(QueueStatus::Processing),
            "completed" => Some(QueueStatus::Completed),
            "failed" => Some(QueueStatus::Failed),
            _ => None,
        }
    }
}

/// Level of a category in the two-level group/item hierarchy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CategoryKind {
    Group,
    Item,
}

impl CategoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryKind::Group => "group",
            CategoryKind::Item => "item",
        }
    }

    pub fn parse_kind(s: &str) -> Option<Self> {
        match s {
            "group" => Some(CategoryKind::Group),
            "item" => Some(CategoryKind::Item),
            _ => None,
        }
    }
}

/// User-defined category used to organize materials. Items point at their group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub kind: CategoryKind,
    pub parent_id: Option<String>,
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sync_status: SyncStatus,
    pub sync_version: i64,
}

impl Category {
    fn new(name: &str, kind: CategoryKind, parent_id: Option<String>, sort_order: i64) -> Self {
        let now = Utc::now();
        Self {
            id: new_local_id(),
            name: name.to_string(),
            kind,
            parent_id,
            sort_order,
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::Pending,
            sync_version: initial_version(),
        }
    }

    pub fn group(name: &str, sort_order: i64) -> Self {
        Self::new(name, CategoryKind::Group, None, sort_order)
    }

    pub fn item(group_id: &str, name: &str, sort_order: i64) -> Self {
        Self::new(name, CategoryKind::Item, Some(group_id.to_string()), sort_order)
    }
}

/// Fields a user may change on a category.
#[derive(Debug, Clone, Default)]
pub struct CategoryPatch {
    pub name: Option<String>,
    pub sort_order: Option<i64>,
}

impl CategoryPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.sort_order.is_none()
    }

    pub fn apply(self, category: &mut Category) {
        if let Some(name) = self.name {
            category.name = name;
        }
        if let Some(order) = self.sort_order {
            category.sort_order = order;
        }
    }
}

/// Attempt ledger row for one material or category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncQueueEntry {
    pub id: String,
    pub op_type: QueueOp,
    pub entity_type: String,
    pub local_id: String,
    pub data: Value,
    pub status: QueueStatus,
    pub retry_count: i64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn new_local_id() -> String {
    Uuid::new_v4().to_string()
}

/// MIME type from a file name's extension; falls back to `application/octet-stream`.
pub fn guess_content_type<P: AsRef<Path>>(file_name: P) -> &'static str {
    match file_name
        .as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|s| s.to_ascii_lowercase())
    {
        Some(ext) if ext == "txt" => "text/plain",
        Some(ext) if ext == "md" => "text/markdown",
        Some(ext) if ext == "csv" => "text/csv",
        Some(ext) if ext == "html" || ext == "htm" => "text/html",
        Some(ext) if ext == "json" => "application/json",
        Some(ext) if ext == "pdf" => "application/pdf",
        Some(ext) if ext == "doc" => "application/msword",
        Some(ext) if ext == "docx" => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some(ext) if ext == "hwp" => "application/x-hwp",
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "gif" => "image/gif",
        Some(ext) if ext == "mp3" => "audio/mpeg",
        Some(ext) if ext == "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}
