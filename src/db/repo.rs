use super::model::StatusCounts;
use crate::model::{
    Category, CategoryKind, CategoryPatch, CategoryType, Material, MaterialPatch, QueueOp,
    QueueStatus, StorageLocation, SyncPhase, SyncQueueEntry, SyncStatus,
};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Executor, Row, Sqlite, SqlitePool};
use std::str::FromStr;
use tracing::instrument;
use uuid::Uuid;

pub type Pool = SqlitePool;

const SELECT_MATERIALS: &str = "SELECT local_id, server_id, title, description, category_type, \
     bible_book, file_name, file_size, file_type, file_data, file_url, tags, metadata, \
     created_at, updated_at, sync_status, sync_version, sync_phase, last_sync, is_deleted, \
     storage_location FROM materials";

const SELECT_QUEUE: &str = "SELECT id, op_type, entity_type, local_id, data, status, \
     retry_count, error, created_at, updated_at FROM sync_queue";

const SELECT_CATEGORIES: &str = "SELECT id, name, kind, parent_id, sort_order, created_at, \
     updated_at, sync_status, sync_version FROM categories";

const MATERIAL_ENTITY: &str = "material";
const CATEGORY_ENTITY: &str = "category";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    // WAL and stricter durability.
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url {}", normalized))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn material_from_row(row: &SqliteRow) -> Result<Material> {
    let local_id: String = row.get("local_id");

    let category: String = row.get("category_type");
    let category_type = CategoryType::parse_category(&category)
        .ok_or_else(|| anyhow!("material {} has unknown category {}", local_id, category))?;
    let status: String = row.get("sync_status");
    let sync_status = SyncStatus::parse_status(&status)
        .ok_or_else(|| anyhow!("material {} has unknown sync status {}", local_id, status))?;
    let location: String = row.get("storage_location");
    let storage_location = StorageLocation::parse_location(&location)
        .ok_or_else(|| anyhow!("material {} has unknown storage location {}", local_id, location))?;
    let sync_phase = row
        .get::<Option<String>, _>("sync_phase")
        .and_then(|s| SyncPhase::parse_phase(&s));

    let tags: String = row.get("tags");
    let tags: Vec<String> = serde_json::from_str(&tags)
        .with_context(|| format!("material {} has malformed tags", local_id))?;
    let metadata: String = row.get("metadata");
    let metadata: Map<String, Value> = serde_json::from_str(&metadata)
        .with_context(|| format!("material {} has malformed metadata", local_id))?;

    Ok(Material {
        server_id: row.get("server_id"),
        title: row.get("title"),
        description: row.get("description"),
        category_type,
        bible_book: row.get("bible_book"),
        file_name: row.get("file_name"),
        file_size: row.get("file_size"),
        file_type: row.get("file_type"),
        file_data: row.get("file_data"),
        file_url: row
            .get::<Option<String>, _>("file_url")
            .filter(|s| !s.trim().is_empty()),
        tags,
        metadata,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        sync_status,
        sync_version: row.get("sync_version"),
        sync_phase,
        last_sync: row.get("last_sync"),
        is_deleted: row.get("is_deleted"),
        storage_location,
        local_id,
    })
}

fn materials_from_rows(rows: Vec<SqliteRow>) -> Result<Vec<Material>> {
    rows.iter().map(material_from_row).collect()
}

async fn write_material<'e, E>(executor: E, material: &Material) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let tags = serde_json::to_string(&material.tags)?;
    let metadata = serde_json::to_string(&material.metadata)?;
    sqlx::query(
        "INSERT OR REPLACE INTO materials (local_id, server_id, title, description, category_type, \
         bible_book, file_name, file_size, file_type, file_data, file_url, tags, metadata, \
         created_at, updated_at, sync_status, sync_version, sync_phase, last_sync, is_deleted, \
         storage_location) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(material.local_id.as_str())
    .bind(material.server_id.as_deref())
    .bind(material.title.as_str())
    .bind(material.description.as_deref())
    .bind(material.category_type.as_str())
    .bind(material.bible_book.as_deref())
    .bind(material.file_name.as_str())
    .bind(material.file_size)
    .bind(material.file_type.as_str())
    .bind(material.file_data.as_deref())
    .bind(material.file_url.as_deref())
    .bind(tags)
    .bind(metadata)
    .bind(material.created_at)
    .bind(material.updated_at)
    .bind(material.sync_status.as_str())
    .bind(material.sync_version)
    .bind(material.sync_phase.map(|p| p.as_str()))
    .bind(material.last_sync)
    .bind(material.is_deleted)
    .bind(material.storage_location.as_str())
    .execute(executor)
    .await?;
    Ok(())
}

/// Insert or overwrite a material by `local_id`.
#[instrument(skip_all, fields(local_id = %material.local_id))]
pub async fn put_material(pool: &Pool, material: &Material) -> Result<()> {
    write_material(pool, material).await
}

#[instrument(skip_all)]
pub async fn get_all_materials(pool: &Pool) -> Result<Vec<Material>> {
    let rows = sqlx::query(SELECT_MATERIALS).fetch_all(pool).await?;
    materials_from_rows(rows)
}

#[instrument(skip_all)]
pub async fn get_material(pool: &Pool, local_id: &str) -> Result<Option<Material>> {
    let row = sqlx::query(&format!("{} WHERE local_id = ?", SELECT_MATERIALS))
        .bind(local_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(material_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn get_materials_by_book(pool: &Pool, book: &str) -> Result<Vec<Material>> {
    let rows = sqlx::query(&format!("{} WHERE bible_book = ?", SELECT_MATERIALS))
        .bind(book)
        .fetch_all(pool)
        .await?;
    materials_from_rows(rows)
}

#[instrument(skip_all)]
pub async fn get_materials_by_category(
    pool: &Pool,
    category: CategoryType,
) -> Result<Vec<Material>> {
    let rows = sqlx::query(&format!("{} WHERE category_type = ?", SELECT_MATERIALS))
        .bind(category.as_str())
        .fetch_all(pool)
        .await?;
    materials_from_rows(rows)
}

/// Materials the engine owes a push: status `pending` or `error`.
#[instrument(skip_all)]
pub async fn pending_materials(pool: &Pool) -> Result<Vec<Material>> {
    let rows = sqlx::query(&format!(
        "{} WHERE sync_status IN ('pending', 'error') ORDER BY created_at ASC",
        SELECT_MATERIALS
    ))
    .fetch_all(pool)
    .await?;
    materials_from_rows(rows)
}

/// Remove a material and its local ledger rows. Remote copies are left alone.
#[instrument(skip_all)]
pub async fn delete_material(pool: &Pool, local_id: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let deleted = sqlx::query("DELETE FROM materials WHERE local_id = ?")
        .bind(local_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    sqlx::query("DELETE FROM sync_queue WHERE entity_type = ? AND local_id = ?")
        .bind(MATERIAL_ENTITY)
        .bind(local_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(deleted > 0)
}

/// Apply a user edit: the record goes back to `pending` and its version is bumped.
#[instrument(skip_all)]
pub async fn edit_material(pool: &Pool, local_id: &str, patch: MaterialPatch) -> Result<Material> {
    let mut tx = pool.begin().await?;
    let row = sqlx::query(&format!("{} WHERE local_id = ?", SELECT_MATERIALS))
        .bind(local_id)
        .fetch_optional(&mut *tx)
        .await?;
    let Some(row) = row else {
        return Err(anyhow!("material {} not found", local_id));
    };
    let mut material = material_from_row(&row)?;
    patch.apply(&mut material);
    material.updated_at = Utc::now();
    material.sync_status = SyncStatus::Pending;
    material.sync_version += 1;
    write_material(&mut *tx, &material).await?;
    tx.commit().await?;
    Ok(material)
}

/// Flag a material as deleted; the flag reaches the backend with the next upsert.
#[instrument(skip_all)]
pub async fn soft_delete_material(pool: &Pool, local_id: &str) -> Result<()> {
    let affected = sqlx::query(
        "UPDATE materials SET is_deleted = 1, sync_status = 'pending', \
         sync_version = sync_version + 1, updated_at = ? WHERE local_id = ?",
    )
    .bind(Utc::now())
    .bind(local_id)
    .execute(pool)
    .await?
    .rows_affected();
    if affected == 0 {
        return Err(anyhow!("material {} not found", local_id));
    }
    Ok(())
}

// Engine write-backs. Each one only lands while `sync_version` still matches the
// version the engine read; a `false` return means a user edit superseded the push.

#[instrument(skip_all)]
pub async fn mark_upload_pending(pool: &Pool, local_id: &str, version: i64) -> Result<bool> {
    let affected = sqlx::query(
        "UPDATE materials SET sync_phase = 'upload_pending' WHERE local_id = ? AND sync_version = ?",
    )
    .bind(local_id)
    .bind(version)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(affected == 1)
}

/// Record the resolved file URL (if any) and move the intent to the metadata write.
#[instrument(skip_all)]
pub async fn mark_metadata_pending(
    pool: &Pool,
    local_id: &str,
    version: i64,
    file_url: Option<&str>,
) -> Result<bool> {
    let affected = sqlx::query(
        "UPDATE materials SET file_url = COALESCE(?, file_url), sync_phase = 'metadata_pending', \
         sync_status = 'syncing' WHERE local_id = ? AND sync_version = ?",
    )
    .bind(file_url)
    .bind(local_id)
    .bind(version)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(affected == 1)
}

#[instrument(skip_all)]
pub async fn complete_sync(
    pool: &Pool,
    local_id: &str,
    version: i64,
    server_id: Option<&str>,
    synced_at: DateTime<Utc>,
) -> Result<bool> {
    let affected = sqlx::query(
        "UPDATE materials SET sync_status = 'synced', storage_location = 'both', last_sync = ?, \
         server_id = COALESCE(?, server_id), sync_phase = NULL \
         WHERE local_id = ? AND sync_version = ?",
    )
    .bind(synced_at)
    .bind(server_id)
    .bind(local_id)
    .bind(version)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(affected == 1)
}

#[instrument(skip_all)]
pub async fn fail_sync(pool: &Pool, local_id: &str, version: i64) -> Result<bool> {
    let affected = sqlx::query(
        "UPDATE materials SET sync_status = 'error' WHERE local_id = ? AND sync_version = ?",
    )
    .bind(local_id)
    .bind(version)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(affected == 1)
}

/// Records left in `syncing` by an interrupted push go back to `pending`.
#[instrument(skip_all)]
pub async fn recover_interrupted(pool: &Pool) -> Result<u64> {
    let affected =
        sqlx::query("UPDATE materials SET sync_status = 'pending' WHERE sync_status = 'syncing'")
            .execute(pool)
            .await?
            .rows_affected();
    Ok(affected)
}

#[instrument(skip_all)]
pub async fn count_by_status(pool: &Pool) -> Result<StatusCounts> {
    let rows = sqlx::query("SELECT sync_status, COUNT(*) AS n FROM materials GROUP BY sync_status")
        .fetch_all(pool)
        .await?;
    let mut counts = StatusCounts::default();
    for row in rows {
        let status: String = row.get("sync_status");
        let n: i64 = row.get("n");
        if let Some(status) = SyncStatus::parse_status(&status) {
            counts.add(status, n);
        }
    }
    Ok(counts)
}

fn category_from_row(row: &SqliteRow) -> Result<Category> {
    let id: String = row.get("id");
    let kind: String = row.get("kind");
    let kind = CategoryKind::parse_kind(&kind)
        .ok_or_else(|| anyhow!("category {} has unknown kind {}", id, kind))?;
    let status: String = row.get("sync_status");
    let sync_status = SyncStatus::parse_status(&status)
        .ok_or_else(|| anyhow!("category {} has unknown sync status {}", id, status))?;
    Ok(Category {
        name: row.get("name"),
        kind,
        parent_id: row.get("parent_id"),
        sort_order: row.get("sort_order"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        sync_status,
        sync_version: row.get("sync_version"),
        id,
    })
}

fn categories_from_rows(rows: Vec<SqliteRow>) -> Result<Vec<Category>> {
    rows.iter().map(category_from_row).collect()
}

async fn write_category<'e, E>(executor: E, category: &Category) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT OR REPLACE INTO categories (id, name, kind, parent_id, sort_order, created_at, \
         updated_at, sync_status, sync_version) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(category.id.as_str())
    .bind(category.name.as_str())
    .bind(category.kind.as_str())
    .bind(category.parent_id.as_deref())
    .bind(category.sort_order)
    .bind(category.created_at)
    .bind(category.updated_at)
    .bind(category.sync_status.as_str())
    .bind(category.sync_version)
    .execute(executor)
    .await?;
    Ok(())
}

/// Insert or overwrite a category. An item must point at an existing group.
#[instrument(skip_all, fields(id = %category.id))]
pub async fn put_category(pool: &Pool, category: &Category) -> Result<()> {
    match (category.kind, category.parent_id.as_deref()) {
        (CategoryKind::Group, Some(_)) => {
            return Err(anyhow!("category group {} cannot have a parent", category.id));
        }
        (CategoryKind::Item, None) => {
            return Err(anyhow!("category item {} needs a parent group", category.id));
        }
        (CategoryKind::Item, Some(parent)) => match get_category(pool, parent).await? {
            Some(group) if group.kind == CategoryKind::Group => {}
            _ => return Err(anyhow!("parent group {} not found", parent)),
        },
        (CategoryKind::Group, None) => {}
    }
    write_category(pool, category).await
}

#[instrument(skip_all)]
pub async fn get_category(pool: &Pool, id: &str) -> Result<Option<Category>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_CATEGORIES))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(category_from_row).transpose()
}

/// Groups first, each level in display order.
#[instrument(skip_all)]
pub async fn get_all_categories(pool: &Pool) -> Result<Vec<Category>> {
    let rows = sqlx::query(&format!(
        "{} ORDER BY CASE kind WHEN 'group' THEN 0 ELSE 1 END, sort_order ASC, name ASC",
        SELECT_CATEGORIES
    ))
    .fetch_all(pool)
    .await?;
    categories_from_rows(rows)
}

#[instrument(skip_all)]
pub async fn get_category_items(pool: &Pool, group_id: &str) -> Result<Vec<Category>> {
    let rows = sqlx::query(&format!(
        "{} WHERE parent_id = ? ORDER BY sort_order ASC, name ASC",
        SELECT_CATEGORIES
    ))
    .bind(group_id)
    .fetch_all(pool)
    .await?;
    categories_from_rows(rows)
}

/// Rename or reorder a category; it goes back to `pending` with a bumped version.
#[instrument(skip_all)]
pub async fn update_category(pool: &Pool, id: &str, patch: CategoryPatch) -> Result<Category> {
    let mut tx = pool.begin().await?;
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_CATEGORIES))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
    let Some(row) = row else {
        return Err(anyhow!("category {} not found", id));
    };
    let mut category = category_from_row(&row)?;
    patch.apply(&mut category);
    category.updated_at = Utc::now();
    category.sync_status = SyncStatus::Pending;
    category.sync_version += 1;
    write_category(&mut *tx, &category).await?;
    tx.commit().await?;
    Ok(category)
}

/// Remove a category locally, together with the items of a group and their ledger rows.
#[instrument(skip_all)]
pub async fn delete_category(pool: &Pool, id: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "DELETE FROM sync_queue WHERE entity_type = ? AND \
         (local_id = ? OR local_id IN (SELECT id FROM categories WHERE parent_id = ?))",
    )
    .bind(CATEGORY_ENTITY)
    .bind(id)
    .bind(id)
    .execute(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM categories WHERE parent_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let deleted = sqlx::query("DELETE FROM categories WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    tx.commit().await?;
    Ok(deleted > 0)
}

/// Categories the engine owes a push; groups go before their items.
#[instrument(skip_all)]
pub async fn pending_categories(pool: &Pool) -> Result<Vec<Category>> {
    let rows = sqlx::query(&format!(
        "{} WHERE sync_status IN ('pending', 'error') \
         ORDER BY CASE kind WHEN 'group' THEN 0 ELSE 1 END, created_at ASC",
        SELECT_CATEGORIES
    ))
    .fetch_all(pool)
    .await?;
    categories_from_rows(rows)
}

#[instrument(skip_all)]
pub async fn complete_category_sync(pool: &Pool, id: &str, version: i64) -> Result<bool> {
    set_category_status(pool, id, version, SyncStatus::Synced).await
}

#[instrument(skip_all)]
pub async fn fail_category_sync(pool: &Pool, id: &str, version: i64) -> Result<bool> {
    set_category_status(pool, id, version, SyncStatus::Error).await
}

async fn set_category_status(
    pool: &Pool,
    id: &str,
    version: i64,
    status: SyncStatus,
) -> Result<bool> {
    let affected = sqlx::query(
        "UPDATE categories SET sync_status = ? WHERE id = ? AND sync_version = ?",
    )
    .bind(status.as_str())
    .bind(id)
    .bind(version)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(affected == 1)
}

fn queue_entry_from_row(row: &SqliteRow) -> Result<SyncQueueEntry> {
    let id: String = row.get("id");
    let op: String = row.get("op_type");
    let op_type =
        QueueOp::parse_op(&op).ok_or_else(|| anyhow!("queue entry {} has unknown op {}", id, op))?;
    let status: String = row.get("status");
    let status = QueueStatus::parse_status(&status)
        .ok_or_else(|| anyhow!("queue entry {} has unknown status {}", id, status))?;
    let data: String = row.get("data");
    let data: Value = serde_json::from_str(&data).unwrap_or(Value::Null);
    Ok(SyncQueueEntry {
        op_type,
        entity_type: row.get("entity_type"),
        local_id: row.get("local_id"),
        data,
        status,
        retry_count: row.get("retry_count"),
        error: row.get("error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        id,
    })
}

async fn upsert_queue_entry(
    pool: &Pool,
    entity: &str,
    local_id: &str,
    op: QueueOp,
    status: QueueStatus,
    error: Option<&str>,
    data: &Value,
) -> Result<()> {
    let now = Utc::now();
    let retry_increment: i64 = if status == QueueStatus::Failed { 1 } else { 0 };
    sqlx::query(
        "INSERT INTO sync_queue (id, op_type, entity_type, local_id, data, status, retry_count, \
         error, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(entity_type, local_id) DO UPDATE SET \
           op_type = excluded.op_type, data = excluded.data, status = excluded.status, \
           retry_count = CASE WHEN excluded.status = 'completed' THEN 0 \
                              ELSE sync_queue.retry_count + excluded.retry_count END, \
           error = excluded.error, updated_at = excluded.updated_at",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(op.as_str())
    .bind(entity)
    .bind(local_id)
    .bind(data.to_string())
    .bind(status.as_str())
    .bind(retry_increment)
    .bind(error)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn record_sync_attempt(pool: &Pool, local_id: &str, op: QueueOp) -> Result<()> {
    upsert_queue_entry(
        pool,
        MATERIAL_ENTITY,
        local_id,
        op,
        QueueStatus::Processing,
        None,
        &Value::Object(Default::default()),
    )
    .await
}

#[instrument(skip_all)]
pub async fn record_sync_failure(
    pool: &Pool,
    local_id: &str,
    op: QueueOp,
    error: &str,
    data: &Value,
) -> Result<()> {
    upsert_queue_entry(pool, MATERIAL_ENTITY, local_id, op, QueueStatus::Failed, Some(error), data).await
}

#[instrument(skip_all)]
pub async fn record_sync_success(pool: &Pool, local_id: &str, op: QueueOp) -> Result<()> {
    upsert_queue_entry(
        pool,
        MATERIAL_ENTITY,
        local_id,
        op,
        QueueStatus::Completed,
        None,
        &Value::Object(Default::default()),
    )
    .await
}

async fn queue_entry_for(pool: &Pool, entity: &str, id: &str) -> Result<Option<SyncQueueEntry>> {
    let row = sqlx::query(&format!(
        "{} WHERE entity_type = ? AND local_id = ?",
        SELECT_QUEUE
    ))
    .bind(entity)
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(queue_entry_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn get_queue_entry(pool: &Pool, local_id: &str) -> Result<Option<SyncQueueEntry>> {
    queue_entry_for(pool, MATERIAL_ENTITY, local_id).await
}

#[instrument(skip_all)]
pub async fn get_category_queue_entry(pool: &Pool, id: &str) -> Result<Option<SyncQueueEntry>> {
    queue_entry_for(pool, CATEGORY_ENTITY, id).await
}

#[instrument(skip_all)]
pub async fn record_category_failure(
    pool: &Pool,
    id: &str,
    op: QueueOp,
    error: &str,
    data: &Value,
) -> Result<()> {
    upsert_queue_entry(pool, CATEGORY_ENTITY, id, op, QueueStatus::Failed, Some(error), data).await
}

#[instrument(skip_all)]
pub async fn record_category_success(pool: &Pool, id: &str, op: QueueOp) -> Result<()> {
    upsert_queue_entry(
        pool,
        CATEGORY_ENTITY,
        id,
        op,
        QueueStatus::Completed,
        None,
        &Value::Object(Default::default()),
    )
    .await
}

#[instrument(skip_all)]
pub async fn list_queue(pool: &Pool) -> Result<Vec<SyncQueueEntry>> {
    let rows = sqlx::query(&format!(
        "{} ORDER BY retry_count DESC, updated_at ASC",
        SELECT_QUEUE
    ))
    .fetch_all(pool)
    .await?;
    rows.iter().map(queue_entry_from_row).collect()
}

pub async fn get_app_metadata(pool: &Pool, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar::<_, String>("SELECT value FROM app_metadata WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

pub async fn set_app_metadata(pool: &Pool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO app_metadata (key, value, updated_at) VALUES (?, ?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(value)
    .bind(Utc::now())
    .execute(pool)
    .await
    .context("failed to persist app metadata")?;
    Ok(())
}
