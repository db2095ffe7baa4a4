use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use materials_sync::db::{self, Pool};
use materials_sync::model::{
    Category, CategoryType, Material, MaterialPatch, QueueOp, QueueStatus, StorageLocation,
    SyncStatus,
};
use materials_sync::remote::{RemoteBackend, RemoteError};
use materials_sync::sync::{self, Connectivity, PassOutcome, SyncEngine, SyncReport, LAST_SYNC_KEY};

async fn setup_pool() -> Pool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

/// In-memory backend that keeps what it was sent and fails on request.
#[derive(Clone, Default)]
struct RecordingRemote {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    rows: Arc<Mutex<HashMap<String, Value>>>,
    upload_calls: Arc<Mutex<Vec<String>>>,
    upsert_calls: Arc<Mutex<Vec<String>>>,
    reject_upsert_for: Arc<Mutex<HashSet<String>>>,
    fail_uploads: Arc<Mutex<bool>>,
    upload_delay: Option<Duration>,
    /// Applies a user edit to this material while its payload is uploading.
    edit_during_upload: Arc<Mutex<Option<(Pool, String)>>>,
    /// Drops the local ledger table, then fails the metadata write.
    break_ledger_on_upsert: Arc<Mutex<Option<Pool>>>,
    categories: Arc<Mutex<HashMap<String, Value>>>,
    category_calls: Arc<Mutex<Vec<String>>>,
    reject_category_for: Arc<Mutex<HashSet<String>>>,
}

impl RecordingRemote {
    async fn reject_upsert(&self, local_id: &str) {
        self.reject_upsert_for.lock().await.insert(local_id.to_string());
    }

    async fn accept_upsert(&self, local_id: &str) {
        self.reject_upsert_for.lock().await.remove(local_id);
    }

    async fn object_count(&self) -> usize {
        self.objects.lock().await.len()
    }

    async fn remote_calls(&self) -> usize {
        self.upload_calls.lock().await.len() + self.upsert_calls.lock().await.len()
    }
}

#[async_trait]
impl RemoteBackend for RecordingRemote {
    async fn upload_object(
        &self,
        path: &str,
        bytes: &[u8],
        _content_type: &str,
    ) -> Result<(), RemoteError> {
        self.upload_calls.lock().await.push(path.to_string());
        if let Some(delay) = self.upload_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((pool, local_id)) = self.edit_during_upload.lock().await.take() {
            let patch = MaterialPatch {
                title: Some("Edited while uploading".into()),
                ..Default::default()
            };
            db::edit_material(&pool, &local_id, patch).await.unwrap();
        }
        if *self.fail_uploads.lock().await {
            return Err(RemoteError::Network("connection reset".into()));
        }
        let mut objects = self.objects.lock().await;
        if objects.contains_key(path) {
            return Err(RemoteError::Duplicate("The resource already exists".into()));
        }
        objects.insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!("https://example.supabase.co/storage/v1/object/public/materials/{}", path)
    }

    async fn upsert_material(&self, row: &Value) -> Result<Option<String>, RemoteError> {
        let local_id = row["local_id"].as_str().unwrap_or_default().to_string();
        self.upsert_calls.lock().await.push(local_id.clone());
        if let Some(pool) = self.break_ledger_on_upsert.lock().await.take() {
            sqlx::query("DROP TABLE sync_queue").execute(&pool).await.unwrap();
            return Err(RemoteError::Network("connection reset".into()));
        }
        if self.reject_upsert_for.lock().await.contains(&local_id) {
            return Err(RemoteError::Permission(
                "new row violates row-level security policy".into(),
            ));
        }
        let mut rows = self.rows.lock().await;
        rows.insert(local_id.clone(), row.clone());
        Ok(Some(format!("srv-{}", local_id)))
    }

    async fn upsert_category(&self, row: &Value) -> Result<(), RemoteError> {
        let id = row["id"].as_str().unwrap_or_default().to_string();
        self.category_calls.lock().await.push(id.clone());
        if self.reject_category_for.lock().await.contains(&id) {
            return Err(RemoteError::Api {
                status: 400,
                message: "null value in column \"name\"".into(),
            });
        }
        self.categories.lock().await.insert(id, row.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        Ok(())
    }
}

fn engine(pool: &Pool, remote: &RecordingRemote, online: bool) -> SyncEngine {
    SyncEngine::new(
        pool.clone(),
        Arc::new(remote.clone()),
        Connectivity::new(online),
    )
}

fn genesis() -> Material {
    Material::new("Genesis notes", CategoryType::Bible, "notes.txt")
        .with_book("Genesis")
        .with_payload(b"hello".to_vec())
}

async fn completed(engine: &SyncEngine) -> SyncReport {
    match engine.sync_now().await.unwrap() {
        PassOutcome::Completed(report) => report,
        PassOutcome::Offline => panic!("expected the pass to run"),
    }
}

async fn status_of(pool: &Pool, local_id: &str) -> SyncStatus {
    db::get_material(pool, local_id).await.unwrap().unwrap().sync_status
}

async fn wait_for_status(pool: &Pool, local_id: &str, want: SyncStatus, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if status_of(pool, local_id).await == want {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn pending_material_is_uploaded_and_marked_synced() {
    let pool = setup_pool().await;
    let remote = RecordingRemote::default();
    let m = genesis();
    db::put_material(&pool, &m).await.unwrap();

    let report = completed(&engine(&pool, &remote, true)).await;
    assert_eq!(report.attempted, 1);
    assert_eq!(report.synced, 1);
    assert_eq!(report.failed, 0);

    let path = format!("bible/{}_notes.txt", m.local_id);
    assert_eq!(remote.objects.lock().await.get(&path).unwrap(), b"hello");

    let stored = db::get_material(&pool, &m.local_id).await.unwrap().unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Synced);
    assert_eq!(stored.storage_location, StorageLocation::Both);
    assert!(stored.last_sync.is_some());
    assert!(stored.sync_phase.is_none());
    assert_eq!(stored.server_id.as_deref(), Some(format!("srv-{}", m.local_id).as_str()));
    assert_eq!(
        stored.file_url.as_deref(),
        Some(format!("https://example.supabase.co/storage/v1/object/public/materials/{}", path).as_str())
    );

    let rows = remote.rows.lock().await;
    let row = rows.get(&m.local_id).unwrap();
    assert_eq!(row["title"], "Genesis notes");
    assert_eq!(row["bible_book"], "Genesis");
    assert_eq!(row["is_deleted"], false);
    assert_eq!(row["file_url"], stored.file_url.clone().unwrap());
    drop(rows);

    assert!(db::get_app_metadata(&pool, LAST_SYNC_KEY).await.unwrap().is_some());
}

#[tokio::test]
async fn rejected_upsert_leaves_object_and_error_status() {
    let pool = setup_pool().await;
    let remote = RecordingRemote::default();
    let m = genesis();
    db::put_material(&pool, &m).await.unwrap();
    remote.reject_upsert(&m.local_id).await;

    let report = completed(&engine(&pool, &remote, true)).await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.synced, 0);
    assert_eq!(remote.object_count().await, 1);

    let stored = db::get_material(&pool, &m.local_id).await.unwrap().unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Error);
    // the uploaded URL survives so the retry only repeats the metadata write
    assert!(stored.file_url.is_some());
    assert!(db::get_app_metadata(&pool, LAST_SYNC_KEY).await.unwrap().is_none());

    remote.accept_upsert(&m.local_id).await;
    let report = completed(&engine(&pool, &remote, true)).await;
    assert_eq!(report.synced, 1);
    assert_eq!(remote.upload_calls.lock().await.len(), 1);
    assert_eq!(status_of(&pool, &m.local_id).await, SyncStatus::Synced);
}

#[tokio::test]
async fn repeated_push_keeps_a_single_object() {
    let pool = setup_pool().await;
    let remote = RecordingRemote::default();
    let m = genesis();
    db::put_material(&pool, &m).await.unwrap();
    let engine = engine(&pool, &remote, true);
    assert_eq!(completed(&engine).await.synced, 1);

    // Pretend the resolved URL was lost after the upload; the push starts over.
    let mut again = db::get_material(&pool, &m.local_id).await.unwrap().unwrap();
    again.file_url = None;
    again.sync_status = SyncStatus::Pending;
    db::put_material(&pool, &again).await.unwrap();

    let report = completed(&engine).await;
    assert_eq!(report.synced, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(remote.upload_calls.lock().await.len(), 2);
    assert_eq!(remote.object_count().await, 1);
    assert_eq!(remote.rows.lock().await.len(), 1);
    assert_eq!(status_of(&pool, &m.local_id).await, SyncStatus::Synced);
}

#[tokio::test]
async fn one_failure_does_not_block_the_rest_of_the_pass() {
    let pool = setup_pool().await;
    let remote = RecordingRemote::default();
    let a = Material::new("A", CategoryType::General, "a.txt").with_payload(b"a".to_vec());
    db::put_material(&pool, &a).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let b = Material::new("B", CategoryType::General, "b.txt").with_payload(b"b".to_vec());
    db::put_material(&pool, &b).await.unwrap();
    remote.reject_upsert(&a.local_id).await;

    let report = completed(&engine(&pool, &remote, true)).await;
    assert_eq!(report.attempted, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.synced, 1);
    assert_eq!(*remote.upsert_calls.lock().await, vec![a.local_id.clone(), b.local_id.clone()]);
    assert_eq!(status_of(&pool, &a.local_id).await, SyncStatus::Error);
    assert_eq!(status_of(&pool, &b.local_id).await, SyncStatus::Synced);
}

#[tokio::test]
async fn upload_failure_keeps_material_retryable() {
    let pool = setup_pool().await;
    let remote = RecordingRemote::default();
    *remote.fail_uploads.lock().await = true;
    let m = genesis();
    db::put_material(&pool, &m).await.unwrap();

    let report = completed(&engine(&pool, &remote, true)).await;
    assert_eq!(report.failed, 1);
    assert!(remote.upsert_calls.lock().await.is_empty());
    let stored = db::get_material(&pool, &m.local_id).await.unwrap().unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Error);
    assert!(stored.file_url.is_none());

    *remote.fail_uploads.lock().await = false;
    assert_eq!(completed(&engine(&pool, &remote, true)).await.synced, 1);
}

#[tokio::test]
async fn failures_are_counted_in_the_queue_ledger() {
    let pool = setup_pool().await;
    let remote = RecordingRemote::default();
    let m = genesis();
    db::put_material(&pool, &m).await.unwrap();
    remote.reject_upsert(&m.local_id).await;
    let engine = engine(&pool, &remote, true);

    completed(&engine).await;
    let entry = db::get_queue_entry(&pool, &m.local_id).await.unwrap().unwrap();
    assert_eq!(entry.op_type, QueueOp::Create);
    assert_eq!(entry.status, QueueStatus::Failed);
    assert_eq!(entry.retry_count, 1);
    assert!(entry.error.as_deref().unwrap().starts_with("permission:"));
    assert_eq!(entry.data["kind"], "permission");

    completed(&engine).await;
    let entry = db::get_queue_entry(&pool, &m.local_id).await.unwrap().unwrap();
    assert_eq!(entry.retry_count, 2);

    remote.accept_upsert(&m.local_id).await;
    completed(&engine).await;
    let entry = db::get_queue_entry(&pool, &m.local_id).await.unwrap().unwrap();
    assert_eq!(entry.status, QueueStatus::Completed);
    assert_eq!(entry.retry_count, 0);
    assert!(entry.error.is_none());
}

#[tokio::test]
async fn soft_delete_reaches_backend_as_flag() {
    let pool = setup_pool().await;
    let remote = RecordingRemote::default();
    let m = genesis();
    db::put_material(&pool, &m).await.unwrap();
    let engine = engine(&pool, &remote, true);
    completed(&engine).await;

    db::soft_delete_material(&pool, &m.local_id).await.unwrap();
    let report = completed(&engine).await;
    assert_eq!(report.synced, 1);
    assert_eq!(remote.rows.lock().await[&m.local_id]["is_deleted"], true);
    assert_eq!(remote.object_count().await, 1);

    let entry = db::get_queue_entry(&pool, &m.local_id).await.unwrap().unwrap();
    assert_eq!(entry.op_type, QueueOp::Delete);
}

#[tokio::test]
async fn edit_during_push_supersedes_engine_write() {
    let pool = setup_pool().await;
    let remote = RecordingRemote::default();
    let m = genesis();
    db::put_material(&pool, &m).await.unwrap();
    *remote.edit_during_upload.lock().await = Some((pool.clone(), m.local_id.clone()));
    let engine = engine(&pool, &remote, true);

    let report = completed(&engine).await;
    assert_eq!(report.superseded, 1);
    assert_eq!(report.synced, 0);
    assert!(remote.upsert_calls.lock().await.is_empty());

    let stored = db::get_material(&pool, &m.local_id).await.unwrap().unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Pending);
    assert_eq!(stored.title, "Edited while uploading");
    assert_eq!(stored.sync_version, m.sync_version + 1);

    // The next pass pushes the edited record; the object is already there.
    assert_eq!(completed(&engine).await.synced, 1);
    assert_eq!(
        remote.rows.lock().await[&m.local_id]["title"],
        "Edited while uploading"
    );
    assert_eq!(remote.object_count().await, 1);
}

#[tokio::test]
async fn offline_pass_makes_no_remote_calls() {
    let pool = setup_pool().await;
    let remote = RecordingRemote::default();
    let m = genesis();
    db::put_material(&pool, &m).await.unwrap();

    let engine = engine(&pool, &remote, false);
    assert_eq!(engine.sync_now().await.unwrap(), PassOutcome::Offline);
    assert_eq!(remote.remote_calls().await, 0);
    assert_eq!(status_of(&pool, &m.local_id).await, SyncStatus::Pending);
}

#[tokio::test]
async fn session_waits_offline_then_syncs_on_reconnect() {
    let pool = setup_pool().await;
    let remote = RecordingRemote::default();
    let m = genesis();
    db::put_material(&pool, &m).await.unwrap();

    // Long interval so only the online transition can trigger the pass.
    let engine = engine(&pool, &remote, false);
    let session = engine.start(Duration::from_secs(3600)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(remote.remote_calls().await, 0);

    engine.connectivity().set_online(true);
    assert!(wait_for_status(&pool, &m.local_id, SyncStatus::Synced, Duration::from_secs(2)).await);
    session.stop().await;
}

#[tokio::test]
async fn pending_material_converges_within_an_interval() {
    let pool = setup_pool().await;
    let remote = RecordingRemote::default();
    let engine = engine(&pool, &remote, true);
    let session = engine.start(Duration::from_millis(100)).await.unwrap();

    let m = genesis();
    db::put_material(&pool, &m).await.unwrap();
    assert!(wait_for_status(&pool, &m.local_id, SyncStatus::Synced, Duration::from_secs(2)).await);
    session.stop().await;
}

#[tokio::test]
async fn second_session_is_rejected_until_stopped() {
    let pool = setup_pool().await;
    let remote = RecordingRemote::default();
    let engine = engine(&pool, &remote, false);

    let session = engine.start(Duration::from_secs(60)).await.unwrap();
    assert!(engine.is_polling());
    assert!(engine.start(Duration::from_secs(60)).await.is_err());

    session.stop().await;
    assert!(!engine.is_polling());
    let again = engine.start(Duration::from_secs(60)).await.unwrap();
    again.stop().await;
}

#[tokio::test]
async fn start_recovers_interrupted_pushes() {
    let pool = setup_pool().await;
    let remote = RecordingRemote::default();
    let mut m = genesis();
    m.sync_status = SyncStatus::Syncing;
    db::put_material(&pool, &m).await.unwrap();

    let engine = engine(&pool, &remote, false);
    let session = engine.start(Duration::from_secs(60)).await.unwrap();
    assert_eq!(status_of(&pool, &m.local_id).await, SyncStatus::Pending);
    session.stop().await;
}

#[tokio::test]
async fn concurrent_passes_do_not_push_twice() {
    let pool = setup_pool().await;
    let remote = RecordingRemote {
        upload_delay: Some(Duration::from_millis(100)),
        ..Default::default()
    };
    let m = genesis();
    db::put_material(&pool, &m).await.unwrap();
    let engine = engine(&pool, &remote, true);

    let (first, second) = tokio::join!(completed(&engine), completed(&engine));
    assert_eq!(first.synced + second.synced, 1);
    assert_eq!(first.attempted + second.attempted, 1);
    assert_eq!(remote.upload_calls.lock().await.len(), 1);
}

#[tokio::test]
async fn failed_push_is_marked_error_even_when_ledger_write_fails() {
    let pool = setup_pool().await;
    let remote = RecordingRemote::default();
    let m = genesis();
    db::put_material(&pool, &m).await.unwrap();
    *remote.break_ledger_on_upsert.lock().await = Some(pool.clone());
    let engine = engine(&pool, &remote, true);

    let report = completed(&engine).await;
    assert_eq!(report.failed, 1);
    assert_eq!(status_of(&pool, &m.local_id).await, SyncStatus::Error);
    assert_eq!(db::pending_materials(&pool).await.unwrap().len(), 1);

    // Without a ledger table the record still goes through on the next pass.
    let report = completed(&engine).await;
    assert_eq!(report.attempted, 1);
    assert_eq!(report.synced, 1);
    assert_eq!(status_of(&pool, &m.local_id).await, SyncStatus::Synced);
}

#[tokio::test]
async fn categories_are_pushed_groups_first() {
    let pool = setup_pool().await;
    let remote = RecordingRemote::default();
    let group = Category::group("Torah", 1);
    db::put_category(&pool, &group).await.unwrap();
    let item = Category::item(&group.id, "Genesis", 1);
    db::put_category(&pool, &item).await.unwrap();
    db::put_material(&pool, &genesis()).await.unwrap();

    let report = completed(&engine(&pool, &remote, true)).await;
    assert_eq!(report.attempted, 3);
    assert_eq!(report.synced, 3);
    assert_eq!(*remote.category_calls.lock().await, vec![group.id.clone(), item.id.clone()]);

    let rows = remote.categories.lock().await;
    assert_eq!(rows[&item.id]["parentId"], group.id.as_str());
    assert_eq!(rows[&item.id]["type"], "item");
    assert_eq!(rows[&group.id]["name"], "Torah");
    drop(rows);

    let stored = db::get_category(&pool, &item.id).await.unwrap().unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Synced);
    assert!(db::pending_categories(&pool).await.unwrap().is_empty());
    let entry = db::get_category_queue_entry(&pool, &item.id).await.unwrap().unwrap();
    assert_eq!(entry.status, QueueStatus::Completed);
}

#[tokio::test]
async fn rejected_category_is_marked_error_and_retried() {
    let pool = setup_pool().await;
    let remote = RecordingRemote::default();
    let group = Category::group("Prophets", 2);
    db::put_category(&pool, &group).await.unwrap();
    let m = genesis();
    db::put_material(&pool, &m).await.unwrap();
    remote.reject_category_for.lock().await.insert(group.id.clone());
    let engine = engine(&pool, &remote, true);

    let report = completed(&engine).await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.synced, 1);
    let stored = db::get_category(&pool, &group.id).await.unwrap().unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Error);
    let entry = db::get_category_queue_entry(&pool, &group.id).await.unwrap().unwrap();
    assert_eq!(entry.op_type, QueueOp::Create);
    assert_eq!(entry.retry_count, 1);
    assert!(entry.error.as_deref().unwrap().starts_with("api:"));

    remote.reject_category_for.lock().await.clear();
    let report = completed(&engine).await;
    assert_eq!(report.attempted, 1);
    assert_eq!(report.synced, 1);
    assert_eq!(remote.categories.lock().await.len(), 1);
}

#[tokio::test]
async fn manual_sync_recovers_interrupted_pushes() {
    let pool = setup_pool().await;
    let remote = RecordingRemote::default();
    let mut m = genesis();
    m.sync_status = SyncStatus::Syncing;
    db::put_material(&pool, &m).await.unwrap();

    let outcome = sync::sync_once(pool.clone(), Arc::new(remote.clone()), false)
        .await
        .unwrap();
    match outcome {
        PassOutcome::Completed(report) => {
            assert_eq!(report.synced, 1);
            assert_eq!(report.to_string(), "synced: 1  failed: 0  superseded: 0");
        }
        PassOutcome::Offline => panic!("recording backend always answers ping"),
    }
    assert_eq!(status_of(&pool, &m.local_id).await, SyncStatus::Synced);
    assert_eq!(remote.object_count().await, 1);
}
