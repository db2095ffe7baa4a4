//! Push engine: moves `pending`/`error` categories and materials to the backend.
//!
//! Categories are a single metadata upsert each.
//! Each material goes through the intent log on its row: `upload_pending` →
//! payload upload → `metadata_pending` (URL persisted) → metadata upsert →
//! `synced`. Every write-back is checked against the `sync_version` read at the
//! start of the push, so a user edit in flight wins over the engine.
use anyhow::{anyhow, Result};
use chrono::Utc;
use serde_json::json;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::db::{self, Pool};
use crate::model::{Category, Material, QueueOp};
use crate::remote::{
    build_category_row, build_material_row, object_path, RemoteBackend, RemoteError,
};

pub mod connectivity;

pub use connectivity::Connectivity;

pub const LAST_SYNC_KEY: &str = "last_sync";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub attempted: usize,
    pub synced: usize,
    pub failed: usize,
    pub superseded: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Connectivity reported offline; no remote call was made.
    Offline,
    Completed(SyncReport),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Synced,
    Failed,
    /// A user edit bumped the version mid-push; the record stays `pending`.
    Superseded,
}

#[derive(Debug, Error)]
enum PushError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("local store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl PushError {
    fn kind(&self) -> &'static str {
        match self {
            PushError::Remote(err) => err.kind(),
            PushError::Store(_) => "store",
        }
    }
}

enum Pushed {
    Synced,
    Superseded,
}

fn queue_op(material: &Material) -> QueueOp {
    if material.is_deleted {
        QueueOp::Delete
    } else if material.server_id.is_some() {
        QueueOp::Update
    } else {
        QueueOp::Create
    }
}

async fn push_material(
    pool: &Pool,
    remote: &dyn RemoteBackend,
    material: &Material,
) -> Result<Pushed, PushError> {
    let local_id = material.local_id.as_str();
    let version = material.sync_version;
    let mut file_url = material.file_url.clone();

    if material.needs_upload() {
        if !db::mark_upload_pending(pool, local_id, version).await? {
            return Ok(Pushed::Superseded);
        }
        let path = object_path(material.category_type, local_id, &material.file_name);
        let bytes = material.file_data.as_deref().unwrap_or(&[]);
        match remote.upload_object(&path, bytes, &material.file_type).await {
            Ok(()) => debug!(path = %path, size = bytes.len(), "payload uploaded"),
            Err(err) if err.is_duplicate() => {
                info!(path = %path, "payload already stored; reusing existing object")
            }
            Err(err) => return Err(err.into()),
        }
        file_url = Some(remote.public_url(&path));
    }

    if !db::mark_metadata_pending(pool, local_id, version, file_url.as_deref()).await? {
        return Ok(Pushed::Superseded);
    }
    let row = build_material_row(material, file_url.as_deref(), Utc::now());
    let server_id = remote.upsert_material(&row).await?;

    if !db::complete_sync(pool, local_id, version, server_id.as_deref(), Utc::now()).await? {
        return Ok(Pushed::Superseded);
    }
    Ok(Pushed::Synced)
}

/// Push one material and record the outcome locally. Remote failures are
/// absorbed into the `error` status; only local status write failures propagate.
/// Ledger writes never decide the outcome.
#[instrument(skip_all, fields(local_id = %material.local_id))]
pub async fn sync_material(
    pool: &Pool,
    remote: &dyn RemoteBackend,
    material: &Material,
) -> Result<RecordOutcome> {
    let local_id = material.local_id.as_str();
    let op = queue_op(material);
    if let Err(err) = db::record_sync_attempt(pool, local_id, op).await {
        warn!(?err, "failed to record sync attempt");
    }

    match push_material(pool, remote, material).await {
        Ok(Pushed::Synced) => {
            if let Err(err) = db::record_sync_success(pool, local_id, op).await {
                warn!(?err, "failed to record sync success");
            }
            info!(title = %material.title, "material synced");
            Ok(RecordOutcome::Synced)
        }
        Ok(Pushed::Superseded) => {
            info!("local edit superseded push; will retry next pass");
            Ok(RecordOutcome::Superseded)
        }
        Err(err) => {
            let kind = err.kind();
            error!(kind, error = %err, "sync failed");
            let landed = db::fail_sync(pool, local_id, material.sync_version).await?;
            let message = format!("{}: {}", kind, err);
            if let Err(ledger_err) =
                db::record_sync_failure(pool, local_id, op, &message, &json!({ "kind": kind })).await
            {
                warn!(?ledger_err, "failed to record sync failure");
            }
            Ok(if landed {
                RecordOutcome::Failed
            } else {
                RecordOutcome::Superseded
            })
        }
    }
}

fn category_op(category: &Category) -> QueueOp {
    if category.sync_version > 1 {
        QueueOp::Update
    } else {
        QueueOp::Create
    }
}

/// Upsert one category row and mark it `synced` or `error`.
#[instrument(skip_all, fields(category_id = %category.id))]
pub async fn sync_category(
    pool: &Pool,
    remote: &dyn RemoteBackend,
    category: &Category,
) -> Result<RecordOutcome> {
    let op = category_op(category);
    let row = build_category_row(category, Utc::now());
    match remote.upsert_category(&row).await {
        Ok(()) => {
            if !db::complete_category_sync(pool, &category.id, category.sync_version).await? {
                info!("category changed during push; will retry next pass");
                return Ok(RecordOutcome::Superseded);
            }
            if let Err(err) = db::record_category_success(pool, &category.id, op).await {
                warn!(?err, "failed to record category sync success");
            }
            debug!(name = %category.name, "category synced");
            Ok(RecordOutcome::Synced)
        }
        Err(err) => {
            let kind = err.kind();
            error!(kind, error = %err, "category sync failed");
            let landed = db::fail_category_sync(pool, &category.id, category.sync_version).await?;
            let message = format!("{}: {}", kind, err);
            if let Err(ledger_err) =
                db::record_category_failure(pool, &category.id, op, &message, &json!({ "kind": kind }))
                    .await
            {
                warn!(?ledger_err, "failed to record category sync failure");
            }
            Ok(if landed {
                RecordOutcome::Failed
            } else {
                RecordOutcome::Superseded
            })
        }
    }
}

impl SyncReport {
    fn record(&mut self, outcome: Result<RecordOutcome>, id: &str) {
        self.attempted += 1;
        match outcome {
            Ok(RecordOutcome::Synced) => self.synced += 1,
            Ok(RecordOutcome::Failed) => self.failed += 1,
            Ok(RecordOutcome::Superseded) => self.superseded += 1,
            Err(err) => {
                error!(?err, id, "failed to record sync outcome");
                self.failed += 1;
            }
        }
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "synced: {}  failed: {}  superseded: {}",
            self.synced, self.failed, self.superseded
        )
    }
}

/// One scan over every candidate: categories first (groups before items), then
/// materials in store order.
#[instrument(skip_all)]
pub async fn sync_pending(pool: &Pool, remote: &dyn RemoteBackend) -> Result<SyncReport> {
    let mut report = SyncReport::default();
    for category in &db::pending_categories(pool).await? {
        report.record(sync_category(pool, remote, category).await, &category.id);
    }
    for material in &db::pending_materials(pool).await? {
        report.record(sync_material(pool, remote, material).await, &material.local_id);
    }
    if report.synced > 0 {
        db::set_app_metadata(pool, LAST_SYNC_KEY, &Utc::now().to_rfc3339()).await?;
    }
    Ok(report)
}

/// Manual "sync now" outside a polling session: check reachability (unless told
/// to assume it), recover interrupted pushes, then run one pass.
#[instrument(skip_all)]
pub async fn sync_once(
    pool: Pool,
    remote: Arc<dyn RemoteBackend>,
    assume_online: bool,
) -> Result<PassOutcome> {
    let online = Connectivity::new(assume_online);
    if !assume_online {
        connectivity::probe_once(remote.as_ref(), &online).await;
    }
    let recovered = db::recover_interrupted(&pool).await?;
    if recovered > 0 {
        info!(recovered, "reset interrupted pushes to pending");
    }
    SyncEngine::new(pool, remote, online).sync_now().await
}

struct EngineInner {
    pool: Pool,
    remote: Arc<dyn RemoteBackend>,
    connectivity: Connectivity,
    pass_lock: Mutex<()>,
    polling: AtomicBool,
}

impl EngineInner {
    async fn run_pass(&self) -> Result<PassOutcome> {
        if !self.connectivity.is_online() {
            debug!("offline; skipping sync pass");
            return Ok(PassOutcome::Offline);
        }
        let _guard = self.pass_lock.lock().await;
        let report = sync_pending(&self.pool, self.remote.as_ref()).await?;
        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                synced = report.synced,
                failed = report.failed,
                superseded = report.superseded,
                "sync pass finished"
            );
        }
        Ok(PassOutcome::Completed(report))
    }

    async fn run_pass_logged(&self, trigger: &'static str) {
        debug!(trigger, "sync pass triggered");
        if let Err(err) = self.run_pass().await {
            error!(?err, trigger, "sync pass failed");
        }
    }

    async fn poll_loop(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut online_rx = self.connectivity.subscribe();
        let mut was_online = *online_rx.borrow_and_update();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The first tick completes immediately, so a session started online syncs right away.
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.run_pass_logged("timer").await;
                }
                changed = online_rx.changed() => {
                    // the sender lives in `self.connectivity`
                    if changed.is_err() {
                        break;
                    }
                    let online = *online_rx.borrow_and_update();
                    if online && !was_online {
                        info!("back online; syncing now");
                        self.run_pass_logged("online").await;
                    } else if !online && was_online {
                        warn!("went offline; sync paused");
                    }
                    was_online = online;
                }
            }
        }
    }
}

/// Owns the push machinery; cheap to clone.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    pub fn new(pool: Pool, remote: Arc<dyn RemoteBackend>, connectivity: Connectivity) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                pool,
                remote,
                connectivity,
                pass_lock: Mutex::new(()),
                polling: AtomicBool::new(false),
            }),
        }
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.inner.connectivity
    }

    pub fn is_polling(&self) -> bool {
        self.inner.polling.load(Ordering::SeqCst)
    }

    /// Manual "sync now". Waits for any pass already running, then runs its own.
    pub async fn sync_now(&self) -> Result<PassOutcome> {
        self.inner.run_pass().await
    }

    /// Start the polling session: recover interrupted pushes, then pass on every
    /// tick and on each offline→online transition.
    pub async fn start(&self, interval: Duration) -> Result<PollingSession> {
        if self.inner.polling.swap(true, Ordering::SeqCst) {
            return Err(anyhow!("a sync polling session is already active"));
        }
        match db::recover_interrupted(&self.inner.pool).await {
            Ok(0) => {}
            Ok(recovered) => info!(recovered, "reset interrupted pushes to pending"),
            Err(err) => {
                self.inner.polling.store(false, Ordering::SeqCst);
                return Err(err);
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            inner.poll_loop(interval, shutdown_rx).await;
            inner.polling.store(false, Ordering::SeqCst);
        });
        info!(interval_ms = interval.as_millis() as u64, "sync polling started");
        Ok(PollingSession {
            shutdown: shutdown_tx,
            handle,
        })
    }
}

/// Handle to a running polling task. Dropping it also ends the session.
pub struct PollingSession {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PollingSession {
    /// Stop scheduling passes. A pass already running finishes first.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.handle.await {
            warn!(?err, "sync polling task ended abnormally");
        }
        info!("sync polling stopped");
    }
}
