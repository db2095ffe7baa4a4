//! Backup bundles: a directory holding `manifest.json` plus the raw payloads
//! under `files/<local_id>/<file_name>`. Bundles with a flat `files/<file_name>`
//! layout are still read.
use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, instrument, warn};

use crate::db::{self, Pool};
use crate::model::{new_local_id, CategoryType, Material, StorageLocation, SyncStatus};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const FILES_DIR: &str = "files";

/// Entry name for a payload inside `files/`; directory components are dropped.
fn entry_name(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .map(|n| n.to_string())
}

/// Directory for a material's payload; ids carrying path components get none.
fn entry_dir(local_id: &str) -> Option<String> {
    entry_name(local_id).filter(|name| name == local_id)
}

/// Write every material of `category` into a bundle at `dest`. Returns how many were exported.
#[instrument(skip_all, fields(category = %category))]
pub async fn export_category(pool: &Pool, category: CategoryType, dest: &Path) -> Result<usize> {
    let materials = db::get_materials_by_category(pool, category).await?;
    let files_dir = dest.join(FILES_DIR);
    tokio::fs::create_dir_all(&files_dir)
        .await
        .with_context(|| format!("failed to create {}", files_dir.display()))?;

    for material in &materials {
        let Some(data) = material.file_data.as_deref() else {
            continue;
        };
        let Some(name) = entry_name(&material.file_name) else {
            warn!(local_id = %material.local_id, "material has no usable file name; payload skipped");
            continue;
        };
        let Some(dir) = entry_dir(&material.local_id) else {
            warn!(local_id = %material.local_id, "material id is not a usable directory name; payload skipped");
            continue;
        };
        let dir_path = files_dir.join(dir);
        tokio::fs::create_dir_all(&dir_path)
            .await
            .with_context(|| format!("failed to create {}", dir_path.display()))?;
        let path = dir_path.join(&name);
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    let manifest = serde_json::to_vec_pretty(&materials).context("failed to encode manifest")?;
    let manifest_path = dest.join(MANIFEST_FILE);
    tokio::fs::write(&manifest_path, manifest)
        .await
        .with_context(|| format!("failed to write {}", manifest_path.display()))?;

    info!(count = materials.len(), dest = %dest.display(), "exported backup bundle");
    Ok(materials.len())
}

async fn read_if_present(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

/// Payload for a manifest record: its own `<local_id>/` entry first, then the flat layout.
async fn read_payload(files_dir: &Path, local_id: &str, file_name: &str) -> Result<Option<Vec<u8>>> {
    let Some(name) = entry_name(file_name) else {
        return Ok(None);
    };
    if let Some(dir) = entry_dir(local_id) {
        if let Some(bytes) = read_if_present(&files_dir.join(dir).join(&name)).await? {
            return Ok(Some(bytes));
        }
    }
    read_if_present(&files_dir.join(&name)).await
}

/// Load a bundle from `src` into the store. Every imported material is queued for sync.
#[instrument(skip_all, fields(src = %src.display()))]
pub async fn import_bundle(pool: &Pool, src: &Path) -> Result<Vec<Material>> {
    let manifest_path = src.join(MANIFEST_FILE);
    let raw = tokio::fs::read(&manifest_path)
        .await
        .with_context(|| format!("failed to read {}", manifest_path.display()))?;
    let records: Vec<Material> = serde_json::from_slice(&raw)
        .with_context(|| format!("invalid manifest {}", manifest_path.display()))?;
    let files_dir = src.join(FILES_DIR);

    let mut imported = Vec::with_capacity(records.len());
    for mut material in records {
        if let Some(data) = read_payload(&files_dir, &material.local_id, &material.file_name).await? {
            material.file_size = data.len() as i64;
            material.file_data = Some(data);
        }
        if material.local_id.trim().is_empty() {
            material.local_id = new_local_id();
        }
        // An existing row may have a push in flight; a higher version invalidates it.
        material.sync_version = match db::get_material(pool, &material.local_id).await? {
            Some(existing) => existing.sync_version + 1,
            None => 1,
        };
        material.sync_status = SyncStatus::Pending;
        material.sync_phase = None;
        material.storage_location = StorageLocation::Local;

        db::put_material(pool, &material).await?;
        imported.push(material);
    }

    info!(count = imported.len(), "imported backup bundle");
    Ok(imported)
}
