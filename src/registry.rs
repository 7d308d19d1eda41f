//! Snapshot registry: поиск метаданных снапшота по пути, uuid или root id.
//!
//! Две реализации:
//! - MemRegistry: in-memory, порядок вставки сохраняется (тесты, встраивание).
//! - JsonRegistry: файл JSON, загружается целиком при open().
//!
//! Формат JsonRegistry:
//! {
//!   "mount_root": "/mnt/pool",          // опционально
//!   "snapshots": [
//!     {"root_id":256,"uuid":"...","parent_uuid":"...","ctransid":100,"path":"snaps/a","read_only":true},
//!     ...
//!   ]
//! }
//!
//! Запись (save) атомарна через tmp+rename.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

use crate::record::SnapshotRecord;

/// Read-only index over snapshot metadata.
pub trait SnapshotRegistry: Send + Sync {
    fn resolve_by_path(&self, path: &Path) -> Option<SnapshotRecord>;
    fn resolve_by_uuid(&self, uuid: &Uuid) -> Option<SnapshotRecord>;
    fn resolve_by_root_id(&self, root_id: u64) -> Option<SnapshotRecord>;
    /// All records in registry order.
    fn records(&self) -> Vec<SnapshotRecord>;

    /// Recorded ancestor of `root_id` (one ancestry edge).
    fn ancestor_of(&self, root_id: u64) -> Option<SnapshotRecord> {
        let rec = self.resolve_by_root_id(root_id)?;
        let parent = rec.ancestor_uuid()?;
        self.resolve_by_uuid(&parent)
    }
}

// ---------------- in-memory ----------------

#[derive(Debug, Default, Clone)]
pub struct MemRegistry {
    mount_root: Option<PathBuf>,
    entries: Vec<SnapshotRecord>,
}

impl MemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mount_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.mount_root = Some(root.into());
        self
    }

    /// Insert or replace (by root_id) a record.
    pub fn insert(&mut self, rec: SnapshotRecord) {
        if let Some(slot) = self.entries.iter_mut().find(|e| e.root_id == rec.root_id) {
            *slot = rec;
        } else {
            self.entries.push(rec);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SnapshotRegistry for MemRegistry {
    fn resolve_by_path(&self, path: &Path) -> Option<SnapshotRecord> {
        let key = relative_key(self.mount_root.as_deref(), path);
        self.entries
            .iter()
            .find(|e| normalize(&e.path) == key)
            .cloned()
    }

    fn resolve_by_uuid(&self, uuid: &Uuid) -> Option<SnapshotRecord> {
        if uuid.is_nil() {
            return None;
        }
        self.entries.iter().find(|e| &e.uuid == uuid).cloned()
    }

    fn resolve_by_root_id(&self, root_id: u64) -> Option<SnapshotRecord> {
        self.entries.iter().find(|e| e.root_id == root_id).cloned()
    }

    fn records(&self) -> Vec<SnapshotRecord> {
        self.entries.clone()
    }
}

// ---------------- JSON file ----------------

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    mount_root: Option<PathBuf>,
    #[serde(default)]
    snapshots: Vec<SnapshotRecord>,
}

/// Registry backed by a JSON file; loaded once on open.
#[derive(Debug, Clone)]
pub struct JsonRegistry {
    path: PathBuf,
    inner: MemRegistry,
}

impl JsonRegistry {
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("read registry {}", path.display()))?;
        let file: RegistryFile = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse registry {}", path.display()))?;

        let mut inner = MemRegistry::new();
        inner.mount_root = file.mount_root;
        for rec in file.snapshots {
            inner.insert(rec);
        }
        log::debug!(
            "registry: loaded {} snapshot(s) from {}",
            inner.len(),
            path.display()
        );
        Ok(Self {
            path: path.to_path_buf(),
            inner,
        })
    }

    /// Empty registry that will be written to `path` on save().
    pub fn create(path: &Path, mount_root: Option<PathBuf>) -> Self {
        let mut inner = MemRegistry::new();
        inner.mount_root = mount_root;
        Self {
            path: path.to_path_buf(),
            inner,
        }
    }

    pub fn insert(&mut self, rec: SnapshotRecord) {
        self.inner.insert(rec);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mount_root(&self) -> Option<&Path> {
        self.inner.mount_root.as_deref()
    }

    /// Atomic save: tmp + rename.
    pub fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        let file = RegistryFile {
            mount_root: self.inner.mount_root.clone(),
            snapshots: self.inner.entries.clone(),
        };
        let data = serde_json::to_vec_pretty(&file).context("serialize registry")?;
        {
            let mut f = OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&tmp)
                .with_context(|| format!("open {}", tmp.display()))?;
            f.write_all(&data)?;
            let _ = f.sync_all();
        }
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("rename {} -> {}", tmp.display(), self.path.display()))?;
        Ok(())
    }
}

impl SnapshotRegistry for JsonRegistry {
    fn resolve_by_path(&self, path: &Path) -> Option<SnapshotRecord> {
        self.inner.resolve_by_path(path)
    }
    fn resolve_by_uuid(&self, uuid: &Uuid) -> Option<SnapshotRecord> {
        self.inner.resolve_by_uuid(uuid)
    }
    fn resolve_by_root_id(&self, root_id: u64) -> Option<SnapshotRecord> {
        self.inner.resolve_by_root_id(root_id)
    }
    fn records(&self) -> Vec<SnapshotRecord> {
        self.inner.records()
    }
}

// ---------------- path helpers ----------------

/// Strip mount_root from absolute inputs, then drop "." components.
fn relative_key(mount_root: Option<&Path>, path: &Path) -> PathBuf {
    let rel = match mount_root {
        Some(root) if path.is_absolute() => path.strip_prefix(root).unwrap_or(path),
        _ => path,
    };
    normalize(rel)
}

fn normalize(p: &Path) -> PathBuf {
    p.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}
