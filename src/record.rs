//! SnapshotRecord: метаданные одного снапшота, как их отдаёт registry.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Immutable snapshot metadata.
///
/// Identity is `root_id`. `uuid` is the stable cross-reference used to walk
/// ancestry; `path` is only valid for resolution at query time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub root_id: u64,
    pub uuid: Uuid,
    /// Nil for a root subvolume (no recorded ancestor).
    #[serde(default = "Uuid::nil")]
    pub parent_uuid: Uuid,
    /// Creation transaction id (monotonic, assigned by the storage engine).
    pub ctransid: u64,
    pub path: PathBuf,
    /// Missing in JSON means writable: export refuses it until the flag is recorded.
    #[serde(default)]
    pub read_only: bool,
}

impl SnapshotRecord {
    pub fn new(
        root_id: u64,
        uuid: Uuid,
        parent_uuid: Uuid,
        ctransid: u64,
        path: impl Into<PathBuf>,
        read_only: bool,
    ) -> Self {
        Self {
            root_id,
            uuid,
            parent_uuid,
            ctransid,
            path: path.into(),
            read_only,
        }
    }

    /// Recorded ancestor uuid, if any.
    pub fn ancestor_uuid(&self) -> Option<Uuid> {
        if self.parent_uuid.is_nil() {
            None
        } else {
            Some(self.parent_uuid)
        }
    }
}
