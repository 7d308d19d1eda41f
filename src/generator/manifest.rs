//! ManifestGenerator: встроенный генератор metadata-only потока.
//!
//! Для каждого item пишет (см. stream.rs):
//!   [header]           : если не omit_header
//!   SUBVOL | SNAPSHOT  : SNAPSHOT, если есть parent
//!   CLONE_SOURCE × N   : по одному на clone source (uuid + ctransid)
//!   [END]              : если не omit_trailer
//!
//! Содержимое файлов не передаётся никогда: diff-алгоритм принадлежит движку хранения.

use log::debug;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{DeltaGenerator, SendRequest};
use crate::error::GeneratorError;
use crate::pipe::PipeWriter;
use crate::registry::SnapshotRegistry;
use crate::stream::{
    clone_source_payload, snapshot_payload, subvol_payload, write_command, write_stream_header,
    CMD_CLONE_SOURCE, CMD_END, CMD_SNAPSHOT, CMD_SUBVOL, FLAG_NO_FILE_DATA,
};

pub struct ManifestGenerator {
    registry: Arc<dyn SnapshotRegistry>,
    cancelled: AtomicBool,
}

impl ManifestGenerator {
    pub fn new(registry: Arc<dyn SnapshotRegistry>) -> Self {
        Self {
            registry,
            cancelled: AtomicBool::new(false),
        }
    }

    fn check_cancel(&self) -> Result<(), GeneratorError> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(GeneratorError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn lookup(&self, root_id: u64) -> Result<crate::record::SnapshotRecord, GeneratorError> {
        self.registry
            .resolve_by_root_id(root_id)
            .ok_or_else(|| GeneratorError::Failed(format!("unknown root id {root_id}")))
    }
}

impl DeltaGenerator for ManifestGenerator {
    fn invoke(&self, req: &SendRequest, mut out: PipeWriter) -> Result<(), GeneratorError> {
        self.check_cancel()?;
        let target = self.lookup(req.target_root_id)?;
        let flags = if req.flags.no_file_data {
            FLAG_NO_FILE_DATA
        } else {
            0
        };

        if !req.flags.omit_header {
            write_stream_header(&mut out)?;
        }

        match req.parent_root_id {
            Some(pid) => {
                let parent = self.lookup(pid)?;
                let p = snapshot_payload(
                    &target.uuid,
                    target.ctransid,
                    target.root_id,
                    flags,
                    &parent.uuid,
                    parent.ctransid,
                );
                write_command(&mut out, CMD_SNAPSHOT, &p)?;
            }
            None => {
                let p = subvol_payload(&target.uuid, target.ctransid, target.root_id, flags);
                write_command(&mut out, CMD_SUBVOL, &p)?;
            }
        }

        for &cs in &req.clone_sources {
            self.check_cancel()?;
            let src = self.lookup(cs)?;
            write_command(&mut out, CMD_CLONE_SOURCE, &clone_source_payload(&src.uuid, src.ctransid))?;
        }

        if !req.flags.omit_trailer {
            write_command(&mut out, CMD_END, &[])?;
        }
        out.flush()?;
        debug!(
            "manifest generator: root {} done (parent={:?}, clone_sources={})",
            req.target_root_id,
            req.parent_root_id,
            req.clone_sources.len()
        );
        Ok(())
    }

    fn cancel(&self) -> Result<(), GeneratorError> {
        self.cancelled.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "manifest"
    }
}
