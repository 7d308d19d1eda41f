//! ExportSession: orchestrates one batch of snapshot exports.
//!
//! Per item, strictly sequential:
//!   ResolvingParent → Generating → Draining → Committed
//! then the next item, or Done after the last one. Any error moves the session
//! to Failed and aborts the whole batch (a truncated multi-item stream cannot
//! be resumed by the receiver).
//!
//! Only the pump of the current item runs concurrently with that item's
//! generator call; the clone-source set is touched only between items.

use log::{debug, info, warn};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use crate::cancel::CancelToken;
use crate::clone_sources::CloneSourceSet;
use crate::config::ExportConfig;
use crate::error::{ExportError, GeneratorError};
use crate::generator::{DeltaGenerator, SendFlags, SendRequest};
use crate::metrics::{
    record_export_failure, record_item_exported, record_parent_ancestor, record_parent_explicit,
    record_parent_full, record_parent_sibling,
};
use crate::parent::{choose_parent, ParentChoice};
use crate::pipe::pipe;
use crate::pump::StreamPump;
use crate::record::SnapshotRecord;
use crate::registry::SnapshotRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    ResolvingParent,
    Generating,
    Draining,
    Committed,
    Done,
    Failed,
}

/// Header/trailer presence for item `index` of `total`.
///
/// Legacy framing: every item is a self-contained stream.
/// Extended framing: one header before the first item, one trailer after the last.
/// Returns `(is_first_in_batch, is_last_in_batch)`.
pub fn framing_for(index: usize, total: usize, extended: bool) -> (bool, bool) {
    if extended {
        (index == 0, index + 1 == total)
    } else {
        (true, true)
    }
}

/// One requested snapshot plus derived state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportItem {
    pub snapshot: SnapshotRecord,
    pub parent_root_id: Option<u64>,
    pub is_first_in_batch: bool,
    pub is_last_in_batch: bool,
}

impl ExportItem {
    pub fn flags(&self, no_file_data: bool) -> SendFlags {
        SendFlags {
            omit_header: !self.is_first_in_batch,
            omit_trailer: !self.is_last_in_batch,
            no_file_data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    pub root_id: u64,
    pub path: PathBuf,
    pub parent: ParentChoice,
    pub flags: SendFlags,
    pub bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub items: Vec<ItemReport>,
    pub bytes_total: u64,
}

/// Inputs of the process-level entry point [`send_snapshots`].
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub snapshots: Vec<PathBuf>,
    /// Explicit reference snapshot for the first item.
    pub parent: Option<PathBuf>,
    /// Extra snapshots the receiver already has.
    pub clone_sources: Vec<PathBuf>,
    pub extended_framing: bool,
    pub no_file_data: bool,
}

pub struct ExportSession {
    registry: Arc<dyn SnapshotRegistry>,
    generator: Arc<dyn DeltaGenerator>,
    cfg: ExportConfig,
    clone_sources: CloneSourceSet,
    explicit_parent_root_id: Option<u64>,
    // решается один раз при создании, внутри batch не меняется
    use_extended_framing: bool,
    state: SessionState,
    cancel: CancelToken,
}

impl ExportSession {
    /// Fails if the config is invalid or extended framing is requested from a
    /// generator that only produces self-contained streams.
    pub fn new(
        registry: Arc<dyn SnapshotRegistry>,
        generator: Arc<dyn DeltaGenerator>,
        extended_framing: bool,
        cfg: ExportConfig,
    ) -> Result<Self, ExportError> {
        cfg.validate()?;
        if extended_framing && !generator.supports_extended_framing() {
            return Err(ExportError::Generator(GeneratorError::Unsupported(format!(
                "{} generator cannot omit stream header/trailer",
                generator.name()
            ))));
        }
        Ok(Self {
            registry,
            generator,
            cfg,
            clone_sources: CloneSourceSet::new(),
            explicit_parent_root_id: None,
            use_extended_framing: extended_framing,
            state: SessionState::Init,
            cancel: CancelToken::new(),
        })
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn clone_sources(&self) -> &CloneSourceSet {
        &self.clone_sources
    }

    pub fn explicit_parent_root_id(&self) -> Option<u64> {
        self.explicit_parent_root_id
    }

    pub fn uses_extended_framing(&self) -> bool {
        self.use_extended_framing
    }

    fn resolve_read_only(&self, path: &Path) -> Result<SnapshotRecord, ExportError> {
        let rec = self
            .registry
            .resolve_by_path(path)
            .ok_or_else(|| ExportError::resolution(format!("snapshot {}", path.display())))?;
        if !rec.read_only {
            return Err(ExportError::WritableSnapshot {
                path: path.to_path_buf(),
            });
        }
        Ok(rec)
    }

    fn ensure_init(&self) -> Result<(), ExportError> {
        if self.state != SessionState::Init {
            return Err(ExportError::InvalidArgument(format!(
                "export session is not fresh (state {:?})",
                self.state
            )));
        }
        Ok(())
    }

    /// Register a read-only snapshot the receiver already has.
    pub fn add_clone_source_path(&mut self, path: &Path) -> Result<u64, ExportError> {
        self.ensure_init()?;
        let rec = self.resolve_read_only(path)?;
        self.clone_sources.add(rec.root_id)?;
        debug!("session: clone source {} (root {})", path.display(), rec.root_id);
        Ok(rec.root_id)
    }

    /// Set the explicit reference snapshot. Only one per session; it also
    /// becomes a clone source.
    pub fn set_explicit_parent(&mut self, path: &Path) -> Result<u64, ExportError> {
        self.ensure_init()?;
        if self.explicit_parent_root_id.is_some() {
            return Err(ExportError::InvalidArgument(
                "only one explicit parent may be given".to_string(),
            ));
        }
        let rec = self.resolve_read_only(path)?;
        self.clone_sources.add(rec.root_id)?;
        self.explicit_parent_root_id = Some(rec.root_id);
        debug!("session: explicit parent {} (root {})", path.display(), rec.root_id);
        Ok(rec.root_id)
    }

    /// Export `snapshots` in order into `sink`.
    pub fn export<W: Write + Send + ?Sized>(
        &mut self,
        snapshots: &[PathBuf],
        explicit_parent_path: Option<&Path>,
        no_file_data: bool,
        sink: &mut W,
    ) -> Result<ExportSummary, ExportError> {
        self.ensure_init()?;
        let res = self.run_batch(snapshots, explicit_parent_path, no_file_data, sink);
        match &res {
            Ok(summary) => {
                self.state = SessionState::Done;
                debug!(
                    "session: done, {} item(s), {} bytes",
                    summary.items.len(),
                    summary.bytes_total
                );
            }
            Err(e) => {
                debug!("session: failed in state {:?}: {}", self.state, e);
                self.state = SessionState::Failed;
                record_export_failure();
            }
        }
        res
    }

    fn run_batch<W: Write + Send + ?Sized>(
        &mut self,
        snapshots: &[PathBuf],
        explicit_parent_path: Option<&Path>,
        no_file_data: bool,
        sink: &mut W,
    ) -> Result<ExportSummary, ExportError> {
        if snapshots.is_empty() {
            return Err(ExportError::InvalidArgument(
                "no snapshots to export".to_string(),
            ));
        }
        if let Some(p) = explicit_parent_path {
            self.set_explicit_parent(p)?;
        }
        if no_file_data {
            info!("Mode NO_FILE_DATA enabled");
        }

        // pre-flight: ни одного байта, пока все снапшоты не проверены
        for p in snapshots {
            self.resolve_read_only(p)?;
        }

        let total = snapshots.len();
        let mut summary = ExportSummary::default();

        for (idx, path) in snapshots.iter().enumerate() {
            if self.cancel.is_requested() {
                return Err(ExportError::Cancelled);
            }
            info!("export: at snapshot {}", path.display());

            self.state = SessionState::ResolvingParent;
            let snapshot = self.resolve_read_only(path)?;
            // explicit parent действует только на первый item
            let explicit = if idx == 0 {
                self.explicit_parent_root_id
            } else {
                None
            };
            let choice = choose_parent(
                self.registry.as_ref(),
                &snapshot,
                explicit,
                &self.clone_sources,
            )?;
            record_parent(&choice);
            log_parent(&snapshot, &choice);

            let (first, last) = framing_for(idx, total, self.use_extended_framing);
            let item = ExportItem {
                snapshot,
                parent_root_id: choice.root_id(),
                is_first_in_batch: first,
                is_last_in_batch: last,
            };

            let bytes = self.send_item(&item, no_file_data, &mut *sink)?;

            self.state = SessionState::Committed;
            self.clone_sources.add(item.snapshot.root_id)?;
            record_item_exported(bytes);
            summary.items.push(ItemReport {
                root_id: item.snapshot.root_id,
                path: path.clone(),
                parent: choice,
                flags: item.flags(no_file_data),
                bytes,
            });
            summary.bytes_total += bytes;
        }

        Ok(summary)
    }

    /// Run the generator for one item with a concurrent pump into `sink`.
    /// Both are joined before returning; a pump failure wins over a generator failure.
    fn send_item<W: Write + Send + ?Sized>(
        &mut self,
        item: &ExportItem,
        no_file_data: bool,
        sink: &mut W,
    ) -> Result<u64, ExportError> {
        let req = SendRequest {
            target_root_id: item.snapshot.root_id,
            parent_root_id: item.parent_root_id,
            clone_sources: self.clone_sources.as_slice().to_vec(),
            flags: item.flags(no_file_data),
        };
        let (writer, reader) = pipe(self.cfg.channel_depth, self.cfg.chunk_bytes);
        let pump = StreamPump::new(self.cfg.chunk_bytes);
        let generator = self.generator.as_ref();
        let state = &mut self.state;

        *state = SessionState::Generating;
        let (gen_res, pump_res) = thread::scope(|s| -> Result<_, ExportError> {
            let handle = thread::Builder::new()
                .name("snapsend-pump".to_string())
                .spawn_scoped(s, move || pump.run(reader, sink))
                .map_err(pump_spawn_failed)?;

            let gen_res = generator.invoke(&req, writer);
            *state = SessionState::Draining;
            debug!(
                "export: generator returned for root {} (ok={}), joining pump",
                req.target_root_id,
                gen_res.is_ok()
            );
            let pump_res = handle.join().unwrap_or_else(|_| {
                Err(ExportError::Transfer(io::Error::new(
                    io::ErrorKind::Other,
                    "pump thread panicked",
                )))
            });
            Ok((gen_res, pump_res))
        })?;

        match (gen_res, pump_res) {
            (gen_res, Err(pump_err)) => {
                if let Err(g) = gen_res {
                    warn!(
                        "export: generator also failed for root {}: {}",
                        req.target_root_id, g
                    );
                }
                Err(pump_err)
            }
            (Err(GeneratorError::Cancelled), Ok(_)) => Err(ExportError::Cancelled),
            (Err(g), Ok(_)) => {
                if matches!(g, GeneratorError::Unsupported(_))
                    && (req.flags.omit_header || req.flags.omit_trailer)
                {
                    warn!(
                        "export: generator rejected an omitted header/trailer; \
                         upgrade the storage engine or export without extended framing"
                    );
                }
                Err(ExportError::Generator(g))
            }
            (Ok(()), Ok(bytes)) => Ok(bytes),
        }
    }
}

/// No thread for the pump: resource exhaustion, nothing has been streamed yet.
fn pump_spawn_failed(e: io::Error) -> ExportError {
    warn!("export: cannot start pump thread: {e}");
    ExportError::Allocation("pump thread")
}

fn record_parent(choice: &ParentChoice) {
    match choice {
        ParentChoice::Full => record_parent_full(),
        ParentChoice::Explicit(_) => record_parent_explicit(),
        ParentChoice::Ancestor(_) => record_parent_ancestor(),
        ParentChoice::Sibling { .. } => record_parent_sibling(),
    }
}

fn log_parent(snapshot: &SnapshotRecord, choice: &ParentChoice) {
    match choice {
        ParentChoice::Full => info!("export: root {} full (no parent)", snapshot.root_id),
        ParentChoice::Explicit(p) => {
            info!("export: root {} parent {} (explicit)", snapshot.root_id, p)
        }
        ParentChoice::Ancestor(p) => {
            info!("export: root {} parent {} (ancestor)", snapshot.root_id, p)
        }
        ParentChoice::Sibling { root_id, distance } => info!(
            "export: root {} parent {} (sibling, ctransid distance {})",
            snapshot.root_id, root_id, distance
        ),
    }
}

/// Process-level entry point: clone sources, optional explicit parent, then
/// the batch, all in one fresh session.
pub fn send_snapshots<W: Write + Send + ?Sized>(
    registry: Arc<dyn SnapshotRegistry>,
    generator: Arc<dyn DeltaGenerator>,
    cfg: &ExportConfig,
    opts: &SendOptions,
    cancel: CancelToken,
    sink: &mut W,
) -> Result<ExportSummary, ExportError> {
    let mut session =
        ExportSession::new(registry, generator, opts.extended_framing, cfg.clone())?
            .with_cancel(cancel);
    for cs in &opts.clone_sources {
        session.add_clone_source_path(cs)?;
    }
    session.export(
        &opts.snapshots,
        opts.parent.as_deref(),
        opts.no_file_data,
        sink,
    )
}
