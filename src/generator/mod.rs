//! Delta generators: the engine that turns (target, parent, clone sources)
//! into a self-describing byte stream.
//!
//! - exec.rs: ExecGenerator: внешний процесс, stdout → pipe.
//! - manifest.rs: ManifestGenerator: встроенный, metadata-only поток (stream.rs).
//!
//! The wire format belongs to the generator; the session only controls whether
//! the header and the trailer are emitted.

mod exec;
mod manifest;

pub use exec::{ExecGenerator, EXIT_UNSUPPORTED};
pub use manifest::ManifestGenerator;

use crate::error::GeneratorError;
use crate::pipe::PipeWriter;

/// Per-item stream flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendFlags {
    pub omit_header: bool,
    pub omit_trailer: bool,
    /// Metadata only, no file content.
    pub no_file_data: bool,
}

/// One generator invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub target_root_id: u64,
    pub parent_root_id: Option<u64>,
    /// Snapshot of the clone-source set, insertion order.
    pub clone_sources: Vec<u64>,
    pub flags: SendFlags,
}

pub trait DeltaGenerator: Send + Sync {
    /// Blocking call; writes the produced stream into `out` as it runs.
    /// `out` is dropped on return, which closes the pipe for the reader.
    fn invoke(&self, req: &SendRequest, out: PipeWriter) -> Result<(), GeneratorError>;

    /// Best-effort request to abort an in-flight `invoke`. Safe to call when idle.
    fn cancel(&self) -> Result<(), GeneratorError>;

    /// Whether header/trailer may be omitted (multi-item streams).
    fn supports_extended_framing(&self) -> bool {
        true
    }

    fn name(&self) -> &str;
}
