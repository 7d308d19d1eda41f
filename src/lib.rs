// Базовые модули
pub mod error;
pub mod config;
pub mod metrics;

// Данные и registry
pub mod record;
pub mod registry;
pub mod clone_sources;

// Выбор parent
pub mod parent;

// Поток: pipe + pump + формат встроенного генератора
pub mod pipe;
pub mod pump;
pub mod stream;

// Генераторы (exec / manifest)
pub mod generator; // src/generator/{mod,exec,manifest}.rs

// Оркестрация batch + cancel
pub mod session;
pub mod cancel;

// CLI (используется бинарником)
pub mod cli;

// Удобные реэкспорты
pub use cancel::{cancel_export, install_signal_handler, CancelToken};
pub use clone_sources::CloneSourceSet;
pub use config::ExportConfig;
pub use error::{ExportError, GeneratorError};
pub use generator::{DeltaGenerator, ExecGenerator, ManifestGenerator, SendFlags, SendRequest};
pub use parent::{choose_parent, select_parent, ParentChoice};
pub use pump::StreamPump;
pub use record::SnapshotRecord;
pub use registry::{JsonRegistry, MemRegistry, SnapshotRegistry};
pub use session::{
    framing_for, send_snapshots, ExportItem, ExportSession, ExportSummary, SendOptions,
    SessionState,
};
