use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use log::{error, info, warn};
use std::fs::OpenOptions;
use std::io::{BufWriter, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cancel::{install_signal_handler, CancelToken};
use crate::clone_sources::CloneSourceSet;
use crate::config::ExportConfig;
use crate::generator::{DeltaGenerator, ExecGenerator, ManifestGenerator};
use crate::metrics::{metrics_snapshot, reset_metrics};
use crate::parent::{choose_parent, ParentChoice};
use crate::registry::{JsonRegistry, SnapshotRegistry};
use crate::session::{send_snapshots, SendOptions};

#[derive(Parser, Debug)]
#[command(
    name = "snapsend",
    version,
    about = "Send read-only snapshots as an incremental stream",
    arg_required_else_help = true
)]
pub struct Cli {
    /// More logging: -v debug, -vv trace (RUST_LOG overrides)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Send snapshot(s) to stdout or a file
    ///
    /// Без -p/-c отправляется полный поток. С -c (можно несколько раз) parent
    /// подбирается среди clone sources автоматически. Clone sources должны быть
    /// в точности одинаковы на отправителе и получателе.
    ///
    ///   snapsend send --registry reg.json -p snaps/a snaps/b > b.stream
    ///   snapsend send --registry reg.json -e -c snaps/a snaps/b snaps/c -f bc.stream
    Send {
        /// Snapshot registry (JSON); default from SNAPSEND_REGISTRY
        #[arg(long)]
        registry: Option<PathBuf>,
        /// Multi-snapshot stream: one header, one trailer (needs a capable generator)
        #[arg(short = 'e', long = "extended")]
        extended: bool,
        /// Send an incremental stream from <PARENT> to the first snapshot
        #[arg(short = 'p', long)]
        parent: Option<PathBuf>,
        /// Snapshot the receiver already has (repeatable)
        #[arg(short = 'c', long = "clone-source")]
        clone_sources: Vec<PathBuf>,
        /// Write the stream to a file instead of stdout
        #[arg(short = 'f', long = "outfile")]
        outfile: Option<PathBuf>,
        /// Metadata only: no file data in the stream
        #[arg(long = "no-data", default_value_t = false)]
        no_data: bool,
        /// External generator command; default from SNAPSEND_GENERATOR_CMD, else built-in
        #[arg(long)]
        generator_cmd: Option<String>,
        #[arg(required = true)]
        snapshots: Vec<PathBuf>,
    },
    /// List registry records
    List {
        #[arg(long)]
        registry: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Show which parent `send` would pick for a snapshot
    Parent {
        #[arg(long)]
        registry: Option<PathBuf>,
        #[arg(short = 'p', long)]
        parent: Option<PathBuf>,
        #[arg(short = 'c', long = "clone-source")]
        clone_sources: Vec<PathBuf>,
        snapshot: PathBuf,
    },
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn run(cli: Cli) -> Result<()> {
    let cfg = ExportConfig::from_env();
    log::debug!("{}", cfg);

    match cli.cmd {
        Cmd::Send {
            registry,
            extended,
            parent,
            clone_sources,
            outfile,
            no_data,
            generator_cmd,
            snapshots,
        } => {
            let cfg = match generator_cmd {
                Some(c) => cfg.with_generator_cmd(Some(c)),
                None => cfg,
            };
            let opts = SendOptions {
                snapshots,
                parent,
                clone_sources,
                extended_framing: extended,
                no_file_data: no_data,
            };
            exec_send(registry, cfg, opts, outfile)
        }
        Cmd::List { registry, json } => exec_list(registry, &cfg, json),
        Cmd::Parent {
            registry,
            parent,
            clone_sources,
            snapshot,
        } => exec_parent(registry, &cfg, parent, clone_sources, snapshot),
    }
}

// ------------- send -------------

fn exec_send(
    registry: Option<PathBuf>,
    cfg: ExportConfig,
    opts: SendOptions,
    outfile: Option<PathBuf>,
) -> Result<()> {
    let registry = open_registry(registry, &cfg)?;
    let generator = make_generator(&cfg, registry.clone())?;

    let cancel = CancelToken::new();
    if let Err(e) = install_signal_handler(cancel.clone(), generator.clone()) {
        warn!("send: cannot install signal handler: {e}");
    }

    // счётчики в итоговом логе относятся только к этому send
    reset_metrics();
    let mut sink = open_sink(outfile.as_deref(), cfg.allow_tty)?;
    let summary = match send_snapshots(registry, generator, &cfg, &opts, cancel, &mut sink) {
        Ok(s) => s,
        Err(e) => {
            let _ = sink.flush();
            if e.is_fatal_for_batch() {
                error!(
                    "send: batch aborted after {} item(s); the output stream is incomplete, discard it",
                    metrics_snapshot().export_items_total
                );
            }
            return Err(e).context("send failed");
        }
    };
    sink.flush().context("flush output")?;

    let m = metrics_snapshot();
    info!(
        "send: done items={} bytes={} incremental_ratio={:.2}",
        summary.items.len(),
        summary.bytes_total,
        m.incremental_ratio()
    );
    Ok(())
}

fn make_generator(
    cfg: &ExportConfig,
    registry: Arc<dyn SnapshotRegistry>,
) -> Result<Arc<dyn DeltaGenerator>> {
    match cfg.generator_cmd.as_deref() {
        Some(cmd) => {
            let g = ExecGenerator::from_command_line(cmd)
                .with_context(|| format!("generator command '{cmd}'"))?;
            info!("send: external generator {}", g.program());
            Ok(Arc::new(g))
        }
        None => Ok(Arc::new(ManifestGenerator::new(registry))),
    }
}

/// Sink: stdout (по умолчанию) или файл (-f, mode 0600 на unix).
/// В терминал бинарный поток не пишем, если не разрешено явно.
fn open_sink(outfile: Option<&Path>, allow_tty: bool) -> Result<Box<dyn Write + Send>> {
    match outfile {
        None => {
            let out = std::io::stdout();
            if out.is_terminal() && !allow_tty {
                return Err(anyhow!(
                    "not dumping send stream into a terminal, redirect it into a file"
                ));
            }
            Ok(Box::new(BufWriter::new(out)))
        }
        Some(p) => {
            let mut oo = OpenOptions::new();
            oo.create(true).truncate(true).write(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                oo.mode(0o600);
            }
            let f = oo
                .open(p)
                .with_context(|| format!("cannot create '{}'", p.display()))?;
            if f.is_terminal() && !allow_tty {
                return Err(anyhow!(
                    "not dumping send stream into a terminal ({}), redirect it into a file",
                    p.display()
                ));
            }
            Ok(Box::new(BufWriter::new(f)))
        }
    }
}

fn open_registry(flag: Option<PathBuf>, cfg: &ExportConfig) -> Result<Arc<dyn SnapshotRegistry>> {
    let path = flag
        .or_else(|| cfg.registry_path.clone())
        .ok_or_else(|| anyhow!("no registry: use --registry or SNAPSEND_REGISTRY"))?;
    let reg = JsonRegistry::open(&path)?;
    Ok(Arc::new(reg))
}

// ------------- list -------------

fn exec_list(registry: Option<PathBuf>, cfg: &ExportConfig, json: bool) -> Result<()> {
    let registry = open_registry(registry, cfg)?;
    let records = registry.records();
    if json {
        let s = serde_json::to_string_pretty(&records).context("serialize records")?;
        println!("{s}");
        return Ok(());
    }
    if records.is_empty() {
        println!("(no snapshots)");
        return Ok(());
    }
    println!(
        "{:>8}  {:>10}  {:2}  {:36}  {:36}  path",
        "root_id", "ctransid", "ro", "uuid", "parent_uuid"
    );
    for r in records {
        let parent = r
            .ancestor_uuid()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>8}  {:>10}  {:2}  {:36}  {:36}  {}",
            r.root_id,
            r.ctransid,
            if r.read_only { "ro" } else { "rw" },
            r.uuid.to_string(),
            parent,
            r.path.display()
        );
    }
    Ok(())
}

// ------------- parent (dry run) -------------

fn exec_parent(
    registry: Option<PathBuf>,
    cfg: &ExportConfig,
    parent: Option<PathBuf>,
    clone_sources: Vec<PathBuf>,
    snapshot: PathBuf,
) -> Result<()> {
    let registry = open_registry(registry, cfg)?;
    let resolve = |p: &Path| {
        registry
            .resolve_by_path(p)
            .ok_or_else(|| anyhow!("cannot resolve snapshot {}", p.display()))
    };

    let mut set = CloneSourceSet::new();
    for cs in &clone_sources {
        set.add(resolve(cs)?.root_id)?;
    }
    let explicit = match &parent {
        Some(p) => {
            let id = resolve(p)?.root_id;
            set.add(id)?;
            Some(id)
        }
        None => None,
    };

    let target = resolve(&snapshot)?;
    let choice = choose_parent(registry.as_ref(), &target, explicit, &set)
        .with_context(|| format!("parent determination failed for {}", snapshot.display()))?;

    let describe = |id: u64| {
        registry
            .resolve_by_root_id(id)
            .map(|r| r.path.display().to_string())
            .unwrap_or_else(|| "?".to_string())
    };
    match choice {
        ParentChoice::Full => println!("parent: none (full export)"),
        ParentChoice::Explicit(id) => println!("parent: {} {} (explicit)", id, describe(id)),
        ParentChoice::Ancestor(id) => println!("parent: {} {} (ancestor)", id, describe(id)),
        ParentChoice::Sibling { root_id, distance } => println!(
            "parent: {} {} (sibling, ctransid distance {})",
            root_id,
            describe(root_id),
            distance
        ),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SnapshotRecord;
    use uuid::Uuid;

    fn unique_root(prefix: &str) -> PathBuf {
        let t = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir().join(format!("snapsend-cli-{prefix}-{}-{t}", std::process::id()))
    }

    fn seed(root: &Path) -> PathBuf {
        std::fs::create_dir_all(root).unwrap();
        let path = root.join("registry.json");
        let mut reg = JsonRegistry::create(&path, None);
        let a = SnapshotRecord::new(256, Uuid::new_v4(), Uuid::nil(), 10, "snaps/a", true);
        let b = SnapshotRecord::new(257, Uuid::new_v4(), a.uuid, 20, "snaps/b", true);
        let rw = SnapshotRecord::new(258, Uuid::new_v4(), a.uuid, 30, "snaps/rw", false);
        reg.insert(a);
        reg.insert(b);
        reg.insert(rw);
        reg.save().unwrap();
        path
    }

    fn send_args<'a>(reg: &'a Path, out: &'a Path, snaps: &[&'a str]) -> Vec<String> {
        let mut v = vec![
            "snapsend".to_string(),
            "send".to_string(),
            "--registry".to_string(),
            reg.display().to_string(),
            "-f".to_string(),
            out.display().to_string(),
        ];
        v.extend(snaps.iter().map(|s| s.to_string()));
        v
    }

    #[test]
    fn send_writes_outfile() {
        let root = unique_root("ok");
        let reg = seed(&root);
        let out = root.join("ab.stream");

        let cli = Cli::try_parse_from(send_args(&reg, &out, &["snaps/a", "snaps/b"])).unwrap();
        run(cli).unwrap();

        let bytes = std::fs::read(&out).unwrap();
        let events = crate::stream::scan_stream(&bytes).unwrap();
        assert_eq!(events.iter().filter(|e| e.is_header()).count(), 2);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&out).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn failed_send_reports_error_and_leaves_no_stream() {
        let root = unique_root("fail");
        let reg = seed(&root);
        let out = root.join("bad.stream");

        let cli = Cli::try_parse_from(send_args(&reg, &out, &["snaps/a", "snaps/rw"])).unwrap();
        let err = run(cli).unwrap_err();
        let export = err.downcast_ref::<crate::error::ExportError>().expect("typed cause");
        assert!(export.is_fatal_for_batch());
        assert!(matches!(export, crate::error::ExportError::WritableSnapshot { .. }));
        // pre-flight: ни одного байта
        assert_eq!(std::fs::metadata(&out).unwrap().len(), 0);
        let _ = std::fs::remove_dir_all(&root);
    }
}
