// tests/exec_generator.rs
//
// Запуск:
//   cargo test --test exec_generator -- --nocapture
//
// Внешний генератор через /bin/sh (только unix):
// 1) stdout процесса попадает в sink, аргументы запроса передаются.
// 2) exit 95 → Unsupported; другой ненулевой код → Failed.
// 3) cancel() убивает процесс → Cancelled.

#![cfg(unix)]

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use uuid::Uuid;

use snapsend::generator::{DeltaGenerator, SendRequest};
use snapsend::pipe::pipe;
use snapsend::{
    ExecGenerator, ExportConfig, ExportError, ExportSession, GeneratorError, MemRegistry,
    SnapshotRecord,
};

fn sh(script: &str) -> ExecGenerator {
    // $0 = "gen", дальше аргументы запроса
    ExecGenerator::new("sh", vec!["-c".to_string(), script.to_string(), "gen".to_string()])
}

fn registry() -> Arc<MemRegistry> {
    let mut reg = MemRegistry::new();
    let a = SnapshotRecord::new(256, Uuid::new_v4(), Uuid::nil(), 10, "snaps/a", true);
    let b = SnapshotRecord::new(257, Uuid::new_v4(), a.uuid, 20, "snaps/b", true);
    reg.insert(a);
    reg.insert(b);
    Arc::new(reg)
}

#[test]
fn process_output_reaches_sink() -> Result<()> {
    let gen = Arc::new(sh(r#"printf 'root=%s;' "$2"; [ "$3" = "--parent" ] && printf 'parent=%s;' "$4"; exit 0"#));
    let mut session = ExportSession::new(registry(), gen, false, ExportConfig::default())?;

    let mut sink = Vec::new();
    let summary = session.export(
        &[PathBuf::from("snaps/a"), PathBuf::from("snaps/b")],
        None,
        false,
        &mut sink,
    )?;
    assert_eq!(String::from_utf8(sink)?, "root=256;root=257;parent=256;");
    assert_eq!(summary.items.len(), 2);
    Ok(())
}

#[test]
fn exit_codes_map_to_errors() -> Result<()> {
    let mut sink = Vec::new();

    let mut s = ExportSession::new(registry(), Arc::new(sh("exit 95")), false, ExportConfig::default())?;
    let err = s
        .export(&[PathBuf::from("snaps/a")], None, false, &mut sink)
        .unwrap_err();
    assert!(err.is_unsupported(), "got {err:?}");

    let mut s = ExportSession::new(registry(), Arc::new(sh("exit 3")), false, ExportConfig::default())?;
    let err = s
        .export(&[PathBuf::from("snaps/a")], None, false, &mut sink)
        .unwrap_err();
    assert!(matches!(err, ExportError::Generator(GeneratorError::Failed(_))));
    Ok(())
}

#[test]
fn cancel_kills_running_process() -> Result<()> {
    let gen = Arc::new(sh("printf started; exec sleep 30"));
    let req = SendRequest {
        target_root_id: 256,
        parent_root_id: None,
        clone_sources: Vec::new(),
        flags: Default::default(),
    };
    let (writer, mut reader) = pipe(4, 4096);

    let started = Instant::now();
    let drain = thread::spawn(move || {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).map(|_| buf)
    });
    let canceller = {
        let gen = gen.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            gen.cancel()
        })
    };

    let res = gen.invoke(&req, writer);
    assert!(matches!(res, Err(GeneratorError::Cancelled)), "got {res:?}");
    canceller.join().expect("canceller thread")?;
    let out = drain.join().expect("drain thread")?;
    assert_eq!(out, b"started");
    assert!(started.elapsed() < Duration::from_secs(20));
    Ok(())
}

/// cancel() в любой момент вокруг spawn: процесс убит, invoke не ждёт sleep.
#[test]
fn cancel_near_spawn_is_never_lost() -> Result<()> {
    let req = SendRequest {
        target_root_id: 256,
        parent_root_id: None,
        clone_sources: Vec::new(),
        flags: Default::default(),
    };

    for round in 0..60u64 {
        let delay = Duration::from_micros((round % 20) * 100);
        let gen = Arc::new(sh("exec sleep 5"));
        let (writer, mut reader) = pipe(4, 4096);

        let drain = thread::spawn(move || {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).map(|_| buf)
        });
        let canceller = {
            let gen = gen.clone();
            thread::spawn(move || {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                gen.cancel()
            })
        };

        let started = Instant::now();
        let res = gen.invoke(&req, writer);
        let took = started.elapsed();
        canceller.join().expect("canceller thread")?;
        drain.join().expect("drain thread")?;

        assert!(
            matches!(res, Err(GeneratorError::Cancelled)),
            "round {round} (delay {delay:?}): got {res:?}"
        );
        assert!(
            took < Duration::from_secs(2),
            "round {round} (delay {delay:?}): child not killed, invoke took {took:?}"
        );
    }
    Ok(())
}
