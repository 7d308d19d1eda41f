//! ExecGenerator: generator as an external process.
//!
//! Command line: `<program> [args...] --root <id> [--parent <id>] [--clone-source <id>]...
//! [--omit-header] [--omit-trailer] [--no-data]`.
//!
//! stdout процесса копируется в pipe; stderr наследуется (сообщения движка видит оператор).
//! Код выхода 95 (EOPNOTSUPP) → Unsupported, любой другой ненулевой → Failed.

use log::{debug, warn};
use std::io::{self, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use super::{DeltaGenerator, SendRequest};
use crate::error::GeneratorError;
use crate::pipe::PipeWriter;

pub const EXIT_UNSUPPORTED: i32 = 95;

const WAIT_POLL: Duration = Duration::from_millis(5);

pub struct ExecGenerator {
    program: String,
    args: Vec<String>,
    child: Mutex<Option<Child>>,
    cancelled: AtomicBool,
}

impl ExecGenerator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            child: Mutex::new(None),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Split a whitespace-separated command line (no shell quoting).
    pub fn from_command_line(cmd: &str) -> Result<Self, GeneratorError> {
        let mut parts = cmd.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| GeneratorError::Failed("empty generator command".to_string()))?;
        Ok(Self::new(program, parts.collect()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Request-specific arguments appended after the configured ones.
    pub fn request_args(req: &SendRequest) -> Vec<String> {
        let mut a = vec!["--root".to_string(), req.target_root_id.to_string()];
        if let Some(p) = req.parent_root_id {
            a.push("--parent".to_string());
            a.push(p.to_string());
        }
        for cs in &req.clone_sources {
            a.push("--clone-source".to_string());
            a.push(cs.to_string());
        }
        if req.flags.omit_header {
            a.push("--omit-header".to_string());
        }
        if req.flags.omit_trailer {
            a.push("--omit-trailer".to_string());
        }
        if req.flags.no_file_data {
            a.push("--no-data".to_string());
        }
        a
    }

    /// Wait for exit while the child stays reachable for cancel().
    fn wait_child(&self) -> Result<ExitStatus, GeneratorError> {
        loop {
            {
                let mut slot = self.slot();
                let child = slot
                    .as_mut()
                    .ok_or_else(|| GeneratorError::Failed("generator process handle lost".into()))?;
                if let Some(status) = child.try_wait()? {
                    *slot = None;
                    return Ok(status);
                }
            }
            thread::sleep(WAIT_POLL);
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Child>> {
        // poisoned lock: the Child handle is still usable
        self.child.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl DeltaGenerator for ExecGenerator {
    fn invoke(&self, req: &SendRequest, mut out: PipeWriter) -> Result<(), GeneratorError> {
        let extra = Self::request_args(req);
        debug!("exec generator: {} {:?} {:?}", self.program, self.args, extra);

        // spawn под lock: cancel() ставит флаг до lock, поэтому либо мы видим флаг,
        // либо cancel() находит child в slot
        let mut stdout = {
            let mut slot = self.slot();
            if self.cancelled.load(Ordering::SeqCst) {
                return Err(GeneratorError::Cancelled);
            }
            let mut child = Command::new(&self.program)
                .args(&self.args)
                .args(&extra)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .spawn()?;
            let stdout = match child.stdout.take() {
                Some(s) => s,
                None => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(GeneratorError::Failed("generator stdout not captured".into()));
                }
            };
            *slot = Some(child);
            stdout
        };

        let copied = io::copy(&mut stdout, &mut out).and_then(|n| out.flush().map(|_| n));
        drop(out);
        drop(stdout);

        if let Err(e) = copied {
            // reader ушёл (pump упал): останавливаем процесс
            warn!("exec generator: output copy failed: {e}; killing {}", self.program);
            if let Some(child) = self.slot().as_mut() {
                let _ = child.kill();
            }
            let _ = self.wait_child();
            return Err(GeneratorError::Io(e));
        }

        let status = self.wait_child()?;
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(GeneratorError::Cancelled);
        }
        match status.code() {
            Some(0) => Ok(()),
            Some(EXIT_UNSUPPORTED) => Err(GeneratorError::Unsupported(format!(
                "{} exited with code {}",
                self.program, EXIT_UNSUPPORTED
            ))),
            Some(code) => Err(GeneratorError::Failed(format!(
                "{} exited with code {}",
                self.program, code
            ))),
            None => Err(GeneratorError::Failed(format!(
                "{} terminated by signal",
                self.program
            ))),
        }
    }

    fn cancel(&self) -> Result<(), GeneratorError> {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(child) = self.slot().as_mut() {
            debug!("exec generator: killing pid {}", child.id());
            child.kill()?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "exec"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::SendFlags;

    #[test]
    fn request_args_cover_all_flags() {
        let req = SendRequest {
            target_root_id: 300,
            parent_root_id: Some(256),
            clone_sources: vec![256, 257],
            flags: SendFlags {
                omit_header: true,
                omit_trailer: false,
                no_file_data: true,
            },
        };
        assert_eq!(
            ExecGenerator::request_args(&req),
            vec![
                "--root", "300", "--parent", "256", "--clone-source", "256", "--clone-source",
                "257", "--omit-header", "--no-data"
            ]
        );
    }

    #[test]
    fn command_line_split() {
        let g = ExecGenerator::from_command_line("  engine-send  --fs /mnt/pool ").unwrap();
        assert_eq!(g.program(), "engine-send");
        assert_eq!(g.args, vec!["--fs", "/mnt/pool"]);
        assert!(ExecGenerator::from_command_line("   ").is_err());
    }
}
