//! Centralized configuration for snapsend.
//!
//! Goals:
//! - Single place to collect tunables instead of scattering env lookups.
//! - ExportConfig::from_env() reads SNAPSEND_* variables; builder-style setters override.
//!
//! Defaults:
//! - chunk_bytes = 4096 (pump read size / pipe chunk)
//! - channel_depth = 16 (pipe capacity in chunks)
//! - allow_tty = false (refuse to dump a binary stream into a terminal)

use std::fmt;
use std::path::PathBuf;

use crate::error::ExportError;
use crate::pump::DEFAULT_CHUNK_BYTES;

pub const DEFAULT_CHANNEL_DEPTH: usize = 16;

fn env_bool(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|v| {
        let s = v.trim().to_ascii_lowercase();
        s == "1" || s == "true" || s == "yes" || s == "on"
    })
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[derive(Clone, Debug)]
pub struct ExportConfig {
    /// Pump read size and pipe chunk size in bytes.
    /// Env: SNAPSEND_CHUNK_BYTES (default 4096)
    pub chunk_bytes: usize,

    /// Bounded pipe capacity, in chunks.
    /// Env: SNAPSEND_CHANNEL_DEPTH (default 16)
    pub channel_depth: usize,

    /// Allow writing the stream to a terminal.
    /// Env: SNAPSEND_ALLOW_TTY = 0|1 (default 0)
    pub allow_tty: bool,

    /// Default registry file for the CLI.
    /// Env: SNAPSEND_REGISTRY
    pub registry_path: Option<PathBuf>,

    /// External generator command line; None → built-in manifest generator.
    /// Env: SNAPSEND_GENERATOR_CMD
    pub generator_cmd: Option<String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            channel_depth: DEFAULT_CHANNEL_DEPTH,
            allow_tty: false,
            registry_path: None,
            generator_cmd: None,
        }
    }
}

impl ExportConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(n) = env_usize("SNAPSEND_CHUNK_BYTES") {
            cfg.chunk_bytes = n;
        }
        if let Some(n) = env_usize("SNAPSEND_CHANNEL_DEPTH") {
            cfg.channel_depth = n;
        }
        if let Some(on) = env_bool("SNAPSEND_ALLOW_TTY") {
            cfg.allow_tty = on;
        }
        if let Some(p) = env_string("SNAPSEND_REGISTRY") {
            cfg.registry_path = Some(PathBuf::from(p));
        }
        if let Some(c) = env_string("SNAPSEND_GENERATOR_CMD") {
            cfg.generator_cmd = Some(c);
        }

        cfg
    }

    pub fn with_chunk_bytes(mut self, n: usize) -> Self {
        self.chunk_bytes = n;
        self
    }

    pub fn with_channel_depth(mut self, n: usize) -> Self {
        self.channel_depth = n;
        self
    }

    pub fn with_allow_tty(mut self, on: bool) -> Self {
        self.allow_tty = on;
        self
    }

    pub fn with_registry_path<P: Into<PathBuf>>(mut self, p: Option<P>) -> Self {
        self.registry_path = p.map(Into::into);
        self
    }

    pub fn with_generator_cmd<S: Into<String>>(mut self, cmd: Option<S>) -> Self {
        self.generator_cmd = cmd.map(Into::into);
        self
    }

    pub fn build(self) -> Self {
        self
    }

    pub fn validate(&self) -> Result<(), ExportError> {
        if self.chunk_bytes == 0 {
            return Err(ExportError::InvalidArgument(
                "chunk_bytes must be > 0".to_string(),
            ));
        }
        if self.channel_depth == 0 {
            return Err(ExportError::InvalidArgument(
                "channel_depth must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for ExportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ExportConfig {{ \
             chunk_bytes: {}, \
             channel_depth: {}, \
             allow_tty: {}, \
             registry_path: {}, \
             generator_cmd: {} \
             }}",
            self.chunk_bytes,
            self.channel_depth,
            self.allow_tty,
            self.registry_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "none".to_string()),
            self.generator_cmd.as_deref().unwrap_or("builtin(manifest)"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = ExportConfig::default();
        assert_eq!(cfg.chunk_bytes, 4096);
        assert_eq!(cfg.channel_depth, 16);
        assert!(cfg.validate().is_ok());
        assert!(cfg.to_string().contains("builtin(manifest)"));
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let cfg = ExportConfig::default().with_chunk_bytes(0).build();
        assert!(matches!(cfg.validate(), Err(ExportError::InvalidArgument(_))));
        let cfg = ExportConfig::default().with_channel_depth(0).build();
        assert!(cfg.validate().is_err());
    }
}
