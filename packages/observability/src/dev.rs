//! Dev-mode logging configuration.
//!
//! Writes structured JSONL logs to a central file that can be tailed
//! by external tools. Multi-process safe via append-only semantics.

use crate::json_layer::JsonLayer;
use crate::LogConfig;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Registry;
use tracing_subscriber::{EnvFilter, Layer};

/// Central log file location for all dev processes.
/// Uses `~/.coach/logs/dev.jsonl`, or the temp dir when no home exists.
fn default_log_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".coach")
        .join("logs")
        .join("dev.jsonl")
}

/// Append-only handle on the shared JSONL file.
///
/// Each formatted event is written with a single `write` on an `O_APPEND`
/// file, so lines from concurrent CLI processes never interleave.
#[derive(Clone)]
pub struct AppendLogFile {
    file: Arc<Mutex<File>>,
}

impl AppendLogFile {
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }
}

impl io::Write for AppendLogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.lock().flush()
    }
}

impl<'a> MakeWriter<'a> for AppendLogFile {
    type Writer = AppendLogFile;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Build an env filter from RUST_LOG or the configured default.
fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize the dev subscriber with central JSONL file output.
///
/// Falls back to stderr-only output when the log file cannot be opened.
pub fn init_dev_subscriber(config: &LogConfig) {
    let log_path = config.log_path.clone().unwrap_or_else(default_log_path);

    let json_layer = match AppendLogFile::open(&log_path) {
        Ok(file) => Some(JsonLayer::new(config.service_name.clone(), file, config.mode)),
        Err(e) => {
            eprintln!("failed to open log file {:?}: {}", log_path, e);
            None
        }
    };
    let file_enabled = json_layer.is_some();

    let stderr_layer = if config.also_stderr || !file_enabled {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_writer(io::stderr)
                .with_ansi(true),
        )
    } else {
        None
    };

    let installed = Registry::default()
        .with(json_layer.map(|l| l.with_filter(env_filter(&config.default_level))))
        .with(stderr_layer.map(|l| l.with_filter(env_filter(&config.default_level))))
        .try_init()
        .is_ok();

    if installed && file_enabled {
        tracing::debug!(
            log_path = %log_path.display(),
            "observability initialized"
        );
    }
}
