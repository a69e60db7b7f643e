use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use tracing::warn;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};
use tune_runner::Scheme;

const DEFAULT_LEVEL: &str = "info";

/// Maps level names used in scheme files onto filter directives.
pub fn normalize_level(level: &str) -> String {
    match level.trim().to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        "notset" => "trace".to_string(),
        other => other.to_string(),
    }
}

/// Where formatted events go: stderr until a log file is attached.
#[derive(Clone, Default)]
pub struct LogTarget {
    file: Arc<Mutex<Option<File>>>,
}

impl LogTarget {
    pub fn attach(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        *self.lock()? = Some(file);
        Ok(())
    }

    pub fn detach(&self) {
        if let Ok(mut guard) = self.lock() {
            *guard = None;
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<File>>> {
        self.file.lock().map_err(|_| anyhow!("log target lock poisoned"))
    }
}

pub enum TargetWriter {
    Stderr(io::Stderr),
    File(File),
}

impl Write for TargetWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            TargetWriter::Stderr(w) => w.write(buf),
            TargetWriter::File(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            TargetWriter::Stderr(w) => w.flush(),
            TargetWriter::File(w) => w.flush(),
        }
    }
}

impl<'a> MakeWriter<'a> for LogTarget {
    type Writer = TargetWriter;

    fn make_writer(&'a self) -> Self::Writer {
        let file = self
            .file
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().and_then(|f| f.try_clone().ok()));
        match file {
            Some(file) => TargetWriter::File(file),
            None => TargetWriter::Stderr(io::stderr()),
        }
    }
}

/// Handle to the installed subscriber. Cloned into the batch plan hook
/// so each scheme can re-point level and output.
#[derive(Clone)]
pub struct Logging {
    filter: reload::Handle<EnvFilter, Registry>,
    target: LogTarget,
    /// `--log-level` wins over any scheme's own level.
    pinned: Option<String>,
    base_level: String,
    base_file: Option<String>,
}

/// Runs `f` under a temporary stderr subscriber, for work that happens
/// before the runner config (and with it the real logger) is known.
pub fn during_startup<T>(flag: Option<&str>, f: impl FnOnce() -> T) -> T {
    scoped(flag, io::stderr, f)
}

fn scoped<W, T>(flag: Option<&str>, writer: W, f: impl FnOnce() -> T) -> T
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let level = flag
        .map(normalize_level)
        .or_else(|| std::env::var("RUST_LOG").ok().filter(|v| !v.trim().is_empty()))
        .unwrap_or_else(|| DEFAULT_LEVEL.to_string());
    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL));
    let subscriber = tracing_subscriber::registry().with(filter).with(
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(false),
    );
    tracing::subscriber::with_default(subscriber, f)
}

/// Level order: flag, `RUST_LOG`, runner config, `info`.
pub fn init(flag: Option<&str>, config_level: Option<String>, config_file: Option<String>) -> Result<Logging> {
    let pinned = flag.map(normalize_level);
    let base_level = pinned
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok().filter(|v| !v.trim().is_empty()))
        .or_else(|| config_level.as_deref().map(normalize_level))
        .unwrap_or_else(|| DEFAULT_LEVEL.to_string());
    let filter = EnvFilter::try_new(&base_level).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL));
    let (filter_layer, handle) = reload::Layer::new(filter);

    let target = LogTarget::default();
    if let Some(path) = &config_file {
        target.attach(Path::new(path))?;
    }
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(target.clone())
                .with_ansi(false)
                .with_target(false),
        )
        .try_init()
        .map_err(|e| anyhow!("failed to install logger: {}", e))?;

    Ok(Logging {
        filter: handle,
        target,
        pinned,
        base_level,
        base_file: config_file,
    })
}

impl Logging {
    /// Applies a scheme's `log_level`/`log_file`; falls back to the
    /// process defaults for schemes that set neither.
    pub fn apply_scheme(&self, scheme: &Scheme) {
        let level = self
            .pinned
            .clone()
            .or_else(|| scheme.log_level.as_deref().map(normalize_level))
            .unwrap_or_else(|| self.base_level.clone());
        match EnvFilter::try_new(&level) {
            Ok(filter) => {
                if let Err(e) = self.filter.reload(filter) {
                    warn!(error = %e, "cannot switch log level");
                }
            }
            Err(e) => warn!(project = %scheme.project, level = %level, error = %e, "invalid log level"),
        }

        let file = scheme
            .log_file
            .clone()
            .or_else(|| self.base_file.as_ref().map(Into::into));
        match file {
            Some(path) => {
                if let Err(e) = self.target.attach(&path) {
                    warn!(path = %path.display(), error = %e, "cannot open log file, logging to stderr");
                    self.target.detach();
                }
            }
            None => self.target.detach(),
        }
    }
}
