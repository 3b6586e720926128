use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info, warn};

use crate::error::LoadError;
use crate::ingestion::InputFormat;

use super::LoadPhase;

/// Severity classification used for failure callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoadSeverity {
    /// Informational event.
    Info,
    /// Warning-level event (non-fatal).
    Warning,
    /// Error-level event (the run failed).
    Error,
    /// Critical error (I/O or an unreachable database).
    Critical,
}

/// Severity of a fatal load error.
pub fn severity_for_error(e: &LoadError) -> LoadSeverity {
    match e {
        LoadError::Io(_) | LoadError::Connection { .. } => LoadSeverity::Critical,
        LoadError::Csv(err) => match err.kind() {
            csv::ErrorKind::Io(_) => LoadSeverity::Critical,
            _ => LoadSeverity::Error,
        },
        LoadError::Json(err) if err.is_io() => LoadSeverity::Critical,
        _ => LoadSeverity::Error,
    }
}

/// Identifies the run an event belongs to.
#[derive(Debug, Clone)]
pub struct LoadContext {
    /// Checkpoint id of the input stream.
    pub id: String,
    /// Input path; `None` when reading a pipe.
    pub input: Option<PathBuf>,
    pub format: InputFormat,
    /// Target table of the inferred model (empty until known).
    pub table: String,
}

/// Lifecycle notifications. Fire-and-forget.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadEvent {
    PhaseEntered { phase: LoadPhase },
    PhaseCompleted { phase: LoadPhase },
    Resumed { offset: u64 },
    ModelInferred { table: String, fields: usize, sample_rows: usize },
    RowSkipped { row: u64 },
    BatchFlushed { flush: u64, rows: usize },
    /// Fraction of the input read so far; only emitted when the input size is known.
    Progress { bytes_read: u64, total_bytes: u64 },
    Finished { metrics: LoadMetricsSnapshot },
}

impl LoadEvent {
    /// Progress as a fraction in `[0, 1]`.
    pub fn fraction(&self) -> Option<f64> {
        match self {
            Self::Progress { bytes_read, total_bytes } if *total_bytes > 0 => {
                Some((*bytes_read as f64 / *total_bytes as f64).min(1.0))
            }
            _ => None,
        }
    }
}

/// Status sink for a load run.
///
/// Implementors can record metrics, logs, or trigger alerts.
pub trait LoadObserver: Send + Sync {
    /// Called for every lifecycle event.
    fn on_event(&self, _ctx: &LoadContext, _event: &LoadEvent) {}

    /// Called when the run fails.
    fn on_failure(&self, _ctx: &LoadContext, _severity: LoadSeverity, _error: &LoadError) {}

    /// Called when a failure meets the alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_failure`].
    fn on_alert(&self, ctx: &LoadContext, severity: LoadSeverity, error: &LoadError) {
        self.on_failure(ctx, severity, error)
    }
}

/// Fans callbacks out to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn LoadObserver>>,
}

impl CompositeObserver {
    pub fn new(observers: Vec<Arc<dyn LoadObserver>>) -> Self {
        Self { observers }
    }

    pub fn push(&mut self, observer: Arc<dyn LoadObserver>) {
        self.observers.push(observer);
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl LoadObserver for CompositeObserver {
    fn on_event(&self, ctx: &LoadContext, event: &LoadEvent) {
        for o in &self.observers {
            o.on_event(ctx, event);
        }
    }

    fn on_failure(&self, ctx: &LoadContext, severity: LoadSeverity, error: &LoadError) {
        for o in &self.observers {
            o.on_failure(ctx, severity, error);
        }
    }

    fn on_alert(&self, ctx: &LoadContext, severity: LoadSeverity, error: &LoadError) {
        for o in &self.observers {
            o.on_alert(ctx, severity, error);
        }
    }
}

/// Prints one line per phase change, flush, and failure to stderr.
#[derive(Debug, Default)]
pub struct StdErrObserver;

impl LoadObserver for StdErrObserver {
    fn on_event(&self, ctx: &LoadContext, event: &LoadEvent) {
        match event {
            LoadEvent::PhaseEntered { phase } => eprintln!("[tables][{}] {phase}...", ctx.id),
            LoadEvent::PhaseCompleted { phase } => eprintln!("[tables][{}] {phase} done", ctx.id),
            LoadEvent::BatchFlushed { flush, rows } => {
                eprintln!("[tables][{}] flush #{flush}: {rows} rows", ctx.id)
            }
            LoadEvent::Finished { metrics } => eprintln!("[tables][{}][ok] {metrics}", ctx.id),
            LoadEvent::Progress { .. } | LoadEvent::RowSkipped { .. } => {}
            other => eprintln!("[tables][{}] {other:?}", ctx.id),
        }
    }

    fn on_failure(&self, ctx: &LoadContext, severity: LoadSeverity, error: &LoadError) {
        eprintln!(
            "[tables][{:?}] id={} format={} table={} err={}",
            severity, ctx.id, ctx.format, ctx.table, error
        );
    }

    fn on_alert(&self, ctx: &LoadContext, severity: LoadSeverity, error: &LoadError) {
        eprintln!(
            "[ALERT][tables][{:?}] id={} format={} table={} err={}",
            severity, ctx.id, ctx.format, ctx.table, error
        );
    }
}

/// Forwards events to `tracing`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl LoadObserver for TracingObserver {
    fn on_event(&self, ctx: &LoadContext, event: &LoadEvent) {
        match event {
            LoadEvent::PhaseEntered { phase } => info!(id = %ctx.id, %phase, "phase entered"),
            LoadEvent::PhaseCompleted { phase } => debug!(id = %ctx.id, %phase, "phase completed"),
            LoadEvent::Resumed { offset } => {
                info!(id = %ctx.id, offset, "resuming from checkpoint")
            }
            LoadEvent::ModelInferred {
                table,
                fields,
                sample_rows,
            } => info!(id = %ctx.id, table = %table, fields, sample_rows, "model inferred"),
            LoadEvent::RowSkipped { row } => debug!(id = %ctx.id, row, "row skipped"),
            LoadEvent::BatchFlushed { flush, rows } => {
                debug!(id = %ctx.id, flush, rows, "batch flushed")
            }
            LoadEvent::Progress { .. } => {
                debug!(id = %ctx.id, fraction = event.fraction().unwrap_or_default(), "progress")
            }
            LoadEvent::Finished { metrics } => info!(id = %ctx.id, %metrics, "load finished"),
        }
    }

    fn on_failure(&self, ctx: &LoadContext, severity: LoadSeverity, error: &LoadError) {
        error!(id = %ctx.id, table = %ctx.table, ?severity, error = %error, "load failed");
    }

    fn on_alert(&self, ctx: &LoadContext, severity: LoadSeverity, error: &LoadError) {
        warn!(id = %ctx.id, table = %ctx.table, ?severity, error = %error, "load failure alert");
    }
}

/// Appends phase changes, flushes, and failures to a local log file.
#[derive(Debug)]
pub struct FileObserver {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileObserver {
    /// Create a file observer that appends events to `path`.
    ///
    /// Writes are best-effort; failures to open/write the log file are ignored.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn append_line(&self, line: &str) {
        let _guard = self.lock.lock().ok();
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(f, "{line}");
        }
    }
}

impl LoadObserver for FileObserver {
    fn on_event(&self, ctx: &LoadContext, event: &LoadEvent) {
        let detail = match event {
            LoadEvent::PhaseEntered { phase } => format!("enter phase={phase}"),
            LoadEvent::PhaseCompleted { phase } => format!("complete phase={phase}"),
            LoadEvent::BatchFlushed { flush, rows } => format!("flush n={flush} rows={rows}"),
            LoadEvent::Finished { metrics } => format!("ok {metrics}"),
            _ => return,
        };
        self.append_line(&format!("{} {detail} id={} table={}", unix_ts(), ctx.id, ctx.table));
    }

    fn on_failure(&self, ctx: &LoadContext, severity: LoadSeverity, error: &LoadError) {
        self.append_line(&format!(
            "{} fail severity={:?} id={} format={} table={} err={}",
            unix_ts(),
            severity,
            ctx.id,
            ctx.format,
            ctx.table,
            error
        ));
    }

    fn on_alert(&self, ctx: &LoadContext, severity: LoadSeverity, error: &LoadError) {
        self.append_line(&format!(
            "{} ALERT severity={:?} id={} format={} table={} err={}",
            unix_ts(),
            severity,
            ctx.id,
            ctx.format,
            ctx.table,
            error
        ));
    }
}

fn unix_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Real-time counters for a load run.
///
/// The pipeline updates these during the run; callers can snapshot them at any time.
#[derive(Debug)]
pub struct LoadMetrics {
    started_at: Mutex<Option<Instant>>,
    elapsed_ns: AtomicU64,

    rows_read: AtomicU64,
    rows_skipped: AtomicU64,
    rows_loaded: AtomicU64,
    flushes: AtomicU64,
    bytes_read: AtomicU64,
}

impl LoadMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Mutex::new(None),
            elapsed_ns: AtomicU64::new(0),
            rows_read: AtomicU64::new(0),
            rows_skipped: AtomicU64::new(0),
            rows_loaded: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
        }
    }

    pub fn begin_run(&self) {
        if let Ok(mut started) = self.started_at.lock() {
            *started = Some(Instant::now());
        }
        self.elapsed_ns.store(0, Ordering::SeqCst);
        self.rows_read.store(0, Ordering::SeqCst);
        self.rows_skipped.store(0, Ordering::SeqCst);
        self.rows_loaded.store(0, Ordering::SeqCst);
        self.flushes.store(0, Ordering::SeqCst);
        self.bytes_read.store(0, Ordering::SeqCst);
    }

    pub fn end_run(&self) {
        let elapsed = self
            .started_at
            .lock()
            .ok()
            .and_then(|s| s.map(|t| t.elapsed()))
            .unwrap_or_default();
        self.elapsed_ns
            .store(elapsed.as_nanos().min(u64::MAX as u128) as u64, Ordering::SeqCst);
    }

    /// Returns the 1-based number of the row just read.
    pub fn on_row_read(&self) -> u64 {
        self.rows_read.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn on_row_skipped(&self) {
        let _ = self.rows_skipped.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the 1-based number of the flush just completed.
    pub fn on_flush(&self, rows: usize) -> u64 {
        let _ = self.rows_loaded.fetch_add(rows as u64, Ordering::SeqCst);
        self.flushes.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn set_bytes_read(&self, bytes: u64) {
        self.bytes_read.store(bytes, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> LoadMetricsSnapshot {
        let elapsed_ns = self.elapsed_ns.load(Ordering::SeqCst);
        LoadMetricsSnapshot {
            elapsed: (elapsed_ns > 0).then(|| Duration::from_nanos(elapsed_ns)),
            rows_read: self.rows_read.load(Ordering::SeqCst),
            rows_skipped: self.rows_skipped.load(Ordering::SeqCst),
            rows_loaded: self.rows_loaded.load(Ordering::SeqCst),
            flushes: self.flushes.load(Ordering::SeqCst),
            bytes_read: self.bytes_read.load(Ordering::SeqCst),
        }
    }
}

impl Default for LoadMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable snapshot of [`LoadMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadMetricsSnapshot {
    pub elapsed: Option<Duration>,
    pub rows_read: u64,
    pub rows_skipped: u64,
    pub rows_loaded: u64,
    pub flushes: u64,
    pub bytes_read: u64,
}

impl fmt::Display for LoadMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rows_read={}, rows_loaded={}, rows_skipped={}, flushes={}, bytes_read={}, \
             elapsed={:?}",
            self.rows_read,
            self.rows_loaded,
            self.rows_skipped,
            self.flushes,
            self.bytes_read,
            self.elapsed
        )
    }
}
