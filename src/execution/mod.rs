//! The batch load pipeline.
//!
//! One run moves through
//! `Connecting → StreamOpen → (Inferring) → SyncingSchema → Loading → Finishing → Closed`,
//! or ends in `Failed` from any of them. All stages run on the caller's thread: rows are pulled
//! one at a time from the extractor, transformed, and appended to a [`Batch`]. When the batch is
//! full (or the input ends) both the raw input and the extractor are paused, one bulk upsert is
//! issued per model in turn, the batch is cleared, a checkpoint is saved, and both are resumed.
//! Progress events follow the input byte count while rows are extracted.
//!
//! ## Example
//!
//! ```rust
//! use tables_load::config::LoadOptions;
//! use tables_load::execution::LoadPipeline;
//! use tables_load::storage::SqliteStorage;
//!
//! # fn main() -> Result<(), tables_load::LoadError> {
//! let options = LoadOptions {
//!     db: Some("sqlite://:memory:".to_string()),
//!     table_name: Some("people".to_string()),
//!     optimize_after_load: false,
//!     ..LoadOptions::default()
//! };
//! let mut pipeline = LoadPipeline::new(options, SqliteStorage::in_memory());
//! let summary = pipeline.run_reader("name,age\nAnn,41\nBo,7\n".as_bytes())?;
//!
//! assert_eq!(summary.metrics.rows_loaded, 2);
//! assert_eq!(summary.models[0].table_name, "people");
//! # Ok(())
//! # }
//! ```

mod batch;
mod gate;
pub mod observer;

pub use batch::Batch;
pub use gate::{Backpressure, GatedReader, GatedSource, StreamGate};
pub use observer::{
    CompositeObserver, FileObserver, LoadContext, LoadEvent, LoadMetrics, LoadMetricsSnapshot,
    LoadObserver, LoadSeverity, StdErrObserver, TracingObserver, severity_for_error,
};

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::LoadOptions;
use crate::error::{LoadError, LoadResult};
use crate::inference::infer_model;
use crate::ingestion::{FormatOptions, InputFormat, RowSource, SampleTap, open_source, reconcile};
use crate::processing::FieldRouter;
use crate::storage::{StorageAdapter, UpsertOptions};
use crate::types::{Model, Row};

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Connecting,
    StreamOpen,
    Inferring,
    SyncingSchema,
    Loading,
    Finishing,
    Closed,
    Failed,
}

impl LoadPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::StreamOpen => "opening stream",
            Self::Inferring => "inferring model",
            Self::SyncingSchema => "syncing schema",
            Self::Loading => "loading",
            Self::Finishing => "finishing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Per-row hook applied before routing. Returning `None` skips the row.
pub type RowTransformer = Box<dyn FnMut(Row) -> Option<Row>>;

/// Post-load hook, run with the open storage before optimization and close.
pub type FinishHook = Box<dyn FnOnce(&mut dyn StorageAdapter, &[Model]) -> LoadResult<()>>;

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct LoadSummary {
    /// Models the rows were loaded into (inferred or declared).
    pub models: Vec<Model>,
    pub metrics: LoadMetricsSnapshot,
    /// Byte offset the run resumed from, if it resumed.
    pub resumed_from: Option<u64>,
}

/// Where a run pulls its bytes from, after any resume seek.
struct OpenedInput<'a> {
    reader: Box<dyn Read + 'a>,
    start_offset: u64,
    total_bytes: Option<u64>,
    format_options: FormatOptions,
}

/// Drives one load run against a [`StorageAdapter`].
pub struct LoadPipeline<S: StorageAdapter> {
    options: LoadOptions,
    storage: S,
    observer: Option<Arc<dyn LoadObserver>>,
    alert_at_or_above: LoadSeverity,
    checkpoints: Option<Box<dyn CheckpointStore>>,
    transformer: Option<RowTransformer>,
    models: Option<Vec<Model>>,
    finish_hook: Option<FinishHook>,
    backpressure: Backpressure,
    metrics: Arc<LoadMetrics>,
    phase: LoadPhase,
    context: LoadContext,
}

impl<S: StorageAdapter> fmt::Debug for LoadPipeline<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadPipeline")
            .field("storage", &self.storage.describe())
            .field("phase", &self.phase)
            .field("observer_set", &self.observer.is_some())
            .field("alert_at_or_above", &self.alert_at_or_above)
            .field("checkpoints_set", &self.checkpoints.is_some())
            .field("transformer_set", &self.transformer.is_some())
            .field("declared_models", &self.models.as_ref().map(Vec::len))
            .finish()
    }
}

impl<S: StorageAdapter> LoadPipeline<S> {
    pub fn new(options: LoadOptions, storage: S) -> Self {
        let context = LoadContext {
            id: options.stream_id(),
            input: options.input.clone(),
            format: options.effective_format(),
            table: String::new(),
        };
        Self {
            options,
            storage,
            observer: None,
            alert_at_or_above: LoadSeverity::Critical,
            checkpoints: None,
            transformer: None,
            models: None,
            finish_hook: None,
            backpressure: Backpressure::new(),
            metrics: Arc::new(LoadMetrics::new()),
            phase: LoadPhase::Connecting,
            context,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn LoadObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Severity at or above which failures are also reported through `on_alert`.
    pub fn with_alert_threshold(mut self, severity: LoadSeverity) -> Self {
        self.alert_at_or_above = severity;
        self
    }

    pub fn with_checkpoints(mut self, store: Box<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn with_transformer(
        mut self,
        transformer: impl FnMut(Row) -> Option<Row> + 'static,
    ) -> Self {
        self.transformer = Some(Box::new(transformer));
        self
    }

    /// Load into these models instead of inferring one.
    pub fn with_models(mut self, models: Vec<Model>) -> Self {
        self.models = Some(models);
        self
    }

    pub fn with_finish_hook(
        mut self,
        hook: impl FnOnce(&mut dyn StorageAdapter, &[Model]) -> LoadResult<()> + 'static,
    ) -> Self {
        self.finish_hook = Some(Box::new(hook));
        self
    }

    /// Share pause gates with the caller (e.g. to observe them from a storage adapter).
    pub fn with_backpressure(mut self, backpressure: Backpressure) -> Self {
        self.backpressure = backpressure;
        self
    }

    pub fn metrics(&self) -> Arc<LoadMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn phase(&self) -> LoadPhase {
        self.phase
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    /// Load from `options.input`, or from standard input when no input path is set.
    pub fn run(&mut self) -> LoadResult<LoadSummary> {
        let result = self.run_inner(None);
        self.conclude(result)
    }

    /// Load from an already open reader (a pipe, a socket, an in-memory buffer).
    ///
    /// Readers cannot be resumed; checkpoints are neither read nor written.
    pub fn run_reader<'a>(&mut self, reader: impl Read + 'a) -> LoadResult<LoadSummary> {
        let result = self.run_inner(Some(Box::new(reader)));
        self.conclude(result)
    }

    fn run_inner<'a>(&mut self, reader: Option<Box<dyn Read + 'a>>) -> LoadResult<LoadSummary> {
        self.metrics.begin_run();
        self.options.validate()?;
        let format = self.context.format;

        self.enter(LoadPhase::Connecting);
        self.storage.connect()?;
        self.complete(LoadPhase::Connecting);

        self.enter(LoadPhase::StreamOpen);
        let opened = match reader {
            Some(reader) => OpenedInput {
                reader,
                start_offset: 0,
                total_bytes: None,
                format_options: self.options.format_options.clone(),
            },
            None => self.open_input(format)?,
        };
        let resumed_from = (opened.start_offset > 0).then_some(opened.start_offset);
        let bytes_read = Arc::new(AtomicU64::new(0));
        let gated = GatedReader::new(
            opened.reader,
            self.backpressure.input.clone(),
            Arc::clone(&bytes_read),
        );
        self.complete(LoadPhase::StreamOpen);

        let (models, stream): (Vec<Model>, Box<dyn Read + 'a>) = match self.models.clone() {
            Some(models) => (models, Box::new(gated)),
            None => {
                self.enter(LoadPhase::Inferring);
                let (model, stream) = self.infer(gated, format, &opened.format_options)?;
                self.complete(LoadPhase::Inferring);
                (vec![model], stream)
            }
        };
        if let Some(first) = models.first() {
            self.context.table = first.table_name.clone();
        }

        self.enter(LoadPhase::SyncingSchema);
        self.storage.sync_schema(&models, self.options.overwrite)?;
        self.complete(LoadPhase::SyncingSchema);

        self.enter(LoadPhase::Loading);
        let source = open_source(format, &opened.format_options, stream)?;
        let mut source = GatedSource::new(source, self.backpressure.extractor.clone());
        let router = FieldRouter::new(&models, self.options.classify_options());
        let mut batch = Batch::with_capacity(models.len(), self.options.batch_threshold);
        let mut progress = Progress {
            start_offset: opened.start_offset,
            total_bytes: opened.total_bytes,
            bytes_read: &bytes_read,
            last_reported: 0,
        };

        while let Some(row) = source.next_row()? {
            let n = self.metrics.on_row_read();
            if let Some(event) = progress.advance() {
                self.emit(&event);
            }
            let routed = self.transform(row).and_then(|row| router.route(&row));
            match routed {
                Some(routed) => batch.push(routed),
                None => {
                    self.metrics.on_row_skipped();
                    self.emit(&LoadEvent::RowSkipped { row: n });
                }
            }
            if batch.len() >= self.options.batch_threshold {
                self.flush(&mut batch, &models, &source, &mut progress)?;
            }
        }
        if !batch.is_empty() {
            self.flush(&mut batch, &models, &source, &mut progress)?;
        }
        self.complete(LoadPhase::Loading);

        self.enter(LoadPhase::Finishing);
        if let Some(hook) = self.finish_hook.take() {
            hook(&mut self.storage, &models).map_err(|e| match e {
                LoadError::Hook { .. } => e,
                other => LoadError::Hook {
                    message: other.to_string(),
                },
            })?;
        }
        if self.options.optimize_after_load {
            for model in &models {
                self.storage.optimize(model)?;
            }
        }
        self.storage.close()?;
        self.complete(LoadPhase::Finishing);

        self.metrics.end_run();
        let metrics = self.metrics.snapshot();
        self.phase = LoadPhase::Closed;
        self.emit(&LoadEvent::Finished {
            metrics: metrics.clone(),
        });

        Ok(LoadSummary {
            models,
            metrics,
            resumed_from,
        })
    }

    fn conclude(&mut self, result: LoadResult<LoadSummary>) -> LoadResult<LoadSummary> {
        if let Err(e) = &result {
            self.phase = LoadPhase::Failed;
            if let Err(close_err) = self.storage.close() {
                warn!(error = %close_err, "failed to close storage after error");
            }
            if let Some(obs) = self.observer.as_ref() {
                let sev = severity_for_error(e);
                obs.on_failure(&self.context, sev, e);
                if sev >= self.alert_at_or_above {
                    obs.on_alert(&self.context, sev, e);
                }
            }
        }
        result
    }

    fn open_input<'a>(&mut self, format: InputFormat) -> LoadResult<OpenedInput<'a>> {
        let Some(path) = self.options.input.clone() else {
            return Ok(OpenedInput {
                reader: Box::new(io::stdin().lock()),
                start_offset: 0,
                total_bytes: None,
                format_options: self.options.format_options.clone(),
            });
        };

        let mut file = File::open(&path)?;
        let total = file.metadata()?.len();
        let mut opened_at = 0;
        let mut format_options = self.options.format_options.clone();

        if let Some(checkpoint) = self.resume_point(format, total)? {
            file.seek(SeekFrom::Start(checkpoint.bytes_consumed))?;
            opened_at = checkpoint.bytes_consumed;
            format_options = checkpoint.format_options;
            self.emit(&LoadEvent::Resumed { offset: opened_at });
        }

        Ok(OpenedInput {
            reader: Box::new(file),
            start_offset: opened_at,
            total_bytes: Some(total),
            format_options,
        })
    }

    // A checkpoint is only honored for line-aligned formats, when resuming is enabled, the
    // tables are not being recreated, and the file still has the size it had when saved.
    fn resume_point(&self, format: InputFormat, total: u64) -> LoadResult<Option<Checkpoint>> {
        if !self.options.resume || self.options.overwrite || !format.is_resumable() {
            return Ok(None);
        }
        let Some(store) = self.checkpoints.as_ref() else {
            return Ok(None);
        };
        match store.load(&self.context.id)? {
            Some(cp) if cp.is_resumable() && cp.total_bytes == Some(total) => Ok(Some(cp)),
            Some(cp) if cp.is_resumable() => {
                warn!(
                    id = %self.context.id,
                    saved_total = ?cp.total_bytes,
                    total,
                    "input size changed since checkpoint; starting from the beginning"
                );
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    fn infer<'a>(
        &mut self,
        input: GatedReader<Box<dyn Read + 'a>>,
        format: InputFormat,
        format_options: &FormatOptions,
    ) -> LoadResult<(Model, Box<dyn Read + 'a>)> {
        let mut tap = SampleTap::new(input);
        let mut sample = Vec::with_capacity(self.options.guess_limit);
        {
            // Bounded by rows extracted, whether or not the transformer keeps them.
            let mut source = open_source(format, format_options, Box::new(&mut tap))?;
            for _ in 0..self.options.guess_limit {
                let Some(row) = source.next_row()? else { break };
                if let Some(row) = self.transform(row) {
                    sample.push(row);
                }
            }
        }

        let (chunks, live, exhausted) = tap.into_parts();
        debug!(
            sampled = sample.len(),
            buffered_chunks = chunks.len(),
            exhausted,
            "sampling finished"
        );
        let model = infer_model(&sample, &self.options.inference_options()?)?;
        self.emit(&LoadEvent::ModelInferred {
            table: model.table_name.clone(),
            fields: model.fields.len(),
            sample_rows: sample.len(),
        });
        Ok((model, Box::new(reconcile(chunks, live, exhausted))))
    }

    fn transform(&mut self, row: Row) -> Option<Row> {
        match self.transformer.as_mut() {
            Some(t) => t(row),
            None => Some(row),
        }
    }

    fn flush(
        &mut self,
        batch: &mut Batch,
        models: &[Model],
        source: &dyn RowSource,
        progress: &mut Progress<'_>,
    ) -> LoadResult<()> {
        let rows = batch.len();
        self.backpressure.pause();

        let upsert = UpsertOptions {
            use_transactions: self.options.use_transactions,
        };
        for (model, records) in models.iter().zip(batch.parts()) {
            if !records.is_empty() {
                self.storage.bulk_upsert(records, model, &upsert)?;
            }
        }
        batch.clear();

        let consumed = progress.start_offset + source.byte_offset();
        if let (Some(total), Some(store)) = (progress.total_bytes, self.checkpoints.as_mut()) {
            if self.context.format.is_resumable() {
                let checkpoint = Checkpoint {
                    bytes_consumed: consumed,
                    total_bytes: Some(total),
                    format_options: source.format_state(),
                };
                store.save(&self.context.id, &checkpoint)?;
            }
        }

        self.backpressure.resume();

        let flush = self.metrics.on_flush(rows);
        self.metrics.set_bytes_read(progress.read_so_far());
        self.emit(&LoadEvent::BatchFlushed { flush, rows });
        if let Some(total_bytes) = progress.total_bytes {
            progress.last_reported = progress.last_reported.max(consumed);
            self.emit(&LoadEvent::Progress {
                bytes_read: consumed.min(total_bytes),
                total_bytes,
            });
        }
        Ok(())
    }

    fn enter(&mut self, phase: LoadPhase) {
        self.phase = phase;
        if phase == LoadPhase::Loading {
            info!(
                id = %self.context.id,
                db = %self.storage.describe(),
                table = %self.context.table,
                "loading"
            );
        }
        self.emit(&LoadEvent::PhaseEntered { phase });
    }

    fn complete(&self, phase: LoadPhase) {
        self.emit(&LoadEvent::PhaseCompleted { phase });
    }

    fn emit(&self, event: &LoadEvent) {
        if let Some(obs) = self.observer.as_ref() {
            obs.on_event(&self.context, event);
        }
    }
}

/// Input position tracking for progress events, fed by the [`GatedReader`] byte counter.
struct Progress<'p> {
    start_offset: u64,
    total_bytes: Option<u64>,
    bytes_read: &'p AtomicU64,
    last_reported: u64,
}

impl Progress<'_> {
    /// Reports emitted while extracting are at least this fraction of the input apart.
    const STEP_DIVISOR: u64 = 100;

    fn read_so_far(&self) -> u64 {
        self.start_offset + self.bytes_read.load(Ordering::SeqCst)
    }

    /// A progress event when the input has advanced by at least one step since the last report.
    fn advance(&mut self) -> Option<LoadEvent> {
        let total_bytes = self.total_bytes?;
        let read = self.read_so_far().min(total_bytes);
        let step = (total_bytes / Self::STEP_DIVISOR).max(1);
        if read < self.last_reported + step {
            return None;
        }
        self.last_reported = read;
        Some(LoadEvent::Progress {
            bytes_read: read,
            total_bytes,
        })
    }
}
