use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::{LoadError, LoadResult};
use crate::ingestion::{FormatOptions, RowSource};
use crate::types::Row;

/// A pause switch shared between the pipeline and one stage.
///
/// Used to implement backpressure while a batch is being written. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct StreamGate {
    paused: Arc<AtomicBool>,
}

impl StreamGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

/// The two gates closed around every flush: the raw input and the row extractor.
#[derive(Debug, Clone, Default)]
pub struct Backpressure {
    pub input: StreamGate,
    pub extractor: StreamGate,
}

impl Backpressure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.input.pause();
        self.extractor.pause();
    }

    pub fn resume(&self) {
        self.extractor.resume();
        self.input.resume();
    }

    /// Whether both stages are paused.
    pub fn is_paused(&self) -> bool {
        self.input.is_paused() && self.extractor.is_paused()
    }
}

/// Counts bytes pulled from the input and refuses reads while paused.
pub struct GatedReader<R> {
    inner: R,
    gate: StreamGate,
    bytes_read: Arc<AtomicU64>,
}

impl<R: Read> GatedReader<R> {
    pub fn new(inner: R, gate: StreamGate, bytes_read: Arc<AtomicU64>) -> Self {
        Self {
            inner,
            gate,
            bytes_read,
        }
    }
}

impl<R: Read> Read for GatedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.gate.is_paused() {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "input stream is paused for a batch flush",
            ));
        }
        let n = self.inner.read(buf)?;
        self.bytes_read.fetch_add(n as u64, Ordering::SeqCst);
        Ok(n)
    }
}

/// Wraps a [`RowSource`] so that pulling a row while paused is an error.
pub struct GatedSource<S> {
    inner: S,
    gate: StreamGate,
}

impl<S: RowSource> GatedSource<S> {
    pub fn new(inner: S, gate: StreamGate) -> Self {
        Self { inner, gate }
    }
}

impl<S: RowSource> RowSource for GatedSource<S> {
    fn next_row(&mut self) -> LoadResult<Option<Row>> {
        if self.gate.is_paused() {
            return Err(LoadError::stream("row extractor pulled while paused"));
        }
        self.inner.next_row()
    }

    fn byte_offset(&self) -> u64 {
        self.inner.byte_offset()
    }

    fn format_state(&self) -> FormatOptions {
        self.inner.format_state()
    }
}
