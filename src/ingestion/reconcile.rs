//! Replaying the sampled prefix of a stream.
//!
//! Inference reads rows from the head of the input, but the loader needs every row. The raw
//! bytes pulled through a [`SampleTap`] while sampling are kept, and [`reconcile`] stitches them
//! back in front of whatever the live stream still holds.

use std::io::{self, Chain, Cursor, Read};

/// Records every byte read through it.
#[derive(Debug)]
pub struct SampleTap<R> {
    inner: R,
    chunks: Vec<Vec<u8>>,
    exhausted: bool,
}

impl<R: Read> SampleTap<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            chunks: Vec::new(),
            exhausted: false,
        }
    }

    /// Total bytes recorded so far.
    pub fn buffered_len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    /// Whether the wrapped stream has reported end-of-input.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Detach the live stream from the tap: `(recorded chunks, live stream, exhausted)`.
    pub fn into_parts(self) -> (Vec<Vec<u8>>, R, bool) {
        (self.chunks, self.inner, self.exhausted)
    }
}

impl<R: Read> Read for SampleTap<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 {
            if !buf.is_empty() {
                self.exhausted = true;
            }
        } else {
            self.chunks.push(buf[..n].to_vec());
        }
        Ok(n)
    }
}

/// A logically complete input stream.
#[derive(Debug)]
pub enum ReconciledStream<R> {
    /// The input ended during sampling; only the recorded bytes remain.
    Replay(Cursor<Vec<u8>>),
    /// Recorded bytes followed by the rest of the live stream.
    Chained(Chain<Cursor<Vec<u8>>, R>),
    /// Nothing was recorded; the live stream is used as is.
    Live(R),
}

impl<R: Read> Read for ReconciledStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Replay(r) => r.read(buf),
            Self::Chained(r) => r.read(buf),
            Self::Live(r) => r.read(buf),
        }
    }
}

/// Rebuild the full stream from the chunks recorded during sampling and the live remainder.
///
/// Chunks replay in arrival order, strictly before any live byte. When `exhausted` is set the
/// live handle is dropped without further reads.
pub fn reconcile<R: Read>(chunks: Vec<Vec<u8>>, live: R, exhausted: bool) -> ReconciledStream<R> {
    let total: usize = chunks.iter().map(Vec::len).sum();
    if total == 0 && !exhausted {
        return ReconciledStream::Live(live);
    }

    let mut buffered = Vec::with_capacity(total);
    for chunk in chunks {
        buffered.extend_from_slice(&chunk);
    }
    let replay = Cursor::new(buffered);

    if exhausted {
        ReconciledStream::Replay(replay)
    } else {
        ReconciledStream::Chained(replay.chain(live))
    }
}
