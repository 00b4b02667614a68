//! The buffered filter stage contract (§4.3/§4.9) and the unbuffered
//! observer shape used by counters and digesters.

pub mod chain;
pub mod deflate;
pub mod diff;
pub mod lzma;
pub mod observer;
pub mod skip;
pub mod xor;

use std::io;

use crate::error::FilterError;
use crate::io::{Source, END_OF_STREAM};

/// Outcome of one [`Processor::step`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The processor may still have more to do (more input to consume, or
    /// internal state to flush) even with no input left.
    Progress,
    /// The processor has emitted its last byte; once `out` is drained the
    /// stage itself reports end-of-stream.
    Terminal,
}

/// A growable ring-like scratch buffer used by [`Processor`] implementations
/// as `in`/`out`. Bytes are consumed from the front and produced at the
/// back; unread bytes are compacted to the front on demand.
pub struct StageBuffer {
    data: Vec<u8>,
    start: usize,
    end: usize,
}

impl StageBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity.max(1)],
            start: 0,
            end: 0,
        }
    }

    pub fn used(&self) -> usize {
        self.end - self.start
    }

    pub fn available(&self) -> usize {
        self.data.len() - self.end
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn head(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    pub fn tail_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.end..]
    }

    pub fn consume(&mut self, n: usize) {
        self.start += n;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    pub fn advance(&mut self, n: usize) {
        self.end += n;
    }

    /// Moves unread bytes to the front, maximizing trailing free space.
    pub fn compact(&mut self) {
        if self.start > 0 {
            self.data.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
    }

    /// Doubles capacity, compacting first. Stages call this when a codec
    /// reports a "need more output room" condition (`BUF_ERROR`).
    pub fn grow(&mut self) {
        self.compact();
        let new_len = (self.data.len() * 2).max(64);
        self.data.resize(new_len, 0);
    }

    /// Pulls up to the available tail capacity from `source`. Returns
    /// `true` if the source reported end-of-stream.
    pub fn fill_from(&mut self, source: &mut dyn Source) -> io::Result<bool> {
        if self.available() == 0 {
            self.compact();
        }
        if self.available() == 0 {
            return Ok(false);
        }
        let n = source.read(self.tail_mut())?;
        if n == END_OF_STREAM {
            return Ok(true);
        }
        self.advance(n);
        Ok(false)
    }

    /// Copies up to `dst.len()` bytes out of the front, consuming them.
    pub fn drain_to(&mut self, dst: &mut [u8]) -> usize {
        let n = self.used().min(dst.len());
        dst[..n].copy_from_slice(&self.data[self.start..self.start + n]);
        self.consume(n);
        n
    }
}

/// One reversible transformation step, driven by a [`StageBuffer`]-backed
/// [`BufferedFilterStage`]. Implementations wrap an external codec (DEFLATE,
/// LZMA) or a pure-Rust transform (XOR, skip).
pub trait Processor {
    /// Moves bytes from `input` to `output`. `ending` is set once the parent
    /// source has reported end-of-stream and will never produce more input.
    /// Implementations must tolerate being called with an empty `input`
    /// (flush-only) and a full `output` (the caller will drain and retry).
    fn step(
        &mut self,
        input: &mut StageBuffer,
        output: &mut StageBuffer,
        ending: bool,
    ) -> Result<StepOutcome, FilterError>;

    /// Upper bound on how large `output` may grow in response to repeated
    /// `BUF_ERROR`-style retries, to bound pathological codecs.
    fn max_output_capacity(&self) -> usize {
        64 * 1024 * 1024
    }
}

/// The generic buffered filter stage: owns `in`/`out` [`StageBuffer`]s and a
/// parent [`Source`], and drives `Processor::step` per the §4.9 state
/// machine.
pub struct BufferedFilterStage<'a, P: Processor> {
    parent: Box<dyn Source + 'a>,
    processor: P,
    input: StageBuffer,
    output: StageBuffer,
    parent_ended: bool,
    processor_terminal: bool,
    finished: bool,
}

impl<'a, P: Processor> BufferedFilterStage<'a, P> {
    pub fn new(parent: Box<dyn Source + 'a>, processor: P, buffer_size: usize) -> Self {
        Self {
            parent,
            processor,
            input: StageBuffer::new(buffer_size),
            output: StageBuffer::new(buffer_size),
            parent_ended: false,
            processor_terminal: false,
            finished: false,
        }
    }
}

impl<P: Processor> Source for BufferedFilterStage<'_, P> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.output.used() > 0 {
                return Ok(self.output.drain_to(dst));
            }
            if self.finished {
                return Ok(END_OF_STREAM);
            }
            if !self.parent_ended && !self.processor_terminal && self.input.available() > 0 {
                self.parent_ended = self.input.fill_from(&mut *self.parent)?;
            }
            match self
                .processor
                .step(&mut self.input, &mut self.output, self.parent_ended)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
            {
                StepOutcome::Progress => {}
                StepOutcome::Terminal => self.processor_terminal = true,
            }
            if self.output.used() == 0 && self.processor_terminal {
                self.finished = true;
                return Ok(END_OF_STREAM);
            }
        }
    }
}
