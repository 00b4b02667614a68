//! The passthrough pipe: pumps bytes `source -> sink` in buffer-sized
//! iterations until both sides have observed end-of-stream.

use std::io;

use super::{Sink, Source, END_OF_STREAM};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    EndOfInput,
    NotifiedSink,
    Closed,
}

/// Pumps `source` into `sink` using a fixed-size intermediate buffer.
pub struct PassthroughPipe<'a> {
    source: &'a mut dyn Source,
    sink: &'a mut dyn Sink,
    buf: Vec<u8>,
    used: usize,
    state: State,
}

impl<'a> PassthroughPipe<'a> {
    pub fn new(source: &'a mut dyn Source, sink: &'a mut dyn Sink, buffer_size: usize) -> Self {
        Self {
            source,
            sink,
            buf: vec![0u8; buffer_size.max(1)],
            used: 0,
            state: State::Open,
        }
    }

    /// Drives the pipe to completion.
    pub fn process(&mut self) -> io::Result<()> {
        loop {
            match self.state {
                State::Open => {
                    if self.used < self.buf.len() {
                        let n = self.source.read(&mut self.buf[self.used..])?;
                        if n == END_OF_STREAM {
                            self.state = State::EndOfInput;
                        } else {
                            self.used += n;
                        }
                    }
                    self.drain_to_sink()?;
                }
                State::EndOfInput => {
                    self.drain_to_sink()?;
                    if self.used == 0 {
                        self.sink.end()?;
                        self.state = State::NotifiedSink;
                    }
                }
                State::NotifiedSink => {
                    self.state = State::Closed;
                }
                State::Closed => return Ok(()),
            }
        }
    }

    fn drain_to_sink(&mut self) -> io::Result<()> {
        let mut off = 0;
        while off < self.used {
            let n = self.sink.write(&self.buf[off..self.used])?;
            if n == 0 {
                break;
            }
            off += n;
        }
        if off > 0 {
            self.buf.copy_within(off..self.used, 0);
            self.used -= off;
        }
        Ok(())
    }
}
