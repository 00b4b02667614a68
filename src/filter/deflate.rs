//! DEFLATE / INFLATE codec adapters, raw (no zlib/gzip framing, i.e. the
//! Rust equivalent of zlib's negative `windowBits`).

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::FilterError;
use crate::filter::{Processor, StageBuffer, StepOutcome};

const DEFAULT_WINDOW_BITS: u8 = 15;

pub struct DeflateProcessor {
    inner: Compress,
}

impl DeflateProcessor {
    pub fn new(level: u32) -> Self {
        Self {
            inner: Compress::new_with_window_bits(
                Compression::new(level),
                false,
                DEFAULT_WINDOW_BITS,
            ),
        }
    }
}

impl Processor for DeflateProcessor {
    fn step(
        &mut self,
        input: &mut StageBuffer,
        output: &mut StageBuffer,
        ending: bool,
    ) -> Result<StepOutcome, FilterError> {
        let before_in = self.inner.total_in();
        let before_out = self.inner.total_out();
        let flush = if ending && input.used() == 0 {
            FlushCompress::Finish
        } else {
            FlushCompress::None
        };
        let status = self
            .inner
            .compress(input.head(), output.tail_mut(), flush)
            .map_err(|e| FilterError::Codec {
                codec: "deflate",
                message: e.to_string(),
            })?;
        let consumed = (self.inner.total_in() - before_in) as usize;
        let produced = (self.inner.total_out() - before_out) as usize;
        input.consume(consumed);
        output.advance(produced);
        match status {
            Status::Ok => Ok(StepOutcome::Progress),
            Status::BufError => {
                if output.capacity() < self.max_output_capacity() {
                    output.grow();
                }
                Ok(StepOutcome::Progress)
            }
            Status::StreamEnd => Ok(StepOutcome::Terminal),
        }
    }
}

pub struct InflateProcessor {
    inner: Decompress,
}

impl InflateProcessor {
    pub fn new() -> Self {
        Self {
            inner: Decompress::new_with_window_bits(false, DEFAULT_WINDOW_BITS),
        }
    }
}

impl Default for InflateProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for InflateProcessor {
    fn step(
        &mut self,
        input: &mut StageBuffer,
        output: &mut StageBuffer,
        ending: bool,
    ) -> Result<StepOutcome, FilterError> {
        let before_in = self.inner.total_in();
        let before_out = self.inner.total_out();
        let flush = if ending && input.used() == 0 {
            FlushDecompress::Finish
        } else {
            FlushDecompress::None
        };
        let status = self
            .inner
            .decompress(input.head(), output.tail_mut(), flush)
            .map_err(|e| FilterError::Codec {
                codec: "inflate",
                message: e.to_string(),
            })?;
        let consumed = (self.inner.total_in() - before_in) as usize;
        let produced = (self.inner.total_out() - before_out) as usize;
        input.consume(consumed);
        output.advance(produced);
        match status {
            Status::Ok => Ok(StepOutcome::Progress),
            Status::BufError => {
                if output.capacity() < self.max_output_capacity() {
                    output.grow();
                }
                Ok(StepOutcome::Progress)
            }
            Status::StreamEnd => Ok(StepOutcome::Terminal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::BufferedFilterStage;
    use crate::io::{MemorySource, Source, END_OF_STREAM};

    fn drain(mut source: impl Source) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 37];
        loop {
            let n = source.read(&mut buf).unwrap();
            if n == END_OF_STREAM {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn deflate_then_inflate_roundtrips() {
        let plain: Vec<u8> = (0..10_000).map(|i| (i % 251) as u8).collect();
        let src = MemorySource::new(&plain);
        let stage = BufferedFilterStage::new(Box::new(src), DeflateProcessor::new(6), 256);
        let compressed = drain(stage);
        assert!(compressed.len() < plain.len());

        let src2 = MemorySource::new(&compressed);
        let stage2 = BufferedFilterStage::new(Box::new(src2), InflateProcessor::new(), 256);
        let roundtripped = drain(stage2);
        assert_eq!(roundtripped, plain);
    }
}
