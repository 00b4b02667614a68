//! LZMA (xz-framed) encoder/decoder adapters. The encoder runs
//! multi-threaded when more than one hardware thread is available; the
//! archive itself provides checksums, so the stream check is `None`.

use xz2::stream::{Action, Check, MtStreamBuilder, Status, Stream};

use crate::error::FilterError;
use crate::filter::{Processor, StageBuffer, StepOutcome};

const DEFAULT_PRESET: u32 = 6;
const DECODER_MEMLIMIT: u64 = u64::MAX;

fn available_threads() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

fn build_encoder(preset: u32) -> Result<Stream, FilterError> {
    let threads = available_threads();
    let result = if threads > 1 {
        MtStreamBuilder::new()
            .threads(threads)
            .preset(preset)
            .check(Check::None)
            .encoder()
    } else {
        Stream::new_easy_encoder(preset, Check::None)
    };
    result.map_err(|e| FilterError::Codec {
        codec: "lzma_encoder",
        message: e.to_string(),
    })
}

pub struct LzmaEncodeProcessor {
    inner: Stream,
}

impl LzmaEncodeProcessor {
    pub fn new(preset: u32) -> Result<Self, FilterError> {
        Ok(Self {
            inner: build_encoder(preset)?,
        })
    }
}

impl Default for LzmaEncodeProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_PRESET).expect("lzma encoder initialization")
    }
}

pub struct LzmaDecodeProcessor {
    inner: Stream,
}

impl LzmaDecodeProcessor {
    pub fn new() -> Result<Self, FilterError> {
        let inner =
            Stream::new_stream_decoder(DECODER_MEMLIMIT, 0).map_err(|e| FilterError::Codec {
                codec: "lzma_decoder",
                message: e.to_string(),
            })?;
        Ok(Self { inner })
    }
}

fn step_stream(
    stream: &mut Stream,
    codec_name: &'static str,
    input: &mut StageBuffer,
    output: &mut StageBuffer,
    ending: bool,
    max_capacity: usize,
) -> Result<StepOutcome, FilterError> {
    let before_in = stream.total_in();
    let before_out = stream.total_out();
    let action = if ending && input.used() == 0 {
        Action::Finish
    } else {
        Action::Run
    };
    let status = stream
        .process(input.head(), output.tail_mut(), action)
        .map_err(|e| FilterError::Codec {
            codec: codec_name,
            message: e.to_string(),
        })?;
    let consumed = (stream.total_in() - before_in) as usize;
    let produced = (stream.total_out() - before_out) as usize;
    input.consume(consumed);
    output.advance(produced);
    match status {
        Status::StreamEnd => Ok(StepOutcome::Terminal),
        Status::Ok | Status::GetCheck => {
            if produced == 0 && consumed == 0 && output.capacity() < max_capacity {
                output.grow();
            }
            Ok(StepOutcome::Progress)
        }
        Status::MemNeeded => Err(FilterError::Codec {
            codec: codec_name,
            message: "liblzma reported insufficient memory".into(),
        }),
    }
}

impl Processor for LzmaEncodeProcessor {
    fn step(
        &mut self,
        input: &mut StageBuffer,
        output: &mut StageBuffer,
        ending: bool,
    ) -> Result<StepOutcome, FilterError> {
        step_stream(
            &mut self.inner,
            "lzma_encoder",
            input,
            output,
            ending,
            self.max_output_capacity(),
        )
    }
}

impl Processor for LzmaDecodeProcessor {
    fn step(
        &mut self,
        input: &mut StageBuffer,
        output: &mut StageBuffer,
        ending: bool,
    ) -> Result<StepOutcome, FilterError> {
        step_stream(
            &mut self.inner,
            "lzma_decoder",
            input,
            output,
            ending,
            self.max_output_capacity(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::BufferedFilterStage;
    use crate::io::{MemorySource, Source, END_OF_STREAM};

    fn drain(mut source: impl Source) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 61];
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
    fn lzma_encode_then_decode_roundtrips() {
        let plain: Vec<u8> = (0..200_000u32).map(|i| (i % 97) as u8).collect();
        let src = MemorySource::new(&plain);
        let enc = BufferedFilterStage::new(
            Box::new(src),
            LzmaEncodeProcessor::new(6).unwrap(),
            4096,
        );
        let compressed = drain(enc);
        assert!(compressed.len() < plain.len());

        let src2 = MemorySource::new(&compressed);
        let dec = BufferedFilterStage::new(Box::new(src2), LzmaDecodeProcessor::new().unwrap(), 4096);
        assert_eq!(drain(dec), plain);
    }
}
