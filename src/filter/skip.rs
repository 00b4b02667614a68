//! Discards a prefix of `skip` bytes, then forwards at most `limit` bytes
//! (`0` = unlimited). Used to carve a single entry's bytes out of a
//! continuous, possibly non-seekable stream.

use crate::error::FilterError;
use crate::filter::{Processor, StageBuffer, StepOutcome};

pub struct SkipProcessor {
    to_skip: u64,
    limit: u64,
    skipped: u64,
    passed: u64,
}

impl SkipProcessor {
    pub fn new(skip: u64, limit: u64) -> Self {
        Self {
            to_skip: skip,
            limit,
            skipped: 0,
            passed: 0,
        }
    }

    fn limit_reached(&self) -> bool {
        self.limit != 0 && self.passed >= self.limit
    }
}

impl Processor for SkipProcessor {
    fn step(
        &mut self,
        input: &mut StageBuffer,
        output: &mut StageBuffer,
        ending: bool,
    ) -> Result<StepOutcome, FilterError> {
        if self.limit_reached() {
            input.consume(input.used());
            return Ok(StepOutcome::Terminal);
        }

        if self.skipped < self.to_skip {
            let remaining_skip = (self.to_skip - self.skipped) as usize;
            let n = input.used().min(remaining_skip);
            input.consume(n);
            self.skipped += n as u64;
            if self.skipped < self.to_skip {
                return Ok(if ending && input.used() == 0 {
                    StepOutcome::Terminal
                } else {
                    StepOutcome::Progress
                });
            }
        }

        let room = if self.limit == 0 {
            usize::MAX
        } else {
            (self.limit - self.passed) as usize
        };
        let n = input.used().min(output.available()).min(room);
        if n > 0 {
            output.tail_mut()[..n].copy_from_slice(&input.head()[..n]);
            output.advance(n);
            input.consume(n);
            self.passed += n as u64;
        }

        if self.limit_reached() {
            input.consume(input.used());
            Ok(StepOutcome::Terminal)
        } else if ending && input.used() == 0 {
            Ok(StepOutcome::Terminal)
        } else {
            Ok(StepOutcome::Progress)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(data: &[u8], skip: u64, limit: u64) -> Vec<u8> {
        let mut input = StageBuffer::new(data.len().max(1));
        input.tail_mut()[..data.len()].copy_from_slice(data);
        input.advance(data.len());
        let mut output = StageBuffer::new(data.len().max(1) + 16);
        let mut proc = SkipProcessor::new(skip, limit);
        loop {
            let outcome = proc.step(&mut input, &mut output, true).unwrap();
            if outcome == StepOutcome::Terminal {
                break;
            }
        }
        output.head().to_vec()
    }

    #[test]
    fn skips_prefix_then_passes_limit() {
        let data = b"0123456789";
        assert_eq!(run(data, 3, 4), b"3456");
    }

    #[test]
    fn unlimited_passthrough_after_skip() {
        let data = b"0123456789";
        assert_eq!(run(data, 5, 0), b"56789");
    }

    #[test]
    fn skip_past_end_yields_nothing() {
        let data = b"abc";
        assert_eq!(run(data, 10, 0), b"");
    }
}
