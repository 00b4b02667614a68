//! Repeating-key XOR: a symmetric filter, `apply == unapply`.

use crate::error::FilterError;
use crate::filter::{Processor, StageBuffer, StepOutcome};

pub struct XorProcessor {
    key: Vec<u8>,
    counter: usize,
}

impl XorProcessor {
    pub fn new(key: Vec<u8>) -> Self {
        assert!(!key.is_empty(), "XOR key must not be empty");
        Self { key, counter: 0 }
    }
}

impl Processor for XorProcessor {
    fn step(
        &mut self,
        input: &mut StageBuffer,
        output: &mut StageBuffer,
        ending: bool,
    ) -> Result<StepOutcome, FilterError> {
        let n = input.used().min(output.available());
        if n > 0 {
            let chunk = input.head()[..n].to_vec();
            let out = output.tail_mut();
            for (i, byte) in chunk.iter().enumerate() {
                out[i] = byte ^ self.key[self.counter % self.key.len()];
                self.counter += 1;
            }
            output.advance(n);
            input.consume(n);
        }
        if ending && input.used() == 0 {
            Ok(StepOutcome::Terminal)
        } else {
            Ok(StepOutcome::Progress)
        }
    }
}
