// ChunkBuffer - slices variable-length engine batches into fixed callback frames
//
// The engine produces samples in its own batch granularity while the output
// device asks for a fixed number of samples per callback. The two sizes are
// unrelated, so the buffer keeps the last batch around and serves it out with a
// cursor, calling `generate` again only when the batch is used up.
//
// Batch storage is allocated once in `new`; `pull` never allocates.
//
// End of signal:
// - A batch shorter than requested (including an empty one) marks the buffer
//   exhausted. No separate "done" flag exists.
// - Once exhausted and drained, `pull` pads the rest of the frame with silence
//   and reports `Finished` in that same frame.

use crate::error::EngineError;
use crate::synth::SynthEngine;

/// Default engine batch size in samples
pub const DEFAULT_GENERATE_BATCH: usize = 1024;

/// Outcome of a single [`ChunkBuffer::pull`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullStatus {
    /// The whole frame carries real samples
    Filled,
    /// Signal ended: `written` real samples, the rest of the frame is silence
    Finished { written: usize },
}

/// Fixed-capacity batch buffer with a read cursor
pub struct ChunkBuffer {
    /// Batch storage, always `batch_size` long
    chunk: Vec<f32>,
    /// Number of valid samples in `chunk`
    len: usize,
    /// Next sample to hand out, `cursor <= len`
    cursor: usize,
    /// Latest `generate` call came back short
    exhausted: bool,
}

impl ChunkBuffer {
    /// Create a buffer that asks the engine for `batch_size` samples at a time
    ///
    /// # Panics
    /// Panics if batch_size is 0
    pub fn new(batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch_size must be greater than 0");

        Self {
            chunk: vec![0.0_f32; batch_size],
            len: 0,
            cursor: 0,
            exhausted: false,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.chunk.len()
    }

    /// Samples left in the current batch
    pub fn remaining(&self) -> usize {
        self.len - self.cursor
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Drop any buffered samples and forget the end-of-signal mark
    pub fn reset(&mut self) {
        self.len = 0;
        self.cursor = 0;
        self.exhausted = false;
    }

    /// Fill `out` from buffered samples, refilling from the engine as needed
    ///
    /// # Returns
    /// * `Ok(PullStatus::Filled)` - every slot of `out` holds a real sample
    /// * `Ok(PullStatus::Finished { written })` - signal ended; slots past
    ///   `written` are zeroed
    /// * `Err(EngineError)` - the engine failed; `out` is left partially written
    pub fn pull<E: SynthEngine>(
        &mut self,
        engine: &mut E,
        waveform: &mut E::Waveform,
        out: &mut [f32],
    ) -> Result<PullStatus, EngineError> {
        let mut written = 0;

        while written < out.len() {
            let available = self.len - self.cursor;
            if available > 0 {
                let count = available.min(out.len() - written);
                out[written..written + count]
                    .copy_from_slice(&self.chunk[self.cursor..self.cursor + count]);
                self.cursor += count;
                written += count;
                continue;
            }

            if self.exhausted {
                break;
            }

            let requested = self.chunk.len();
            let produced = engine.generate(waveform, &mut self.chunk)?.min(requested);
            self.len = produced;
            self.cursor = 0;
            if produced < requested {
                self.exhausted = true;
            }
        }

        if self.exhausted && self.cursor == self.len {
            out[written..].fill(0.0);
            return Ok(PullStatus::Finished { written });
        }

        Ok(PullStatus::Filled)
    }
}
