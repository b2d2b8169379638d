//! Engine facade consumed by the render core.
//!
//! The synthesis engine itself lives outside this crate. The core only needs
//! three capabilities from it: turn an expression into a waveform, pull a batch
//! of samples out of a waveform, and give the waveform back when done.
//!
//! Waveforms are owned values. Whoever holds one is responsible for handing it
//! back through [`SynthEngine::release`]; passing it by value makes a double
//! release impossible.

use crate::error::EngineError;

/// A synthesis engine instance bound to one sample rate.
pub trait SynthEngine: Send + 'static {
    /// Opaque handle produced by [`parse`](Self::parse).
    type Waveform: Send + 'static;

    /// Parse an expression into a waveform.
    fn parse(&mut self, expression: &str) -> Result<Self::Waveform, EngineError>;

    /// Write up to `out.len()` samples and return how many were written.
    ///
    /// Returning fewer samples than requested (including zero) is the only
    /// end-of-signal indication.
    fn generate(
        &mut self,
        waveform: &mut Self::Waveform,
        out: &mut [f32],
    ) -> Result<usize, EngineError>;

    /// Give a waveform back to the engine.
    fn release(&mut self, waveform: Self::Waveform);
}

/// Builds engine instances for a sample rate.
///
/// This plays the role of the compiled engine module: the coordinator builds
/// one instance for expression validation and one per attached render adapter.
pub trait EngineFactory: Send + Sync + 'static {
    type Engine: SynthEngine;

    fn build(&self, sample_rate: u32) -> Result<Self::Engine, EngineError>;
}
