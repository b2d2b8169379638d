// Engine facade error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Engine error code constants
///
/// Error code range: 2001-2003
pub struct EngineErrorCodes {}

impl EngineErrorCodes {
    /// Expression could not be parsed into a waveform
    pub const PARSE: i32 = 2001;

    /// Engine failed while generating samples
    pub const GENERATION: i32 = 2002;

    /// Engine instance could not be built for the requested sample rate
    pub const BUILD: i32 = 2003;
}

/// Log an engine error with structured context
///
/// Only call this from the control domain; the render path converts
/// failures into events instead of logging.
pub fn log_engine_error(err: &EngineError, context: &str) {
    error!(
        "Engine error in {}: code={}, component=SynthEngine, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Failures reported by a [`SynthEngine`](crate::synth::SynthEngine) or
/// [`EngineFactory`](crate::synth::EngineFactory).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed expression. The message is shown to the user verbatim.
    Parse { message: String },

    /// Engine failure in the middle of playback
    Generation { message: String },

    /// Engine construction failed (module build, unsupported sample rate, ...)
    Build { reason: String },
}

impl EngineError {
    /// Text carried by the `error` event on the control channel.
    ///
    /// Parse messages pass through untouched; generation failures are
    /// prefixed so the user can tell them apart from syntax errors.
    pub fn event_message(&self) -> String {
        match self {
            EngineError::Parse { message } => message.clone(),
            EngineError::Generation { message } => format!("Generation failed: {}", message),
            EngineError::Build { reason } => format!("Engine build failed: {}", reason),
        }
    }
}

impl ErrorCode for EngineError {
    fn code(&self) -> i32 {
        match self {
            EngineError::Parse { .. } => EngineErrorCodes::PARSE,
            EngineError::Generation { .. } => EngineErrorCodes::GENERATION,
            EngineError::Build { .. } => EngineErrorCodes::BUILD,
        }
    }

    fn message(&self) -> String {
        match self {
            EngineError::Parse { message } => format!("Parse error: {}", message),
            EngineError::Generation { message } => format!("Generation error: {}", message),
            EngineError::Build { reason } => format!("Engine build error: {}", reason),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EngineError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for EngineError {}
