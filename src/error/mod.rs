// Error types for the streaming render core
//
// Engine facade failures (parse/generate/build) and control-domain playback
// failures, each with stable numeric codes for structured logging.

mod engine;
mod playback;

pub use engine::{log_engine_error, EngineError, EngineErrorCodes};
pub use playback::{log_playback_error, InitStage, PlaybackError, PlaybackErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, so every failure path can be logged and
/// reported the same way.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
