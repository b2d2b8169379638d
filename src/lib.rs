// Tuun Render Core - fixed-period playback of batch-oriented synthesis engines
// Lock-free render path, message-passing control channel, single-active playback

// Module declarations
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod synth;
pub mod telemetry;
pub mod testing;

// Re-exports for convenience
pub use audio::{ControlCommand, RenderEvent, SessionState};
pub use config::AppConfig;
pub use engine::{ControllerId, ManualBackend, OutputBackend, PlaybackController, PlaybackCoordinator};
pub use error::{EngineError, ErrorCode, PlaybackError};
pub use synth::{EngineFactory, SynthEngine};

/// Install a stderr `tracing` subscriber that also picks up `log` records
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
