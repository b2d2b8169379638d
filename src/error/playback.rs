// Playback (control domain) error types and constants

use crate::error::ErrorCode;
use log::error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Playback error code constants
///
/// Error code range: 3001-3011
pub struct PlaybackErrorCodes {}

impl PlaybackErrorCodes {
    /// Expression rejected by the engine during pre-validation
    pub const PARSE: i32 = 3001;

    /// Shared render context could not be constructed
    pub const INITIALIZATION: i32 = 3002;

    /// Operation needs a render context but none exists
    pub const NOT_INITIALIZED: i32 = 3003;

    /// Sample rate is not usable (must be > 0)
    pub const INVALID_SAMPLE_RATE: i32 = 3004;

    /// Expression was empty after trimming
    pub const EMPTY_EXPRESSION: i32 = 3005;

    /// Control channel queue is full
    pub const CHANNEL_FULL: i32 = 3006;

    /// Render side of the control channel is gone
    pub const CHANNEL_CLOSED: i32 = 3007;

    /// Render host cannot accept more adapters
    pub const TOO_MANY_CONTROLLERS: i32 = 3008;

    /// Mutex was poisoned
    pub const LOCK_POISONED: i32 = 3009;

    /// Render side never announced readiness
    pub const READY_TIMEOUT: i32 = 3010;

    /// Configuration sizes the render core cannot run with
    pub const INVALID_CONFIG: i32 = 3011;
}

/// Which part of the shared render context failed to come up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStage {
    /// Engine build for the requested sample rate
    Engine,
    /// Output device / stream open
    OutputDevice,
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitStage::Engine => write!(f, "engine"),
            InitStage::OutputDevice => write!(f, "output device"),
        }
    }
}

/// Log a playback error with structured context
///
/// The logging is non-blocking and will not panic on failure.
pub fn log_playback_error(err: &PlaybackError, context: &str) {
    error!(
        "Playback error in {}: code={}, component=PlaybackCoordinator, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Control-domain playback errors
///
/// These are returned synchronously to the caller of a coordinator or
/// controller operation. Render-domain failures never show up here; they
/// travel as `error` events on the control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    /// Expression rejected by the engine
    Parse { message: String },

    /// Shared render context construction failed
    Initialization { stage: InitStage, reason: String },

    /// No render context exists yet
    NotInitialized,

    /// Sample rate must be greater than 0
    InvalidSampleRate { rate: u32 },

    /// Expression was empty
    EmptyExpression,

    /// Control channel queue is full
    ChannelFull { capacity: usize },

    /// Render side hung up
    ChannelClosed,

    /// Render host adapter queue is full
    TooManyControllers { capacity: usize },

    /// Mutex was poisoned
    LockPoisoned { component: String },

    /// Render side did not announce readiness in time
    ReadyTimeout { waited_ms: u64 },

    /// Configuration rejected before anything was built
    InvalidConfig { reason: String },
}

impl ErrorCode for PlaybackError {
    fn code(&self) -> i32 {
        match self {
            PlaybackError::Parse { .. } => PlaybackErrorCodes::PARSE,
            PlaybackError::Initialization { .. } => PlaybackErrorCodes::INITIALIZATION,
            PlaybackError::NotInitialized => PlaybackErrorCodes::NOT_INITIALIZED,
            PlaybackError::InvalidSampleRate { .. } => PlaybackErrorCodes::INVALID_SAMPLE_RATE,
            PlaybackError::EmptyExpression => PlaybackErrorCodes::EMPTY_EXPRESSION,
            PlaybackError::ChannelFull { .. } => PlaybackErrorCodes::CHANNEL_FULL,
            PlaybackError::ChannelClosed => PlaybackErrorCodes::CHANNEL_CLOSED,
            PlaybackError::TooManyControllers { .. } => PlaybackErrorCodes::TOO_MANY_CONTROLLERS,
            PlaybackError::LockPoisoned { .. } => PlaybackErrorCodes::LOCK_POISONED,
            PlaybackError::ReadyTimeout { .. } => PlaybackErrorCodes::READY_TIMEOUT,
            PlaybackError::InvalidConfig { .. } => PlaybackErrorCodes::INVALID_CONFIG,
        }
    }

    fn message(&self) -> String {
        match self {
            PlaybackError::Parse { message } => message.clone(),
            PlaybackError::Initialization { stage, reason } => {
                format!("Failed to initialize {}: {}", stage, reason)
            }
            PlaybackError::NotInitialized => {
                "Render context not initialized. Call ensure_initialized() first.".to_string()
            }
            PlaybackError::InvalidSampleRate { rate } => {
                format!("Sample rate must be greater than 0 (got {})", rate)
            }
            PlaybackError::EmptyExpression => "Please enter an expression".to_string(),
            PlaybackError::ChannelFull { capacity } => {
                format!("Control channel full ({} pending commands)", capacity)
            }
            PlaybackError::ChannelClosed => "Render side of the control channel closed".to_string(),
            PlaybackError::TooManyControllers { capacity } => {
                format!("Render host cannot accept more than {} pending adapters", capacity)
            }
            PlaybackError::LockPoisoned { component } => {
                format!("Lock poisoned for component: {}", component)
            }
            PlaybackError::ReadyTimeout { waited_ms } => {
                format!("Render side not ready after {} ms", waited_ms)
            }
            PlaybackError::InvalidConfig { reason } => {
                format!("Invalid configuration: {}", reason)
            }
        }
    }
}

impl fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PlaybackError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for PlaybackError {}
