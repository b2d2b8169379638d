//! Playback lifecycle metrics published by the control domain.

use serde::{Deserialize, Serialize};

/// Lifecycle metrics covering the shared context, the active slot and
/// session outcomes observed by controllers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum PlaybackMetric {
    ContextInitialized {
        sample_rate: u32,
        timestamp_ms: u64,
    },
    ContextTornDown {
        sample_rate: u32,
        timestamp_ms: u64,
    },
    /// `None` when the slot was cleared
    ActiveChanged {
        controller: Option<u64>,
    },
    SessionEnded {
        controller: u64,
    },
    SessionFailed {
        controller: u64,
        message: String,
    },
    /// Render-side events lost because the event queue was full
    EventsDropped {
        controller: u64,
        count: u64,
    },
}
