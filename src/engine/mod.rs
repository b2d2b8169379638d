//! Control-domain playback: output backends, the shared coordinator and the
//! per-instance controllers that talk to it.

pub mod backend;
pub mod controller;
pub mod coordinator;

pub use backend::{ManualBackend, ManualClock, OutputBackend, OutputStream, RenderCallback};
#[cfg(feature = "cpal-backend")]
pub use backend::{list_output_devices, CpalBackend};
pub use controller::{Attachment, ControllerId, ControllerLink, PlaybackController};
pub use coordinator::PlaybackCoordinator;
