//! Output backends that drive the render host at a fixed period.
//!
//! A backend opens an output stream for a sample rate and calls the render
//! callback once per period with a mono buffer. The stream stays open as long
//! as the returned handle is alive; dropping it stops the callbacks.

use crate::error::PlaybackError;

/// Per-period render callback handed to a backend
pub type RenderCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// Handle to an open output stream
pub trait OutputStream: Send {
    /// Rate the stream actually runs at
    fn sample_rate(&self) -> u32;
}

/// Trait implemented by output backends.
///
/// `block_size` is a hint; device backends may deliver other period sizes.
pub trait OutputBackend: Send + Sync + 'static {
    fn open(
        &self,
        sample_rate: u32,
        block_size: usize,
        render: RenderCallback,
    ) -> Result<Box<dyn OutputStream>, PlaybackError>;
}

mod manual;
pub use manual::{ManualBackend, ManualClock};

cfg_if::cfg_if! {
    if #[cfg(feature = "cpal-backend")] {
        mod device;
        pub use device::{list_output_devices, CpalBackend};
    }
}
