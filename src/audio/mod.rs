// Audio module - render-domain playback: chunking, sessions, adapters, mixing

pub mod channel;
pub mod chunk_buffer;
pub mod host;
pub mod render;
pub mod session;

// Re-export commonly used types for convenience
pub use channel::{
    CommandSender, ControlChannel, ControlChannelEnds, ControlCommand, EventReceiver,
    RenderEndpoint, RenderEvent, SessionSeq, DEFAULT_CHANNEL_CAPACITY,
};
pub use chunk_buffer::{ChunkBuffer, PullStatus, DEFAULT_GENERATE_BATCH};
pub use host::{render_host, AdapterRegistrar, RenderHost, DEFAULT_MAX_ADAPTERS};
pub use render::RenderAdapter;
pub use session::{PlaybackSession, SessionOutcome, SessionState};
