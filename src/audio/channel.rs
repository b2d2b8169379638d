// Control channel - ordered SPSC message protocol between control and render domains
//
// Three lock-free rtrb ring buffers:
// - COMMANDS: controller pushes `play`/`stop`, render adapter pops at tick start
// - EVENTS:   render adapter pushes `ready`/`ended`/`error`, controller pops
// - RETURNS:  render adapter hands spent expression strings back, so their
//             memory is freed on the control side
//
// Every `play` opens a new session number on its channel. Commands and events
// travel stamped with that number (never on the wire), so the controller can
// tell a terminal event of the current session from one left over by a session
// it already replaced.
//
// Neither side ever blocks. A full command queue is reported to the caller; a
// full event queue cannot be reported from the render thread, so the render side
// counts the loss and the controller surfaces it on its next poll.
//
// Render failures cross as the engine's own error value and are rendered into
// their message text by the receiving side.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rtrb::{Consumer, Producer};
use serde::{Deserialize, Serialize};

use super::session::SessionOutcome;
use crate::error::PlaybackError;

/// Default queue depth for each direction
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Session number on one channel; 0 means "no play sent yet"
pub type SessionSeq = u64;

/// Controller → render messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlCommand {
    Play { expression: String },
    Stop,
}

/// Render → controller messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderEvent {
    /// Render side has its engine instance and is processing commands
    Ready,
    /// Session reached the end of its signal
    Ended,
    /// Parse or generation failure
    Error { message: String },
}

impl RenderEvent {
    pub fn error(message: impl Into<String>) -> Self {
        RenderEvent::Error {
            message: message.into(),
        }
    }

    /// Ended or Error: the session that produced it is over
    pub fn is_terminal(&self) -> bool {
        matches!(self, RenderEvent::Ended | RenderEvent::Error { .. })
    }
}

impl From<SessionOutcome> for RenderEvent {
    fn from(outcome: SessionOutcome) -> Self {
        match outcome {
            SessionOutcome::Ended => RenderEvent::Ended,
            SessionOutcome::Failed(err) => RenderEvent::Error {
                message: err.event_message(),
            },
        }
    }
}

struct Stamped<T> {
    session: SessionSeq,
    message: T,
}

/// What the render side actually queues
enum Signal {
    Ready,
    Outcome(SessionOutcome),
}

/// Control-domain sending half for commands
pub struct CommandSender {
    producer: Producer<Stamped<ControlCommand>>,
    returns: Consumer<String>,
    capacity: usize,
    last_session: SessionSeq,
}

impl CommandSender {
    /// Queue a command without blocking
    ///
    /// A `play` opens the next session; a `stop` belongs to the current one.
    ///
    /// # Returns
    /// The session number the command was stamped with
    ///
    /// # Errors
    /// - `ChannelClosed` if the render adapter was dropped
    /// - `ChannelFull` if the render side has not drained the queue
    pub fn send(&mut self, command: ControlCommand) -> Result<SessionSeq, PlaybackError> {
        self.reclaim_returns();
        if self.producer.is_abandoned() {
            return Err(PlaybackError::ChannelClosed);
        }

        let session = match command {
            ControlCommand::Play { .. } => self.last_session + 1,
            ControlCommand::Stop => self.last_session,
        };
        self.producer
            .push(Stamped {
                session,
                message: command,
            })
            .map_err(|_| PlaybackError::ChannelFull {
                capacity: self.capacity,
            })?;
        self.last_session = session;
        Ok(session)
    }

    /// Session opened by the most recent successful `play`
    pub fn last_session(&self) -> SessionSeq {
        self.last_session
    }

    pub fn is_closed(&self) -> bool {
        self.producer.is_abandoned()
    }

    /// Free expression strings the render side has handed back
    fn reclaim_returns(&mut self) {
        while let Ok(expression) = self.returns.pop() {
            drop(expression);
        }
    }
}

/// Control-domain receiving half for events
pub struct EventReceiver {
    consumer: Consumer<Stamped<Signal>>,
    dropped: Arc<AtomicU64>,
}

impl EventReceiver {
    pub fn try_recv(&mut self) -> Option<RenderEvent> {
        self.try_recv_stamped().map(|(_, event)| event)
    }

    /// Next event together with the session that produced it
    ///
    /// `ready` is stamped with the session current when it was announced.
    pub fn try_recv_stamped(&mut self) -> Option<(SessionSeq, RenderEvent)> {
        let Stamped { session, message } = self.consumer.pop().ok()?;
        let event = match message {
            Signal::Ready => RenderEvent::Ready,
            Signal::Outcome(outcome) => RenderEvent::from(outcome),
        };
        Some((session, event))
    }

    /// Number of events the render side could not queue since the last call
    pub fn take_dropped(&self) -> u64 {
        self.dropped.swap(0, Ordering::Relaxed)
    }
}

/// Render-domain end of the channel
pub struct RenderEndpoint {
    commands: Consumer<Stamped<ControlCommand>>,
    events: Producer<Stamped<Signal>>,
    returns: Producer<String>,
    dropped: Arc<AtomicU64>,
}

impl RenderEndpoint {
    /// Commands queued right now; used to bound work per tick
    pub fn pending_commands(&self) -> usize {
        self.commands.slots()
    }

    /// Next command and the session it belongs to
    pub fn try_recv(&mut self) -> Option<(SessionSeq, ControlCommand)> {
        self.commands
            .pop()
            .ok()
            .map(|stamped| (stamped.session, stamped.message))
    }

    /// Queue `ready`; never blocks
    pub fn emit_ready(&mut self, session: SessionSeq) {
        self.push(session, Signal::Ready);
    }

    /// Queue a session's terminal outcome; never blocks
    pub fn emit_outcome(&mut self, session: SessionSeq, outcome: SessionOutcome) {
        self.push(session, Signal::Outcome(outcome));
    }

    /// Hand a spent expression back to the control side
    ///
    /// The returns queue is as deep as the command queue and the sender drains
    /// it before every push, so it only overflows if the controller is gone; the
    /// string is then freed here.
    pub fn recycle(&mut self, expression: String) {
        if let Err(rtrb::PushError::Full(expression)) = self.returns.push(expression) {
            drop(expression);
        }
    }

    /// The controller side has been dropped
    pub fn is_controller_gone(&self) -> bool {
        self.commands.is_abandoned()
    }

    fn push(&mut self, session: SessionSeq, message: Signal) {
        if self.events.push(Stamped { session, message }).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// All three ends of a freshly created control channel
pub struct ControlChannelEnds {
    pub commands: CommandSender,
    pub events: EventReceiver,
    pub render: RenderEndpoint,
}

/// Factory for control channels
pub struct ControlChannel;

impl ControlChannel {
    /// Create a channel with `capacity` slots in each direction
    ///
    /// # Panics
    /// Panics if capacity is 0
    #[allow(clippy::new_ret_no_self)]
    pub fn new(capacity: usize) -> ControlChannelEnds {
        assert!(capacity > 0, "capacity must be greater than 0");

        let (command_tx, command_rx) = rtrb::RingBuffer::new(capacity);
        let (event_tx, event_rx) = rtrb::RingBuffer::new(capacity);
        let (return_tx, return_rx) = rtrb::RingBuffer::new(capacity);
        let dropped = Arc::new(AtomicU64::new(0));

        ControlChannelEnds {
            commands: CommandSender {
                producer: command_tx,
                returns: return_rx,
                capacity,
                last_session: 0,
            },
            events: EventReceiver {
                consumer: event_rx,
                dropped: Arc::clone(&dropped),
            },
            render: RenderEndpoint {
                commands: command_rx,
                events: event_tx,
                returns: return_tx,
                dropped,
            },
        }
    }
}
