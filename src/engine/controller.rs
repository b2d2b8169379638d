// PlaybackController: one control-surface instance
//
// A controller owns the control-domain ends of its render adapter's channel
// and talks to the shared coordinator for initialization and the active slot.
// Render-side outcomes (ready / ended / error) are observed by polling.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::audio::{CommandSender, ControlCommand, EventReceiver, RenderEvent, SessionSeq};
use crate::error::{log_playback_error, PlaybackError};
use crate::synth::EngineFactory;
use crate::telemetry;

use super::backend::OutputBackend;
use super::coordinator::PlaybackCoordinator;

/// Identity of a controller within one coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControllerId(u64);

impl ControllerId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "controller#{}", self.0)
    }
}

/// Handle the coordinator keeps for the active controller
///
/// Carries the command sender so the coordinator can run a controller's stop
/// path (stop command plus playing flag) without going through the
/// controller itself.
pub struct ControllerLink {
    id: ControllerId,
    generation: u64,
    commands: Mutex<CommandSender>,
    playing: AtomicBool,
}

impl ControllerLink {
    pub(crate) fn new(id: ControllerId, generation: u64, commands: CommandSender) -> Self {
        Self {
            id,
            generation,
            commands: Mutex::new(commands),
            playing: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ControllerId {
        self.id
    }

    /// Render context generation this link's adapter belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::SeqCst);
    }

    /// Queue a command for the render adapter
    ///
    /// Returns the session the command was stamped with; a `play` opens a new one.
    pub fn send(&self, command: ControlCommand) -> Result<SessionSeq, PlaybackError> {
        let mut commands = self.commands.lock().map_err(|_| {
            let err = PlaybackError::LockPoisoned {
                component: "controller_link".to_string(),
            };
            log_playback_error(&err, "send");
            err
        })?;
        commands.send(command)
    }

    /// Stop path: clear the playing flag and queue `stop`
    ///
    /// A closed channel means the adapter is already gone, which is as
    /// stopped as it gets.
    pub fn stop(&self) -> Result<(), PlaybackError> {
        self.set_playing(false);
        match self.send(ControlCommand::Stop) {
            Ok(_) | Err(PlaybackError::ChannelClosed) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// Control-domain ends of an attached render adapter
pub struct Attachment {
    link: Arc<ControllerLink>,
    events: EventReceiver,
}

impl Attachment {
    pub(crate) fn new(link: Arc<ControllerLink>, events: EventReceiver) -> Self {
        Self { link, events }
    }

    pub fn link(&self) -> &Arc<ControllerLink> {
        &self.link
    }
}

/// One control surface: play / stop / observe events
///
/// # Example
/// ```ignore
/// let mut controller = coordinator.controller();
/// controller.play("sin(440)")?;
/// for event in controller.poll_events() {
///     println!("{:?}", event);
/// }
/// ```
pub struct PlaybackController<F: EngineFactory, B: OutputBackend> {
    id: ControllerId,
    coordinator: Arc<PlaybackCoordinator<F, B>>,
    sample_rate: u32,
    attachment: Option<Attachment>,
    ready: bool,
    /// Session opened by this controller's latest `play` on the current attachment
    session: SessionSeq,
    last_error: Option<String>,
    /// Events drained from the channel but not yet handed to the caller
    backlog: VecDeque<RenderEvent>,
}

impl<F: EngineFactory, B: OutputBackend> PlaybackController<F, B> {
    /// Create a controller at the coordinator's default sample rate
    pub fn new(coordinator: Arc<PlaybackCoordinator<F, B>>) -> Self {
        let sample_rate = coordinator.config().playback.default_sample_rate;
        Self::with_sample_rate(coordinator, sample_rate)
    }

    pub fn with_sample_rate(coordinator: Arc<PlaybackCoordinator<F, B>>, sample_rate: u32) -> Self {
        let id = coordinator.next_controller_id();
        Self {
            id,
            coordinator,
            sample_rate,
            attachment: None,
            ready: false,
            session: 0,
            last_error: None,
            backlog: VecDeque::new(),
        }
    }

    pub fn id(&self) -> ControllerId {
        self.id
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Start playing `expression`, superseding any other controller
    ///
    /// The expression is trimmed first. On success the render side picks the
    /// command up at its next tick; completion and render-side failures are
    /// reported through [`poll_events`](Self::poll_events).
    ///
    /// # Errors
    /// - `EmptyExpression` if nothing is left after trimming
    /// - `Initialization` / `InvalidSampleRate` from context construction
    /// - `Parse` if pre-validation is enabled and the expression is rejected
    /// - `TooManyControllers` / `ChannelFull` when queues are full
    pub fn play(&mut self, expression: &str) -> Result<(), PlaybackError> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Err(PlaybackError::EmptyExpression);
        }

        let generation = self.coordinator.ensure_initialized(self.sample_rate)?;
        if self.coordinator.config().playback.validate_before_play {
            self.coordinator.validate_expression(expression)?;
        }

        let link = self.ensure_attached(generation)?;
        self.coordinator.set_active(&link)?;

        let command = ControlCommand::Play {
            expression: expression.to_string(),
        };
        let session = match link.send(command) {
            Ok(session) => session,
            Err(err) => {
                log_playback_error(&err, "play");
                self.coordinator.clear_active(self.id)?;
                return Err(err);
            }
        };

        self.session = session;
        link.set_playing(true);
        self.last_error = None;
        log::debug!("[PlaybackController] {} playing {:?}", self.id, expression);
        Ok(())
    }

    /// Stop this controller's playback; idempotent
    pub fn stop(&mut self) -> Result<(), PlaybackError> {
        if let Some(attachment) = self.attachment.as_ref() {
            attachment.link.stop()?;
        }
        self.coordinator.clear_active(self.id)?;
        Ok(())
    }

    /// Move to another sample rate
    ///
    /// Stops this controller, detaches from the old context and re-initializes
    /// the coordinator at `sample_rate` (which stops whoever else is playing).
    pub fn set_sample_rate(&mut self, sample_rate: u32) -> Result<(), PlaybackError> {
        if sample_rate == 0 {
            return Err(PlaybackError::InvalidSampleRate { rate: sample_rate });
        }
        if sample_rate == self.sample_rate {
            return Ok(());
        }

        self.stop()?;
        self.detach();
        self.sample_rate = sample_rate;
        self.coordinator.ensure_initialized(sample_rate)?;
        log::info!(
            "[PlaybackController] {} moved to {} Hz",
            self.id,
            sample_rate
        );
        Ok(())
    }

    /// Initialize the shared context and attach a render adapter without playing
    pub fn connect(&mut self) -> Result<(), PlaybackError> {
        let generation = self.coordinator.ensure_initialized(self.sample_rate)?;
        self.ensure_attached(generation)?;
        Ok(())
    }

    /// Block until the render side has announced `ready`
    ///
    /// Connects first if needed. Events seen while waiting are kept for the
    /// next [`poll_events`](Self::poll_events).
    pub fn wait_ready(&mut self, timeout: Duration) -> Result<(), PlaybackError> {
        self.connect()?;

        let started = Instant::now();
        loop {
            self.drain_channel();
            if self.ready {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                let err = PlaybackError::ReadyTimeout {
                    waited_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                };
                log_playback_error(&err, "wait_ready");
                return Err(err);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Hand out every event received since the last call, in order
    ///
    /// `ended` / `error` events left over from a session this controller has
    /// already replaced with a newer `play` are dropped.
    pub fn poll_events(&mut self) -> Vec<RenderEvent> {
        self.drain_channel();
        self.backlog.drain(..).collect()
    }

    pub fn is_playing(&self) -> bool {
        self.attachment
            .as_ref()
            .is_some_and(|attachment| attachment.link.is_playing())
    }

    /// Render side has announced `ready` for the current attachment
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Message of the most recent `error` event
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    // ========================================================================
    // PRIVATE HELPER METHODS
    // ========================================================================

    /// Reuse the current attachment if it belongs to `generation`, else attach anew
    fn ensure_attached(&mut self, generation: u64) -> Result<Arc<ControllerLink>, PlaybackError> {
        if let Some(attachment) = self.attachment.as_ref() {
            if attachment.link.generation() == generation {
                return Ok(Arc::clone(&attachment.link));
            }
        }

        self.detach();
        let attachment = self.coordinator.attach(self.id)?;
        let link = Arc::clone(&attachment.link);
        self.attachment = Some(attachment);
        Ok(link)
    }

    /// Drop the channel ends; the render host retires the adapter
    fn detach(&mut self) {
        if let Some(attachment) = self.attachment.take() {
            attachment.link.set_playing(false);
        }
        self.ready = false;
        self.session = 0;
        self.backlog.clear();
    }

    fn drain_channel(&mut self) {
        let Some(attachment) = self.attachment.as_mut() else {
            return;
        };

        let mut received = Vec::new();
        while let Some(stamped) = attachment.events.try_recv_stamped() {
            received.push(stamped);
        }

        let dropped = attachment.events.take_dropped();
        if dropped > 0 {
            log::warn!(
                "[PlaybackController] {} lost {} render events (queue full)",
                self.id,
                dropped
            );
            telemetry::hub().record_events_dropped(self.id.value(), dropped);
        }

        for (session, event) in received {
            if event.is_terminal() && session != self.session {
                log::debug!(
                    "[PlaybackController] {} ignoring {:?} from replaced session {} (current {})",
                    self.id,
                    event,
                    session,
                    self.session
                );
                continue;
            }
            self.observe(&event);
            self.backlog.push_back(event);
        }
    }

    fn observe(&mut self, event: &RenderEvent) {
        match event {
            RenderEvent::Ready => self.ready = true,
            RenderEvent::Ended => {
                self.finish_session();
                telemetry::hub().record_session_ended(self.id.value());
            }
            RenderEvent::Error { message } => {
                log::warn!("[PlaybackController] {} render error: {}", self.id, message);
                self.last_error = Some(message.clone());
                self.finish_session();
                telemetry::hub().record_session_failed(self.id.value(), message.clone());
            }
        }
    }

    fn finish_session(&mut self) {
        if let Some(attachment) = self.attachment.as_ref() {
            attachment.link.set_playing(false);
        }
        if let Err(err) = self.coordinator.clear_active(self.id) {
            log_playback_error(&err, "finish_session");
        }
    }
}

impl<F: EngineFactory, B: OutputBackend> Drop for PlaybackController<F, B> {
    fn drop(&mut self) {
        self.detach();
        if let Err(err) = self.coordinator.clear_active(self.id) {
            log_playback_error(&err, "drop");
        }
    }
}
