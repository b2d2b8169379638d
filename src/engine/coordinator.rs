// PlaybackCoordinator: shared render context lifecycle and single-active policy
//
// Owns two pieces of process-wide state, both behind one lock:
// - the shared render context (validator engine, render host registrar and the
//   open output stream), keyed by sample rate
// - the active-player slot (at most one controller playing at a time)
//
// The coordinator is constructed explicitly and handed to controllers through
// an `Arc`; there is no ambient global instance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::audio::{render_host, AdapterRegistrar, ControlChannel, RenderAdapter};
use crate::config::AppConfig;
use crate::error::{log_engine_error, log_playback_error, ErrorCode, InitStage, PlaybackError};
use crate::synth::{EngineFactory, SynthEngine};
use crate::telemetry;

use super::backend::{OutputBackend, OutputStream};
use super::controller::{Attachment, ControllerId, ControllerLink, PlaybackController};

/// Engine, adapter registrar and output stream for one sample rate
struct SharedRenderContext<E: SynthEngine> {
    // Dropped first: stops the callbacks and tears down every installed adapter
    stream: Box<dyn OutputStream>,
    registrar: AdapterRegistrar<E>,
    validator: E,
    sample_rate: u32,
    generation: u64,
}

struct CoordinatorState<E: SynthEngine> {
    context: Option<SharedRenderContext<E>>,
    active: Option<Arc<ControllerLink>>,
    /// Bumped every time a context is built
    generation: u64,
}

/// Process-wide playback coordinator
///
/// This coordinator handles:
/// - Lazy construction of the shared render context for a sample rate
/// - Teardown and rebuild when the sample rate changes
/// - The active-player slot (`set_active` / `clear_active`)
/// - Expression pre-validation on a control-side engine instance
/// - Attaching a render adapter per controller
///
/// # Example
/// ```ignore
/// let coordinator = PlaybackCoordinator::shared(factory, backend, AppConfig::default())?;
/// let mut controller = coordinator.controller();
/// controller.play("sin(440)")?;
/// ```
pub struct PlaybackCoordinator<F: EngineFactory, B: OutputBackend> {
    factory: F,
    backend: B,
    config: AppConfig,
    state: Mutex<CoordinatorState<F::Engine>>,
    next_controller_id: AtomicU64,
}

impl<F: EngineFactory, B: OutputBackend> PlaybackCoordinator<F, B> {
    /// Create a coordinator with no render context
    ///
    /// # Errors
    /// `InvalidConfig` if `config` carries a zero size or sample rate. Every
    /// queue and buffer built later is sized from it.
    pub fn new(factory: F, backend: B, config: AppConfig) -> Result<Self, PlaybackError> {
        config.validate().map_err(|reason| {
            let err = PlaybackError::InvalidConfig { reason };
            log_playback_error(&err, "new");
            err
        })?;

        Ok(Self {
            factory,
            backend,
            config,
            state: Mutex::new(CoordinatorState {
                context: None,
                active: None,
                generation: 0,
            }),
            next_controller_id: AtomicU64::new(1),
        })
    }

    /// Create a coordinator ready to be shared between controllers
    pub fn shared(factory: F, backend: B, config: AppConfig) -> Result<Arc<Self>, PlaybackError> {
        Self::new(factory, backend, config).map(Arc::new)
    }

    /// Create a controller at the configured default sample rate
    pub fn controller(self: &Arc<Self>) -> PlaybackController<F, B> {
        PlaybackController::new(Arc::clone(self))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Make sure a render context exists at `sample_rate`
    ///
    /// Idempotent while the current context already runs at that rate. On a
    /// different rate, stops the active controller, tears the old context down
    /// and builds a new one. Calls are serialized by the coordinator lock, so
    /// the last request's rate wins.
    ///
    /// # Returns
    /// * `Ok(generation)` - Generation number of the live context
    /// * `Err(PlaybackError)` - Invalid rate, lock poisoning, engine build or
    ///   device open failure. The coordinator is left without a context and a
    ///   retry is safe.
    pub fn ensure_initialized(&self, sample_rate: u32) -> Result<u64, PlaybackError> {
        self.validate_sample_rate(sample_rate)?;

        let mut state = self.lock_state()?;
        if let Some(context) = state.context.as_ref() {
            if context.sample_rate == sample_rate {
                return Ok(context.generation);
            }
        }

        self.teardown(&mut state);

        let generation = state.generation + 1;
        let context = self.build_context(sample_rate, generation)?;
        state.generation = generation;
        state.context = Some(context);

        log::info!(
            "[PlaybackCoordinator] Render context ready at {} Hz (generation {})",
            sample_rate,
            generation
        );
        telemetry::hub().record_context_initialized(sample_rate);
        Ok(generation)
    }

    /// Parse `expression` on the control-side engine and release it again
    ///
    /// # Errors
    /// - `NotInitialized` if no render context exists
    /// - `Parse` with the engine's message if the expression is malformed
    pub fn validate_expression(&self, expression: &str) -> Result<(), PlaybackError> {
        let mut state = self.lock_state()?;
        let context = state.context.as_mut().ok_or(PlaybackError::NotInitialized)?;

        match context.validator.parse(expression) {
            Ok(waveform) => {
                context.validator.release(waveform);
                Ok(())
            }
            Err(err) => {
                log::debug!("[PlaybackCoordinator] Expression rejected: {}", err);
                Err(PlaybackError::Parse {
                    message: err.event_message(),
                })
            }
        }
    }

    /// Record `link` as the active player, stopping the previous holder first
    ///
    /// Re-activating the same controller is a no-op apart from swapping in its
    /// current link.
    ///
    /// # Errors
    /// Fails if the previous holder's stop command cannot be queued; the
    /// previous holder stays active in that case.
    pub fn set_active(&self, link: &Arc<ControllerLink>) -> Result<(), PlaybackError> {
        let mut state = self.lock_state()?;

        if let Some(current) = state.active.as_ref() {
            if current.id() != link.id() {
                current.stop().map_err(|err| {
                    log_playback_error(&err, "set_active");
                    err
                })?;
                log::debug!(
                    "[PlaybackCoordinator] {} superseded by {}",
                    current.id(),
                    link.id()
                );
            }
        }

        state.active = Some(Arc::clone(link));
        telemetry::hub().record_active_changed(Some(link.id().value()));
        Ok(())
    }

    /// Clear the active slot only if it holds exactly `id`
    ///
    /// # Returns
    /// * `Ok(true)` - The slot held `id` and is now empty
    /// * `Ok(false)` - The slot held another controller or nothing
    pub fn clear_active(&self, id: ControllerId) -> Result<bool, PlaybackError> {
        let mut state = self.lock_state()?;
        let holds = state
            .active
            .as_ref()
            .is_some_and(|current| current.id() == id);
        if holds {
            state.active = None;
            telemetry::hub().record_active_changed(None);
        }
        Ok(holds)
    }

    /// Controller currently holding the active slot
    pub fn active_controller(&self) -> Result<Option<ControllerId>, PlaybackError> {
        let state = self.lock_state()?;
        Ok(state.active.as_ref().map(|link| link.id()))
    }

    /// Stop whatever is playing and empty the active slot
    pub fn stop_active(&self) -> Result<(), PlaybackError> {
        let mut state = self.lock_state()?;
        Self::stop_active_locked(&mut state)
    }

    /// Stop the active controller and release the render context
    ///
    /// Safe to call when nothing is initialized.
    pub fn shutdown(&self) -> Result<(), PlaybackError> {
        let mut state = self.lock_state()?;
        self.teardown(&mut state);
        log::info!("[PlaybackCoordinator] Shut down");
        Ok(())
    }

    /// Sample rate of the live render context
    pub fn current_sample_rate(&self) -> Result<Option<u32>, PlaybackError> {
        let state = self.lock_state()?;
        Ok(state.context.as_ref().map(|context| context.sample_rate))
    }

    /// Rate the output stream actually runs at
    pub fn output_sample_rate(&self) -> Result<Option<u32>, PlaybackError> {
        let state = self.lock_state()?;
        Ok(state.context.as_ref().map(|context| context.stream.sample_rate()))
    }

    /// Generation of the live render context, if any
    pub fn generation(&self) -> Result<Option<u64>, PlaybackError> {
        let state = self.lock_state()?;
        Ok(state.context.as_ref().map(|context| context.generation))
    }

    /// Tear down adapters the render host has retired since the last attach
    ///
    /// Returns how many were reclaimed; 0 when no context is live.
    pub fn reclaim_retired(&self) -> Result<usize, PlaybackError> {
        let mut state = self.lock_state()?;
        Ok(state
            .context
            .as_mut()
            .map_or(0, |context| context.registrar.collect_retired()))
    }

    /// Allocate a fresh controller id
    pub fn next_controller_id(&self) -> ControllerId {
        ControllerId::new(self.next_controller_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Build a render adapter for controller `id` and hand it to the render host
    ///
    /// The adapter gets its own engine instance built at the context's rate.
    ///
    /// # Errors
    /// - `NotInitialized` if no render context exists
    /// - `Initialization` if the engine instance cannot be built
    /// - `TooManyControllers` if the render host's hand-over queue is full
    pub fn attach(&self, id: ControllerId) -> Result<Attachment, PlaybackError> {
        let mut state = self.lock_state()?;
        let context = state.context.as_mut().ok_or(PlaybackError::NotInitialized)?;

        let engine = self
            .factory
            .build(context.sample_rate)
            .map_err(|err| {
                log_engine_error(&err, "attach");
                PlaybackError::Initialization {
                    stage: InitStage::Engine,
                    reason: err.message(),
                }
            })?;

        let ends = ControlChannel::new(self.config.render.channel_capacity);
        let adapter = RenderAdapter::new(engine, ends.render, self.config.render.generate_batch);
        context.registrar.attach(adapter).map_err(|err| {
            log_playback_error(&err, "attach");
            err
        })?;

        log::debug!(
            "[PlaybackCoordinator] Attached {} to generation {}",
            id,
            context.generation
        );

        let link = Arc::new(ControllerLink::new(id, context.generation, ends.commands));
        Ok(Attachment::new(link, ends.events))
    }

    // ========================================================================
    // PRIVATE HELPER METHODS
    // ========================================================================

    fn validate_sample_rate(&self, sample_rate: u32) -> Result<(), PlaybackError> {
        if sample_rate == 0 {
            let err = PlaybackError::InvalidSampleRate { rate: sample_rate };
            log_playback_error(&err, "validate_sample_rate");
            return Err(err);
        }
        Ok(())
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, CoordinatorState<F::Engine>>, PlaybackError> {
        self.state.lock().map_err(|_| {
            let err = PlaybackError::LockPoisoned {
                component: "playback_coordinator".to_string(),
            };
            log_playback_error(&err, "lock_state");
            err
        })
    }

    fn stop_active_locked(state: &mut CoordinatorState<F::Engine>) -> Result<(), PlaybackError> {
        if let Some(link) = state.active.as_ref() {
            link.stop().map_err(|err| {
                log_playback_error(&err, "stop_active");
                err
            })?;
            state.active = None;
            telemetry::hub().record_active_changed(None);
        }
        Ok(())
    }

    /// Stop the active controller and drop the current context, if any
    ///
    /// The active controller's adapter goes away with the context, so a stop
    /// command that cannot be queued is not an error here.
    fn teardown(&self, state: &mut CoordinatorState<F::Engine>) {
        if let Some(link) = state.active.take() {
            if let Err(err) = link.stop() {
                log::debug!(
                    "[PlaybackCoordinator] Stop for {} not queued during teardown: {}",
                    link.id(),
                    err
                );
                link.set_playing(false);
            }
            telemetry::hub().record_active_changed(None);
        }

        if let Some(context) = state.context.take() {
            let sample_rate = context.sample_rate;
            drop(context);
            log::info!(
                "[PlaybackCoordinator] Render context at {} Hz torn down",
                sample_rate
            );
            telemetry::hub().record_context_torn_down(sample_rate);
        }
    }

    fn build_context(
        &self,
        sample_rate: u32,
        generation: u64,
    ) -> Result<SharedRenderContext<F::Engine>, PlaybackError> {
        let validator = self.factory.build(sample_rate).map_err(|err| {
            log_engine_error(&err, "ensure_initialized");
            let err = PlaybackError::Initialization {
                stage: InitStage::Engine,
                reason: err.message(),
            };
            log_playback_error(&err, "ensure_initialized");
            err
        })?;

        let render = &self.config.render;
        let (mut host, registrar) =
            render_host::<F::Engine>(render.max_controllers, render.block_size);

        let stream = self
            .backend
            .open(
                sample_rate,
                render.block_size,
                Box::new(move |out: &mut [f32]| host.render(out)),
            )
            .map_err(|err| {
                log_playback_error(&err, "ensure_initialized");
                err
            })?;

        Ok(SharedRenderContext {
            stream,
            registrar,
            validator,
            sample_rate,
            generation,
        })
    }
}

#[cfg(test)]
mod tests;
