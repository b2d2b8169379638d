// RenderAdapter - render-domain endpoint for one controller
//
// Owns its engine instance, its playback session and the render end of the
// control channel. Everything here runs on the audio thread:
// - no locks, no logging, no allocation after construction
// - commands are drained up to the count queued at tick start, so a flooding
//   controller cannot starve the frame
// - commands take effect before the frame is rendered, in arrival order
// - spent expression strings go back to the control side to be freed
//
// Events are stamped with the session of the `play` that produced them.

use super::channel::{ControlCommand, RenderEndpoint, SessionSeq};
use super::session::{PlaybackSession, SessionState};
use crate::synth::SynthEngine;

pub struct RenderAdapter<E: SynthEngine> {
    engine: E,
    session: PlaybackSession<E>,
    endpoint: RenderEndpoint,
    /// Session of the most recent `play` applied
    current: SessionSeq,
    ready_sent: bool,
}

impl<E: SynthEngine> RenderAdapter<E> {
    pub fn new(engine: E, endpoint: RenderEndpoint, batch_size: usize) -> Self {
        Self {
            engine,
            session: PlaybackSession::new(batch_size),
            endpoint,
            current: 0,
            ready_sent: false,
        }
    }

    /// Emit `ready` the first time this is called
    pub fn announce_ready(&mut self) {
        if !self.ready_sent {
            self.ready_sent = true;
            self.endpoint.emit_ready(self.current);
        }
    }

    /// Apply pending commands, then render one frame into `out`
    pub fn process(&mut self, out: &mut [f32]) {
        let pending = self.endpoint.pending_commands();
        for _ in 0..pending {
            let Some((session, command)) = self.endpoint.try_recv() else {
                break;
            };
            match command {
                ControlCommand::Play { expression } => {
                    self.current = session;
                    let outcome = self.session.play(&mut self.engine, &expression);
                    self.endpoint.recycle(expression);
                    if let Some(outcome) = outcome {
                        self.endpoint.emit_outcome(self.current, outcome);
                    }
                }
                ControlCommand::Stop => self.session.stop(&mut self.engine),
            }
        }

        if let Some(outcome) = self.session.render(&mut self.engine, out) {
            self.endpoint.emit_outcome(self.current, outcome);
        }
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Session of the most recent `play` applied; 0 before the first
    pub fn current_session(&self) -> SessionSeq {
        self.current
    }

    /// The controlling side dropped its end of the channel
    pub fn is_detached(&self) -> bool {
        self.endpoint.is_controller_gone()
    }
}

impl<E: SynthEngine> Drop for RenderAdapter<E> {
    fn drop(&mut self) {
        self.session.stop(&mut self.engine);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::channel::{CommandSender, ControlChannel, EventReceiver, RenderEvent};
    use crate::testing::{scripted_samples, EngineLedger, ScriptedEngine};
    use std::sync::Arc;

    /// Control-domain ends of the adapter under test
    struct Controls {
        commands: CommandSender,
        events: EventReceiver,
    }

    fn adapter(batch: usize) -> (RenderAdapter<ScriptedEngine>, Controls, Arc<EngineLedger>) {
        let ledger = EngineLedger::new();
        let engine = ScriptedEngine::new(Arc::clone(&ledger), 44100);
        let ends = ControlChannel::new(16);
        let adapter = RenderAdapter::new(engine, ends.render, batch);
        let controls = Controls {
            commands: ends.commands,
            events: ends.events,
        };
        (adapter, controls, ledger)
    }

    fn drain(controls: &mut Controls) -> Vec<RenderEvent> {
        std::iter::from_fn(|| controls.events.try_recv()).collect()
    }

    fn play(expression: &str) -> ControlCommand {
        ControlCommand::Play {
            expression: expression.to_string(),
        }
    }

    #[test]
    fn test_ready_is_announced_once() {
        let (mut adapter, mut controls, _) = adapter(1024);
        adapter.announce_ready();
        adapter.announce_ready();
        assert_eq!(drain(&mut controls), vec![RenderEvent::Ready]);
    }

    #[test]
    fn test_play_renders_and_ends() {
        let (mut adapter, mut controls, _) = adapter(1024);
        let mut frame = vec![0.0_f32; 1024];

        controls.commands.send(play("1024 500")).unwrap();
        adapter.process(&mut frame);
        assert_eq!(frame, scripted_samples(1024));
        assert!(drain(&mut controls).is_empty());

        adapter.process(&mut frame);
        assert_eq!(drain(&mut controls), vec![RenderEvent::Ended]);
        assert!(frame[500..].iter().all(|s| *s == 0.0));
        assert_eq!(adapter.state(), SessionState::Idle);
    }

    #[test]
    fn test_commands_apply_before_render_in_order() {
        let (mut adapter, mut controls, ledger) = adapter(64);
        let mut frame = vec![0.5_f32; 64];

        controls.commands.send(play("100000")).unwrap();
        controls.commands.send(ControlCommand::Stop).unwrap();
        adapter.process(&mut frame);

        assert!(frame.iter().all(|s| *s == 0.0));
        assert_eq!(adapter.state(), SessionState::Idle);
        assert_eq!(ledger.generate_calls(), 0);
        assert_eq!(ledger.live_waveforms(), 0);
    }

    #[test]
    fn test_parse_error_is_emitted() {
        let (mut adapter, mut controls, _) = adapter(64);
        let mut frame = vec![0.0_f32; 64];

        controls.commands.send(play("bogus")).unwrap();
        adapter.process(&mut frame);

        assert_eq!(
            drain(&mut controls),
            vec![RenderEvent::error("unexpected token")]
        );
        assert_eq!(adapter.state(), SessionState::Error);
    }

    #[test]
    fn test_stop_emits_nothing() {
        let (mut adapter, mut controls, _) = adapter(64);
        let mut frame = vec![0.0_f32; 64];

        controls.commands.send(play("100000")).unwrap();
        adapter.process(&mut frame);
        controls.commands.send(ControlCommand::Stop).unwrap();
        adapter.process(&mut frame);

        assert!(drain(&mut controls).is_empty());
    }

    #[test]
    fn test_drop_releases_waveform() {
        let (mut adapter, mut controls, ledger) = adapter(64);
        let mut frame = vec![0.0_f32; 64];

        controls.commands.send(play("100000")).unwrap();
        adapter.process(&mut frame);
        assert_eq!(ledger.live_waveforms(), 1);

        drop(adapter);
        assert_eq!(ledger.live_waveforms(), 0);
    }

    #[test]
    fn test_events_are_stamped_with_their_session() {
        let (mut adapter, mut controls, _) = adapter(64);
        let mut frame = vec![0.0_f32; 64];

        adapter.announce_ready();
        controls.commands.send(play("10")).unwrap();
        adapter.process(&mut frame);
        controls.commands.send(play("bogus")).unwrap();
        adapter.process(&mut frame);

        let stamped: Vec<_> = std::iter::from_fn(|| controls.events.try_recv_stamped()).collect();
        assert_eq!(
            stamped,
            vec![
                (0, RenderEvent::Ready),
                (1, RenderEvent::Ended),
                (2, RenderEvent::error("unexpected token")),
            ]
        );
        assert_eq!(adapter.current_session(), 2);
    }

    #[test]
    fn test_detached_when_controller_drops() {
        let (adapter, controls, _) = adapter(64);
        assert!(!adapter.is_detached());
        drop(controls);
        assert!(adapter.is_detached());
    }
}
