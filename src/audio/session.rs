// PlaybackSession - per-adapter playback state machine
//
// States:
//   Idle    - no waveform held, renders silence
//   Playing - holds exactly one waveform, renders from the chunk buffer
//   Error   - last play/generate failed, no waveform held, renders silence
//
// Every transition out of Playing releases the waveform back to the engine
// before anything else happens. A new play always stops the current session
// first, so the old waveform is released before the new expression is parsed.
//
// Outcomes carry the engine's error value as-is; turning it into message text
// is left to the control side so the render path never formats strings.

use serde::{Deserialize, Serialize};

use super::chunk_buffer::{ChunkBuffer, PullStatus};
use crate::error::EngineError;
use crate::synth::SynthEngine;

/// Observable session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Playing,
    Error,
}

/// How a session finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Signal ran out; the last samples went out in this tick
    Ended,
    /// Parse or generation failure
    Failed(EngineError),
}

/// Playback session bound to one engine instance
pub struct PlaybackSession<E: SynthEngine> {
    state: SessionState,
    waveform: Option<E::Waveform>,
    buffer: ChunkBuffer,
}

impl<E: SynthEngine> PlaybackSession<E> {
    pub fn new(batch_size: usize) -> Self {
        Self {
            state: SessionState::Idle,
            waveform: None,
            buffer: ChunkBuffer::new(batch_size),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn holds_waveform(&self) -> bool {
        self.waveform.is_some()
    }

    /// Start playing `expression`, replacing whatever is playing now
    ///
    /// Returns the failure when the expression does not parse.
    pub fn play(&mut self, engine: &mut E, expression: &str) -> Option<SessionOutcome> {
        self.stop(engine);

        match engine.parse(expression) {
            Ok(waveform) => {
                self.waveform = Some(waveform);
                self.buffer.reset();
                self.state = SessionState::Playing;
                None
            }
            Err(err) => {
                self.state = SessionState::Error;
                Some(SessionOutcome::Failed(err))
            }
        }
    }

    /// Release the waveform (if any) and go idle; never produces an event
    pub fn stop(&mut self, engine: &mut E) {
        if let Some(waveform) = self.waveform.take() {
            engine.release(waveform);
        }
        self.buffer.reset();
        self.state = SessionState::Idle;
    }

    /// Fill one output frame
    ///
    /// Returns `Ended` in the frame that carries the last real samples, or the
    /// failure if generation failed. Non-playing sessions write silence.
    pub fn render(&mut self, engine: &mut E, out: &mut [f32]) -> Option<SessionOutcome> {
        let waveform = match (self.state, self.waveform.as_mut()) {
            (SessionState::Playing, Some(waveform)) => waveform,
            _ => {
                out.fill(0.0);
                return None;
            }
        };

        match self.buffer.pull(engine, waveform, out) {
            Ok(PullStatus::Filled) => None,
            Ok(PullStatus::Finished { .. }) => {
                self.stop(engine);
                Some(SessionOutcome::Ended)
            }
            Err(err) => {
                out.fill(0.0);
                if let Some(waveform) = self.waveform.take() {
                    engine.release(waveform);
                }
                self.buffer.reset();
                self.state = SessionState::Error;
                Some(SessionOutcome::Failed(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scripted_samples, EngineLedger, LedgerEntry, ScriptedEngine};
    use std::sync::Arc;

    fn setup() -> (ScriptedEngine, Arc<EngineLedger>, PlaybackSession<ScriptedEngine>) {
        let ledger = EngineLedger::new();
        let engine = ScriptedEngine::new(Arc::clone(&ledger), 44100);
        (engine, ledger, PlaybackSession::new(1024))
    }

    #[test]
    fn test_idle_renders_silence() {
        let (mut engine, ledger, mut session) = setup();
        let mut frame = vec![0.7_f32; 128];

        assert_eq!(session.render(&mut engine, &mut frame), None);
        assert!(frame.iter().all(|s| *s == 0.0));
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(ledger.generate_calls(), 0);
    }

    #[test]
    fn test_play_to_end_emits_ended_once() {
        let (mut engine, ledger, mut session) = setup();
        let mut frame = vec![0.0_f32; 1024];

        assert_eq!(session.play(&mut engine, "1024 500"), None);
        assert_eq!(session.state(), SessionState::Playing);

        assert_eq!(session.render(&mut engine, &mut frame), None);
        assert_eq!(frame, scripted_samples(1024));

        assert_eq!(
            session.render(&mut engine, &mut frame),
            Some(SessionOutcome::Ended)
        );
        assert_eq!(&frame[..500], &scripted_samples(1524)[1024..]);
        assert!(frame[500..].iter().all(|s| *s == 0.0));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.holds_waveform());
        assert_eq!(ledger.live_waveforms(), 0);

        assert_eq!(session.render(&mut engine, &mut frame), None);
    }

    #[test]
    fn test_parse_failure_enters_error() {
        let (mut engine, ledger, mut session) = setup();

        let event = session.play(&mut engine, "nonsense");
        assert_eq!(
            event,
            Some(SessionOutcome::Failed(EngineError::Parse {
                message: "unexpected token".to_string()
            }))
        );
        assert_eq!(session.state(), SessionState::Error);
        assert!(!session.holds_waveform());
        assert_eq!(ledger.live_waveforms(), 0);
    }

    #[test]
    fn test_generation_failure_releases_and_reports() {
        let (mut engine, ledger, mut session) = setup();
        let mut frame = vec![0.3_f32; 256];

        session.play(&mut engine, "fail");
        let event = session.render(&mut engine, &mut frame);

        assert_eq!(
            event,
            Some(SessionOutcome::Failed(EngineError::Generation {
                message: "scripted fault".to_string()
            }))
        );
        assert!(frame.iter().all(|s| *s == 0.0));
        assert_eq!(session.state(), SessionState::Error);
        assert_eq!(ledger.live_waveforms(), 0);
    }

    #[test]
    fn test_play_while_playing_releases_before_parse() {
        let (mut engine, ledger, mut session) = setup();

        session.play(&mut engine, "100000");
        session.play(&mut engine, "100000");

        assert_eq!(
            ledger.waveform_entries(),
            vec![
                LedgerEntry::Parsed { waveform: 1 },
                LedgerEntry::Released { waveform: 1 },
                LedgerEntry::Parsed { waveform: 2 },
            ]
        );
        assert_eq!(ledger.live_waveforms(), 1);
    }

    #[test]
    fn test_play_restarts_from_beginning() {
        let (mut engine, _, mut session) = setup();
        let mut frame = vec![0.0_f32; 300];

        session.play(&mut engine, "5000");
        session.render(&mut engine, &mut frame);
        session.play(&mut engine, "5000");
        session.render(&mut engine, &mut frame);

        assert_eq!(frame, scripted_samples(300));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (mut engine, ledger, mut session) = setup();

        session.play(&mut engine, "5000");
        session.stop(&mut engine);
        session.stop(&mut engine);

        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(ledger.releases(), 1);
    }

    #[test]
    fn test_error_recovers_on_next_play() {
        let (mut engine, _, mut session) = setup();

        session.play(&mut engine, "bad");
        assert_eq!(session.state(), SessionState::Error);

        assert_eq!(session.play(&mut engine, "64"), None);
        assert_eq!(session.state(), SessionState::Playing);
    }
}
