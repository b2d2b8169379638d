//! Deterministic engine fixture driven by a batch script.
//!
//! The expression is a list of whitespace or comma separated tokens:
//! - an integer `N` produces `N` samples. A step longer than the requested
//!   batch is split over several `generate` calls; a step that comes back
//!   shorter than requested ends the signal, exactly like a real engine.
//! - `fail` makes the next `generate` call fail.
//!
//! Samples follow [`scripted_sample`], a sawtooth indexed from the start of
//! each waveform, so tests can rebuild the exact stream they expect.
//! Every build, parse and release is recorded in a shared [`EngineLedger`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::EngineError;
use crate::synth::{EngineFactory, SynthEngine};

/// Sawtooth period in samples (100 Hz at 44.1 kHz)
pub const SAW_PERIOD: u64 = 441;

/// Sample value at `index` samples into a scripted waveform
pub fn scripted_sample(index: u64) -> f32 {
    let phase = (index % SAW_PERIOD) as f32 / SAW_PERIOD as f32;
    phase * 2.0 - 1.0
}

/// Expected stream for the first `count` samples of a scripted waveform
pub fn scripted_samples(count: usize) -> Vec<f32> {
    (0..count as u64).map(scripted_sample).collect()
}

/// One entry in the ledger's ordered log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerEntry {
    Built { sample_rate: u32 },
    Parsed { waveform: u64 },
    ParseFailed,
    Released { waveform: u64 },
}

/// Shared bookkeeping for every engine built from one factory
#[derive(Debug, Default)]
pub struct EngineLedger {
    builds: AtomicUsize,
    parses: AtomicUsize,
    parse_failures: AtomicUsize,
    releases: AtomicUsize,
    generate_calls: AtomicUsize,
    live_engines: AtomicUsize,
    next_waveform: AtomicU64,
    fail_builds: AtomicBool,
    log: Mutex<Vec<LedgerEntry>>,
}

impl EngineLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn parses(&self) -> usize {
        self.parses.load(Ordering::SeqCst)
    }

    pub fn parse_failures(&self) -> usize {
        self.parse_failures.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    /// Waveforms parsed but not yet released
    pub fn live_waveforms(&self) -> usize {
        self.parses().saturating_sub(self.releases())
    }

    /// Engine instances constructed and not yet dropped
    pub fn live_engines(&self) -> usize {
        self.live_engines.load(Ordering::SeqCst)
    }

    /// Make every following `build` fail until switched off again
    pub fn set_fail_builds(&self, fail: bool) {
        self.fail_builds.store(fail, Ordering::SeqCst);
    }

    /// Ordered copy of everything recorded so far
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Only the parse/release entries, in order
    pub fn waveform_entries(&self) -> Vec<LedgerEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| !matches!(entry, LedgerEntry::Built { .. }))
            .collect()
    }

    fn record(&self, entry: LedgerEntry) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Samples(usize),
    Fail,
}

/// Waveform handle produced by [`ScriptedEngine`]
#[derive(Debug)]
pub struct ScriptedWaveform {
    id: u64,
    steps: VecDeque<Step>,
    position: u64,
}

impl ScriptedWaveform {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Samples generated so far
    pub fn position(&self) -> u64 {
        self.position
    }
}

/// Engine fixture; see the module docs for the expression grammar
pub struct ScriptedEngine {
    ledger: Arc<EngineLedger>,
    sample_rate: u32,
}

impl ScriptedEngine {
    pub fn new(ledger: Arc<EngineLedger>, sample_rate: u32) -> Self {
        ledger.live_engines.fetch_add(1, Ordering::SeqCst);
        Self {
            ledger,
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn parse_steps(expression: &str) -> Result<VecDeque<Step>, EngineError> {
        let tokens: Vec<&str> = expression
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|token| !token.is_empty())
            .collect();

        if tokens.is_empty() {
            return Err(EngineError::Parse {
                message: "empty expression".to_string(),
            });
        }

        tokens
            .into_iter()
            .map(|token| match token {
                "fail" => Ok(Step::Fail),
                other => other
                    .parse::<usize>()
                    .map(Step::Samples)
                    .map_err(|_| EngineError::Parse {
                        message: "unexpected token".to_string(),
                    }),
            })
            .collect()
    }
}

impl SynthEngine for ScriptedEngine {
    type Waveform = ScriptedWaveform;

    fn parse(&mut self, expression: &str) -> Result<ScriptedWaveform, EngineError> {
        match Self::parse_steps(expression) {
            Ok(steps) => {
                let id = self.ledger.next_waveform.fetch_add(1, Ordering::SeqCst) + 1;
                self.ledger.parses.fetch_add(1, Ordering::SeqCst);
                self.ledger.record(LedgerEntry::Parsed { waveform: id });
                Ok(ScriptedWaveform {
                    id,
                    steps,
                    position: 0,
                })
            }
            Err(err) => {
                self.ledger.parse_failures.fetch_add(1, Ordering::SeqCst);
                self.ledger.record(LedgerEntry::ParseFailed);
                Err(err)
            }
        }
    }

    fn generate(
        &mut self,
        waveform: &mut ScriptedWaveform,
        out: &mut [f32],
    ) -> Result<usize, EngineError> {
        self.ledger.generate_calls.fetch_add(1, Ordering::SeqCst);

        let count = match waveform.steps.front_mut() {
            None => 0,
            Some(Step::Fail) => {
                waveform.steps.pop_front();
                return Err(EngineError::Generation {
                    message: "scripted fault".to_string(),
                });
            }
            Some(Step::Samples(remaining)) => {
                let count = (*remaining).min(out.len());
                *remaining -= count;
                if *remaining == 0 {
                    waveform.steps.pop_front();
                }
                count
            }
        };

        for slot in out[..count].iter_mut() {
            *slot = scripted_sample(waveform.position);
            waveform.position += 1;
        }
        Ok(count)
    }

    fn release(&mut self, waveform: ScriptedWaveform) {
        self.ledger.releases.fetch_add(1, Ordering::SeqCst);
        self.ledger.record(LedgerEntry::Released {
            waveform: waveform.id,
        });
    }
}

impl Drop for ScriptedEngine {
    fn drop(&mut self) {
        self.ledger.live_engines.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Factory handing out [`ScriptedEngine`]s that share one ledger
#[derive(Clone)]
pub struct ScriptedFactory {
    ledger: Arc<EngineLedger>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::with_ledger(EngineLedger::new())
    }

    pub fn with_ledger(ledger: Arc<EngineLedger>) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> Arc<EngineLedger> {
        Arc::clone(&self.ledger)
    }
}

impl Default for ScriptedFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineFactory for ScriptedFactory {
    type Engine = ScriptedEngine;

    fn build(&self, sample_rate: u32) -> Result<ScriptedEngine, EngineError> {
        if self.ledger.fail_builds.load(Ordering::SeqCst) {
            return Err(EngineError::Build {
                reason: "scripted build failure".to_string(),
            });
        }
        self.ledger.builds.fetch_add(1, Ordering::SeqCst);
        self.ledger.record(LedgerEntry::Built { sample_rate });
        Ok(ScriptedEngine::new(Arc::clone(&self.ledger), sample_rate))
    }
}
