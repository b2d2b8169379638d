//! Deterministic collaborators for tests and offline rendering.
//!
//! The real synthesis engine is external to this crate, so everything that
//! needs an engine without one (unit tests, integration tests, the offline
//! `render` command) uses the scripted engine from here.

pub mod scripted_engine;

pub use scripted_engine::{
    scripted_sample, scripted_samples, EngineLedger, LedgerEntry, ScriptedEngine,
    ScriptedFactory, ScriptedWaveform, SAW_PERIOD,
};
