use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{InitStage, PlaybackError};

use super::{OutputBackend, OutputStream, RenderCallback};

/// Output backend driven by hand.
///
/// Nothing runs on its own: every call to [`ManualClock::tick`] invokes the
/// render callback of the currently open stream exactly once. Used by tests
/// and by the offline `render` command.
pub struct ManualBackend {
    clock: ManualClock,
    fail_next_open: AtomicBool,
}

impl ManualBackend {
    pub fn new() -> Self {
        Self {
            clock: ManualClock::default(),
            fail_next_open: AtomicBool::new(false),
        }
    }

    /// Clock handle for driving whatever stream is open
    pub fn clock(&self) -> ManualClock {
        self.clock.clone()
    }

    /// Make the next `open` call fail once
    pub fn fail_next_open(&self) {
        self.fail_next_open.store(true, Ordering::SeqCst);
    }
}

impl Default for ManualBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputBackend for ManualBackend {
    fn open(
        &self,
        sample_rate: u32,
        block_size: usize,
        render: RenderCallback,
    ) -> Result<Box<dyn OutputStream>, PlaybackError> {
        if self.fail_next_open.swap(false, Ordering::SeqCst) {
            return Err(PlaybackError::Initialization {
                stage: InitStage::OutputDevice,
                reason: "manual backend refused to open".to_string(),
            });
        }

        let generation = self.clock.opened.fetch_add(1, Ordering::SeqCst) + 1;
        *self.clock.slot() = Some(ManualSlot {
            generation,
            sample_rate,
            block_size,
            render,
        });

        Ok(Box::new(ManualStream {
            clock: self.clock.clone(),
            generation,
            sample_rate,
        }))
    }
}

struct ManualSlot {
    generation: usize,
    sample_rate: u32,
    block_size: usize,
    render: RenderCallback,
}

/// Shared clock handle; cloning is cheap
#[derive(Clone, Default)]
pub struct ManualClock {
    slot: Arc<Mutex<Option<ManualSlot>>>,
    opened: Arc<AtomicUsize>,
}

impl ManualClock {
    fn slot(&self) -> MutexGuard<'_, Option<ManualSlot>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Render one block of the stream's block size
    ///
    /// Returns `None` when no stream is open.
    pub fn tick(&self) -> Option<Vec<f32>> {
        let mut slot = self.slot();
        let slot = slot.as_mut()?;
        let mut block = vec![0.0_f32; slot.block_size];
        (slot.render)(&mut block);
        Some(block)
    }

    /// Render into a caller-provided buffer of any length
    ///
    /// Returns false (and leaves `out` untouched) when no stream is open.
    pub fn tick_into(&self, out: &mut [f32]) -> bool {
        match self.slot().as_mut() {
            Some(slot) => {
                (slot.render)(out);
                true
            }
            None => false,
        }
    }

    /// Sample rate of the open stream
    pub fn sample_rate(&self) -> Option<u32> {
        self.slot().as_ref().map(|slot| slot.sample_rate)
    }

    pub fn is_open(&self) -> bool {
        self.slot().is_some()
    }

    /// Streams opened over the clock's lifetime
    pub fn opened_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

struct ManualStream {
    clock: ManualClock,
    generation: usize,
    sample_rate: u32,
}

impl OutputStream for ManualStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for ManualStream {
    fn drop(&mut self) {
        let mut slot = self.clock.slot();
        if slot
            .as_ref()
            .is_some_and(|current| current.generation == self.generation)
        {
            *slot = None;
        }
    }
}
