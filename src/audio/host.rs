// RenderHost - mixes every attached render adapter into the output frame
//
// Adapters are built in the control domain and handed to the audio thread
// through an rtrb queue, the same way the buffer pool hands buffers across:
//
//   AdapterRegistrar --(incoming)--> RenderHost --(retired)--> AdapterRegistrar
//
// Adapters whose controller has hung up are moved back through the retired
// queue so their engine instance is torn down off the audio thread. If that
// queue is full the adapter is dropped in place.

use rtrb::{Consumer, Producer, RingBuffer};

use super::render::RenderAdapter;
use crate::error::PlaybackError;
use crate::synth::SynthEngine;

/// Default number of adapters a host can carry
pub const DEFAULT_MAX_ADAPTERS: usize = 16;

/// Audio-thread side: owns the live adapters
pub struct RenderHost<E: SynthEngine> {
    incoming: Consumer<RenderAdapter<E>>,
    retired: Producer<RenderAdapter<E>>,
    adapters: Vec<RenderAdapter<E>>,
    scratch: Vec<f32>,
}

/// Control-thread side: registers new adapters, reclaims retired ones
pub struct AdapterRegistrar<E: SynthEngine> {
    outgoing: Producer<RenderAdapter<E>>,
    retired: Consumer<RenderAdapter<E>>,
    capacity: usize,
}

/// Create a connected host/registrar pair
///
/// `max_adapters` bounds both the hand-over queue and the host's adapter list,
/// so installing an adapter never reallocates on the audio thread.
/// `max_block` pre-sizes the mixing scratch buffer.
///
/// # Panics
/// Panics if max_adapters is 0
pub fn render_host<E: SynthEngine>(
    max_adapters: usize,
    max_block: usize,
) -> (RenderHost<E>, AdapterRegistrar<E>) {
    assert!(max_adapters > 0, "max_adapters must be greater than 0");

    let (outgoing, incoming) = RingBuffer::new(max_adapters);
    let (retired_tx, retired_rx) = RingBuffer::new(max_adapters);

    let host = RenderHost {
        incoming,
        retired: retired_tx,
        adapters: Vec::with_capacity(max_adapters),
        scratch: vec![0.0_f32; max_block],
    };
    let registrar = AdapterRegistrar {
        outgoing,
        retired: retired_rx,
        capacity: max_adapters,
    };
    (host, registrar)
}

impl<E: SynthEngine> RenderHost<E> {
    /// Render one output frame
    pub fn render(&mut self, out: &mut [f32]) {
        while self.adapters.len() < self.adapters.capacity() {
            let Ok(mut adapter) = self.incoming.pop() else {
                break;
            };
            adapter.announce_ready();
            self.adapters.push(adapter);
        }

        let mut index = 0;
        while index < self.adapters.len() {
            if self.adapters[index].is_detached() {
                let adapter = self.adapters.swap_remove(index);
                if let Err(rtrb::PushError::Full(adapter)) = self.retired.push(adapter) {
                    drop(adapter);
                }
            } else {
                index += 1;
            }
        }

        out.fill(0.0);
        // Only grows when the device period exceeds `max_block`; once grown it
        // stays at that size, so the render path allocates at most once per size.
        if self.scratch.len() < out.len() {
            self.scratch.resize(out.len(), 0.0);
        }
        let scratch = &mut self.scratch[..out.len()];

        for adapter in self.adapters.iter_mut() {
            adapter.process(scratch);
            for (mixed, sample) in out.iter_mut().zip(scratch.iter()) {
                *mixed += *sample;
            }
        }
    }

    /// Adapters currently being rendered
    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }
}

impl<E: SynthEngine> AdapterRegistrar<E> {
    /// Queue an adapter for installation on the next frame
    ///
    /// # Errors
    /// `TooManyControllers` if the hand-over queue is full
    pub fn attach(&mut self, adapter: RenderAdapter<E>) -> Result<(), PlaybackError> {
        self.collect_retired();
        self.outgoing
            .push(adapter)
            .map_err(|_| PlaybackError::TooManyControllers {
                capacity: self.capacity,
            })
    }

    /// Drop adapters the host has retired; returns how many were reclaimed
    pub fn collect_retired(&mut self) -> usize {
        let mut reclaimed = 0;
        while let Ok(adapter) = self.retired.pop() {
            drop(adapter);
            reclaimed += 1;
        }
        reclaimed
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
