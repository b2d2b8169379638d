//! CPAL-based output backend for desktop platforms (Linux, macOS, Windows)
//!
//! `cpal::Stream` is not `Send` on every platform, so the stream is built and
//! owned by a dedicated thread. The returned handle only carries the shutdown
//! channel and the join handle; dropping it stops the stream.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::error::{InitStage, PlaybackError};

use super::{OutputBackend, OutputStream, RenderCallback};

/// Output backend that plays through a CPAL output device
pub struct CpalBackend {
    device_name: Option<String>,
}

impl CpalBackend {
    /// Use the named device, or the host default when `None`
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

/// Names of the output devices on the default host
pub fn list_output_devices() -> Result<Vec<String>, PlaybackError> {
    let host = cpal::default_host();
    let devices = host.output_devices().map_err(|e| device_error(format!("{:?}", e)))?;
    Ok(devices.filter_map(|device| device.name().ok()).collect())
}

fn device_error(reason: impl Into<String>) -> PlaybackError {
    PlaybackError::Initialization {
        stage: InitStage::OutputDevice,
        reason: reason.into(),
    }
}

fn select_device(name: Option<&str>) -> Result<cpal::Device, PlaybackError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .ok_or_else(|| device_error("No default output device found")),
        Some(wanted) => host
            .output_devices()
            .map_err(|e| device_error(format!("{:?}", e)))?
            .find(|device| device.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| device_error(format!("Output device not found: {}", wanted))),
    }
}

fn build_stream(
    device_name: Option<&str>,
    sample_rate: u32,
    block_size: usize,
    mut render: RenderCallback,
) -> Result<cpal::Stream, PlaybackError> {
    let device = select_device(device_name)?;
    let config = device
        .default_output_config()
        .map_err(|e| device_error(format!("Failed to get default output config: {:?}", e)))?;

    if config.sample_format() != cpal::SampleFormat::F32 {
        return Err(device_error(
            "Only F32 sample format is currently supported for output",
        ));
    }

    let mut stream_config: cpal::StreamConfig = config.into();
    stream_config.sample_rate = cpal::SampleRate(sample_rate);
    let channels_count = stream_config.channels.max(1) as usize;

    // Mono render buffer, fanned out to every device channel
    let mut mono = vec![0.0_f32; block_size.max(1)];

    let err_fn = |err| tracing::error!("Output stream error: {}", err);

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let frame_count = data.len() / channels_count;
                // One-time growth when the device period exceeds the block hint
                if mono.len() < frame_count {
                    mono.resize(frame_count, 0.0);
                }
                let block = &mut mono[..frame_count];
                render(block);

                for (frame, sample) in data.chunks_mut(channels_count).zip(block.iter()) {
                    frame.fill(*sample);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| device_error(format!("{:?}", e)))?;

    stream
        .play()
        .map_err(|e| device_error(format!("Failed to start output stream: {:?}", e)))?;

    Ok(stream)
}

impl OutputBackend for CpalBackend {
    fn open(
        &self,
        sample_rate: u32,
        block_size: usize,
        render: RenderCallback,
    ) -> Result<Box<dyn OutputStream>, PlaybackError> {
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), PlaybackError>>(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let device_name = self.device_name.clone();

        let worker = thread::Builder::new()
            .name("tuun-output".to_string())
            .spawn(move || {
                match build_stream(device_name.as_deref(), sample_rate, block_size, render) {
                    Ok(stream) => {
                        tracing::info!(sample_rate, "Output stream started");
                        let _ = ready_tx.send(Ok(()));
                        // Blocks until the handle drops its sender
                        let _ = shutdown_rx.recv();
                        drop(stream);
                        tracing::info!(sample_rate, "Output stream stopped");
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                    }
                }
            })
            .map_err(|e| device_error(format!("Failed to spawn output thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalStream {
                shutdown: Some(shutdown_tx),
                worker: Some(worker),
                sample_rate,
            })),
            Ok(Err(err)) => {
                let _ = worker.join();
                Err(err)
            }
            Err(_) => {
                let _ = worker.join();
                Err(device_error("Output thread exited before reporting"))
            }
        }
    }
}

struct CpalStream {
    shutdown: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
    sample_rate: u32,
}

impl OutputStream for CpalStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.shutdown.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
