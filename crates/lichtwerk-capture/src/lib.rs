//! Audio input boundary: picks a capture device, keeps the cpal stream
//! alive on its own thread and hands interleaved samples to the engine
//! through a lock-free ring.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Sender;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use thiserror::Error;
use tracing::warn;

/// Number of capture buffers the ring can hold before the callback
/// starts dropping samples.
const RING_BUFFERS: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSpec {
    /// Case-insensitive substring of the device name; empty matches
    /// the first input device.
    pub device_substring: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub frames_per_buffer: usize,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device matching {query:?}")]
    NoDevice { query: String },

    #[error("failed to query input devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start input stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("input stream reported an error and was shut down")]
    StreamFailed,

    #[error("failed to spawn capture thread: {0}")]
    Thread(#[from] std::io::Error),

    #[error("capture thread exited during startup")]
    StartupLost,
}

/// A source of interleaved f32 audio frames.
///
/// Implemented by [`CpalAudioInput`] for real devices and by scripted
/// doubles in tests.
pub trait AudioInput: Send + 'static {
    fn channels(&self) -> u16;

    /// Appends whatever samples are currently buffered, up to one
    /// capture buffer, and returns the number of whole frames added.
    /// Zero means no data was available.
    fn read_frames(&mut self, out: &mut Vec<f32>) -> Result<usize, CaptureError>;
}

/// Capture through cpal.
///
/// cpal streams are not `Send`, so a dedicated thread builds the
/// stream, reports the outcome over a bounded(1) startup channel and
/// then parks on a shutdown channel for as long as the stream must
/// stay alive. The data callback pushes into an SPSC ring; samples
/// that do not fit are dropped and counted.
pub struct CpalAudioInput {
    channels: u16,
    frames_per_buffer: usize,
    samples: HeapCons<f32>,
    overruns: Arc<AtomicUsize>,
    failed: Arc<AtomicBool>,
    shutdown_tx: Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl CpalAudioInput {
    pub fn open(spec: &CaptureSpec) -> Result<Self, CaptureError> {
        let capacity = spec.frames_per_buffer.max(1) * usize::from(spec.channels.max(1)) * RING_BUFFERS;
        let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
        let overruns = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicBool::new(false));

        let (startup_tx, startup_rx) = crossbeam_channel::bounded::<Result<(), CaptureError>>(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let thread_spec = spec.clone();
        let thread_overruns = Arc::clone(&overruns);
        let thread_failed = Arc::clone(&failed);
        let join = std::thread::Builder::new()
            .name("lichtwerk-capture".to_string())
            .spawn(move || {
                let stream =
                    match open_stream(&thread_spec, producer, thread_overruns, thread_failed) {
                        Ok(stream) => {
                            let _ = startup_tx.send(Ok(()));
                            stream
                        }
                        Err(error) => {
                            let _ = startup_tx.send(Err(error));
                            return;
                        }
                    };
                // Keep the stream alive until the handle is dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
            })?;

        match startup_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                let _ = join.join();
                return Err(error);
            }
            Err(_) => {
                let _ = join.join();
                return Err(CaptureError::StartupLost);
            }
        }

        Ok(Self {
            channels: spec.channels.max(1),
            frames_per_buffer: spec.frames_per_buffer.max(1),
            samples: consumer,
            overruns,
            failed,
            shutdown_tx,
            join: Some(join),
        })
    }
}

impl AudioInput for CpalAudioInput {
    fn channels(&self) -> u16 {
        self.channels
    }

    fn read_frames(&mut self, out: &mut Vec<f32>) -> Result<usize, CaptureError> {
        if self.failed.load(Ordering::Acquire) {
            return Err(CaptureError::StreamFailed);
        }
        let dropped = self.overruns.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            warn!(dropped, "capture ring overrun, newest samples dropped");
        }

        let channels = usize::from(self.channels);
        let want = self.frames_per_buffer * channels;
        let start = out.len();
        out.resize(start + want, 0.0);
        let got = self.samples.pop_slice(&mut out[start..]);
        // Only hand out whole frames.
        let whole = got - got % channels;
        out.truncate(start + whole);
        Ok(whole / channels)
    }
}

impl Drop for CpalAudioInput {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.try_send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Names of all available input devices, for diagnostics and device
/// pick UIs.
pub fn list_input_devices() -> Result<Vec<String>, CaptureError> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    for device in host.input_devices()? {
        if let Ok(name) = device.name() {
            names.push(name);
        }
    }
    Ok(names)
}

fn open_stream(
    spec: &CaptureSpec,
    mut producer: HeapProd<f32>,
    overruns: Arc<AtomicUsize>,
    failed: Arc<AtomicBool>,
) -> Result<cpal::Stream, CaptureError> {
    let host = cpal::default_host();
    let device = host
        .input_devices()?
        .find(|device| {
            device
                .name()
                .map(|name| device_name_matches(&name, &spec.device_substring))
                .unwrap_or(false)
        })
        .ok_or_else(|| CaptureError::NoDevice {
            query: spec.device_substring.clone(),
        })?;

    let config = cpal::StreamConfig {
        channels: spec.channels.max(1),
        sample_rate: cpal::SampleRate(spec.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            let pushed = producer.push_slice(data);
            if pushed < data.len() {
                overruns.fetch_add(data.len() - pushed, Ordering::Relaxed);
            }
        },
        move |error| {
            warn!(%error, "input stream failed");
            failed.store(true, Ordering::Release);
        },
        None,
    )?;
    stream.play()?;
    Ok(stream)
}

fn device_name_matches(name: &str, query: &str) -> bool {
    if query.is_empty() {
        return true;
    }
    name.to_lowercase().contains(&query.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::device_name_matches;

    #[test]
    fn empty_query_matches_any_device() {
        assert!(device_name_matches("USB Audio CODEC", ""));
    }

    #[test]
    fn matching_is_case_insensitive_substring() {
        assert!(device_name_matches("USB Audio CODEC", "usb audio"));
        assert!(device_name_matches("USB Audio CODEC", "CODEC"));
        assert!(!device_name_matches("USB Audio CODEC", "built-in"));
    }
}
