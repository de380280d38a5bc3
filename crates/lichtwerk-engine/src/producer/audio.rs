//! VU meter over an injected audio input.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use lichtwerk_capture::{AudioInput, CaptureError};
use lichtwerk_core::config::AudioConfig;
use lichtwerk_core::{Clock, Frame, KeyedLatestSignal, Pixel};
use tracing::warn;

use super::{spawn_worker, wait_stop, Producer, ProducerCore, StartAction};

/// Silence span after which the meter drops to the power-save tick.
const SILENCE_TIMEOUT: Duration = Duration::from_secs(5);
const POWER_SAVE_PERIOD: Duration = Duration::from_secs(2);

/// Builds the audio input for a run. The producer opens the device per
/// run, so a missing device is a transient error of that run only.
pub type AudioInputFactory =
    Arc<dyn Fn() -> Result<Box<dyn AudioInput>, CaptureError> + Send + Sync>;

pub struct AudioLedProducer {
    core: Arc<ProducerCore>,
    config: AudioConfig,
    factory: AudioInputFactory,
}

impl AudioLedProducer {
    pub fn new(
        uid: impl Into<String>,
        config: &AudioConfig,
        leds_total: usize,
        updates: KeyedLatestSignal<Frame>,
        clock: Arc<dyn Clock>,
        factory: AudioInputFactory,
    ) -> Self {
        Self {
            core: Arc::new(ProducerCore::new(uid, leds_total, updates, clock)),
            config: config.clone(),
            factory,
        }
    }
}

impl Producer for AudioLedProducer {
    fn core(&self) -> &ProducerCore {
        &self.core
    }

    fn start(&self) -> Result<(), String> {
        let stop_rx = match self.core.begin_start()? {
            StartAction::AlreadyRunning => return Ok(()),
            StartAction::Spawn(stop_rx) => stop_rx,
        };
        let core = Arc::clone(&self.core);
        let config = self.config.clone();
        let factory = Arc::clone(&self.factory);
        let join = spawn_worker(self.core.uid(), move || {
            run_audio(&core, &config, &factory, &stop_rx);
        });
        self.core.store_join(join);
        Ok(())
    }
}

fn run_audio(
    core: &Arc<ProducerCore>,
    config: &AudioConfig,
    factory: &AudioInputFactory,
    stop_rx: &Receiver<()>,
) {
    let mut input = match factory() {
        Ok(input) => input,
        Err(error) => {
            warn!(uid = core.uid(), %error, "audio input unavailable");
            core.finish_run();
            return;
        }
    };
    let channels = usize::from(input.channels().max(1));
    let mut samples: Vec<f32> = Vec::new();
    let mut period = config.update_freq;
    let mut silent_since: Option<Instant> = None;

    loop {
        if wait_stop(stop_rx, period) {
            break;
        }
        samples.clear();
        let frames = match input.read_frames(&mut samples) {
            Ok(frames) => frames,
            Err(error) => {
                warn!(uid = core.uid(), %error, "audio read failed");
                break;
            }
        };

        let rms = mono_rms(&samples, channels, frames);
        if rms > 0.0 {
            silent_since = None;
            period = config.update_freq;
        } else {
            let now = core.now();
            let since = *silent_since.get_or_insert(now);
            if now.duration_since(since) >= SILENCE_TIMEOUT {
                period = POWER_SAVE_PERIOD;
            }
        }

        let level = level_from_rms(rms, config.min_db, config.max_db);
        core.with_leds(|leds| render_vu(leds, config, level));
        core.publish();
    }
    core.finish_run();
}

/// Downmixes interleaved samples to mono and computes the RMS.
fn mono_rms(samples: &[f32], channels: usize, frames: usize) -> f32 {
    if frames == 0 {
        return 0.0;
    }
    let mut sum = 0.0f64;
    for frame in samples.chunks_exact(channels).take(frames) {
        let mono = frame.iter().sum::<f32>() / channels as f32;
        sum += f64::from(mono) * f64::from(mono);
    }
    (sum / frames as f64).sqrt() as f32
}

/// dB conversion with the configured window normalized to `0..=1`.
fn level_from_rms(rms: f32, min_db: f32, max_db: f32) -> f32 {
    let db = 20.0 * rms.max(1e-3).log10();
    ((db - min_db) / (max_db - min_db)).clamp(0.0, 1.0)
}

/// Lights `ceil(level * span)` pixels of the meter range, colored by
/// position: green below 70% of the bar, yellow below 90%, red above.
fn render_vu(leds: &mut Frame, config: &AudioConfig, level: f32) {
    let span = config.end_led - config.start_led;
    let lit = (level * span as f32).ceil() as usize;
    for offset in 0..span {
        let pixel = if offset < lit {
            let position = offset as f32 / span as f32;
            if position < 0.7 {
                Pixel::from(config.green_color)
            } else if position < 0.9 {
                Pixel::from(config.yellow_color)
            } else {
                Pixel::from(config.red_color)
            }
        } else {
            Pixel::OFF
        };
        leds.set(config.start_led + offset, pixel);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use lichtwerk_capture::{AudioInput, CaptureError};
    use lichtwerk_core::config::AudioConfig;
    use lichtwerk_core::{Frame, KeyedLatestSignal, SystemClock};

    use super::{level_from_rms, mono_rms, render_vu, AudioLedProducer};
    use crate::producer::Producer;

    #[test]
    fn rms_downmixes_across_channels() {
        // Two stereo frames: (1, -1) averages to 0, (0.5, 0.5) to 0.5.
        let samples = [1.0, -1.0, 0.5, 0.5];
        let rms = mono_rms(&samples, 2, 2);
        assert!((rms - (0.125f32).sqrt()).abs() < 1e-6);
    }

    #[test]
    fn silence_maps_to_zero_level_and_full_scale_to_one() {
        assert_eq!(level_from_rms(0.0, -60.0, 0.0), 0.0);
        assert_eq!(level_from_rms(1.0, -60.0, 0.0), 1.0);
        // Half scale lands strictly inside the window.
        let half = level_from_rms(0.5, -60.0, 0.0);
        assert!(half > 0.8 && half < 1.0);
    }

    #[test]
    fn bar_bands_follow_position_not_level() {
        let config = AudioConfig {
            start_led: 0,
            end_led: 10,
            ..AudioConfig::default()
        };
        let mut leds = Frame::new(10);
        render_vu(&mut leds, &config, 1.0);

        assert_eq!(leds.get(0), config.green_color.into());
        assert_eq!(leds.get(6), config.green_color.into());
        assert_eq!(leds.get(7), config.yellow_color.into());
        assert_eq!(leds.get(8), config.yellow_color.into());
        assert_eq!(leds.get(9), config.red_color.into());
    }

    #[test]
    fn low_level_lights_a_short_green_bar() {
        let config = AudioConfig {
            start_led: 2,
            end_led: 12,
            ..AudioConfig::default()
        };
        let mut leds = Frame::new(12);
        render_vu(&mut leds, &config, 0.25);

        // ceil(0.25 * 10) = 3 pixels.
        for offset in 0..3 {
            assert_eq!(leds.get(2 + offset), config.green_color.into());
        }
        for offset in 3..10 {
            assert!(leds.get(2 + offset).is_off());
        }
    }

    struct ScriptedInput {
        buffers: VecDeque<Vec<f32>>,
        fail_when_empty: bool,
    }

    impl AudioInput for ScriptedInput {
        fn channels(&self) -> u16 {
            1
        }

        fn read_frames(&mut self, out: &mut Vec<f32>) -> Result<usize, CaptureError> {
            match self.buffers.pop_front() {
                Some(buffer) => {
                    let frames = buffer.len();
                    out.extend(buffer);
                    Ok(frames)
                }
                None if self.fail_when_empty => Err(CaptureError::StreamFailed),
                None => Ok(0),
            }
        }
    }

    #[test]
    fn stream_failure_ends_the_run_with_a_black_strip() {
        let config = AudioConfig {
            start_led: 0,
            end_led: 8,
            update_freq: Duration::from_millis(5),
            ..AudioConfig::default()
        };
        let producer = AudioLedProducer::new(
            "audio",
            &config,
            8,
            KeyedLatestSignal::new(),
            Arc::new(SystemClock),
            Arc::new(|| {
                Ok(Box::new(ScriptedInput {
                    buffers: VecDeque::from([vec![0.5f32; 64]]),
                    fail_when_empty: true,
                }) as Box<dyn AudioInput>)
            }),
        );
        producer.start().expect("start");

        let deadline = std::time::Instant::now() + Duration::from_millis(500);
        while producer.is_running() {
            assert!(
                std::time::Instant::now() < deadline,
                "producer must exit on stream failure"
            );
            std::thread::sleep(Duration::from_millis(2));
        }
        let mut frame = Frame::new(8);
        producer.copy_leds(&mut frame);
        assert!(frame.is_all_off());
    }

    #[test]
    fn missing_device_is_a_clean_no_op_run() {
        let config = AudioConfig {
            start_led: 0,
            end_led: 8,
            ..AudioConfig::default()
        };
        let producer = AudioLedProducer::new(
            "audio",
            &config,
            8,
            KeyedLatestSignal::new(),
            Arc::new(SystemClock),
            Arc::new(|| {
                Err(CaptureError::NoDevice {
                    query: "usb".to_string(),
                })
            }),
        );
        producer.start().expect("start never fails on device errors");

        let deadline = std::time::Instant::now() + Duration::from_millis(500);
        while producer.is_running() {
            assert!(std::time::Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}
