//! Sensor-driven bar animation: run-up, hold, run-down.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use lichtwerk_core::config::SensorLedConfig;
use lichtwerk_core::{Clock, Frame, KeyedLatestSignal, Pixel};

use super::{spawn_worker, wait_stop, Producer, ProducerCore, StartAction};

#[derive(Debug, Clone, Copy)]
struct SensorTimings {
    led_index: usize,
    run_up: Duration,
    run_down: Duration,
    hold: Duration,
    color: Pixel,
}

/// A symmetric bar centered on one LED.
///
/// Expands outward one step per `run_up` tick, holds until `hold` has
/// passed since the last trigger, contracts one step per `run_down`
/// tick. Triggers during HOLD extend the hold; triggers during
/// RUN-DOWN abort the contraction and re-expand from the current
/// geometry.
pub struct SensorLedProducer {
    core: Arc<ProducerCore>,
    timings: SensorTimings,
}

impl SensorLedProducer {
    pub fn new(
        uid: impl Into<String>,
        led_index: usize,
        config: &SensorLedConfig,
        leds_total: usize,
        updates: KeyedLatestSignal<Frame>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            core: Arc::new(ProducerCore::new(uid, leds_total, updates, clock)),
            timings: SensorTimings {
                led_index,
                run_up: config.run_up,
                run_down: config.run_down,
                hold: config.hold,
                color: config.color.into(),
            },
        }
    }
}

impl Producer for SensorLedProducer {
    fn core(&self) -> &ProducerCore {
        &self.core
    }

    fn start(&self) -> Result<(), String> {
        let stop_rx = match self.core.begin_start()? {
            StartAction::AlreadyRunning => return Ok(()),
            StartAction::Spawn(stop_rx) => stop_rx,
        };
        let core = Arc::clone(&self.core);
        let timings = self.timings;
        let join = spawn_worker(self.core.uid(), move || {
            run_sensor(&core, timings, &stop_rx);
        });
        self.core.store_join(join);
        Ok(())
    }
}

fn run_sensor(core: &Arc<ProducerCore>, timings: SensorTimings, stop_rx: &Receiver<()>) {
    let strip_end = core.leds_len() as isize - 1;
    let center = timings.led_index as isize;
    let mut left = center;
    let mut right = center;

    'animation: loop {
        // RUN-UP: writes are clamped, the geometry itself may leave the
        // strip until both ends are past the edges.
        while left >= 0 || right <= strip_end {
            core.set_clamped(left, timings.color);
            core.set_clamped(right, timings.color);
            core.publish();
            left -= 1;
            right += 1;
            if wait_stop(stop_rx, timings.run_up) {
                break 'animation;
            }
        }

        // HOLD: the deadline is recomputed on every wake so triggers
        // that land meanwhile extend it.
        loop {
            let now = core.now();
            let hold_until = core.last_trigger().unwrap_or(now) + timings.hold;
            if now >= hold_until {
                break;
            }
            if wait_stop(stop_rx, hold_until - now) {
                break 'animation;
            }
        }

        // Captured at HOLD exit: a trigger landing between here and the
        // first comparison below already counts as "newer".
        let old_last_trigger = core.last_trigger();

        // RUN-DOWN
        loop {
            if core.last_trigger() > old_last_trigger {
                continue 'animation;
            }
            if left == center && right == center {
                break;
            }
            core.set_clamped(left, Pixel::OFF);
            core.set_clamped(right, Pixel::OFF);
            core.publish();
            left += 1;
            right -= 1;
            if wait_stop(stop_rx, timings.run_down) {
                break 'animation;
            }
        }

        // CHECK-EXIT: the decision and the final blank publish share
        // one critical section with the trigger path.
        if core.finish_if_quiet(old_last_trigger) {
            return;
        }
    }
    core.finish_run();
}
