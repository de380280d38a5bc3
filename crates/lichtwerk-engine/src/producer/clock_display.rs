//! Two-pixel wall clock on the strip.

use std::sync::Arc;
use std::time::Duration;

use chrono::Timelike;
use crossbeam_channel::{select, tick, Receiver};
use lichtwerk_core::config::ClockDisplayConfig;
use lichtwerk_core::{Clock, Frame, KeyedLatestSignal};

use super::{spawn_worker, Producer, ProducerCore, StartAction};

const REFRESH: Duration = Duration::from_secs(60);

pub struct ClockProducer {
    core: Arc<ProducerCore>,
    config: ClockDisplayConfig,
}

impl ClockProducer {
    pub fn new(
        uid: impl Into<String>,
        config: &ClockDisplayConfig,
        leds_total: usize,
        updates: KeyedLatestSignal<Frame>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            core: Arc::new(ProducerCore::new(uid, leds_total, updates, clock)),
            config: config.clone(),
        }
    }
}

impl Producer for ClockProducer {
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
        let join = spawn_worker(self.core.uid(), move || {
            run_clock(&core, &config, &stop_rx);
        });
        self.core.store_join(join);
        Ok(())
    }
}

fn run_clock(core: &Arc<ProducerCore>, config: &ClockDisplayConfig, stop_rx: &Receiver<()>) {
    let ticker = tick(REFRESH);
    loop {
        let now = core.clock().civil_now();
        render_time(core, config, now.hour(), now.minute());
        core.publish();

        select! {
            recv(stop_rx) -> _ => break,
            recv(ticker) -> _ => {}
        }
    }
    core.finish_run();
}

fn render_time(core: &ProducerCore, config: &ClockDisplayConfig, hour: u32, minute: u32) {
    let hour_led = map_linear(
        hour * 60 + minute,
        24 * 60,
        config.start_hour_led,
        config.end_hour_led,
    );
    let minute_led = map_linear(minute, 60, config.start_minute_led, config.end_minute_led);
    core.with_leds(|leds| {
        leds.clear();
        leds.blend_max(hour_led, config.hour_color.into());
        leds.blend_max(minute_led, config.minute_color.into());
    });
}

/// Maps `value` out of `domain` linearly onto the inclusive led range
/// `start..=end`.
fn map_linear(value: u32, domain: u32, start: usize, end: usize) -> usize {
    let span = end.saturating_sub(start) + 1;
    let offset = (value as usize * span) / domain as usize;
    start + offset.min(span - 1)
}
