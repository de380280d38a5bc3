//! Schedule-driven night light: dim color between sunset and sunrise.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use crossbeam_channel::Receiver;
use lichtwerk_core::config::NightlightConfig;
use lichtwerk_core::{Clock, Frame, KeyedLatestSignal, Pixel};

use crate::solar::SolarSchedule;

use super::{spawn_worker, wait_stop, Producer, ProducerCore, StartAction};

/// Floor on the recompute interval so clock jitter around a solar
/// boundary cannot busy-loop the worker.
const MIN_RECHECK: Duration = Duration::from_secs(1);

pub struct NightlightProducer {
    core: Arc<ProducerCore>,
    config: NightlightConfig,
    schedule: Arc<dyn SolarSchedule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Before today's sunrise: lit, wake at sunrise.
    NightUntilSunrise,
    /// Daylight: blank, wake at sunset.
    Day,
    /// After sunset: lit, wake at tomorrow's sunrise.
    NightUntilNextSunrise,
}

fn phase_of(now: DateTime<Local>, sunrise: DateTime<Local>, sunset: DateTime<Local>) -> Phase {
    if now < sunrise {
        Phase::NightUntilSunrise
    } else if now < sunset {
        Phase::Day
    } else {
        Phase::NightUntilNextSunrise
    }
}

impl NightlightProducer {
    pub fn new(
        uid: impl Into<String>,
        config: &NightlightConfig,
        leds_total: usize,
        updates: KeyedLatestSignal<Frame>,
        clock: Arc<dyn Clock>,
        schedule: Arc<dyn SolarSchedule>,
    ) -> Self {
        Self {
            core: Arc::new(ProducerCore::new(uid, leds_total, updates, clock)),
            config: config.clone(),
            schedule,
        }
    }
}

impl Producer for NightlightProducer {
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
        let schedule = Arc::clone(&self.schedule);
        let join = spawn_worker(self.core.uid(), move || {
            run_nightlight(&core, &config, schedule.as_ref(), &stop_rx);
        });
        self.core.store_join(join);
        Ok(())
    }
}

fn run_nightlight(
    core: &Arc<ProducerCore>,
    config: &NightlightConfig,
    schedule: &dyn SolarSchedule,
    stop_rx: &Receiver<()>,
) {
    let night_color: Pixel = config.night_color.into();
    loop {
        let now = core.clock().civil_now();
        let today = now.date_naive();
        let (sunrise, sunset) =
            schedule.sunrise_sunset(config.latitude, config.longitude, today);

        let (lit, wake_at) = match phase_of(now, sunrise, sunset) {
            Phase::NightUntilSunrise => (true, sunrise),
            Phase::Day => (false, sunset),
            Phase::NightUntilNextSunrise => {
                let (next_sunrise, _) = schedule.sunrise_sunset(
                    config.latitude,
                    config.longitude,
                    today + chrono::Duration::days(1),
                );
                (true, next_sunrise)
            }
        };

        if lit {
            core.fill_and_publish(night_color);
        } else {
            core.fill_and_publish(Pixel::OFF);
        }

        let sleep = (wake_at - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .max(MIN_RECHECK);
        if wait_stop(stop_rx, sleep) {
            break;
        }
    }
    core.finish_run();
}
