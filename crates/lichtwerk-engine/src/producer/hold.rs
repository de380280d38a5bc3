//! Latching overlay: the whole strip in one color until released.

use std::sync::Arc;
use std::time::Duration;

use lichtwerk_core::config::HoldConfig;
use lichtwerk_core::{Clock, Frame, KeyedLatestSignal, Pixel};

use super::{spawn_worker, wait_stop, Producer, ProducerCore, StartAction};

pub struct HoldProducer {
    core: Arc<ProducerCore>,
    color: Pixel,
    hold_time: Duration,
}

impl HoldProducer {
    pub fn new(
        uid: impl Into<String>,
        config: &HoldConfig,
        leds_total: usize,
        updates: KeyedLatestSignal<Frame>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            core: Arc::new(ProducerCore::new(uid, leds_total, updates, clock)),
            color: config.color.into(),
            hold_time: config.hold_time,
        }
    }
}

impl Producer for HoldProducer {
    fn core(&self) -> &ProducerCore {
        &self.core
    }

    fn start(&self) -> Result<(), String> {
        let stop_rx = match self.core.begin_start()? {
            StartAction::AlreadyRunning => return Ok(()),
            StartAction::Spawn(stop_rx) => stop_rx,
        };
        let core = Arc::clone(&self.core);
        let color = self.color;
        let hold_time = self.hold_time;
        let join = spawn_worker(self.core.uid(), move || {
            core.fill_and_publish(color);
            // One publish up front, one on teardown; nothing animates
            // in between.
            let _ = wait_stop(&stop_rx, hold_time);
            core.finish_run();
        });
        self.core.store_join(join);
        Ok(())
    }
}
