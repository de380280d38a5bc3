//! Bounded sweep: a square blob bouncing between the strip ends.

use std::sync::Arc;

use crossbeam_channel::{after, select, tick, Receiver};
use lichtwerk_core::config::CylonConfig;
use lichtwerk_core::{Clock, Frame, KeyedLatestSignal, Pixel};

use super::{spawn_worker, Producer, ProducerCore, StartAction};

pub struct CylonProducer {
    core: Arc<ProducerCore>,
    config: CylonConfig,
}

impl CylonProducer {
    pub fn new(
        uid: impl Into<String>,
        config: &CylonConfig,
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

impl Producer for CylonProducer {
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
            run_cylon(&core, &config, &stop_rx);
        });
        self.core.store_join(join);
        Ok(())
    }
}

fn run_cylon(core: &Arc<ProducerCore>, config: &CylonConfig, stop_rx: &Receiver<()>) {
    let strip_len = core.leds_len() as isize;
    let radius = (config.width / 2) as isize;
    let step = config.step as isize;
    let color: Pixel = config.color.into();

    let mut center = radius;
    let mut direction: isize = 1;

    let deadline = after(config.duration);
    let ticker = tick(config.delay);

    loop {
        select! {
            recv(stop_rx) -> _ => break,
            recv(deadline) -> _ => break,
            recv(ticker) -> _ => {
                let (next_center, next_direction) =
                    advance_center(center, direction, step, radius, strip_len);
                center = next_center;
                direction = next_direction;
                core.with_leds(|leds| {
                    leds.clear();
                    for index in (center - radius)..=(center + radius) {
                        leds.set(index as usize, color);
                    }
                });
                core.publish();
            }
        }
    }
    core.finish_run();
}

/// One sweep step with reflection at both ends. The returned center
/// always keeps the whole blob on the strip.
fn advance_center(
    center: isize,
    direction: isize,
    step: isize,
    radius: isize,
    strip_len: isize,
) -> (isize, isize) {
    let mut center = center + step * direction;
    let mut direction = direction;
    let max_center = strip_len - 1 - radius;
    if center > max_center {
        center = max_center;
        direction = -1;
    }
    if center < radius {
        center = radius;
        direction = 1;
    }
    (center, direction)
}

#[cfg(test)]
mod tests {
    use super::advance_center;

    #[test]
    fn reflects_at_the_right_end() {
        // Strip of 10, radius 2: centers range 2..=7.
        let (center, direction) = advance_center(7, 1, 3, 2, 10);
        assert_eq!((center, direction), (7, -1));
    }

    #[test]
    fn reflects_at_the_left_end() {
        let (center, direction) = advance_center(2, -1, 1, 2, 10);
        assert_eq!((center, direction), (2, 1));
    }

    #[test]
    fn travels_straight_between_the_ends() {
        let (center, direction) = advance_center(4, 1, 1, 2, 10);
        assert_eq!((center, direction), (5, 1));
    }

    #[test]
    fn blob_never_leaves_the_strip() {
        let mut center = 2;
        let mut direction = 1;
        for _ in 0..200 {
            let (next_center, next_direction) = advance_center(center, direction, 3, 2, 10);
            center = next_center;
            direction = next_direction;
            assert!(center - 2 >= 0 && center + 2 <= 9);
        }
    }
}
