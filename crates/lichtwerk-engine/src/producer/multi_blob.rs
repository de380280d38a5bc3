//! Multi-body simulation: gaussian blobs traveling the strip with
//! boundary reflection and probabilistic pair collisions.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{after, select, tick, Receiver};
use lichtwerk_core::config::MultiBlobConfig;
use lichtwerk_core::{Clock, Frame, KeyedLatestSignal, Pixel};
use tracing::warn;

use crate::random::UniformSource;

use super::{spawn_worker, wait_stop, Producer, ProducerCore, StartAction};

const FADE_STEPS: u32 = 20;
const FADE_STEP_DELAY: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub(crate) struct Blob {
    pub(crate) uid: String,
    pub(crate) color: Pixel,
    pub(crate) x: f64,
    pub(crate) last_x: f64,
    pub(crate) width: f64,
    /// Magnitude of the per-tick step; the sign lives in `dir`.
    pub(crate) delta: f64,
    /// Always -1.0 or +1.0.
    pub(crate) dir: f64,
}

pub struct MultiBlobProducer {
    core: Arc<ProducerCore>,
    config: MultiBlobConfig,
    uniform: Arc<dyn UniformSource>,
}

impl MultiBlobProducer {
    pub fn new(
        uid: impl Into<String>,
        config: &MultiBlobConfig,
        leds_total: usize,
        updates: KeyedLatestSignal<Frame>,
        clock: Arc<dyn Clock>,
        uniform: Arc<dyn UniformSource>,
    ) -> Self {
        Self {
            core: Arc::new(ProducerCore::new(uid, leds_total, updates, clock)),
            config: config.clone(),
            uniform,
        }
    }
}

impl Producer for MultiBlobProducer {
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
        let uniform = Arc::clone(&self.uniform);
        let join = spawn_worker(self.core.uid(), move || {
            run_multi_blob(&core, &config, uniform.as_ref(), &stop_rx);
        });
        self.core.store_join(join);
        Ok(())
    }
}

fn blobs_from_config(config: &MultiBlobConfig) -> Vec<Blob> {
    config
        .blobs
        .iter()
        .map(|(uid, blob)| Blob {
            uid: uid.clone(),
            color: blob.color.into(),
            x: blob.x,
            last_x: blob.x,
            width: blob.width,
            delta: blob.delta_x.abs(),
            dir: if blob.delta_x < 0.0 { -1.0 } else { 1.0 },
        })
        .collect()
}

fn run_multi_blob(
    core: &Arc<ProducerCore>,
    config: &MultiBlobConfig,
    uniform: &dyn UniformSource,
    stop_rx: &Receiver<()>,
) {
    let strip_len = core.leds_len() as f64;
    let mut blobs = blobs_from_config(config);
    let mut scratch = Frame::new(core.leds_len());
    let mut faded_in = false;

    let deadline = after(config.duration);
    let ticker = tick(config.delay);

    'run: loop {
        select! {
            recv(stop_rx) -> _ => break 'run,
            recv(deadline) -> _ => break 'run,
            recv(ticker) -> _ => {
                advance(&mut blobs, strip_len, config.pass_through_p, uniform);
                render(&blobs, &mut scratch);
                for blob in &mut blobs {
                    blob.last_x = blob.x;
                }
                if !faded_in {
                    faded_in = true;
                    if fade_in(core, &scratch, stop_rx) {
                        break 'run;
                    }
                }
                core.set_frame_and_publish(&scratch);
            }
        }
    }

    fade_out(core);
    core.finish_run();
}

/// One simulation tick: move, reflect at the boundaries, resolve pair
/// collisions, revert participants. Rendering and `last_x` bookkeeping
/// stay with the caller.
pub(crate) fn advance(
    blobs: &mut [Blob],
    strip_len: f64,
    pass_through_p: f64,
    uniform: &dyn UniformSource,
) {
    for blob in blobs.iter_mut() {
        blob.x += blob.delta * blob.dir;
    }

    let mut boundary = vec![false; blobs.len()];
    let mut collided = vec![false; blobs.len()];
    for (index, blob) in blobs.iter_mut().enumerate() {
        if (blob.x > strip_len && blob.dir > 0.0) || (blob.x < 0.0 && blob.dir < 0.0) {
            blob.dir = -blob.dir;
            blob.x = blob.last_x;
            boundary[index] = true;
        }
    }

    for i in 0..blobs.len() {
        for j in (i + 1)..blobs.len() {
            if boundary[i] || boundary[j] {
                continue;
            }
            if !intervals_overlap(&blobs[i], &blobs[j]) {
                continue;
            }
            if uniform.next_f64() < pass_through_p {
                // Ignored on purpose: permanent lock-step deadlock is
                // worse than an occasional pass-through.
                continue;
            }
            let (left, right) = if blobs[i].last_x <= blobs[j].last_x {
                (i, j)
            } else {
                (j, i)
            };
            match (blobs[left].dir > 0.0, blobs[right].dir > 0.0) {
                // Head-on.
                (true, false) => {
                    blobs[left].dir = -blobs[left].dir;
                    blobs[right].dir = -blobs[right].dir;
                }
                // Left catches up with right.
                (true, true) => {
                    blobs[left].dir = -blobs[left].dir;
                }
                // Right catches up with left.
                (false, false) => {
                    blobs[right].dir = -blobs[right].dir;
                }
                (false, true) => {
                    warn!(
                        left = blobs[left].uid.as_str(),
                        right = blobs[right].uid.as_str(),
                        "diverging blobs reported as colliding"
                    );
                }
            }
            collided[left] = true;
            collided[right] = true;
        }
    }

    for (blob, hit) in blobs.iter_mut().zip(collided) {
        if hit {
            blob.x = blob.last_x;
        }
    }
}

/// Treats each blob as the 1-D interval it swept this tick.
fn intervals_overlap(a: &Blob, b: &Blob) -> bool {
    let (a_lo, a_hi) = (a.x.min(a.last_x), a.x.max(a.last_x));
    let (b_lo, b_hi) = (b.x.min(b.last_x), b.x.max(b.last_x));
    a_lo <= b_hi && b_lo <= a_hi
}

/// Gaussian splat per blob, max-blended. Contributions further than
/// `ceil(sqrt(5 * width))` from the center fall below ~1% and are
/// skipped.
pub(crate) fn render(blobs: &[Blob], frame: &mut Frame) {
    frame.clear();
    let strip_len = frame.len() as isize;
    for blob in blobs {
        let reach = (5.0 * blob.width).sqrt().ceil() as isize;
        let from = blob.x.floor() as isize - reach;
        let to = blob.x.ceil() as isize + reach;
        for index in from..=to {
            if index < 0 || index >= strip_len {
                continue;
            }
            let distance = index as f64 - blob.x;
            let falloff = (-(distance * distance) / blob.width).exp();
            frame.blend_max(index as usize, blob.color.scaled(falloff as f32));
        }
    }
}

/// Linear ramp from black up to `target`. Returns true when stopped
/// mid-fade.
fn fade_in(core: &ProducerCore, target: &Frame, stop_rx: &Receiver<()>) -> bool {
    let mut scratch = Frame::new(target.len());
    for step in 1..FADE_STEPS {
        scaled_into(target, step as f32 / FADE_STEPS as f32, &mut scratch);
        core.set_frame_and_publish(&scratch);
        if wait_stop(stop_rx, FADE_STEP_DELAY) {
            return true;
        }
    }
    false
}

/// Linear ramp from the currently published frame down to black.
fn fade_out(core: &ProducerCore) {
    let mut snapshot = Frame::new(core.leds_len());
    core.copy_leds(&mut snapshot);
    let mut scratch = Frame::new(snapshot.len());
    for step in (0..FADE_STEPS).rev() {
        scaled_into(&snapshot, step as f32 / FADE_STEPS as f32, &mut scratch);
        core.set_frame_and_publish(&scratch);
        std::thread::sleep(FADE_STEP_DELAY);
    }
}

fn scaled_into(source: &Frame, factor: f32, out: &mut Frame) {
    for index in 0..source.len() {
        out.set(index, source.get(index).scaled(factor));
    }
}

#[cfg(test)]
mod tests {
    use lichtwerk_core::{Frame, Pixel};

    use super::{advance, render, Blob};
    use crate::random::ScriptedUniform;

    fn blob(uid: &str, x: f64, delta: f64, dir: f64) -> Blob {
        Blob {
            uid: uid.to_string(),
            color: Pixel::new(255.0, 255.0, 255.0),
            x,
            last_x: x,
            width: 1.0,
            delta,
            dir,
        }
    }

    /// The worker's per-tick sequence without rendering.
    fn step(blobs: &mut [Blob], strip_len: f64, pass_through_p: f64, rng: &ScriptedUniform) {
        advance(blobs, strip_len, pass_through_p, rng);
        for blob in blobs.iter_mut() {
            blob.last_x = blob.x;
        }
    }

    fn never_pass() -> ScriptedUniform {
        ScriptedUniform::new([], 0.99)
    }

    #[test]
    fn head_on_collision_inverts_both_and_reverts_positions() {
        let mut blobs = vec![blob("a", 5.0, 1.0, 1.0), blob("b", 15.0, 1.0, -1.0)];
        let rng = never_pass();

        // Approach without contact.
        for _ in 0..4 {
            step(&mut blobs, 20.0, 0.0, &rng);
        }
        assert_eq!((blobs[0].x, blobs[1].x), (9.0, 11.0));

        // Contact tick: intervals [9,10] and [10,11] touch.
        advance(&mut blobs, 20.0, 0.0, &rng);
        assert_eq!(blobs[0].dir, -1.0);
        assert_eq!(blobs[1].dir, 1.0);
        assert_eq!(blobs[0].x, blobs[0].last_x);
        assert_eq!(blobs[1].x, blobs[1].last_x);
    }

    #[test]
    fn blobs_stay_inside_the_strip_over_many_ticks() {
        let mut blobs = vec![blob("a", 5.0, 1.0, 1.0), blob("b", 15.0, 1.0, -1.0)];
        let rng = never_pass();
        for _ in 0..500 {
            step(&mut blobs, 20.0, 1.0 / 3.0, &rng);
            for blob in &blobs {
                assert!((0.0..=20.0).contains(&blob.x), "x={} escaped", blob.x);
            }
        }
    }

    #[test]
    fn boundary_reflection_inverts_once_and_reverts_to_last_x() {
        let mut blobs = vec![blob("a", 9.5, 1.0, 1.0)];
        let rng = never_pass();

        advance(&mut blobs, 10.0, 0.0, &rng);
        assert_eq!(blobs[0].dir, -1.0);
        assert_eq!(blobs[0].x, 9.5);

        // One tick later the blob is back inside the open interval.
        blobs[0].last_x = blobs[0].x;
        advance(&mut blobs, 10.0, 0.0, &rng);
        assert_eq!(blobs[0].x, 8.5);
        assert_eq!(blobs[0].dir, -1.0);
    }

    #[test]
    fn pass_through_skips_the_collision_response() {
        let mut blobs = vec![blob("a", 9.0, 1.0, 1.0), blob("b", 11.0, 1.0, -1.0)];
        // First draw below the threshold: collision ignored.
        let rng = ScriptedUniform::new([0.1], 0.99);

        advance(&mut blobs, 20.0, 1.0 / 3.0, &rng);
        assert_eq!(blobs[0].dir, 1.0);
        assert_eq!(blobs[1].dir, -1.0);
        assert_eq!((blobs[0].x, blobs[1].x), (10.0, 10.0));
    }

    #[test]
    fn chase_collision_inverts_only_the_chaser() {
        // a sweeps [8,10], b sweeps [9,9.5]; a is left by last_x.
        let mut blobs = vec![blob("a", 8.0, 2.0, 1.0), blob("b", 9.0, 0.5, 1.0)];
        let rng = never_pass();

        advance(&mut blobs, 20.0, 0.0, &rng);
        assert_eq!(blobs[0].dir, -1.0, "chaser must turn around");
        assert_eq!(blobs[1].dir, 1.0, "chased blob keeps going");
        assert_eq!(blobs[0].x, 8.0);
        assert_eq!(blobs[1].x, 9.0);
    }

    #[test]
    fn diverging_overlap_keeps_directions() {
        // Spawned on top of each other, moving apart.
        let mut blobs = vec![blob("a", 5.0, 1.0, -1.0), blob("b", 5.0, 1.0, 1.0)];
        let rng = never_pass();

        advance(&mut blobs, 20.0, 0.0, &rng);
        assert_eq!(blobs[0].dir, -1.0);
        assert_eq!(blobs[1].dir, 1.0);
        // Still collision participants: both revert for this tick.
        assert_eq!(blobs[0].x, 5.0);
        assert_eq!(blobs[1].x, 5.0);
    }

    #[test]
    fn contribution_is_zero_outside_the_reach_window() {
        let blobs = vec![Blob {
            uid: "a".to_string(),
            color: Pixel::new(255.0, 0.0, 0.0),
            x: 10.0,
            last_x: 10.0,
            width: 1.0,
            delta: 0.0,
            dir: 1.0,
        }];
        let mut frame = Frame::new(30);
        render(&blobs, &mut frame);

        // reach = ceil(sqrt(5)) = 3.
        assert_eq!(frame.get(10), Pixel::new(255.0, 0.0, 0.0));
        assert!(!frame.get(7).is_off());
        assert!(frame.get(6).is_off());
        assert!(frame.get(14).is_off());
    }

    #[test]
    fn render_near_the_edge_stays_in_bounds() {
        let blobs = vec![Blob {
            uid: "a".to_string(),
            color: Pixel::new(0.0, 255.0, 0.0),
            x: 0.5,
            last_x: 0.5,
            width: 4.0,
            delta: 0.0,
            dir: 1.0,
        }];
        let mut frame = Frame::new(8);
        render(&blobs, &mut frame);
        assert!(!frame.get(0).is_off());
    }
}
