//! Producer contract and the shared lifecycle core.
//!
//! A producer owns one fixed-length pixel buffer and a single worker
//! thread per run. The trigger path (`start`) and the worker only meet
//! at the state mutex, and only for timestamp updates and the final
//! run-or-finish decision; every animation sleep is an unlocked
//! `select` that also samples the stop channel.

pub mod audio;
pub mod clock_display;
pub mod cylon;
pub mod hold;
pub mod multi_blob;
pub mod nightlight;
pub mod sensor;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use lichtwerk_core::{Clock, Frame, KeyedLatestSignal, Pixel};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The uniform producer contract.
///
/// `start` is the trigger path: while a run is active it only
/// refreshes the trigger timestamps; the first call of a run spawns
/// the worker. `exit` is terminal — it stops the current run, waits
/// for the worker's final all-black publish and refuses any further
/// start.
pub trait Producer: Send + Sync + 'static {
    fn core(&self) -> &ProducerCore;

    fn start(&self) -> Result<(), String>;

    fn uid(&self) -> &str {
        self.core().uid()
    }

    fn try_stop(&self) {
        self.core().try_stop();
    }

    fn exit(&self) {
        self.core().exit();
    }

    fn is_running(&self) -> bool {
        self.core().is_running()
    }

    fn copy_leds(&self, out: &mut Frame) {
        self.core().copy_leds(out);
    }
}

pub(crate) enum StartAction {
    AlreadyRunning,
    Spawn(Receiver<()>),
}

#[derive(Default)]
struct RunState {
    running: bool,
    exited: bool,
    last_start: Option<Instant>,
    last_trigger: Option<Instant>,
    stop_tx: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

/// State shared between a producer's trigger path, its worker and the
/// mixer: the pixel buffer, the run flags and the outbound signal.
pub struct ProducerCore {
    uid: String,
    leds: Mutex<Frame>,
    state: Mutex<RunState>,
    updates: KeyedLatestSignal<Frame>,
    clock: Arc<dyn Clock>,
}

impl ProducerCore {
    pub fn new(
        uid: impl Into<String>,
        leds_total: usize,
        updates: KeyedLatestSignal<Frame>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            uid: uid.into(),
            leds: Mutex::new(Frame::new(leds_total)),
            state: Mutex::new(RunState::default()),
            updates,
            clock,
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn leds_len(&self) -> usize {
        lock(&self.leds).len()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    pub fn last_start(&self) -> Option<Instant> {
        lock(&self.state).last_start
    }

    pub fn last_trigger(&self) -> Option<Instant> {
        lock(&self.state).last_trigger
    }

    pub(crate) fn now(&self) -> Instant {
        self.clock.now()
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Trigger-path entry. Refreshes the timestamps; hands out a stop
    /// receiver exactly when a new worker must be spawned.
    pub(crate) fn begin_start(&self) -> Result<StartAction, String> {
        let mut state = lock(&self.state);
        if state.exited {
            return Err(format!("producer {} has exited", self.uid));
        }
        let now = self.clock.now();
        state.last_start = Some(now);
        state.last_trigger = Some(now);
        if state.running {
            return Ok(StartAction::AlreadyRunning);
        }
        // The previous run has finished; reap its thread.
        if let Some(join) = state.join.take() {
            let _ = join.join();
        }
        let (stop_tx, stop_rx) = bounded(1);
        state.stop_tx = Some(stop_tx);
        state.running = true;
        Ok(StartAction::Spawn(stop_rx))
    }

    pub(crate) fn store_join(&self, join: JoinHandle<()>) {
        lock(&self.state).join = Some(join);
    }

    pub fn try_stop(&self) {
        let state = lock(&self.state);
        if let Some(stop_tx) = state.stop_tx.as_ref() {
            let _ = stop_tx.try_send(());
        }
    }

    pub fn exit(&self) {
        let join = {
            let mut state = lock(&self.state);
            state.exited = true;
            if let Some(stop_tx) = state.stop_tx.take() {
                let _ = stop_tx.try_send(());
            }
            state.join.take()
        };
        if let Some(join) = join {
            let _ = join.join();
        }
        self.updates.remove(&self.uid);
    }

    pub fn copy_leds(&self, out: &mut Frame) {
        out.copy_from(&lock(&self.leds));
    }

    /// Publishes the current buffer to the mixer's keyed signal.
    pub(crate) fn publish(&self) {
        let frame = lock(&self.leds).clone();
        self.updates.send(self.uid.clone(), frame);
    }

    /// Writes `pixel` at `index` clamped into the strip.
    pub(crate) fn set_clamped(&self, index: isize, pixel: Pixel) {
        let mut leds = lock(&self.leds);
        let last = leds.len() as isize - 1;
        leds.set(index.clamp(0, last) as usize, pixel);
    }

    pub(crate) fn with_leds(&self, f: impl FnOnce(&mut Frame)) {
        f(&mut lock(&self.leds));
    }

    pub(crate) fn fill_and_publish(&self, pixel: Pixel) {
        lock(&self.leds).fill(pixel);
        self.publish();
    }

    pub(crate) fn set_frame_and_publish(&self, frame: &Frame) {
        lock(&self.leds).copy_from(frame);
        self.publish();
    }

    /// Worker-side teardown: blank, publish the final frame and clear
    /// `running`. Done under the state mutex so a concurrent `start`
    /// lands either before (and is observed as a refresh by nobody —
    /// the run is over) or after (and spawns a fresh worker).
    pub(crate) fn finish_run(&self) {
        let mut state = lock(&self.state);
        lock(&self.leds).clear();
        self.publish();
        state.running = false;
        state.stop_tx = None;
    }

    /// The SensorLed CHECK-EXIT decision. Returns `false` when a
    /// trigger newer than `observed` arrived and the worker must
    /// re-enter its run-up; otherwise finishes the run as
    /// [`finish_run`](Self::finish_run) and returns `true`.
    pub(crate) fn finish_if_quiet(&self, observed: Option<Instant>) -> bool {
        let mut state = lock(&self.state);
        if !state.exited && state.last_trigger > observed {
            return false;
        }
        lock(&self.leds).clear();
        self.publish();
        state.running = false;
        state.stop_tx = None;
        true
    }
}

/// Sleeps for `timeout` unless the run is stopped first. Every worker
/// sleep goes through here (or an equivalent `select!`) so stop
/// requests are honored within one tick.
pub(crate) fn wait_stop(stop_rx: &Receiver<()>, timeout: Duration) -> bool {
    match stop_rx.recv_timeout(timeout) {
        Ok(()) => true,
        Err(RecvTimeoutError::Timeout) => false,
        Err(RecvTimeoutError::Disconnected) => true,
    }
}

pub(crate) fn spawn_worker(
    uid: &str,
    worker: impl FnOnce() + Send + 'static,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("lichtwerk-{uid}"))
        .spawn(worker)
        .expect("failed to spawn producer worker")
}
