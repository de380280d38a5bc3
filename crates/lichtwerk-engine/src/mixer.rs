//! Max-combines all producer frames onto the display sink.

use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TrySendError};
use lichtwerk_core::{Frame, KeyedLatestSignal};
use tracing::debug;

/// Free-list of output frames.
///
/// The mixer acquires a buffer per publish; the display task sends it
/// back through [`recycler`](Self::recycler) once pushed to the
/// hardware. A drained pool falls back to allocation, a full pool
/// drops returned buffers.
pub struct FramePool {
    frame_len: usize,
    return_tx: Sender<Frame>,
    return_rx: Receiver<Frame>,
}

impl FramePool {
    pub fn new(frame_len: usize, capacity: usize) -> Self {
        let (return_tx, return_rx) = bounded(capacity.max(1));
        Self {
            frame_len,
            return_tx,
            return_rx,
        }
    }

    pub fn acquire(&self) -> Frame {
        self.return_rx
            .try_recv()
            .unwrap_or_else(|_| Frame::new(self.frame_len))
    }

    pub fn release(&self, frame: Frame) {
        let _ = self.return_tx.try_send(frame);
    }

    /// Sender handed to the display task for returning spent frames.
    pub fn recycler(&self) -> Sender<Frame> {
        self.return_tx.clone()
    }
}

pub struct MixerHandle {
    stop_tx: Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl MixerHandle {
    /// Stops the loop after one final recompute, so the last frames
    /// producers published on their way down still reach the sink.
    pub fn shutdown(mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Spawns the mixer thread.
///
/// Wakes on the keyed signal or the heartbeat, folds every stored
/// frame per-index with max into a pooled buffer and pushes it to the
/// sink. A full sink drops the frame (latest-frame-wins — the next
/// wake republishes current state); a closed sink ends the loop.
pub fn spawn_mixer(
    updates: KeyedLatestSignal<Frame>,
    heartbeat: Duration,
    sink: Sender<Frame>,
    pool: FramePool,
) -> MixerHandle {
    let (stop_tx, stop_rx) = bounded(1);
    let join = std::thread::Builder::new()
        .name("lichtwerk-mixer".to_string())
        .spawn(move || run_mixer(&updates, heartbeat, &sink, &pool, &stop_rx))
        .expect("failed to spawn mixer thread");
    MixerHandle {
        stop_tx,
        join: Some(join),
    }
}

fn run_mixer(
    updates: &KeyedLatestSignal<Frame>,
    heartbeat: Duration,
    sink: &Sender<Frame>,
    pool: &FramePool,
    stop_rx: &Receiver<()>,
) {
    let wake_rx = updates.receiver();
    let ticker = tick(heartbeat);
    let mut stopping = false;
    loop {
        select! {
            recv(stop_rx) -> _ => stopping = true,
            recv(wake_rx) -> msg => {
                if msg.is_err() {
                    break;
                }
            }
            recv(ticker) -> _ => {}
        }

        let mut combined = pool.acquire();
        combined.clear();
        for frame in updates.snapshot().values() {
            combined.max_from(frame);
        }
        match sink.try_send(combined) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                // Latest-frame-wins; the sink is lagging.
                pool.release(frame);
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("display sink closed, mixer exiting");
                break;
            }
        }
        if stopping {
            break;
        }
    }
}
