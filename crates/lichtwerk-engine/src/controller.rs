//! Routes sensor triggers to producers.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use lichtwerk_core::config::HoldConfig;
use lichtwerk_core::Trigger;
use tracing::{debug, warn};

use crate::events::{EngineEvent, EventHub};
use crate::producer::Producer;

/// Routing parameters for the hold latch.
#[derive(Debug, Clone)]
pub struct HoldRoute {
    pub trigger_source: String,
    pub trigger_value: i64,
    pub trigger_delay: Duration,
}

impl From<&HoldConfig> for HoldRoute {
    fn from(config: &HoldConfig) -> Self {
        Self {
            trigger_source: config.trigger_source.clone(),
            trigger_value: config.trigger_value,
            trigger_delay: config.trigger_delay,
        }
    }
}

/// The three-phase toggle that turns the HoldProducer on and off from
/// well-timed trigger pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Latch {
    Idle,
    Armed { at: Instant },
    Held { at: Instant },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LatchAction {
    None,
    StartHold,
    StopHold,
}

/// Advances the latch with one candidate timestamp.
///
/// The expected window for a follow-up candidate is the open interval
/// `(previous + delay, previous + 2*delay)`. A candidate outside its
/// window re-arms the latch as the new first candidate.
fn advance_latch(latch: Latch, at: Instant, delay: Duration) -> (Latch, LatchAction) {
    let in_window = |since: Instant| at > since + delay && at < since + 2 * delay;
    match latch {
        Latch::Idle => (Latch::Armed { at }, LatchAction::None),
        Latch::Armed { at: armed_at } if in_window(armed_at) => {
            (Latch::Held { at }, LatchAction::StartHold)
        }
        Latch::Held { at: held_at } if in_window(held_at) => (Latch::Idle, LatchAction::StopHold),
        Latch::Armed { .. } | Latch::Held { .. } => (Latch::Armed { at }, LatchAction::None),
    }
}

pub struct ControllerHandle {
    stop_tx: Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl ControllerHandle {
    pub fn shutdown(mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Spawns the controller thread.
///
/// `sensors` maps trigger ids to the producers they start; `hold`
/// carries the latch route and the HoldProducer. The loop ends when
/// the trigger channel closes or the handle is shut down.
pub fn spawn_controller(
    triggers: Receiver<Trigger>,
    sensors: HashMap<String, Arc<dyn Producer>>,
    hold: Option<(HoldRoute, Arc<dyn Producer>)>,
    events: Arc<EventHub>,
) -> ControllerHandle {
    let (stop_tx, stop_rx) = bounded(1);
    let join = std::thread::Builder::new()
        .name("lichtwerk-controller".to_string())
        .spawn(move || run_controller(&triggers, &sensors, hold.as_ref(), &events, &stop_rx))
        .expect("failed to spawn controller thread");
    ControllerHandle {
        stop_tx,
        join: Some(join),
    }
}

fn run_controller(
    triggers: &Receiver<Trigger>,
    sensors: &HashMap<String, Arc<dyn Producer>>,
    hold: Option<&(HoldRoute, Arc<dyn Producer>)>,
    events: &EventHub,
    stop_rx: &Receiver<()>,
) {
    let mut latch = Latch::Idle;
    loop {
        select! {
            recv(stop_rx) -> _ => break,
            recv(triggers) -> msg => {
                let Ok(trigger) = msg else {
                    debug!("trigger source closed, controller exiting");
                    break;
                };
                latch = route_trigger(&trigger, latch, sensors, hold, events);
            }
        }
    }
}

fn route_trigger(
    trigger: &Trigger,
    latch: Latch,
    sensors: &HashMap<String, Arc<dyn Producer>>,
    hold: Option<&(HoldRoute, Arc<dyn Producer>)>,
    events: &EventHub,
) -> Latch {
    if let Some((route, producer)) = hold {
        if trigger.id == route.trigger_source && trigger.value >= route.trigger_value {
            let (next, action) = advance_latch(latch, trigger.timestamp, route.trigger_delay);
            match action {
                LatchAction::StartHold => {
                    if let Err(error) = producer.start() {
                        warn!(uid = producer.uid(), error, "failed to start hold producer");
                        events.emit(EngineEvent::TriggerDropped {
                            id: trigger.id.clone(),
                        });
                        return Latch::Idle;
                    }
                    events.emit(EngineEvent::HoldEngaged);
                }
                LatchAction::StopHold => {
                    producer.try_stop();
                    events.emit(EngineEvent::HoldReleased);
                }
                LatchAction::None => {
                    events.emit(EngineEvent::LatchArmed);
                }
            }
            return next;
        }
    }

    if let Some(producer) = sensors.get(&trigger.id) {
        let was_running = producer.is_running();
        match producer.start() {
            Ok(()) => {
                if !was_running {
                    events.emit(EngineEvent::ProducerStarted {
                        uid: producer.uid().to_string(),
                    });
                }
            }
            Err(error) => {
                warn!(uid = producer.uid(), error, "failed to start producer");
                events.emit(EngineEvent::TriggerDropped {
                    id: trigger.id.clone(),
                });
            }
        }
        return latch;
    }

    debug!(id = trigger.id, value = trigger.value, "ignoring unroutable trigger");
    events.emit(EngineEvent::TriggerDropped {
        id: trigger.id.clone(),
    });
    latch
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{advance_latch, Latch, LatchAction};

    const DELAY: Duration = Duration::from_secs(1);

    fn at(base: Instant, millis: u64) -> Instant {
        base + Duration::from_millis(millis)
    }

    #[test]
    fn well_timed_triple_starts_then_stops() {
        let base = Instant::now();

        let (latch, action) = advance_latch(Latch::Idle, base, DELAY);
        assert_eq!(action, LatchAction::None);
        assert_eq!(latch, Latch::Armed { at: base });

        // 1.2s later: inside (1s, 2s).
        let (latch, action) = advance_latch(latch, at(base, 1200), DELAY);
        assert_eq!(action, LatchAction::StartHold);

        // Another 1.2s: inside the second window.
        let (latch, action) = advance_latch(latch, at(base, 2400), DELAY);
        assert_eq!(action, LatchAction::StopHold);
        assert_eq!(latch, Latch::Idle);
    }

    #[test]
    fn too_early_candidate_rearms() {
        let base = Instant::now();
        let (latch, _) = advance_latch(Latch::Idle, base, DELAY);

        let (latch, action) = advance_latch(latch, at(base, 500), DELAY);
        assert_eq!(action, LatchAction::None);
        assert_eq!(latch, Latch::Armed { at: at(base, 500) });
    }

    #[test]
    fn too_late_candidate_rearms() {
        let base = Instant::now();
        let (latch, _) = advance_latch(Latch::Idle, base, DELAY);

        let (latch, action) = advance_latch(latch, at(base, 2500), DELAY);
        assert_eq!(action, LatchAction::None);
        assert_eq!(
            latch,
            Latch::Armed {
                at: at(base, 2500)
            }
        );
    }

    #[test]
    fn window_bounds_are_exclusive() {
        let base = Instant::now();
        let (latch, _) = advance_latch(Latch::Idle, base, DELAY);

        let (_, action) = advance_latch(latch, at(base, 1000), DELAY);
        assert_eq!(action, LatchAction::None);

        let (latch, _) = advance_latch(Latch::Idle, base, DELAY);
        let (_, action) = advance_latch(latch, at(base, 2000), DELAY);
        assert_eq!(action, LatchAction::None);
    }

    #[test]
    fn mistimed_candidate_while_held_rearms_without_stopping() {
        let base = Instant::now();
        let (latch, _) = advance_latch(Latch::Idle, base, DELAY);
        let (latch, action) = advance_latch(latch, at(base, 1500), DELAY);
        assert_eq!(action, LatchAction::StartHold);

        // Way too late for the release window.
        let (latch, action) = advance_latch(latch, at(base, 9000), DELAY);
        assert_eq!(action, LatchAction::None);
        assert_eq!(
            latch,
            Latch::Armed {
                at: at(base, 9000)
            }
        );
    }
}
