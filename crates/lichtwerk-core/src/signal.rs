use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{bounded, Receiver, Sender};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared<T> {
    value: Mutex<Option<T>>,
    notify_tx: Sender<()>,
    notify_rx: Receiver<()>,
}

/// A coalescing latest-value signal.
///
/// `send` stores the value and attempts a non-blocking notify on a
/// capacity-1 channel: a storm of N sends wakes the consumer at least
/// once and at most N times, and a read after consuming a wake always
/// observes the latest value at read time. Send never blocks and never
/// drops data, only redundant notifications.
pub struct LatestSignal<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for LatestSignal<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone> LatestSignal<T> {
    pub fn new() -> Self {
        let (notify_tx, notify_rx) = bounded(1);
        Self {
            shared: Arc::new(Shared {
                value: Mutex::new(None),
                notify_tx,
                notify_rx,
            }),
        }
    }

    pub fn send(&self, value: T) {
        *lock(&self.shared.value) = Some(value);
        // A full channel means a wake is already pending.
        let _ = self.shared.notify_tx.try_send(());
    }

    /// The wake channel, for use in `select!` loops.
    pub fn receiver(&self) -> Receiver<()> {
        self.shared.notify_rx.clone()
    }

    pub fn value(&self) -> Option<T> {
        lock(&self.shared.value).clone()
    }
}

impl<T: Clone> Default for LatestSignal<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct KeyedShared<T> {
    values: Mutex<HashMap<String, T>>,
    notify_tx: Sender<()>,
    notify_rx: Receiver<()>,
}

/// Like [`LatestSignal`], but retains the most recent value per key.
///
/// At most one value is stored per key at any time; `snapshot` returns
/// a copy of the whole map taken under the mutex.
pub struct KeyedLatestSignal<T> {
    shared: Arc<KeyedShared<T>>,
}

impl<T> Clone for KeyedLatestSignal<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone> KeyedLatestSignal<T> {
    pub fn new() -> Self {
        let (notify_tx, notify_rx) = bounded(1);
        Self {
            shared: Arc::new(KeyedShared {
                values: Mutex::new(HashMap::new()),
                notify_tx,
                notify_rx,
            }),
        }
    }

    pub fn send(&self, key: impl Into<String>, value: T) {
        lock(&self.shared.values).insert(key.into(), value);
        let _ = self.shared.notify_tx.try_send(());
    }

    /// Drops `key` and wakes the consumer so it recomputes without it.
    pub fn remove(&self, key: &str) {
        lock(&self.shared.values).remove(key);
        let _ = self.shared.notify_tx.try_send(());
    }

    pub fn receiver(&self) -> Receiver<()> {
        self.shared.notify_rx.clone()
    }

    pub fn snapshot(&self) -> HashMap<String, T> {
        lock(&self.shared.values).clone()
    }
}

impl<T: Clone> Default for KeyedLatestSignal<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{KeyedLatestSignal, LatestSignal};

    #[test]
    fn storm_of_sends_yields_one_pending_wake_with_latest_value() {
        let signal = LatestSignal::new();
        for i in 0..100 {
            signal.send(i);
        }
        let rx = signal.receiver();
        rx.try_recv().expect("expected a pending wake");
        assert!(rx.try_recv().is_err(), "wakes must coalesce");
        assert_eq!(signal.value(), Some(99));
    }

    #[test]
    fn send_after_consume_wakes_again() {
        let signal = LatestSignal::new();
        let rx = signal.receiver();
        signal.send(1);
        rx.try_recv().expect("first wake");
        signal.send(2);
        rx.try_recv().expect("second wake");
        assert_eq!(signal.value(), Some(2));
    }

    #[test]
    fn value_is_none_before_first_send() {
        let signal: LatestSignal<u8> = LatestSignal::new();
        assert_eq!(signal.value(), None);
        assert!(signal.receiver().try_recv().is_err());
    }

    #[test]
    fn keyed_signal_retains_latest_per_key() {
        let signal = KeyedLatestSignal::new();
        signal.send("a", 1);
        signal.send("b", 2);
        signal.send("a", 3);

        let rx = signal.receiver();
        rx.try_recv().expect("expected a pending wake");
        assert!(rx.try_recv().is_err(), "wakes must coalesce");

        let snapshot = signal.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("a"), Some(&3));
        assert_eq!(snapshot.get("b"), Some(&2));
    }

    #[test]
    fn keyed_remove_drops_key_and_wakes() {
        let signal = KeyedLatestSignal::new();
        signal.send("a", 1);
        let rx = signal.receiver();
        rx.try_recv().expect("send wake");

        signal.remove("a");
        rx.try_recv().expect("remove must wake the consumer");
        assert!(signal.snapshot().is_empty());
    }
}
