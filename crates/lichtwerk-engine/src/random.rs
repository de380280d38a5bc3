use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use rand::Rng;

/// Uniform `[0, 1)` source, injected so collision pass-through in the
/// blob simulation is deterministic under test.
pub trait UniformSource: Send + Sync + 'static {
    fn next_f64(&self) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngUniform;

impl UniformSource for ThreadRngUniform {
    fn next_f64(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Replays a fixed sequence of draws, then repeats the last one.
pub struct ScriptedUniform {
    draws: Mutex<VecDeque<f64>>,
    fallback: f64,
}

impl ScriptedUniform {
    pub fn new(draws: impl IntoIterator<Item = f64>, fallback: f64) -> Self {
        Self {
            draws: Mutex::new(draws.into_iter().collect()),
            fallback,
        }
    }
}

impl UniformSource for ScriptedUniform {
    fn next_f64(&self) -> f64 {
        self.draws
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(self.fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::{ScriptedUniform, ThreadRngUniform, UniformSource};

    #[test]
    fn thread_rng_stays_in_unit_interval() {
        let source = ThreadRngUniform;
        for _ in 0..1000 {
            let draw = source.next_f64();
            assert!((0.0..1.0).contains(&draw));
        }
    }

    #[test]
    fn scripted_draws_replay_then_fall_back() {
        let source = ScriptedUniform::new([0.1, 0.9], 0.5);
        assert_eq!(source.next_f64(), 0.1);
        assert_eq!(source.next_f64(), 0.9);
        assert_eq!(source.next_f64(), 0.5);
        assert_eq!(source.next_f64(), 0.5);
    }
}
