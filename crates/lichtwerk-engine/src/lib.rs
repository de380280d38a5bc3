#![deny(clippy::wildcard_imports)]

mod controller;
mod engine;
mod events;
mod mixer;
pub mod producer;
mod random;
mod solar;


pub use controller::{spawn_controller, ControllerHandle, HoldRoute};
pub use engine::{start, start_with_deps, EngineDeps, EngineError, EngineHandle};
pub use events::{EngineEvent, EventHub};
pub use mixer::{spawn_mixer, FramePool, MixerHandle};
pub use random::{ScriptedUniform, ThreadRngUniform, UniformSource};
pub use solar::{SolarSchedule, SunriseTable};
