//! Builds the pipeline from a validated config and owns its teardown.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use lichtwerk_capture::{CaptureSpec, CpalAudioInput};
use lichtwerk_core::{Clock, ConfigError, Frame, KeyedLatestSignal, StripConfig, SystemClock, Trigger};
use thiserror::Error;
use tracing::info;

use crate::controller::{spawn_controller, ControllerHandle, HoldRoute};
use crate::events::{EngineEvent, EventHub};
use crate::mixer::{spawn_mixer, FramePool, MixerHandle};
use crate::producer::audio::{AudioInputFactory, AudioLedProducer};
use crate::producer::clock_display::ClockProducer;
use crate::producer::cylon::CylonProducer;
use crate::producer::hold::HoldProducer;
use crate::producer::multi_blob::MultiBlobProducer;
use crate::producer::nightlight::NightlightProducer;
use crate::producer::sensor::SensorLedProducer;
use crate::producer::Producer;
use crate::random::{ThreadRngUniform, UniformSource};
use crate::solar::{SolarSchedule, SunriseTable};

pub const HOLD_UID: &str = "hold";
pub const NIGHTLIGHT_UID: &str = "nightlight";
pub const CLOCK_UID: &str = "clock";
pub const CYLON_UID: &str = "cylon";
pub const MULTI_BLOB_UID: &str = "multiblob";
pub const AUDIO_UID: &str = "audio";

const EVENT_CAPACITY: usize = 256;
const FRAME_POOL_CAPACITY: usize = 4;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to start producer {uid}: {message}")]
    ProducerStart { uid: String, message: String },
}

/// Injected collaborators. The defaults talk to the real world; tests
/// swap in scripted doubles.
pub struct EngineDeps {
    pub clock: Arc<dyn Clock>,
    pub solar: Arc<dyn SolarSchedule>,
    pub uniform: Arc<dyn UniformSource>,
    /// Overrides the cpal-backed factory built from the audio config.
    pub audio_input: Option<AudioInputFactory>,
}

impl Default for EngineDeps {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            solar: Arc::new(SunriseTable),
            uniform: Arc::new(ThreadRngUniform),
            audio_input: None,
        }
    }
}

pub struct EngineHandle {
    producers: Vec<Arc<dyn Producer>>,
    mixer: MixerHandle,
    controller: ControllerHandle,
    events: Arc<EventHub>,
    pool_recycler: Sender<Frame>,
}

impl EngineHandle {
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Sender for the display task to return spent frames to the pool.
    pub fn frame_recycler(&self) -> Sender<Frame> {
        self.pool_recycler.clone()
    }

    pub fn producer(&self, uid: &str) -> Option<&Arc<dyn Producer>> {
        self.producers.iter().find(|producer| producer.uid() == uid)
    }

    /// Stops routing, exits every producer (each publishes a final
    /// all-black frame) and lets the mixer push one last combined
    /// frame before joining it.
    pub fn shutdown(self) {
        self.controller.shutdown();
        for producer in &self.producers {
            producer.exit();
        }
        self.mixer.shutdown();
        info!("engine stopped");
    }
}

/// Starts the pipeline with real-world collaborators.
pub fn start(
    config: &StripConfig,
    triggers: Receiver<Trigger>,
    sink: Sender<Frame>,
) -> Result<EngineHandle, EngineError> {
    start_with_deps(config, triggers, sink, EngineDeps::default())
}

/// Starts the pipeline with injected collaborators.
///
/// Sensor producers wait for their triggers; everything else
/// (schedule-driven and duration-bounded producers) starts right away.
pub fn start_with_deps(
    config: &StripConfig,
    triggers: Receiver<Trigger>,
    sink: Sender<Frame>,
    deps: EngineDeps,
) -> Result<EngineHandle, EngineError> {
    config.validate()?;

    let leds_total = config.leds_total;
    let updates: KeyedLatestSignal<Frame> = KeyedLatestSignal::new();
    let events = Arc::new(EventHub::new(EVENT_CAPACITY));

    let mut producers: Vec<Arc<dyn Producer>> = Vec::new();
    let mut autostart: Vec<Arc<dyn Producer>> = Vec::new();
    let mut sensors: HashMap<String, Arc<dyn Producer>> = HashMap::new();
    let mut hold: Option<(HoldRoute, Arc<dyn Producer>)> = None;

    if let Some(sensor_config) = &config.sensor_led {
        for (uid, &led_index) in &sensor_config.sensors {
            let producer: Arc<dyn Producer> = Arc::new(SensorLedProducer::new(
                uid.clone(),
                led_index,
                sensor_config,
                leds_total,
                updates.clone(),
                Arc::clone(&deps.clock),
            ));
            sensors.insert(uid.clone(), Arc::clone(&producer));
            producers.push(producer);
        }
    }

    if let Some(hold_config) = &config.hold {
        let producer: Arc<dyn Producer> = Arc::new(HoldProducer::new(
            HOLD_UID,
            hold_config,
            leds_total,
            updates.clone(),
            Arc::clone(&deps.clock),
        ));
        hold = Some((HoldRoute::from(hold_config), Arc::clone(&producer)));
        producers.push(producer);
    }

    if let Some(nightlight_config) = &config.nightlight {
        let producer: Arc<dyn Producer> = Arc::new(NightlightProducer::new(
            NIGHTLIGHT_UID,
            nightlight_config,
            leds_total,
            updates.clone(),
            Arc::clone(&deps.clock),
            Arc::clone(&deps.solar),
        ));
        autostart.push(Arc::clone(&producer));
        producers.push(producer);
    }

    if let Some(clock_config) = &config.clock {
        let producer: Arc<dyn Producer> = Arc::new(ClockProducer::new(
            CLOCK_UID,
            clock_config,
            leds_total,
            updates.clone(),
            Arc::clone(&deps.clock),
        ));
        autostart.push(Arc::clone(&producer));
        producers.push(producer);
    }

    if let Some(cylon_config) = &config.cylon {
        let producer: Arc<dyn Producer> = Arc::new(CylonProducer::new(
            CYLON_UID,
            cylon_config,
            leds_total,
            updates.clone(),
            Arc::clone(&deps.clock),
        ));
        autostart.push(Arc::clone(&producer));
        producers.push(producer);
    }

    if let Some(multi_blob_config) = &config.multi_blob {
        let producer: Arc<dyn Producer> = Arc::new(MultiBlobProducer::new(
            MULTI_BLOB_UID,
            multi_blob_config,
            leds_total,
            updates.clone(),
            Arc::clone(&deps.clock),
            Arc::clone(&deps.uniform),
        ));
        autostart.push(Arc::clone(&producer));
        producers.push(producer);
    }

    if let Some(audio_config) = &config.audio {
        let factory = deps.audio_input.clone().unwrap_or_else(|| {
            let spec = CaptureSpec {
                device_substring: audio_config.device_substring.clone(),
                sample_rate: audio_config.sample_rate,
                channels: audio_config.channels,
                frames_per_buffer: audio_config.frames_per_buffer,
            };
            Arc::new(move || {
                CpalAudioInput::open(&spec)
                    .map(|input| Box::new(input) as Box<dyn lichtwerk_capture::AudioInput>)
            })
        });
        let producer: Arc<dyn Producer> = Arc::new(AudioLedProducer::new(
            AUDIO_UID,
            audio_config,
            leds_total,
            updates.clone(),
            Arc::clone(&deps.clock),
            factory,
        ));
        autostart.push(Arc::clone(&producer));
        producers.push(producer);
    }

    let pool = FramePool::new(leds_total, FRAME_POOL_CAPACITY);
    let pool_recycler = pool.recycler();
    let mixer = spawn_mixer(updates.clone(), config.force_update_delay, sink, pool);
    let controller = spawn_controller(triggers, sensors, hold, Arc::clone(&events));

    for producer in &autostart {
        if let Err(message) = producer.start() {
            return Err(EngineError::ProducerStart {
                uid: producer.uid().to_string(),
                message,
            });
        }
        events.emit(EngineEvent::ProducerStarted {
            uid: producer.uid().to_string(),
        });
    }

    info!(
        leds_total,
        producers = producers.len(),
        "engine started"
    );

    Ok(EngineHandle {
        producers,
        mixer,
        controller,
        events,
        pool_recycler,
    })
}
