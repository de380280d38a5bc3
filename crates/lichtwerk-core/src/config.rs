use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pixel::Pixel;

/// An RGB color as it appears on the config surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl From<Color> for Pixel {
    fn from(color: Color) -> Self {
        Pixel::new(f32::from(color.r), f32::from(color.g), f32::from(color.b))
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// The full config surface consumed by the engine.
///
/// File parsing, hot reload and the web surface belong to outer
/// collaborators; the engine receives this as an immutable value and
/// threads it through the constructors. Swapping a config means
/// building a new engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StripConfig {
    pub leds_total: usize,
    /// Mixer heartbeat: the display sink receives a refresh at least
    /// this often, producer activity or not.
    #[serde(with = "duration_ms")]
    pub force_update_delay: Duration,
    pub sensor_led: Option<SensorLedConfig>,
    pub hold: Option<HoldConfig>,
    pub nightlight: Option<NightlightConfig>,
    pub clock: Option<ClockDisplayConfig>,
    pub cylon: Option<CylonConfig>,
    pub multi_blob: Option<MultiBlobConfig>,
    pub audio: Option<AudioConfig>,
}

impl Default for StripConfig {
    fn default() -> Self {
        Self {
            leds_total: 60,
            force_update_delay: Duration::from_millis(500),
            sensor_led: None,
            hold: None,
            nightlight: None,
            clock: None,
            cylon: None,
            multi_blob: None,
            audio: None,
        }
    }
}

/// Sensor-driven bar animations: one producer per entry in `sensors`,
/// keyed by the trigger id it reacts to, centered on its led index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorLedConfig {
    #[serde(with = "duration_ms")]
    pub run_up: Duration,
    #[serde(with = "duration_ms")]
    pub run_down: Duration,
    #[serde(with = "duration_ms")]
    pub hold: Duration,
    pub color: Color,
    pub sensors: BTreeMap<String, usize>,
}

impl Default for SensorLedConfig {
    fn default() -> Self {
        Self {
            run_up: Duration::from_millis(20),
            run_down: Duration::from_millis(20),
            hold: Duration::from_secs(5),
            color: Color::new(255, 0, 0),
            sensors: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoldConfig {
    /// Trigger id that can drive the latch.
    pub trigger_source: String,
    /// Minimum sampled value for a trigger to count as a latch candidate.
    pub trigger_value: i64,
    #[serde(with = "duration_ms")]
    pub trigger_delay: Duration,
    #[serde(with = "duration_ms")]
    pub hold_time: Duration,
    pub color: Color,
}

impl Default for HoldConfig {
    fn default() -> Self {
        Self {
            trigger_source: "hold".to_string(),
            trigger_value: 100,
            trigger_delay: Duration::from_secs(1),
            hold_time: Duration::from_secs(300),
            color: Color::new(0, 128, 0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NightlightConfig {
    pub latitude: f64,
    pub longitude: f64,
    pub night_color: Color,
}

impl Default for NightlightConfig {
    fn default() -> Self {
        Self {
            latitude: 52.52,
            longitude: 13.405,
            night_color: Color::new(64, 0, 0),
        }
    }
}

/// Two-pixel wall clock: the hour pixel maps the time of day onto
/// `start_hour_led..=end_hour_led`, the minute pixel maps the minute
/// onto `start_minute_led..=end_minute_led`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockDisplayConfig {
    pub start_hour_led: usize,
    pub end_hour_led: usize,
    pub start_minute_led: usize,
    pub end_minute_led: usize,
    pub hour_color: Color,
    pub minute_color: Color,
}

impl Default for ClockDisplayConfig {
    fn default() -> Self {
        Self {
            start_hour_led: 0,
            end_hour_led: 29,
            start_minute_led: 30,
            end_minute_led: 59,
            hour_color: Color::new(0, 0, 255),
            minute_color: Color::new(255, 255, 0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CylonConfig {
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    #[serde(with = "duration_ms")]
    pub delay: Duration,
    /// Pixels the blob center moves per tick.
    pub step: usize,
    pub width: usize,
    pub color: Color,
}

impl Default for CylonConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(30),
            delay: Duration::from_millis(30),
            step: 1,
            width: 4,
            color: Color::new(255, 0, 0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    pub x: f64,
    pub width: f64,
    /// Signed step per tick; the sign seeds the travel direction.
    pub delta_x: f64,
    pub color: Color,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            x: 0.0,
            width: 4.0,
            delta_x: 1.0,
            color: Color::new(255, 255, 255),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiBlobConfig {
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    #[serde(with = "duration_ms")]
    pub delay: Duration,
    /// Probability that a detected blob collision is ignored and the
    /// pair passes through each other. Keeps lock-step pairs from
    /// oscillating forever.
    pub pass_through_p: f64,
    pub blobs: BTreeMap<String, BlobConfig>,
}

impl Default for MultiBlobConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(60),
            delay: Duration::from_millis(50),
            pass_through_p: 1.0 / 3.0,
            blobs: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Case-insensitive substring of the capture device name.
    pub device_substring: String,
    pub start_led: usize,
    /// Exclusive end of the meter range.
    pub end_led: usize,
    pub green_color: Color,
    pub yellow_color: Color,
    pub red_color: Color,
    pub sample_rate: u32,
    pub channels: u16,
    pub frames_per_buffer: usize,
    #[serde(with = "duration_ms")]
    pub update_freq: Duration,
    pub min_db: f32,
    pub max_db: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device_substring: String::new(),
            start_led: 0,
            end_led: 60,
            green_color: Color::new(0, 255, 0),
            yellow_color: Color::new(255, 255, 0),
            red_color: Color::new(255, 0, 0),
            sample_rate: 44_100,
            channels: 2,
            frames_per_buffer: 1024,
            update_freq: Duration::from_millis(50),
            min_db: -60.0,
            max_db: 0.0,
        }
    }
}

impl StripConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.leds_total == 0 {
            return Err(ConfigError::NoLeds);
        }
        ensure_duration(self.force_update_delay, "force_update_delay")?;

        if let Some(sensor) = &self.sensor_led {
            ensure_duration(sensor.run_up, "sensor_led.run_up")?;
            ensure_duration(sensor.run_down, "sensor_led.run_down")?;
            ensure_duration(sensor.hold, "sensor_led.hold")?;
            for (uid, &index) in &sensor.sensors {
                if index >= self.leds_total {
                    return Err(ConfigError::LedIndexOutOfRange {
                        what: format!("sensor {uid}"),
                        index,
                        total: self.leds_total,
                    });
                }
            }
        }

        if let Some(hold) = &self.hold {
            ensure_duration(hold.trigger_delay, "hold.trigger_delay")?;
            ensure_duration(hold.hold_time, "hold.hold_time")?;
        }

        if let Some(nightlight) = &self.nightlight {
            if !(-90.0..=90.0).contains(&nightlight.latitude) {
                return Err(ConfigError::CoordinateRange {
                    what: "latitude",
                    value: nightlight.latitude,
                });
            }
            if !(-180.0..=180.0).contains(&nightlight.longitude) {
                return Err(ConfigError::CoordinateRange {
                    what: "longitude",
                    value: nightlight.longitude,
                });
            }
        }

        if let Some(clock) = &self.clock {
            for (what, index) in [
                ("clock.start_hour_led", clock.start_hour_led),
                ("clock.end_hour_led", clock.end_hour_led),
                ("clock.start_minute_led", clock.start_minute_led),
                ("clock.end_minute_led", clock.end_minute_led),
            ] {
                if index >= self.leds_total {
                    return Err(ConfigError::LedIndexOutOfRange {
                        what: what.to_string(),
                        index,
                        total: self.leds_total,
                    });
                }
            }
        }

        if let Some(cylon) = &self.cylon {
            ensure_duration(cylon.duration, "cylon.duration")?;
            ensure_duration(cylon.delay, "cylon.delay")?;
            if cylon.step == 0 {
                return Err(ConfigError::ZeroValue {
                    what: "cylon.step",
                });
            }
            if cylon.width > self.leds_total / 2 {
                return Err(ConfigError::CylonTooWide {
                    width: cylon.width,
                    total: self.leds_total,
                });
            }
        }

        if let Some(multi_blob) = &self.multi_blob {
            ensure_duration(multi_blob.duration, "multi_blob.duration")?;
            ensure_duration(multi_blob.delay, "multi_blob.delay")?;
            if !(0.0..=1.0).contains(&multi_blob.pass_through_p) {
                return Err(ConfigError::PassThroughRange {
                    value: multi_blob.pass_through_p,
                });
            }
            if multi_blob.blobs.is_empty() {
                return Err(ConfigError::NoBlobs);
            }
            for (uid, blob) in &multi_blob.blobs {
                if blob.x < 0.0 || blob.x >= self.leds_total as f64 {
                    return Err(ConfigError::BlobOutOfRange {
                        uid: uid.clone(),
                        x: blob.x,
                        total: self.leds_total,
                    });
                }
                if blob.width <= 0.0 {
                    return Err(ConfigError::BlobZeroWidth { uid: uid.clone() });
                }
            }
        }

        if let Some(audio) = &self.audio {
            if audio.start_led >= audio.end_led || audio.end_led > self.leds_total {
                return Err(ConfigError::AudioLedRange {
                    start: audio.start_led,
                    end: audio.end_led,
                    total: self.leds_total,
                });
            }
            if audio.min_db >= audio.max_db {
                return Err(ConfigError::DbRange {
                    min_db: audio.min_db,
                    max_db: audio.max_db,
                });
            }
            if audio.channels == 0 {
                return Err(ConfigError::NoChannels);
            }
            if audio.sample_rate == 0 {
                return Err(ConfigError::ZeroValue {
                    what: "audio.sample_rate",
                });
            }
            if audio.frames_per_buffer == 0 {
                return Err(ConfigError::ZeroValue {
                    what: "audio.frames_per_buffer",
                });
            }
            ensure_duration(audio.update_freq, "audio.update_freq")?;
        }

        Ok(())
    }
}

fn ensure_duration(value: Duration, what: &'static str) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::ZeroDuration { what });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{
        AudioConfig, BlobConfig, Color, CylonConfig, MultiBlobConfig, SensorLedConfig, StripConfig,
    };
    use crate::error::ConfigError;

    fn base_config() -> StripConfig {
        StripConfig {
            leds_total: 10,
            ..StripConfig::default()
        }
    }

    #[test]
    fn default_config_is_valid() {
        StripConfig::default().validate().expect("default config");
    }

    #[test]
    fn zero_leds_is_rejected() {
        let config = StripConfig {
            leds_total: 0,
            ..StripConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::NoLeds)));
    }

    #[test]
    fn sensor_index_must_fit_the_strip() {
        let mut config = base_config();
        let mut sensor = SensorLedConfig::default();
        sensor.sensors.insert("door".to_string(), 10);
        config.sensor_led = Some(sensor);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::LedIndexOutOfRange { index: 10, .. })
        ));
    }

    #[test]
    fn cylon_width_is_bounded_by_half_the_strip() {
        let mut config = base_config();
        config.cylon = Some(CylonConfig {
            width: 6,
            ..CylonConfig::default()
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::CylonTooWide { width: 6, total: 10 })
        ));
    }

    #[test]
    fn blob_start_must_be_on_the_strip() {
        let mut config = base_config();
        let mut multi_blob = MultiBlobConfig::default();
        multi_blob.blobs.insert(
            "runner".to_string(),
            BlobConfig {
                x: 10.0,
                ..BlobConfig::default()
            },
        );
        config.multi_blob = Some(multi_blob);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BlobOutOfRange { .. })
        ));
    }

    #[test]
    fn audio_db_range_must_be_ordered() {
        let mut config = base_config();
        config.audio = Some(AudioConfig {
            start_led: 0,
            end_led: 10,
            min_db: -10.0,
            max_db: -10.0,
            ..AudioConfig::default()
        });
        assert!(matches!(config.validate(), Err(ConfigError::DbRange { .. })));
    }

    #[test]
    fn durations_round_trip_as_milliseconds() {
        let config = StripConfig {
            leds_total: 10,
            force_update_delay: Duration::from_millis(250),
            ..StripConfig::default()
        };
        let json = serde_json::to_value(&config).expect("serialize config");
        assert_eq!(json["force_update_delay"], 250);

        let back: StripConfig = serde_json::from_value(json).expect("deserialize config");
        assert_eq!(back, config);
    }

    #[test]
    fn color_converts_to_full_scale_pixel() {
        let pixel: crate::pixel::Pixel = Color::new(255, 0, 128).into();
        assert_eq!(pixel.r, 255.0);
        assert_eq!(pixel.g, 0.0);
        assert_eq!(pixel.b, 128.0);
    }
}
