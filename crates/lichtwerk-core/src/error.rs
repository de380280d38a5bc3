use thiserror::Error;

/// Rejected configuration.
///
/// Validation runs once, before the engine spawns anything; past that
/// point the core assumes a valid config and treats violations as
/// bugs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("strip must have at least one led")]
    NoLeds,

    #[error("{what} must be a positive duration")]
    ZeroDuration { what: &'static str },

    #[error("led index {index} out of range for a strip of {total} leds ({what})")]
    LedIndexOutOfRange {
        what: String,
        index: usize,
        total: usize,
    },

    #[error("blob {uid} starts at x={x} outside the strip (0..{total})")]
    BlobOutOfRange { uid: String, x: f64, total: usize },

    #[error("blob {uid} must have a positive width")]
    BlobZeroWidth { uid: String },

    #[error("multi blob section configured without any blobs")]
    NoBlobs,

    #[error("pass_through_p {value} must lie in 0.0..=1.0")]
    PassThroughRange { value: f64 },

    #[error("cylon width {width} must not exceed half the strip ({total} leds)")]
    CylonTooWide { width: usize, total: usize },

    #[error("audio led range {start}..{end} is empty or exceeds the strip ({total} leds)")]
    AudioLedRange {
        start: usize,
        end: usize,
        total: usize,
    },

    #[error("min_db {min_db} must be below max_db {max_db}")]
    DbRange { min_db: f32, max_db: f32 },

    #[error("{what} {value} is not a valid coordinate")]
    CoordinateRange { what: &'static str, value: f64 },

    #[error("audio capture needs at least one channel")]
    NoChannels,

    #[error("{what} must be positive")]
    ZeroValue { what: &'static str },
}
