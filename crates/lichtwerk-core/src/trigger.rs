use std::time::Instant;

/// A sampled sensor event as seen by the controller.
///
/// `id` names either a physical sensor or a logical trigger source;
/// `value` is the raw sampled reading.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub id: String,
    pub value: i64,
    pub timestamp: Instant,
}

impl Trigger {
    pub fn new(id: impl Into<String>, value: i64, timestamp: Instant) -> Self {
        Self {
            id: id.into(),
            value,
            timestamp,
        }
    }
}
