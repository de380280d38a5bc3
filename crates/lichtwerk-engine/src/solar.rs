use chrono::{DateTime, Datelike, Local, NaiveDate, TimeZone, Utc};

/// Civil sunrise/sunset for a location and date.
///
/// Injected into the nightlight producer; the default implementation
/// computes real solar times, test doubles script them.
pub trait SolarSchedule: Send + Sync + 'static {
    fn sunrise_sunset(
        &self,
        latitude: f64,
        longitude: f64,
        date: NaiveDate,
    ) -> (DateTime<Local>, DateTime<Local>);
}

/// Solar times via the `sunrise` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SunriseTable;

impl SolarSchedule for SunriseTable {
    fn sunrise_sunset(
        &self,
        latitude: f64,
        longitude: f64,
        date: NaiveDate,
    ) -> (DateTime<Local>, DateTime<Local>) {
        let (rise, set) = sunrise::sunrise_sunset(
            latitude,
            longitude,
            date.year(),
            date.month(),
            date.day(),
        );
        (local_from_unix(rise), local_from_unix(set))
    }
}

fn local_from_unix(seconds: i64) -> DateTime<Local> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
        .with_timezone(&Local)
}

#[cfg(test)]
mod tests {
    use super::{SolarSchedule, SunriseTable};
    use chrono::NaiveDate;

    #[test]
    fn sunrise_precedes_sunset_at_mid_latitudes() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 21).expect("valid date");
        let (rise, set) = SunriseTable.sunrise_sunset(52.52, 13.405, date);
        assert!(rise < set);
        // Midsummer in Berlin is a long day.
        assert!(set - rise > chrono::Duration::hours(12));
    }
}
