use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, Utc};
use tracing::warn;

use shared_config::AppConfig;

/// Source of "now" for every time-dependent rule in the engine.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Maps instants onto the clinic's calendar days.
#[derive(Debug, Clone, Copy)]
pub struct ClinicCalendar {
    offset: FixedOffset,
}

impl ClinicCalendar {
    pub fn new(offset_minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(offset_minutes * 60).unwrap_or_else(|| {
            warn!("Clinic UTC offset of {} minutes is out of range, using UTC", offset_minutes);
            utc()
        });
        Self { offset }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.clinic_utc_offset_minutes)
    }

    pub fn day_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    /// Half-open UTC range `[start, end)` covering one clinic day.
    pub fn day_bounds(&self, day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let local_midnight = day.and_time(NaiveTime::MIN);
        let offset = Duration::seconds(self.offset.local_minus_utc() as i64);
        let start = (local_midnight - offset).and_utc();
        (start, start + Duration::days(1))
    }
}

fn utc() -> FixedOffset {
    Utc.fix()
}
