use std::sync::Mutex;

use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::clock::Clock;

pub struct TestConfig {
    pub slot_duration_minutes: i64,
    pub clinic_utc_offset_minutes: i32,
    pub store_max_attempts: u32,
    pub store_retry_backoff_ms: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            slot_duration_minutes: 30,
            clinic_utc_offset_minutes: 0,
            store_max_attempts: 3,
            // keep retry loops fast in tests
            store_retry_backoff_ms: 1,
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            bind_address: "127.0.0.1:0".to_string(),
            slot_duration_minutes: self.slot_duration_minutes,
            clinic_utc_offset_minutes: self.clinic_utc_offset_minutes,
            store_max_attempts: self.store_max_attempts,
            store_retry_backoff_ms: self.store_retry_backoff_ms,
        }
    }
}

/// Clock pinned to an instant that tests move by hand.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    /// Monday 2026-03-02 09:00 UTC, a quiet weekday morning.
    pub fn morning() -> Self {
        Self::new(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().unwrap_or_else(Utc::now))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.guard() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.guard();
        *now += by;
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        match self.now.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.guard()
    }
}

/// Fresh references for the external entities the engine only points at.
#[derive(Debug, Clone, Copy)]
pub struct TestRefs {
    pub branch_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
}

impl Default for TestRefs {
    fn default() -> Self {
        Self {
            branch_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
        }
    }
}
