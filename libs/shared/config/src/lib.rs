use std::env;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Slots are capped at one day.
pub const MAX_SLOT_DURATION_MINUTES: i64 = 24 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub bind_address: String,
    /// Fixed length of every appointment slot, used by the double-booking guard.
    pub slot_duration_minutes: i64,
    /// Offset from UTC that decides which calendar day a ticket belongs to.
    pub clinic_utc_offset_minutes: i32,
    pub store_max_attempts: u32,
    pub store_retry_backoff_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            slot_duration_minutes: 30,
            clinic_utc_offset_minutes: 0,
            store_max_attempts: 3,
            store_retry_backoff_ms: 50,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            bind_address: env::var("CLINIC_BIND_ADDRESS")
                .unwrap_or_else(|_| {
                    warn!("CLINIC_BIND_ADDRESS not set, using {}", defaults.bind_address);
                    defaults.bind_address.clone()
                }),
            slot_duration_minutes: parse_var("CLINIC_SLOT_DURATION_MINUTES", defaults.slot_duration_minutes),
            clinic_utc_offset_minutes: parse_var("CLINIC_UTC_OFFSET_MINUTES", defaults.clinic_utc_offset_minutes),
            store_max_attempts: parse_var("CLINIC_STORE_MAX_ATTEMPTS", defaults.store_max_attempts),
            store_retry_backoff_ms: parse_var("CLINIC_STORE_RETRY_BACKOFF_MS", defaults.store_retry_backoff_ms),
        };

        if !config.is_valid() {
            warn!("Clinic engine configuration is out of range, falling back to defaults where needed");
            return config.sanitized();
        }

        config
    }

    pub fn is_valid(&self) -> bool {
        (1..=MAX_SLOT_DURATION_MINUTES).contains(&self.slot_duration_minutes)
            && self.store_max_attempts > 0
            // chrono::FixedOffset accepts strictly less than a day either way
            && self.clinic_utc_offset_minutes.abs() < 24 * 60
    }

    fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if !(1..=MAX_SLOT_DURATION_MINUTES).contains(&self.slot_duration_minutes) {
            self.slot_duration_minutes = defaults.slot_duration_minutes;
        }
        if self.store_max_attempts == 0 {
            self.store_max_attempts = defaults.store_max_attempts;
        }
        if self.clinic_utc_offset_minutes.abs() >= 24 * 60 {
            self.clinic_utc_offset_minutes = defaults.clinic_utc_offset_minutes;
        }
        self
    }
}

fn parse_var<T>(name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display + Copy,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has unparsable value {:?}, using {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}
