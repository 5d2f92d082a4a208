use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, TimeDelta};

use crate::clock::SystemClock;
use crate::engine::BookingPolicy;

/// Runtime settings, read from `ROOMBOOK_*` environment variables.
/// Unset or unparsable values fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub wal_file: String,
    pub metrics_port: Option<u16>,
    pub min_duration_minutes: i64,
    pub max_duration_minutes: i64,
    pub modification_lead_minutes: i64,
    /// How far ahead of a confirmed booking its reminder goes out.
    pub reminder_lead_minutes: i64,
    pub reminder_period_secs: u64,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    /// Facility offset from UTC. `None` uses the host's local zone.
    pub utc_offset_minutes: Option<i32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            wal_file: "roombook.wal".into(),
            metrics_port: None,
            min_duration_minutes: 30,
            max_duration_minutes: 240,
            modification_lead_minutes: 120,
            reminder_lead_minutes: 24 * 60,
            reminder_period_secs: 60,
            compact_threshold: 1000,
            utc_offset_minutes: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            data_dir: get("ROOMBOOK_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            wal_file: get("ROOMBOOK_WAL_FILE").unwrap_or(d.wal_file),
            metrics_port: parse_var(&get, "ROOMBOOK_METRICS_PORT"),
            min_duration_minutes: parse_var(&get, "ROOMBOOK_MIN_DURATION_MINUTES")
                .unwrap_or(d.min_duration_minutes),
            max_duration_minutes: parse_var(&get, "ROOMBOOK_MAX_DURATION_MINUTES")
                .unwrap_or(d.max_duration_minutes),
            modification_lead_minutes: parse_var(&get, "ROOMBOOK_MODIFICATION_LEAD_MINUTES")
                .unwrap_or(d.modification_lead_minutes),
            reminder_lead_minutes: parse_var(&get, "ROOMBOOK_REMINDER_LEAD_MINUTES")
                .unwrap_or(d.reminder_lead_minutes),
            reminder_period_secs: parse_var(&get, "ROOMBOOK_REMINDER_PERIOD_SECS")
                .unwrap_or(d.reminder_period_secs),
            compact_threshold: parse_var(&get, "ROOMBOOK_COMPACT_THRESHOLD").unwrap_or(d.compact_threshold),
            utc_offset_minutes: parse_var(&get, "ROOMBOOK_UTC_OFFSET_MINUTES"),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(&self.wal_file)
    }

    /// Booking rules from the configured minutes. A non-positive or inverted
    /// duration range falls back to the default range as a whole.
    pub fn policy(&self) -> BookingPolicy {
        let d = BookingPolicy::default();
        let (min, max) = (self.min_duration_minutes, self.max_duration_minutes);
        let (min_duration, max_duration) =
            match (TimeDelta::try_minutes(min), TimeDelta::try_minutes(max)) {
                (Some(lo), Some(hi)) if min > 0 && min <= max => (lo, hi),
                _ => {
                    tracing::warn!("ignoring booking duration range {min}-{max} min, using defaults");
                    (d.min_duration, d.max_duration)
                }
            };
        let modification_lead = TimeDelta::try_minutes(self.modification_lead_minutes)
            .filter(|lead| *lead >= TimeDelta::zero())
            .unwrap_or(d.modification_lead);
        BookingPolicy {
            min_duration,
            max_duration,
            modification_lead,
            ..d
        }
    }

    pub fn clock(&self) -> SystemClock {
        let offset = self
            .utc_offset_minutes
            .and_then(|m| m.checked_mul(60))
            .and_then(FixedOffset::east_opt);
        SystemClock::new(offset)
    }

    pub fn reminder_lead(&self) -> TimeDelta {
        TimeDelta::try_minutes(self.reminder_lead_minutes)
            .unwrap_or_else(|| TimeDelta::minutes(Self::default().reminder_lead_minutes))
    }

    pub fn reminder_period(&self) -> Duration {
        Duration::from_secs(self.reminder_period_secs)
    }
}

fn parse_var<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    get(key).and_then(|s| s.parse().ok())
}
