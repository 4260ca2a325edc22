//! Shared fixtures for in-crate tests.

use chrono::{DateTime, Local, TimeDelta, TimeZone, Utc};
use mockable::Clock;
use std::sync::Mutex;
use std::time::Duration;

/// A clock that only moves when told to.
pub(crate) struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub(crate) fn new() -> Self {
        let start = Utc
            .with_ymd_and_hms(2026, 1, 1, 12, 0, 0)
            .single()
            .expect("valid start time");
        Self {
            now: Mutex::new(start),
        }
    }

    pub(crate) fn advance(&self, by: Duration) {
        let delta = TimeDelta::from_std(by).expect("duration fits in TimeDelta");
        let mut now = self.now.lock().expect("clock lock");
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock")
    }
}
