use chrono::{DateTime, FixedOffset, Offset, Utc};
use chrono_tz::Tz;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClockError {
    #[error("unrecognized timezone `{0}`")]
    InvalidTimezone(String),
    #[error("time source unavailable: {0}")]
    SourceUnavailable(String),
}

/// Upstream time reference. `synchronize` confirms the reference is serving
/// valid time (SNTP on device builds); failure is recoverable and callers are
/// expected to retry.
pub trait TimeSource {
    fn synchronize(&mut self) -> Result<(), ClockError>;
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Reads a system clock assumed to already be disciplined (host builds).
#[derive(Debug, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn synchronize(&mut self) -> Result<(), ClockError> {
        Ok(())
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Timezone-adjusted wall clock. Date and time queries return `None` until
/// `sync` has succeeded once; schedule computations must not run before that.
pub struct WallClock<S> {
    source: S,
    tz: Tz,
    synced: bool,
}

impl<S: TimeSource> WallClock<S> {
    pub fn new(source: S, timezone: &str) -> Result<Self, ClockError> {
        let tz = timezone
            .parse::<Tz>()
            .map_err(|_| ClockError::InvalidTimezone(timezone.to_string()))?;
        Ok(Self {
            source,
            tz,
            synced: false,
        })
    }

    /// Attempts to synchronize against the upstream reference. A failure
    /// leaves the synced flag (and any armed schedules) untouched.
    pub fn sync(&mut self) -> Result<(), ClockError> {
        self.source.synchronize()?;
        self.synced = true;
        Ok(())
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn now(&self) -> Option<DateTime<FixedOffset>> {
        if !self.synced {
            return None;
        }
        let local = self.source.now_utc().with_timezone(&self.tz);
        Some(local.with_timezone(&local.offset().fix()))
    }

    /// Current local calendar date, ISO-8601 (`YYYY-MM-DD`).
    pub fn today(&self) -> Option<String> {
        self.now().map(|now| now.format("%Y-%m-%d").to_string())
    }

    pub fn timezone(&self) -> &str {
        self.tz.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct ManualTimeSource {
        now: DateTime<Utc>,
        reachable: bool,
    }

    impl TimeSource for ManualTimeSource {
        fn synchronize(&mut self) -> Result<(), ClockError> {
            if self.reachable {
                Ok(())
            } else {
                Err(ClockError::SourceUnavailable("no route".to_string()))
            }
        }

        fn now_utc(&self) -> DateTime<Utc> {
            self.now
        }
    }

    fn source_at(hour: u32) -> ManualTimeSource {
        ManualTimeSource {
            now: Utc.with_ymd_and_hms(2026, 3, 14, hour, 30, 0).unwrap(),
            reachable: true,
        }
    }

    #[test]
    fn unsynced_clock_reports_nothing() {
        let clock = WallClock::new(source_at(12), "UTC").unwrap();

        assert!(!clock.is_synced());
        assert!(clock.now().is_none());
        assert!(clock.today().is_none());
    }

    #[test]
    fn sync_flips_the_flag_immediately() {
        let mut clock = WallClock::new(source_at(12), "UTC").unwrap();
        clock.sync().unwrap();

        assert!(clock.is_synced());
        assert_eq!(clock.today().as_deref(), Some("2026-03-14"));
    }

    #[test]
    fn failed_sync_leaves_clock_unsynced() {
        let mut source = source_at(12);
        source.reachable = false;
        let mut clock = WallClock::new(source, "UTC").unwrap();

        assert!(clock.sync().is_err());
        assert!(!clock.is_synced());
        assert!(clock.now().is_none());
    }

    #[test]
    fn timezone_offset_is_applied() {
        // 01:30 UTC is still the previous evening in Los Angeles.
        let mut clock = WallClock::new(source_at(1), "America/Los_Angeles").unwrap();
        clock.sync().unwrap();

        assert_eq!(clock.today().as_deref(), Some("2026-03-13"));
    }

    #[test]
    fn bogus_timezone_is_rejected() {
        assert!(matches!(
            WallClock::new(source_at(0), "Mars/Olympus_Mons"),
            Err(ClockError::InvalidTimezone(_))
        ));
    }
}
