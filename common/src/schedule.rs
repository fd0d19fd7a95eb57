use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Timelike};

/// Stored schedule handler. Captures whatever shared handles it needs;
/// exactly one handler per schedule kind is registered at a time.
pub type Callback = Box<dyn FnMut() + Send>;

struct IntervalSlot {
    period: Duration,
    due: DateTime<FixedOffset>,
    run: Callback,
}

struct DaySlot {
    due: DateTime<FixedOffset>,
    run: Callback,
}

/// Polled scheduler holding at most one periodic schedule and one
/// day-rollover schedule. Neither can be cancelled once armed; both live for
/// the process lifetime.
///
/// Re-arm policy after a fire: the interval slot advances from its previous
/// due timestamp by whole periods (drift-free), skipping any ticks missed
/// during a long poll gap; the day slot advances to the next local midnight.
/// Missed ticks are never backfilled; each slot fires at most once per poll.
#[derive(Default)]
pub struct Scheduler {
    interval: Option<IntervalSlot>,
    day: Option<DaySlot>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the periodic schedule, replacing any previous one. The
    /// first due timestamp is `now` truncated to the minute plus `minutes`,
    /// so ticks land on clean minute boundaries.
    pub fn on_interval(&mut self, minutes: u32, now: DateTime<FixedOffset>, run: Callback) {
        let period = Duration::minutes(i64::from(minutes.max(1)));
        self.interval = Some(IntervalSlot {
            period,
            due: minute_floor(now) + period,
            run,
        });
    }

    /// Registers the day-rollover schedule, replacing any previous one; due
    /// at the next local midnight after `now`.
    pub fn on_next_day(&mut self, now: DateTime<FixedOffset>, run: Callback) {
        self.day = Some(DaySlot {
            due: next_midnight(now),
            run,
        });
    }

    /// Polls both schedules; intended to run every iteration of the host
    /// loop. When both are due in the same poll each fires exactly once; the
    /// relative order is not part of the contract.
    pub fn poll(&mut self, now: DateTime<FixedOffset>) {
        if let Some(slot) = self.interval.as_mut() {
            if now >= slot.due {
                (slot.run)();
                slot.due += slot.period;
                while slot.due <= now {
                    slot.due += slot.period;
                }
            }
        }

        if let Some(slot) = self.day.as_mut() {
            if now >= slot.due {
                (slot.run)();
                slot.due = next_midnight(now);
            }
        }
    }

    pub fn interval_due(&self) -> Option<DateTime<FixedOffset>> {
        self.interval.as_ref().map(|slot| slot.due)
    }

    pub fn day_rollover_due(&self) -> Option<DateTime<FixedOffset>> {
        self.day.as_ref().map(|slot| slot.due)
    }
}

fn minute_floor(now: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    now.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}

fn next_midnight(now: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    let tomorrow = (now.date_naive() + Duration::days(1)).and_time(NaiveTime::MIN);
    now.offset()
        .from_local_datetime(&tomorrow)
        .single()
        .unwrap_or(now + Duration::days(1))
}
