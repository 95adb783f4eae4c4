// =============================================================================
// Trading Calendar — pure open/closed predicate consulted by the engine
// =============================================================================
//
// The core never computes holidays or session boundaries itself; it asks
// this collaborator. Two implementations ship:
//
//   * `AlwaysOpen`      — backtests and tests that don't model sessions.
//   * `FuturesCalendar` — a near-24×6 futures schedule: closed Saturdays,
//     a daily maintenance break, a weekend gap from the Friday break to the
//     Sunday re-open, and a configured holiday list.
//
// Session dates roll at the maintenance break, not at midnight: the Sunday
// evening re-open already belongs to Monday's session.
// =============================================================================

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Trading-hours collaborator. Implementations must be pure: same input,
/// same answer, no clock reads.
pub trait TradingCalendar: Send + Sync {
    /// Whether orders may be submitted at `ts`.
    fn is_open(&self, ts: DateTime<Utc>) -> bool;

    /// The first instant at or after `ts` at which the market is open.
    fn next_open(&self, ts: DateTime<Utc>) -> DateTime<Utc>;

    /// The session date `ts` belongs to; drives daily risk resets.
    fn session_date(&self, ts: DateTime<Utc>) -> NaiveDate;
}

// ---------------------------------------------------------------------------
// AlwaysOpen
// ---------------------------------------------------------------------------

/// Calendar that never closes. Sessions are plain UTC dates.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOpen;

impl TradingCalendar for AlwaysOpen {
    fn is_open(&self, _ts: DateTime<Utc>) -> bool {
        true
    }

    fn next_open(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        ts
    }

    fn session_date(&self, ts: DateTime<Utc>) -> NaiveDate {
        ts.date_naive()
    }
}

// ---------------------------------------------------------------------------
// FuturesCalendar
// ---------------------------------------------------------------------------

/// Schedule parameters for the futures calendar, all times UTC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuturesSchedule {
    /// Daily maintenance break start (also the Friday weekly close).
    pub maintenance_start: NaiveTime,
    /// Daily maintenance break end (also the Sunday weekly open).
    pub maintenance_end: NaiveTime,
    /// Full-day holidays, keyed by session date.
    pub holidays: Vec<NaiveDate>,
}

impl Default for FuturesSchedule {
    fn default() -> Self {
        Self {
            maintenance_start: NaiveTime::from_hms_opt(21, 0, 0).unwrap(),
            maintenance_end: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            holidays: Vec::new(),
        }
    }
}

/// Near-24×6 futures trading calendar.
#[derive(Debug, Clone)]
pub struct FuturesCalendar {
    schedule: FuturesSchedule,
}

impl FuturesCalendar {
    pub fn new(schedule: FuturesSchedule) -> Self {
        Self { schedule }
    }

    fn in_maintenance(&self, time: NaiveTime) -> bool {
        time >= self.schedule.maintenance_start && time < self.schedule.maintenance_end
    }

    fn is_holiday(&self, session: NaiveDate) -> bool {
        self.schedule.holidays.contains(&session)
    }
}

impl TradingCalendar for FuturesCalendar {
    fn is_open(&self, ts: DateTime<Utc>) -> bool {
        let time = ts.time();
        let open = match ts.weekday() {
            Weekday::Sat => false,
            Weekday::Fri => time < self.schedule.maintenance_start,
            Weekday::Sun => time >= self.schedule.maintenance_end,
            _ => !self.in_maintenance(time),
        };
        open && !self.is_holiday(self.session_date(ts))
    }

    fn next_open(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        if self.is_open(ts) {
            return ts;
        }
        // Walk forward through maintenance-end boundaries until one is open.
        // Bounded: the longest closure (weekend + holiday run) is days, not
        // weeks.
        let mut candidate = if ts.time() < self.schedule.maintenance_end {
            ts.date_naive()
                .and_time(self.schedule.maintenance_end)
                .and_utc()
        } else {
            (ts.date_naive() + Duration::days(1))
                .and_time(self.schedule.maintenance_end)
                .and_utc()
        };
        for _ in 0..14 {
            if self.is_open(candidate) {
                return candidate;
            }
            candidate += Duration::days(1);
        }
        candidate
    }

    fn session_date(&self, ts: DateTime<Utc>) -> NaiveDate {
        if ts.time() >= self.schedule.maintenance_end {
            ts.date_naive() + Duration::days(1)
        } else {
            ts.date_naive()
        }
    }
}
