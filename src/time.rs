//! Time stamps and the high-performance timer
//!
//! A [`TimeStamp`] is a 64-bit count of 100-nanosecond ticks since
//! midnight, January 1st 1970. Additions saturate; subtractions that
//! would go negative fail with [`ErrorKind::NegativeResult`].
//!
//! The high-performance timer is a monotonic microsecond counter anchored
//! when the kernel initializes; it is unrelated to wall-clock time and
//! never goes backwards.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use crate::error::set_last_kernel_error;
use crate::{ErrorKind, KernelError, Result};

/// 100-nanosecond ticks per second.
pub const TICKS_PER_SECOND: u64 = 10_000_000;
/// 100-nanosecond ticks per millisecond.
pub const TICKS_PER_MILLI: u64 = 10_000;
/// 100-nanosecond ticks per microsecond.
pub const TICKS_PER_MICRO: u64 = 10;

/// Earliest year the date validation accepts.
pub const MIN_YEAR: u32 = 1970;
/// Latest year the date validation accepts.
pub const MAX_YEAR: u32 = 2400;

/// Days per month in a non-leap year.
const MONTH_DAYS: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Months of the year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Month {
    January,
    February,
    March,
    April,
    May,
    June,
    July,
    August,
    September,
    October,
    November,
    December,
}

impl Month {
    /// All months, January first.
    pub const ALL: [Month; 12] = [
        Month::January,
        Month::February,
        Month::March,
        Month::April,
        Month::May,
        Month::June,
        Month::July,
        Month::August,
        Month::September,
        Month::October,
        Month::November,
        Month::December,
    ];

    /// Zero-based index of this month.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Month from a zero-based index.
    pub fn from_index(index: usize) -> Option<Month> {
        Month::ALL.get(index).copied()
    }
}

/// Days of the week, Sunday first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Weekday {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl Weekday {
    /// All days, Sunday first.
    pub const ALL: [Weekday; 7] = [
        Weekday::Sunday,
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
    ];

    /// Zero-based index of this day (Sunday is 0).
    pub fn index(self) -> usize {
        self as usize
    }
}

/// A count of 100 ns intervals since midnight 1970-01-01.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeStamp {
    ticks: u64,
}

impl TimeStamp {
    /// The zero stamp, midnight 1970-01-01.
    pub const EPOCH: TimeStamp = TimeStamp { ticks: 0 };

    /// The current wall-clock time.
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self {
            ticks: (since_epoch.as_nanos() / 100) as u64,
        }
    }

    /// Build a stamp from a raw tick count.
    pub const fn from_ticks(ticks: u64) -> Self {
        Self { ticks }
    }

    /// The raw tick count.
    pub const fn ticks(self) -> u64 {
        self.ticks
    }

    /// Add ticks in place; the addition saturates at the maximum stamp.
    pub fn add(&mut self, ticks: u64) {
        self.ticks = self.ticks.saturating_add(ticks);
    }

    /// Subtract ticks in place. A result below zero fails with
    /// [`ErrorKind::NegativeResult`] and leaves the stamp untouched.
    pub fn sub(&mut self, ticks: u64) -> Result<()> {
        match self.ticks.checked_sub(ticks) {
            Some(remaining) => {
                self.ticks = remaining;
                Ok(())
            }
            None => Err(set_last_kernel_error(ErrorKind::NegativeResult, 0)),
        }
    }

    /// Signed tick difference, `self - other`.
    pub fn difference(self, other: TimeStamp) -> i64 {
        self.ticks as i64 - other.ticks as i64
    }

    /// The stamp as whole milliseconds since the epoch. Stamps below one
    /// millisecond report zero.
    pub fn as_millis(self) -> u64 {
        if self.ticks < TICKS_PER_MILLI {
            return 0;
        }
        self.ticks / TICKS_PER_MILLI
    }

    /// A stamp `duration` later than this one, saturating.
    pub fn plus(self, duration: Duration) -> TimeStamp {
        TimeStamp {
            ticks: self.ticks.saturating_add((duration.as_nanos() / 100) as u64),
        }
    }

    /// How long ago this stamp was, zero if it lies in the future.
    pub fn elapsed(self) -> Duration {
        let now = TimeStamp::now();
        let delta = now.ticks.saturating_sub(self.ticks);
        Duration::from_nanos(delta * 100)
    }
}

/// The standard Gregorian leap-year rule.
pub fn is_leap_year(year: u32) -> bool {
    year % 400 == 0 || (year % 4 == 0 && year % 100 != 0)
}

/// The last valid day of the given month.
pub fn max_day_for_month(month: Month, year: u32) -> u32 {
    if month == Month::February && is_leap_year(year) {
        return 29;
    }
    MONTH_DAYS[month.index()]
}

/// Validate a calendar date.
pub fn is_valid_date(day: u32, month: Month, year: u32) -> bool {
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return false;
    }
    (1..=max_day_for_month(month, year)).contains(&day)
}

/// Validate a time of day with hundredths of a second.
pub fn is_valid_time(hours: u32, minutes: u32, seconds: u32, hundredths: u32) -> bool {
    hours <= 23 && minutes <= 59 && seconds <= 59 && hundredths <= 99
}

// ---------------------------------------------------------------------------
// High-performance timer
// ---------------------------------------------------------------------------

static TIMER_EPOCH: RwLock<Option<Instant>> = RwLock::new(None);

fn timer_epoch() -> Instant {
    if let Some(epoch) = *TIMER_EPOCH.read() {
        return epoch;
    }

    // Fault the anchor in for callers that run before initialize()
    let _guard = crate::sync::base_lock().enter();
    let mut epoch = TIMER_EPOCH.write();
    *epoch.get_or_insert_with(Instant::now)
}

/// Monotonic microseconds since the timer was anchored.
pub fn micro_ticks() -> u64 {
    timer_epoch().elapsed().as_micros() as u64
}

/// Sleep at least `micros` microseconds, at the best resolution the host
/// offers. Early wakeups are absorbed by re-sleeping the remainder.
pub fn sleep_us(micros: u64) {
    let deadline = Instant::now() + Duration::from_micros(micros);
    loop {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep(deadline - now);
    }
}

pub(crate) fn initialize() -> Result<()> {
    let mut epoch = TIMER_EPOCH.write();
    if epoch.is_some() {
        return Err(KernelError::new(ErrorKind::AlreadyExists)
            .with_detail("high performance timer already anchored"));
    }
    *epoch = Some(Instant::now());
    Ok(())
}

pub(crate) fn shutdown() -> Result<()> {
    *TIMER_EPOCH.write() = None;
    Ok(())
}
