//! Local-time helpers for the dashboard rows.
//!
//! Every function takes the instant and the zone explicitly and never reads
//! the system clock. The generic helpers accept any [`chrono::TimeZone`];
//! the `*_in` variants take an IANA zone name such as `Europe/London`, as
//! stored on [`City`](crate::City), and resolve it with [`parse_zone`].
//!
//! [`DayPhase`] partitions the day without gaps or overlaps. The styling
//! predicates ([`is_business_hours`], [`is_early_morning`], [`is_evening`])
//! are independent of the phases: business hours include 18:00 while the
//! `Day` phase ends at 17:59.
use chrono::{
    DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc, Weekday,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Part of the day an instant falls into, in local time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayPhase {
    /// 00:00 to 07:59
    Sleep,
    /// 08:00 to 08:59
    Early,
    /// 09:00 to 17:59
    Day,
    /// 18:00 to 21:30
    Evening,
    /// 21:31 to 23:59
    Night,
}

impl DayPhase {
    pub fn from_minutes(minutes: u32) -> Self {
        match minutes {
            0..=479 => DayPhase::Sleep,
            480..=539 => DayPhase::Early,
            540..=1079 => DayPhase::Day,
            1080..=1290 => DayPhase::Evening,
            _ => DayPhase::Night,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DayPhase::Sleep => "sleep",
            DayPhase::Early => "early",
            DayPhase::Day => "day",
            DayPhase::Evening => "evening",
            DayPhase::Night => "night",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeError {
    #[error("expected HH:mm, got {0:?}")]
    InvalidFormat(String),
    #[error("{0:?} is not a valid time of day")]
    OutOfRange(String),
    /// The local time falls into a DST gap.
    #[error("{0} does not exist in the given zone")]
    Nonexistent(NaiveDateTime),
    #[error("unknown time zone {0:?}")]
    UnknownZone(String),
}

/// Resolves an IANA zone name, e.g. `America/New_York`.
pub fn parse_zone(name: &str) -> Result<Tz, TimeError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| TimeError::UnknownZone(name.to_owned()))
}

fn local<Z: TimeZone>(instant: DateTime<Utc>, tz: &Z) -> NaiveDateTime {
    instant.with_timezone(tz).naive_local()
}

/// Minutes since local midnight, `0..1440`.
pub fn minutes_since_midnight<Z: TimeZone>(instant: DateTime<Utc>, tz: &Z) -> u32 {
    let local = local(instant, tz);
    local.hour() * 60 + local.minute()
}

/// 24-hour `HH:mm` in local time.
pub fn format_hhmm<Z: TimeZone>(instant: DateTime<Utc>, tz: &Z) -> String {
    local(instant, tz).format("%H:%M").to_string()
}

pub fn classify_phase_at<Z: TimeZone>(instant: DateTime<Utc>, tz: &Z) -> DayPhase {
    DayPhase::from_minutes(minutes_since_midnight(instant, tz))
}

/// 09:00 to 18:00, both inclusive.
pub fn is_business_hours<Z: TimeZone>(instant: DateTime<Utc>, tz: &Z) -> bool {
    (540..=1080).contains(&minutes_since_midnight(instant, tz))
}

/// 07:00 to 08:59.
pub fn is_early_morning<Z: TimeZone>(instant: DateTime<Utc>, tz: &Z) -> bool {
    (420..=539).contains(&minutes_since_midnight(instant, tz))
}

/// 18:00 to 21:30.
pub fn is_evening<Z: TimeZone>(instant: DateTime<Utc>, tz: &Z) -> bool {
    (1080..=1290).contains(&minutes_since_midnight(instant, tz))
}

/// Saturday or Sunday in local time.
pub fn is_weekend<Z: TimeZone>(instant: DateTime<Utc>, tz: &Z) -> bool {
    matches!(local(instant, tz).weekday(), Weekday::Sat | Weekday::Sun)
}

pub fn minutes_since_midnight_in(instant: DateTime<Utc>, zone: &str) -> Result<u32, TimeError> {
    Ok(minutes_since_midnight(instant, &parse_zone(zone)?))
}

pub fn format_hhmm_in(instant: DateTime<Utc>, zone: &str) -> Result<String, TimeError> {
    Ok(format_hhmm(instant, &parse_zone(zone)?))
}

/// [`classify_phase_at`] for a named zone.
pub fn classify_phase_in(instant: DateTime<Utc>, zone: &str) -> Result<DayPhase, TimeError> {
    Ok(classify_phase_at(instant, &parse_zone(zone)?))
}

pub fn is_business_hours_in(instant: DateTime<Utc>, zone: &str) -> Result<bool, TimeError> {
    Ok(is_business_hours(instant, &parse_zone(zone)?))
}

pub fn is_early_morning_in(instant: DateTime<Utc>, zone: &str) -> Result<bool, TimeError> {
    Ok(is_early_morning(instant, &parse_zone(zone)?))
}

pub fn is_evening_in(instant: DateTime<Utc>, zone: &str) -> Result<bool, TimeError> {
    Ok(is_evening(instant, &parse_zone(zone)?))
}

pub fn is_weekend_in(instant: DateTime<Utc>, zone: &str) -> Result<bool, TimeError> {
    Ok(is_weekend(instant, &parse_zone(zone)?))
}

/// Parses `HH:mm` (24-hour).
pub fn parse_hhmm(hhmm: &str) -> Result<NaiveTime, TimeError> {
    let invalid = || TimeError::InvalidFormat(hhmm.to_owned());
    let (hours, minutes) = hhmm.trim().split_once(':').ok_or_else(invalid)?;
    let hours: u32 = hours.parse().map_err(|_| invalid())?;
    let minutes: u32 = minutes.parse().map_err(|_| invalid())?;
    NaiveTime::from_hms_opt(hours, minutes, 0).ok_or_else(|| TimeError::OutOfRange(hhmm.to_owned()))
}

/// The "what-if" instant: `hhmm` on local date `date` in `tz`.
///
/// When the local time is ambiguous (DST fold), the earlier instant wins.
pub fn baseline_from_hhmm<Z: TimeZone>(
    hhmm: &str,
    date: NaiveDate,
    tz: &Z,
) -> Result<DateTime<Utc>, TimeError> {
    let naive = date.and_time(parse_hhmm(hhmm)?);
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or(TimeError::Nonexistent(naive))
}
