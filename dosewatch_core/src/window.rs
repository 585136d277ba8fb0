//! Slot-instance time math: scheduled instants, grace windows, lateness.
//!
//! All functions take the zone explicitly. Local times that fall into a DST
//! gap are shifted forward by one hour; ambiguous local times resolve to the
//! earlier instant.

use crate::{SlotTime, Timing};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

/// Lifecycle of a slot-instance relative to "now"
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotPhase {
    /// Before the scheduled instant
    Pending,
    /// Between the scheduled instant and the end of the grace window
    Grace,
    /// Grace window elapsed
    Overdue,
}

/// Absolute instant of `slot` on local day `date` in `tz`
pub fn slot_instant(tz: Tz, date: NaiveDate, slot: SlotTime) -> DateTime<Tz> {
    let local = date.and_time(slot.time());
    tz.from_local_datetime(&local)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(local + Duration::hours(1))).earliest())
        .unwrap_or_else(|| tz.from_utc_datetime(&local))
}

/// Phase of a slot-instance scheduled at `scheduled`
pub fn phase(now: DateTime<Utc>, scheduled: DateTime<Utc>, grace: Duration) -> SlotPhase {
    if now < scheduled {
        SlotPhase::Pending
    } else if now <= scheduled + grace {
        SlotPhase::Grace
    } else {
        SlotPhase::Overdue
    }
}

/// On-time unless the report comes more than `late_after` past the slot.
///
/// Early reports count as on-time with no delay.
pub fn classify_timing(now: DateTime<Utc>, scheduled: DateTime<Utc>, late_after: Duration) -> Timing {
    let diff = now - scheduled;
    if diff > late_after {
        Timing::Late {
            delay_minutes: diff.num_minutes().max(0) as u32,
        }
    } else {
        Timing::OnTime
    }
}

/// Next occurrence of `slot` at or after `now` in `now`'s zone
pub fn next_occurrence(now: DateTime<Tz>, slot: SlotTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let today = now.date_naive();
    let candidate = slot_instant(tz, today, slot);
    if candidate >= now {
        return candidate;
    }
    match today.succ_opt() {
        Some(tomorrow) => slot_instant(tz, tomorrow, slot),
        None => candidate,
    }
}

/// Local days from `today - lookback_days` through `today`, oldest first
pub fn recent_days(today: NaiveDate, lookback_days: u32) -> Vec<NaiveDate> {
    (0..=lookback_days as i64)
        .rev()
        .filter_map(|back| today.checked_sub_signed(Duration::days(back)))
        .collect()
}
