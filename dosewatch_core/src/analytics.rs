//! Read-side analytics over the ledger and schedule model.
//!
//! The free functions are pure: they take entries or medications plus the
//! subject's "today" / "now" and compute a result. [`Analytics`] loads a
//! fresh snapshot per call and feeds them; nothing is cached.

use crate::clock::Clock;
use crate::store::FileStore;
use crate::window::next_occurrence;
use crate::{DoseLogEntry, Medication, Outcome, Result, SlotTime};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// Longest streak the reliability index reports
pub const RELIABILITY_CAP_DAYS: u32 = 90;

/// Trailing window for heatmap, risk and summary
pub const TRAILING_DAYS: i64 = 30;

// ============================================================================
// Reliability Index
// ============================================================================

/// Consecutive days, ending today, with entries and no missed dose.
///
/// A day without entries ends the streak without counting as a violation.
pub fn reliability_index(entries: &[DoseLogEntry], today: NaiveDate) -> u32 {
    let mut by_day: HashMap<NaiveDate, (usize, bool)> = HashMap::new();
    for entry in entries {
        let day = by_day.entry(entry.local_date).or_insert((0, false));
        day.0 += 1;
        day.1 |= entry.is_missed();
    }

    let mut streak = 0;
    let mut day = today;
    while streak < RELIABILITY_CAP_DAYS {
        match by_day.get(&day) {
            Some(&(count, any_missed)) if count > 0 && !any_missed => streak += 1,
            _ => break,
        }
        day = match day.pred_opt() {
            Some(d) => d,
            None => break,
        };
    }
    streak
}

// ============================================================================
// Compliance Heatmap
// ============================================================================

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct HeatmapDay {
    pub date: NaiveDate,
    /// Taken entries as a rounded percentage of all entries that day
    pub percentage: u8,
}

/// Daily taken percentage for the trailing 30 days, oldest first
pub fn compliance_heatmap(entries: &[DoseLogEntry], today: NaiveDate) -> Vec<HeatmapDay> {
    let start = today - Duration::days(TRAILING_DAYS - 1);
    let mut counts: HashMap<NaiveDate, (u32, u32)> = HashMap::new();
    for entry in entries
        .iter()
        .filter(|e| e.local_date >= start && e.local_date <= today)
    {
        let day = counts.entry(entry.local_date).or_insert((0, 0));
        day.1 += 1;
        if entry.is_taken() {
            day.0 += 1;
        }
    }

    start
        .iter_days()
        .take(TRAILING_DAYS as usize)
        .map(|date| {
            let (taken, total) = counts.get(&date).copied().unwrap_or((0, 0));
            HeatmapDay {
                date,
                percentage: percentage(taken, total),
            }
        })
        .collect()
}

fn percentage(part: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    (part as f64 / total as f64 * 100.0).round() as u8
}

// ============================================================================
// Temporal Risk
// ============================================================================

/// Fixed daily windows missed doses are bucketed into
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RiskWindow {
    /// 06:00–11:59
    Morning,
    /// 12:00–17:59
    Afternoon,
    /// 18:00–21:59
    Evening,
    /// 22:00–05:59
    Night,
}

impl RiskWindow {
    pub fn for_slot(slot: SlotTime) -> Self {
        match slot.hour() {
            6..=11 => RiskWindow::Morning,
            12..=17 => RiskWindow::Afternoon,
            18..=21 => RiskWindow::Evening,
            _ => RiskWindow::Night,
        }
    }
}

/// Missed-dose counts per window
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct TemporalRisk {
    pub morning: u32,
    pub afternoon: u32,
    pub evening: u32,
    pub night: u32,
}

impl TemporalRisk {
    pub fn count(&self, window: RiskWindow) -> u32 {
        match window {
            RiskWindow::Morning => self.morning,
            RiskWindow::Afternoon => self.afternoon,
            RiskWindow::Evening => self.evening,
            RiskWindow::Night => self.night,
        }
    }

    pub fn total(&self) -> u32 {
        self.morning + self.afternoon + self.evening + self.night
    }
}

/// Missed entries of the trailing 30 days, bucketed by slot hour
pub fn temporal_risk(entries: &[DoseLogEntry], today: NaiveDate) -> TemporalRisk {
    let start = today - Duration::days(TRAILING_DAYS - 1);
    let mut risk = TemporalRisk::default();

    for entry in entries
        .iter()
        .filter(|e| e.is_missed() && e.local_date >= start && e.local_date <= today)
    {
        match RiskWindow::for_slot(entry.scheduled_slot) {
            RiskWindow::Morning => risk.morning += 1,
            RiskWindow::Afternoon => risk.afternoon += 1,
            RiskWindow::Evening => risk.evening += 1,
            RiskWindow::Night => risk.night += 1,
        }
    }
    risk
}

// ============================================================================
// Inventory Runway
// ============================================================================

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    Critical,
    Low,
    Healthy,
}

impl StockStatus {
    /// Critical at 3 days of supply or less, Low up to 7, Healthy beyond.
    ///
    /// Compares the exact supply rather than the floored day count, so 10
    /// units at 3 a day (3.3 days) is Low, not Critical.
    pub fn for_supply(remaining: u32, slots_per_day: u32) -> Self {
        if slots_per_day == 0 || remaining <= 3 * slots_per_day {
            StockStatus::Critical
        } else if remaining <= 7 * slots_per_day {
            StockStatus::Low
        } else {
            StockStatus::Healthy
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RunwayItem {
    pub medication_id: Uuid,
    pub name: String,
    pub remaining_quantity: u32,
    pub slots_per_day: u32,
    pub days_remaining: u32,
    pub status: StockStatus,
}

/// Projected days of stock for every live medication
pub fn inventory_runway<'m>(medications: impl IntoIterator<Item = &'m Medication>) -> Vec<RunwayItem> {
    medications
        .into_iter()
        .filter(|m| m.is_live())
        .map(|m| {
            let slots_per_day = m.slots_per_day();
            let days_remaining = if slots_per_day == 0 {
                0
            } else {
                m.remaining_quantity / slots_per_day
            };
            RunwayItem {
                medication_id: m.id,
                name: m.name.clone(),
                remaining_quantity: m.remaining_quantity,
                slots_per_day,
                days_remaining,
                status: StockStatus::for_supply(m.remaining_quantity, slots_per_day),
            }
        })
        .collect()
}

// ============================================================================
// Next-Dose Discovery
// ============================================================================

#[derive(Clone, Debug, Serialize)]
pub struct NextDose {
    pub medication_id: Uuid,
    pub medication_name: String,
    pub slot: SlotTime,
    pub due_at: DateTime<Utc>,
    /// Wall-clock time in the subject's zone
    pub due_local: NaiveDateTime,
    pub minutes_until: i64,
}

/// Soonest upcoming slot across all scheduled medications
pub fn next_dose<'m>(
    medications: impl IntoIterator<Item = &'m Medication>,
    now: DateTime<Tz>,
) -> Option<NextDose> {
    medications
        .into_iter()
        .filter(|m| m.is_schedulable())
        .flat_map(|m| m.slots.iter().map(move |&slot| (m, slot)))
        .map(|(m, slot)| (m, slot, next_occurrence(now, slot)))
        .min_by_key(|(_, _, due)| *due)
        .map(|(m, slot, due)| NextDose {
            medication_id: m.id,
            medication_name: m.name.clone(),
            slot,
            due_at: due.with_timezone(&Utc),
            due_local: due.naive_local(),
            minutes_until: (due - now).num_minutes(),
        })
}

// ============================================================================
// Adherence Summary
// ============================================================================

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct AdherenceSummary {
    pub on_time: u32,
    pub late: u32,
    pub skipped: u32,
    pub missed: u32,
    /// Taken entries as a rounded percentage of all entries
    pub adherence_percentage: u8,
}

/// Outcome counts for the trailing 30 days
pub fn adherence_summary(entries: &[DoseLogEntry], today: NaiveDate) -> AdherenceSummary {
    let start = today - Duration::days(TRAILING_DAYS - 1);
    let mut summary = AdherenceSummary::default();

    for entry in entries
        .iter()
        .filter(|e| e.local_date >= start && e.local_date <= today)
    {
        match entry.outcome {
            Outcome::Taken { timing } => match timing {
                crate::Timing::OnTime => summary.on_time += 1,
                crate::Timing::Late { .. } => summary.late += 1,
            },
            Outcome::Skipped { .. } => summary.skipped += 1,
            Outcome::Missed => summary.missed += 1,
        }
    }

    let taken = summary.on_time + summary.late;
    let total = taken + summary.skipped + summary.missed;
    summary.adherence_percentage = percentage(taken, total);
    summary
}

// ============================================================================
// Query Layer
// ============================================================================

/// Per-subject analytics over a fresh store snapshot
pub struct Analytics<'a> {
    store: &'a FileStore,
    clock: &'a dyn Clock,
}

/// A subject's ledger and schedule as of one read
struct Subject {
    timezone: Tz,
    entries: Vec<DoseLogEntry>,
    medications: Vec<Medication>,
}

impl<'a> Analytics<'a> {
    pub fn new(store: &'a FileStore, clock: &'a dyn Clock) -> Self {
        Self { store, clock }
    }

    fn subject(&self, user_id: Uuid) -> Result<Subject> {
        let data = self.store.read()?;
        let timezone = data.patient(user_id)?.timezone;
        Ok(Subject {
            timezone,
            entries: data.ledger.for_owner(user_id),
            medications: data.medications_for(user_id).into_iter().cloned().collect(),
        })
    }

    fn today(&self, tz: Tz) -> NaiveDate {
        self.clock.today_in(tz)
    }

    pub fn reliability_index(&self, user_id: Uuid) -> Result<u32> {
        let s = self.subject(user_id)?;
        Ok(reliability_index(&s.entries, self.today(s.timezone)))
    }

    pub fn compliance_heatmap(&self, user_id: Uuid) -> Result<Vec<HeatmapDay>> {
        let s = self.subject(user_id)?;
        Ok(compliance_heatmap(&s.entries, self.today(s.timezone)))
    }

    pub fn temporal_risk(&self, user_id: Uuid) -> Result<TemporalRisk> {
        let s = self.subject(user_id)?;
        Ok(temporal_risk(&s.entries, self.today(s.timezone)))
    }

    pub fn inventory_runway(&self, user_id: Uuid) -> Result<Vec<RunwayItem>> {
        let s = self.subject(user_id)?;
        Ok(inventory_runway(&s.medications))
    }

    pub fn next_dose(&self, user_id: Uuid) -> Result<Option<NextDose>> {
        let s = self.subject(user_id)?;
        Ok(next_dose(&s.medications, self.clock.now_in(s.timezone)))
    }

    pub fn adherence_summary(&self, user_id: Uuid) -> Result<AdherenceSummary> {
        let s = self.subject(user_id)?;
        Ok(adherence_summary(&s.entries, self.today(s.timezone)))
    }
}
