//! Core domain types for the dosewatch system.
//!
//! This module defines the fundamental types used throughout the system:
//! - Patients and their time zones
//! - Medications and their daily slots (the schedule model)
//! - Dose log entries and their outcomes (the ledger)
//! - Audit events and guardian links

use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Schedule Types
// ============================================================================

/// A time-of-day slot (`HH:MM`) interpreted in the owner's time zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SlotTime(NaiveTime);

impl SlotTime {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(SlotTime)
    }

    pub fn time(&self) -> NaiveTime {
        self.0
    }

    pub fn hour(&self) -> u32 {
        self.0.hour()
    }

    pub fn minute(&self) -> u32 {
        self.0.minute()
    }
}

impl FromStr for SlotTime {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidSlot(s.to_string());
        let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;

        let digits = |part: &str, max_len: usize| {
            !part.is_empty() && part.len() <= max_len && part.bytes().all(|b| b.is_ascii_digit())
        };
        if !digits(h, 2) || m.len() != 2 || !digits(m, 2) {
            return Err(invalid());
        }

        let hour: u32 = h.parse().map_err(|_| invalid())?;
        let minute: u32 = m.parse().map_err(|_| invalid())?;
        SlotTime::new(hour, minute).ok_or_else(invalid)
    }
}

impl TryFrom<String> for SlotTime {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<SlotTime> for String {
    fn from(slot: SlotTime) -> Self {
        slot.to_string()
    }
}

impl fmt::Display for SlotTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

/// A patient whose medications are tracked
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub name: String,
    pub timezone: Tz,
    pub created_at: DateTime<Utc>,
}

/// Whether a medication follows fixed slots or is taken on demand
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MedicationKind {
    Scheduled,
    AsNeeded,
}

impl FromStr for MedicationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "scheduled" => Ok(MedicationKind::Scheduled),
            "as_needed" | "as-needed" | "prn" => Ok(MedicationKind::AsNeeded),
            other => Err(Error::Validation(format!("unknown medication kind '{}'", other))),
        }
    }
}

/// A medication and its daily schedule
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Medication {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub dosage: Option<String>,
    pub kind: MedicationKind,
    /// Sorted, de-duplicated
    pub slots: Vec<SlotTime>,
    pub total_quantity: u32,
    pub remaining_quantity: u32,
    pub is_active: bool,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl Medication {
    /// Active and not soft-deleted
    pub fn is_live(&self) -> bool {
        self.is_active && !self.is_deleted
    }

    /// Live and on a fixed schedule
    pub fn is_schedulable(&self) -> bool {
        self.is_live() && self.kind == MedicationKind::Scheduled
    }

    pub fn slots_per_day(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn has_slot(&self, slot: SlotTime) -> bool {
        self.slots.contains(&slot)
    }
}

// ============================================================================
// Ledger Types
// ============================================================================

/// How a reported dose relates to its scheduled instant
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Timing {
    OnTime,
    Late { delay_minutes: u32 },
}

/// Resolution of one slot-instance
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Taken { timing: Timing },
    Skipped { timing: Timing },
    Missed,
}

/// Clinical classification derived from an [`Outcome`]
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    OnTime,
    Late,
    Missed,
}

impl Outcome {
    pub fn classification(&self) -> Classification {
        match self {
            Outcome::Taken { timing } | Outcome::Skipped { timing } => match timing {
                Timing::OnTime => Classification::OnTime,
                Timing::Late { .. } => Classification::Late,
            },
            Outcome::Missed => Classification::Missed,
        }
    }

    pub fn delay_minutes(&self) -> u32 {
        match self {
            Outcome::Taken {
                timing: Timing::Late { delay_minutes },
            }
            | Outcome::Skipped {
                timing: Timing::Late { delay_minutes },
            } => *delay_minutes,
            _ => 0,
        }
    }

    /// Short label used in audit metadata and CSV export
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Taken { .. } => "taken",
            Outcome::Skipped { .. } => "skipped",
            Outcome::Missed => "missed",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Classification::OnTime => "on_time",
            Classification::Late => "late",
            Classification::Missed => "missed",
        };
        f.write_str(s)
    }
}

/// Outcome as reported by a patient or client, before classification
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportedOutcome {
    Taken,
    Skipped,
    Missed,
}

impl FromStr for ReportedOutcome {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "taken" => Ok(ReportedOutcome::Taken),
            "skipped" | "skip" => Ok(ReportedOutcome::Skipped),
            "missed" | "miss" => Ok(ReportedOutcome::Missed),
            other => Err(Error::Validation(format!("unknown outcome '{}'", other))),
        }
    }
}

/// Which actor wrote a ledger entry
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    Reported,
    Sweep,
}

/// Uniqueness key of the ledger: one outcome per slot-instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub medication_id: Uuid,
    pub slot: SlotTime,
    pub local_date: NaiveDate,
}

/// One resolved slot-instance. Never modified once written.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DoseLogEntry {
    pub id: Uuid,
    pub medication_id: Uuid,
    pub owner_id: Uuid,
    pub scheduled_slot: SlotTime,
    /// Owner's local calendar day the entry resolves
    pub local_date: NaiveDate,
    pub outcome: Outcome,
    pub recorded_at: DateTime<Utc>,
    pub source: EntrySource,
}

impl DoseLogEntry {
    pub fn key(&self) -> SlotKey {
        SlotKey {
            medication_id: self.medication_id,
            slot: self.scheduled_slot,
            local_date: self.local_date,
        }
    }

    pub fn classification(&self) -> Classification {
        self.outcome.classification()
    }

    pub fn delay_minutes(&self) -> u32 {
        self.outcome.delay_minutes()
    }

    pub fn is_taken(&self) -> bool {
        matches!(self.outcome, Outcome::Taken { .. })
    }

    pub fn is_missed(&self) -> bool {
        matches!(self.outcome, Outcome::Missed)
    }
}

// ============================================================================
// Audit Types
// ============================================================================

/// Kind of side effect recorded in the audit trail
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    DoseTaken,
    DoseLate,
    DoseSkipped,
    DoseMissed,
    InventoryLow,
    GuardianAlertSent,
    MedicationEnrolled,
    MedicationRefilled,
    MedicationDeleted,
}

/// Append-only record of one side effect
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub kind: AuditKind,
    pub owner_id: Uuid,
    pub medication_id: Option<Uuid>,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl AuditEvent {
    pub fn new(
        kind: AuditKind,
        owner_id: Uuid,
        medication_id: Option<Uuid>,
        at: DateTime<Utc>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            owner_id,
            medication_id,
            at,
            metadata,
        }
    }
}

// ============================================================================
// Guardian Types
// ============================================================================

/// Status of a patient-guardian relationship
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Active,
    Pending,
    Rejected,
}

/// Patient-guardian relationship, maintained outside this crate
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GuardianLink {
    pub patient_id: Uuid,
    pub guardian_id: Uuid,
    pub guardian_contact: String,
    pub status: LinkStatus,
}

/// A guardian resolved for alert fan-out
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Guardian {
    pub id: Uuid,
    pub contact: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_slot() {
        let slot: SlotTime = "08:00".parse().unwrap();
        assert_eq!(slot.hour(), 8);
        assert_eq!(slot.minute(), 0);

        let slot: SlotTime = "7:30".parse().unwrap();
        assert_eq!(slot.to_string(), "07:30");
    }

    #[test]
    fn test_reject_malformed_slots() {
        for bad in ["", "8", "24:00", "12:60", "12:5", "ab:cd", "12:00:00", "-1:00"] {
            let err = bad.parse::<SlotTime>().unwrap_err();
            assert!(matches!(err, Error::InvalidSlot(_)), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_slot_serializes_as_string() {
        let slot = SlotTime::new(22, 5).unwrap();
        let json = serde_json::to_string(&slot).unwrap();
        assert_eq!(json, "\"22:05\"");

        let bad = serde_json::from_str::<SlotTime>("\"99:99\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_outcome_classification() {
        let late = Outcome::Taken {
            timing: Timing::Late { delay_minutes: 45 },
        };
        assert_eq!(late.classification(), Classification::Late);
        assert_eq!(late.delay_minutes(), 45);

        let on_time = Outcome::Skipped {
            timing: Timing::OnTime,
        };
        assert_eq!(on_time.classification(), Classification::OnTime);
        assert_eq!(on_time.delay_minutes(), 0);

        assert_eq!(Outcome::Missed.classification(), Classification::Missed);
    }

    #[test]
    fn test_outcome_json_shape() {
        let outcome = Outcome::Taken {
            timing: Timing::Late { delay_minutes: 12 },
        };
        let value = serde_json::to_value(outcome).unwrap();
        assert_eq!(value["status"], "taken");
        assert_eq!(value["timing"]["kind"], "late");
        assert_eq!(value["timing"]["delay_minutes"], 12);
    }

    #[test]
    fn test_parse_reported_outcome() {
        assert_eq!(
            "TAKEN".parse::<ReportedOutcome>().unwrap(),
            ReportedOutcome::Taken
        );
        assert_eq!(
            "skip".parse::<ReportedOutcome>().unwrap(),
            ReportedOutcome::Skipped
        );
        assert!("later".parse::<ReportedOutcome>().is_err());
    }
}
