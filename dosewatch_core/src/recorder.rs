//! Adherence recorder: the write path for actively reported dose outcomes.
//!
//! One report produces one ledger entry plus its side effects (inventory
//! decrement, audit events, low-stock signal). Everything happens inside a
//! single store transaction, so either all of it commits or none of it does.

use crate::clock::Clock;
use crate::config::AdherenceConfig;
use crate::store::FileStore;
use crate::window::{classify_timing, phase, slot_instant, SlotPhase};
use crate::{
    AuditEvent, AuditKind, DoseLogEntry, EntrySource, Error, Outcome, ReportedOutcome, Result,
    SlotKey, SlotTime, Timing,
};
use chrono::Utc;
use chrono_tz::Tz;
use serde_json::json;
use uuid::Uuid;

/// A dose outcome reported by a patient or automated client
#[derive(Clone, Debug)]
pub struct DoseReport {
    pub medication_id: Uuid,
    pub owner_id: Uuid,
    /// `HH:MM`, validated before anything else happens
    pub scheduled_slot: String,
    pub outcome: ReportedOutcome,
    /// Zone the actor reported from; the owner's zone when absent
    pub timezone: Option<Tz>,
}

/// Transactional entry point for reported outcomes
pub struct Recorder<'a> {
    store: &'a FileStore,
    clock: &'a dyn Clock,
    settings: &'a AdherenceConfig,
}

impl<'a> Recorder<'a> {
    pub fn new(store: &'a FileStore, clock: &'a dyn Clock, settings: &'a AdherenceConfig) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    /// Record one reported outcome
    ///
    /// ## Rules
    ///
    /// 1. **Duplicate guard**: a taken entry for the same medication and slot
    ///    recorded within the duplicate window rejects the report.
    /// 2. **Slot-instance**: the report resolves today's instance in the
    ///    owner's zone, unless yesterday's instance of a scheduled slot is
    ///    unresolved and still inside its grace window (a late-evening slot
    ///    reported after midnight). That instance is the one the sweeper
    ///    would otherwise mark missed.
    /// 3. **Classification**: an explicit miss is `Missed`; anything else is
    ///    late when reported more than the late threshold after the
    ///    instance's slot time (in the actor's zone), otherwise on time.
    /// 4. **Uniqueness**: the entry is keyed by the owner's local day; a
    ///    slot-instance that already has an entry rejects the report.
    /// 5. **Inventory**: taken doses decrement stock; stock below the
    ///    low-stock threshold emits an inventory-low event.
    pub fn record_dose(&self, report: &DoseReport) -> Result<DoseLogEntry> {
        let slot: SlotTime = report.scheduled_slot.parse()?;

        let entry = self.store.transact(|data| {
            let owner_tz = data.patient(report.owner_id)?.timezone;
            let low_stock_threshold = self.settings.low_stock_threshold;

            let medication = data.live_medication_mut(report.medication_id)?;
            if medication.owner_id != report.owner_id {
                return Err(Error::OwnerMismatch {
                    medication_id: report.medication_id,
                    owner_id: report.owner_id,
                });
            }
            if !medication.slots.is_empty() && !medication.has_slot(slot) {
                return Err(Error::Validation(format!(
                    "slot {} is not scheduled for medication {}",
                    slot, medication.name
                )));
            }
            let medication_name = medication.name.clone();
            let schedulable = medication.is_schedulable();
            let enrolled_at = medication.created_at;

            let now = self.clock.now();
            let owner_today = now.with_timezone(&owner_tz).date_naive();
            let carried_over = owner_today.pred_opt().filter(|&day| {
                let instant = slot_instant(owner_tz, day, slot).with_timezone(&Utc);
                schedulable
                    && instant >= enrolled_at
                    && phase(now, instant, self.settings.grace()) == SlotPhase::Grace
                    && !data.ledger.contains(&SlotKey {
                        medication_id: report.medication_id,
                        slot,
                        local_date: day,
                    })
            });
            let local_date = carried_over.unwrap_or(owner_today);

            let actor_tz = report.timezone.unwrap_or(owner_tz);
            let actor_today = now.with_timezone(&actor_tz).date_naive();
            let actor_day = match carried_over {
                Some(_) => actor_today.pred_opt().unwrap_or(actor_today),
                None => actor_today,
            };

            if report.outcome == ReportedOutcome::Taken {
                let since = now - self.settings.duplicate_window();
                if let Some(previous) =
                    data.ledger.recent_taken(report.medication_id, slot, since)
                {
                    tracing::info!(
                        "Rejecting duplicate taken report for {} slot {} (previous at {})",
                        report.medication_id,
                        slot,
                        previous.recorded_at
                    );
                    return Err(Error::DuplicateSubmission {
                        medication_id: report.medication_id,
                        slot: slot.to_string(),
                    });
                }
            }

            let outcome = match report.outcome {
                ReportedOutcome::Missed => Outcome::Missed,
                reported => {
                    let scheduled = slot_instant(actor_tz, actor_day, slot);
                    let timing = classify_timing(
                        now,
                        scheduled.with_timezone(&Utc),
                        self.settings.late_threshold(),
                    );
                    if reported == ReportedOutcome::Taken {
                        Outcome::Taken { timing }
                    } else {
                        Outcome::Skipped { timing }
                    }
                }
            };

            let entry = DoseLogEntry {
                id: Uuid::new_v4(),
                medication_id: report.medication_id,
                owner_id: report.owner_id,
                scheduled_slot: slot,
                local_date,
                outcome,
                recorded_at: now,
                source: EntrySource::Reported,
            };

            // Stock check happens before the insert so a rejection leaves nothing behind
            let remaining = if matches!(outcome, Outcome::Taken { .. }) {
                let medication = data.live_medication_mut(report.medication_id)?;
                if medication.remaining_quantity == 0 {
                    return Err(Error::OutOfStock(report.medication_id));
                }
                Some(medication.remaining_quantity - 1)
            } else {
                None
            };

            data.ledger.insert_unique(entry.clone())?;

            let metadata = json!({
                "entry_id": entry.id,
                "slot": slot.to_string(),
                "local_date": local_date,
                "medication": medication_name,
                "delay_minutes": outcome.delay_minutes(),
            });
            let kind = match outcome {
                Outcome::Taken {
                    timing: Timing::OnTime,
                } => AuditKind::DoseTaken,
                Outcome::Taken {
                    timing: Timing::Late { .. },
                } => AuditKind::DoseLate,
                Outcome::Skipped { .. } => AuditKind::DoseSkipped,
                Outcome::Missed => AuditKind::DoseMissed,
            };
            data.record_audit(AuditEvent::new(
                kind,
                report.owner_id,
                Some(report.medication_id),
                now,
                metadata,
            ));

            if let Some(remaining) = remaining {
                data.live_medication_mut(report.medication_id)?
                    .remaining_quantity = remaining;

                if remaining < low_stock_threshold {
                    data.record_audit(AuditEvent::new(
                        AuditKind::InventoryLow,
                        report.owner_id,
                        Some(report.medication_id),
                        now,
                        json!({
                            "medication": medication_name,
                            "remaining_quantity": remaining,
                        }),
                    ));
                }
            }

            Ok(entry)
        })?;

        tracing::info!(
            "Recorded {} ({}) for medication {} slot {} on {}",
            entry.outcome.label(),
            entry.classification(),
            entry.medication_id,
            entry.scheduled_slot,
            entry.local_date
        );
        Ok(entry)
    }
}
