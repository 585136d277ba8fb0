//! Missed-dose sweeper.
//!
//! A sweep pass walks every active scheduled slot-instance and resolves the
//! ones whose grace window elapsed with nothing recorded as missed, then
//! alerts the patient's active guardians. Sweep passes and reminder passes
//! are each serialized by their own `fs2` run lock; each missed entry is written through the ledger's conditional
//! insert in its own transaction, so a concurrent report for the same
//! slot-instance wins or loses cleanly and a failing unit only skips itself.

use crate::clock::Clock;
use crate::config::Config;
use crate::guardians::GuardianDirectory;
use crate::notify::{Notifier, Signal};
use crate::store::{is_contended, FileStore, StoreData};
use crate::window::{phase, recent_days, slot_instant, SlotPhase};
use crate::{
    AuditEvent, AuditKind, DoseLogEntry, EntrySource, Error, Guardian, Outcome, Result, SlotKey,
    SlotTime,
};
use chrono::{DateTime, NaiveDate, Utc};
use fs2::FileExt;
use serde_json::json;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::time::Instant;
use uuid::Uuid;

/// The kind of pass a [`RunLock`] serializes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassKind {
    Sweep,
    Reminder,
}

/// Exclusive lock ensuring a single active pass of one kind
#[derive(Clone, Debug)]
pub struct RunLock {
    path: PathBuf,
    kind: PassKind,
}

/// Held for the duration of a pass; released on drop
#[derive(Debug)]
pub struct RunGuard {
    file: File,
}

impl RunLock {
    /// Lock for sweep passes
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: PassKind::Sweep,
        }
    }

    /// Lock for reminder passes
    pub fn reminders(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: PassKind::Reminder,
        }
    }

    pub fn kind(&self) -> PassKind {
        self.kind
    }

    /// Take the lock without waiting
    pub fn try_acquire(&self) -> Result<RunGuard> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.path)?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(RunGuard { file }),
            Err(e) if is_contended(&e) => Err(match self.kind {
                PassKind::Sweep => Error::SweepInProgress,
                PassKind::Reminder => Error::ReminderInProgress,
            }),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("Failed to release run lock: {}", e);
        }
    }
}

/// One slot on one local day
#[derive(Clone, Debug)]
struct SlotInstance {
    medication_id: Uuid,
    medication_name: String,
    owner_id: Uuid,
    patient_name: String,
    slot: SlotTime,
    local_date: NaiveDate,
    scheduled_at: DateTime<Utc>,
}

impl SlotInstance {
    fn key(&self) -> SlotKey {
        SlotKey {
            medication_id: self.medication_id,
            slot: self.slot,
            local_date: self.local_date,
        }
    }
}

/// Periodic reconciliation of unreported doses
pub struct Sweeper<'a> {
    store: &'a FileStore,
    clock: &'a dyn Clock,
    config: &'a Config,
    guardians: &'a dyn GuardianDirectory,
    queue: &'a dyn Notifier,
    realtime: &'a dyn Notifier,
    run_lock: RunLock,
    reminder_lock: RunLock,
}

impl<'a> Sweeper<'a> {
    pub fn new(
        store: &'a FileStore,
        clock: &'a dyn Clock,
        config: &'a Config,
        guardians: &'a dyn GuardianDirectory,
        queue: &'a dyn Notifier,
        realtime: &'a dyn Notifier,
        run_lock: RunLock,
    ) -> Self {
        // Reminder passes get a sibling lock so a long sweep does not block them
        let reminder_lock = RunLock::reminders(run_lock.path.with_file_name("remind.lock"));
        Self {
            store,
            clock,
            config,
            guardians,
            queue,
            realtime,
            run_lock,
            reminder_lock,
        }
    }

    /// Run one sweep pass and return the number of missed entries written
    ///
    /// Fails with [`Error::SweepInProgress`] if another pass holds the run
    /// lock, and with [`Error::SweepAborted`] if schedules cannot be read.
    /// Everything after that is isolated per slot-instance.
    pub fn run_sweep_pass(&self) -> Result<usize> {
        let _guard = self.run_lock.try_acquire()?;
        let started = Instant::now();

        let data = self
            .store
            .read()
            .map_err(|e| Error::SweepAborted(e.to_string()))?;
        let now = self.clock.now();
        let grace = self.config.adherence.grace();

        let mut missed = 0;
        for instance in self.slot_instances(&data, now) {
            if phase(now, instance.scheduled_at, grace) != SlotPhase::Overdue {
                continue;
            }
            if data.ledger.contains(&instance.key()) {
                continue;
            }

            match self.resolve_missed(&instance, now) {
                Ok(Some(entry)) => {
                    missed += 1;
                    tracing::info!(
                        "Marked {} slot {} on {} as missed",
                        instance.medication_name,
                        entry.scheduled_slot,
                        entry.local_date
                    );
                    self.alert_guardians(&instance, now);
                }
                Ok(None) => {}
                Err(e) if e.is_conflict() => {
                    tracing::debug!(
                        "Slot {} of {} on {} resolved concurrently",
                        instance.slot,
                        instance.medication_id,
                        instance.local_date
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Skipping slot {} of {} on {}: {}",
                        instance.slot,
                        instance.medication_id,
                        instance.local_date,
                        e
                    );
                }
            }
        }

        tracing::info!(
            "Sweep pass wrote {} missed entries in {:?}",
            missed,
            started.elapsed()
        );
        Ok(missed)
    }

    /// Queue reminders for unresolved slot-instances that came due within the last sweep interval
    ///
    /// Fails with [`Error::ReminderInProgress`] if another reminder pass is
    /// running. A sweep pass in progress does not block it.
    pub fn run_reminder_pass(&self) -> Result<usize> {
        let _guard = self.reminder_lock.try_acquire()?;

        let data = self
            .store
            .read()
            .map_err(|e| Error::SweepAborted(e.to_string()))?;
        let now = self.clock.now();
        let window = chrono::Duration::seconds(self.config.sweep.interval_seconds as i64);

        let mut sent = 0;
        for instance in self.slot_instances(&data, now) {
            let due_recently = instance.scheduled_at <= now && instance.scheduled_at > now - window;
            if !due_recently || data.ledger.contains(&instance.key()) {
                continue;
            }

            let signal = Signal::Reminder {
                user_id: instance.owner_id,
                medication_name: instance.medication_name.clone(),
                scheduled_slot: instance.slot.to_string(),
            };
            match self.queue.send(&signal, now) {
                Ok(()) => sent += 1,
                Err(e) => {
                    tracing::warn!("Failed to queue reminder for {}: {}", instance.medication_id, e);
                    continue;
                }
            }
            if let Err(e) = self.realtime.send(&signal, now) {
                tracing::debug!("Real-time reminder not delivered: {}", e);
            }
        }

        tracing::info!("Reminder pass queued {} reminders", sent);
        Ok(sent)
    }

    /// Slot-instances of every schedulable medication for today and the look-back days
    fn slot_instances(&self, data: &StoreData, now: DateTime<Utc>) -> Vec<SlotInstance> {
        let lookback = self.config.sweep.lookback_days;
        let mut owner_days: HashMap<Uuid, Vec<NaiveDate>> = HashMap::new();
        let mut instances = Vec::new();

        for medication in data.schedulable() {
            let patient = match data.patient(medication.owner_id) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!("Skipping medication {}: {}", medication.id, e);
                    continue;
                }
            };
            let tz = patient.timezone;

            // "Now" in the owner's zone is computed once per owner
            let days = owner_days
                .entry(patient.id)
                .or_insert_with(|| recent_days(now.with_timezone(&tz).date_naive(), lookback));

            for &date in days.iter() {
                for &slot in &medication.slots {
                    let scheduled_at = slot_instant(tz, date, slot).with_timezone(&Utc);
                    if scheduled_at < medication.created_at {
                        continue;
                    }
                    instances.push(SlotInstance {
                        medication_id: medication.id,
                        medication_name: medication.name.clone(),
                        owner_id: patient.id,
                        patient_name: patient.name.clone(),
                        slot,
                        local_date: date,
                        scheduled_at,
                    });
                }
            }
        }

        instances
    }

    /// Write the missed entry if the slot-instance is still unresolved
    fn resolve_missed(
        &self,
        instance: &SlotInstance,
        now: DateTime<Utc>,
    ) -> Result<Option<DoseLogEntry>> {
        self.store.transact(|data| {
            // The schedule may have changed since the snapshot was read
            let still_due = data
                .medication(instance.medication_id)
                .map(|m| m.is_schedulable() && m.has_slot(instance.slot))
                .unwrap_or(false);
            if !still_due {
                return Ok(None);
            }

            let entry = DoseLogEntry {
                id: Uuid::new_v4(),
                medication_id: instance.medication_id,
                owner_id: instance.owner_id,
                scheduled_slot: instance.slot,
                local_date: instance.local_date,
                outcome: Outcome::Missed,
                recorded_at: now,
                source: EntrySource::Sweep,
            };
            data.ledger.insert_unique(entry.clone())?;

            data.record_audit(AuditEvent::new(
                AuditKind::DoseMissed,
                instance.owner_id,
                Some(instance.medication_id),
                now,
                json!({
                    "entry_id": entry.id,
                    "slot": instance.slot.to_string(),
                    "local_date": instance.local_date,
                    "medication": instance.medication_name,
                    "source": "sweep",
                }),
            ));

            Ok(Some(entry))
        })
    }

    /// Fan out alerts after the missed entry committed; failures are logged only
    fn alert_guardians(&self, instance: &SlotInstance, now: DateTime<Utc>) {
        let guardians = match self.guardians.active_guardians(instance.owner_id) {
            Ok(g) => g,
            Err(e) => {
                tracing::warn!(
                    "Could not resolve guardians for patient {}: {}",
                    instance.owner_id,
                    e
                );
                return;
            }
        };

        let mut queued: Vec<Guardian> = Vec::new();
        for guardian in guardians {
            let signal = Signal::GuardianAlert {
                guardian_contact: guardian.contact.clone(),
                patient_name: instance.patient_name.clone(),
                medication_name: instance.medication_name.clone(),
                missed_slot: instance.slot.to_string(),
            };

            if let Err(e) = self.realtime.send(&signal, now) {
                tracing::debug!("Real-time alert to {} not delivered: {}", guardian.contact, e);
            }

            match self.queue.send(&signal, now) {
                Ok(()) => queued.push(guardian),
                Err(e) => tracing::warn!("Failed to queue alert for {}: {}", guardian.contact, e),
            }
        }

        if queued.is_empty() {
            return;
        }

        let recorded = self.store.transact(|data| {
            for guardian in &queued {
                data.record_audit(AuditEvent::new(
                    AuditKind::GuardianAlertSent,
                    instance.owner_id,
                    Some(instance.medication_id),
                    now,
                    json!({
                        "guardian_id": guardian.id,
                        "guardian_contact": guardian.contact,
                        "slot": instance.slot.to_string(),
                        "local_date": instance.local_date,
                    }),
                ));
            }
            Ok(())
        });
        if let Err(e) = recorded {
            tracing::warn!("Failed to audit guardian alerts: {}", e);
        }
    }
}
