//! Schedule model management: patients and their medications.
//!
//! Every mutation runs as a store transaction. Medications are never removed
//! physically; `soft_delete` flags them and they disappear from all reads.

use crate::clock::Clock;
use crate::store::FileStore;
use crate::{
    AuditEvent, AuditKind, Error, Medication, MedicationKind, Patient, Result, SlotTime,
};
use chrono_tz::Tz;
use serde_json::json;
use uuid::Uuid;

/// Input for enrolling a medication
#[derive(Clone, Debug)]
pub struct NewMedication {
    pub owner_id: Uuid,
    pub name: String,
    pub dosage: Option<String>,
    pub kind: MedicationKind,
    pub slots: Vec<String>,
    pub quantity: u32,
}

/// Parse an IANA zone identifier
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| Error::InvalidTimezone(name.to_string()))
}

/// Parse, sort and de-duplicate slot strings
pub fn parse_slots<S: AsRef<str>>(raw: &[S]) -> Result<Vec<SlotTime>> {
    let mut slots = raw
        .iter()
        .map(|s| s.as_ref().parse::<SlotTime>())
        .collect::<Result<Vec<_>>>()?;
    slots.sort();
    slots.dedup();
    Ok(slots)
}

pub struct Schedule<'a> {
    store: &'a FileStore,
    clock: &'a dyn Clock,
}

impl<'a> Schedule<'a> {
    pub fn new(store: &'a FileStore, clock: &'a dyn Clock) -> Self {
        Self { store, clock }
    }

    pub fn register_patient(&self, name: &str, timezone: &str) -> Result<Patient> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("patient name is required".into()));
        }
        let patient = Patient {
            id: Uuid::new_v4(),
            name: name.to_string(),
            timezone: parse_timezone(timezone)?,
            created_at: self.clock.now(),
        };

        self.store.transact(|data| {
            data.patients.push(patient.clone());
            Ok(())
        })?;
        tracing::info!("Registered patient {} ({})", patient.id, patient.timezone);
        Ok(patient)
    }

    pub fn patients(&self) -> Result<Vec<Patient>> {
        Ok(self.store.read()?.patients)
    }

    pub fn enroll(&self, new: NewMedication) -> Result<Medication> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(Error::Validation("medication name is required".into()));
        }
        let slots = parse_slots(&new.slots)?;
        if new.kind == MedicationKind::Scheduled && slots.is_empty() {
            return Err(Error::Validation(
                "a scheduled medication needs at least one slot".into(),
            ));
        }

        let now = self.clock.now();
        let medication = Medication {
            id: Uuid::new_v4(),
            owner_id: new.owner_id,
            name: name.to_string(),
            dosage: new.dosage,
            kind: new.kind,
            slots,
            total_quantity: new.quantity,
            remaining_quantity: new.quantity,
            is_active: true,
            is_deleted: false,
            created_at: now,
        };

        self.store.transact(|data| {
            data.patient(medication.owner_id)?;
            data.medications.push(medication.clone());
            data.record_audit(AuditEvent::new(
                AuditKind::MedicationEnrolled,
                medication.owner_id,
                Some(medication.id),
                now,
                json!({
                    "name": medication.name,
                    "slots": medication.slots.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
                    "quantity": medication.total_quantity,
                }),
            ));
            Ok(())
        })?;

        tracing::info!("Enrolled medication {} for {}", medication.id, medication.owner_id);
        Ok(medication)
    }

    /// Non-deleted medications of one patient
    pub fn medications(&self, owner_id: Uuid) -> Result<Vec<Medication>> {
        let data = self.store.read()?;
        data.patient(owner_id)?;
        Ok(data.medications_for(owner_id).into_iter().cloned().collect())
    }

    /// Add stock; the refill also raises the medication's total
    pub fn refill(&self, medication_id: Uuid, quantity: u32) -> Result<Medication> {
        if quantity == 0 {
            return Err(Error::Validation("refill quantity must be positive".into()));
        }
        let now = self.clock.now();
        self.store.transact(|data| {
            let medication = data.medication_mut(medication_id)?;
            medication.remaining_quantity = medication.remaining_quantity.saturating_add(quantity);
            medication.total_quantity = medication.total_quantity.saturating_add(quantity);
            let updated = medication.clone();

            data.record_audit(AuditEvent::new(
                AuditKind::MedicationRefilled,
                updated.owner_id,
                Some(medication_id),
                now,
                json!({
                    "added": quantity,
                    "remaining_quantity": updated.remaining_quantity,
                }),
            ));
            Ok(updated)
        })
    }

    /// Replace the daily slots
    pub fn set_slots<S: AsRef<str>>(&self, medication_id: Uuid, slots: &[S]) -> Result<Medication> {
        let slots = parse_slots(slots)?;
        self.store.transact(|data| {
            let medication = data.medication_mut(medication_id)?;
            if medication.kind == MedicationKind::Scheduled && slots.is_empty() {
                return Err(Error::Validation(
                    "a scheduled medication needs at least one slot".into(),
                ));
            }
            medication.slots = slots;
            Ok(medication.clone())
        })
    }

    pub fn set_active(&self, medication_id: Uuid, active: bool) -> Result<Medication> {
        self.store.transact(|data| {
            let medication = data.medication_mut(medication_id)?;
            medication.is_active = active;
            Ok(medication.clone())
        })
    }

    /// Flag as deleted; the record stays in the store but leaves every read
    pub fn soft_delete(&self, medication_id: Uuid) -> Result<()> {
        let now = self.clock.now();
        self.store.transact(|data| {
            let medication = data.medication_mut(medication_id)?;
            medication.is_deleted = true;
            medication.is_active = false;
            let (owner_id, name) = (medication.owner_id, medication.name.clone());

            data.record_audit(AuditEvent::new(
                AuditKind::MedicationDeleted,
                owner_id,
                Some(medication_id),
                now,
                json!({ "name": name }),
            ));
            Ok(())
        })?;
        tracing::info!("Soft-deleted medication {}", medication_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::StoreConfig;

    fn setup() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), &StoreConfig::default()).unwrap();
        (dir, store)
    }

    fn new_med(owner_id: Uuid, slots: &[&str]) -> NewMedication {
        NewMedication {
            owner_id,
            name: "Metoprolol".into(),
            dosage: Some("25mg".into()),
            kind: MedicationKind::Scheduled,
            slots: slots.iter().map(|s| s.to_string()).collect(),
            quantity: 30,
        }
    }

    #[test]
    fn test_register_patient_validates_zone() {
        let (_dir, store) = setup();
        let schedule = Schedule::new(&store, &SystemClock);

        let patient = schedule.register_patient("Rosa", "Europe/Lisbon").unwrap();
        assert_eq!(patient.timezone, chrono_tz::Europe::Lisbon);

        let err = schedule.register_patient("Rosa", "Mars/Olympus").unwrap_err();
        assert!(matches!(err, Error::InvalidTimezone(_)));
        assert_eq!(schedule.patients().unwrap().len(), 1);
    }

    #[test]
    fn test_enroll_sorts_and_dedups_slots() {
        let (_dir, store) = setup();
        let schedule = Schedule::new(&store, &SystemClock);
        let patient = schedule.register_patient("Rosa", "UTC").unwrap();

        let med = schedule
            .enroll(new_med(patient.id, &["20:00", "08:00", "8:00"]))
            .unwrap();
        let slots: Vec<String> = med.slots.iter().map(|s| s.to_string()).collect();
        assert_eq!(slots, vec!["08:00", "20:00"]);
        assert_eq!(med.remaining_quantity, 30);

        let audit = store.read().unwrap().audit;
        assert_eq!(audit[0].kind, AuditKind::MedicationEnrolled);
    }

    #[test]
    fn test_enroll_rejects_bad_input() {
        let (_dir, store) = setup();
        let schedule = Schedule::new(&store, &SystemClock);
        let patient = schedule.register_patient("Rosa", "UTC").unwrap();

        assert!(matches!(
            schedule.enroll(new_med(patient.id, &["25:00"])),
            Err(Error::InvalidSlot(_))
        ));
        assert!(matches!(
            schedule.enroll(new_med(patient.id, &[])),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            schedule.enroll(new_med(Uuid::new_v4(), &["08:00"])),
            Err(Error::PatientNotFound(_))
        ));

        let mut prn = new_med(patient.id, &[]);
        prn.kind = MedicationKind::AsNeeded;
        assert!(schedule.enroll(prn).is_ok());
    }

    #[test]
    fn test_refill() {
        let (_dir, store) = setup();
        let schedule = Schedule::new(&store, &SystemClock);
        let patient = schedule.register_patient("Rosa", "UTC").unwrap();
        let med = schedule.enroll(new_med(patient.id, &["08:00"])).unwrap();

        let refilled = schedule.refill(med.id, 60).unwrap();
        assert_eq!(refilled.remaining_quantity, 90);
        assert_eq!(refilled.total_quantity, 90);
        assert!(schedule.refill(med.id, 0).is_err());
    }

    #[test]
    fn test_soft_delete_hides_medication() {
        let (_dir, store) = setup();
        let schedule = Schedule::new(&store, &SystemClock);
        let patient = schedule.register_patient("Rosa", "UTC").unwrap();
        let med = schedule.enroll(new_med(patient.id, &["08:00"])).unwrap();

        schedule.soft_delete(med.id).unwrap();

        assert!(schedule.medications(patient.id).unwrap().is_empty());
        assert!(matches!(
            schedule.refill(med.id, 10),
            Err(Error::MedicationNotFound(_))
        ));

        // Still physically present
        let data = store.read().unwrap();
        assert_eq!(data.medications.len(), 1);
        assert!(data.audit.iter().any(|e| e.kind == AuditKind::MedicationDeleted));
    }

    #[test]
    fn test_set_slots_and_active() {
        let (_dir, store) = setup();
        let schedule = Schedule::new(&store, &SystemClock);
        let patient = schedule.register_patient("Rosa", "UTC").unwrap();
        let med = schedule.enroll(new_med(patient.id, &["08:00"])).unwrap();

        let updated = schedule.set_slots(med.id, &["09:00", "21:00"]).unwrap();
        assert_eq!(updated.slots_per_day(), 2);
        assert!(schedule.set_slots::<&str>(med.id, &[]).is_err());

        let paused = schedule.set_active(med.id, false).unwrap();
        assert!(!paused.is_live());
        assert_eq!(schedule.medications(patient.id).unwrap().len(), 1);
    }
}
