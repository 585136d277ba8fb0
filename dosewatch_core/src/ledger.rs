//! Dose event ledger.
//!
//! The ledger holds at most one [`DoseLogEntry`] per slot-instance
//! (medication, slot, local day). The only way to add an entry is
//! [`Ledger::insert_unique`], which checks and inserts in one step; callers
//! run it inside a store transaction so the check and the write share the
//! same exclusive lock.

use crate::{DoseLogEntry, Error, Result, SlotKey, SlotTime};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ledger {
    entries: Vec<DoseLogEntry>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `entry` unless its slot-instance is already resolved
    pub fn insert_unique(&mut self, entry: DoseLogEntry) -> Result<&DoseLogEntry> {
        let key = entry.key();
        if self.contains(&key) {
            return Err(Error::AlreadyResolved {
                medication_id: key.medication_id,
                slot: key.slot.to_string(),
                date: key.local_date,
            });
        }

        tracing::debug!(
            "Ledger insert {} slot {} on {} ({})",
            entry.medication_id,
            entry.scheduled_slot,
            entry.local_date,
            entry.outcome.label()
        );
        self.entries.push(entry);
        Ok(&self.entries[self.entries.len() - 1])
    }

    pub fn find(&self, key: &SlotKey) -> Option<&DoseLogEntry> {
        self.entries.iter().find(|e| &e.key() == key)
    }

    pub fn contains(&self, key: &SlotKey) -> bool {
        self.find(key).is_some()
    }

    /// Most recent taken entry for this medication/slot recorded at or after `since`
    pub fn recent_taken(
        &self,
        medication_id: Uuid,
        slot: SlotTime,
        since: DateTime<Utc>,
    ) -> Option<&DoseLogEntry> {
        self.entries
            .iter()
            .filter(|e| {
                e.medication_id == medication_id
                    && e.scheduled_slot == slot
                    && e.is_taken()
                    && e.recorded_at >= since
            })
            .max_by_key(|e| e.recorded_at)
    }

    /// All entries owned by `owner_id`, in insertion order
    pub fn for_owner(&self, owner_id: Uuid) -> Vec<DoseLogEntry> {
        self.entries
            .iter()
            .filter(|e| e.owner_id == owner_id)
            .cloned()
            .collect()
    }

    /// Entries resolving local day `date`
    pub fn on_day(&self, date: NaiveDate) -> impl Iterator<Item = &DoseLogEntry> {
        self.entries.iter().filter(move |e| e.local_date == date)
    }

    pub fn entries(&self) -> &[DoseLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
