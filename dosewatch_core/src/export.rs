//! CSV export of a patient's dose ledger.
//!
//! The CSV is written in full on every export and synced to disk before the
//! call returns. Entries of soft-deleted medications are still exported since
//! the ledger is append-only history.

use crate::store::StoreData;
use crate::{DoseLogEntry, EntrySource, Result};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::Path;
use uuid::Uuid;

/// A row in the CSV output
#[derive(Debug, serde::Serialize)]
struct CsvRow {
    id: String,
    medication_id: String,
    medication: String,
    scheduled_slot: String,
    local_date: String,
    outcome: &'static str,
    classification: String,
    delay_minutes: u32,
    recorded_at: String,
    source: &'static str,
}

impl CsvRow {
    fn new(entry: &DoseLogEntry, medication: &str) -> Self {
        CsvRow {
            id: entry.id.to_string(),
            medication_id: entry.medication_id.to_string(),
            medication: medication.to_string(),
            scheduled_slot: entry.scheduled_slot.to_string(),
            local_date: entry.local_date.to_string(),
            outcome: entry.outcome.label(),
            classification: entry.classification().to_string(),
            delay_minutes: entry.delay_minutes(),
            recorded_at: entry.recorded_at.to_rfc3339(),
            source: match entry.source {
                EntrySource::Reported => "reported",
                EntrySource::Sweep => "sweep",
            },
        }
    }
}

/// Write every ledger entry of `owner_id` to `csv_path`, ordered by day and slot
///
/// Returns the number of rows written. An existing file is replaced.
pub fn export_ledger(data: &StoreData, owner_id: Uuid, csv_path: &Path) -> Result<usize> {
    data.patient(owner_id)?;

    let names: HashMap<Uuid, &str> = data
        .medications
        .iter()
        .filter(|m| m.owner_id == owner_id)
        .map(|m| (m.id, m.name.as_str()))
        .collect();

    let mut entries = data.ledger.for_owner(owner_id);
    entries.sort_by_key(|e| (e.local_date, e.scheduled_slot, e.recorded_at));

    if let Some(parent) = csv_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(csv_path)?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(file);

    for entry in &entries {
        let name = names.get(&entry.medication_id).copied().unwrap_or("");
        writer.serialize(CsvRow::new(entry, name))?;
    }

    // Flush and sync to disk
    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    file.sync_all()?;

    tracing::info!("Exported {} ledger entries to {:?}", entries.len(), csv_path);
    Ok(entries.len())
}
