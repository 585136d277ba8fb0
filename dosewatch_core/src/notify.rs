//! Outbound notification signals.
//!
//! Delivery is owned by an external notifier; this crate only emits signals,
//! and only after the ledger write they describe has committed. Two sinks
//! ship with the crate:
//! - [`OutboxNotifier`] queues signals in a JSONL file (file-locked appends)
//!   for an external worker to deliver
//! - [`LogNotifier`] is the best-effort real-time channel; it emits the signal
//!   on the tracing stream for whatever socket bridge listens there

use crate::store::acquire;
use crate::Result;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// A signal for the notifier
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    Reminder {
        user_id: Uuid,
        medication_name: String,
        scheduled_slot: String,
    },
    GuardianAlert {
        guardian_contact: String,
        patient_name: String,
        medication_name: String,
        missed_slot: String,
    },
}

/// Notification sink trait
///
/// `at` is the caller's clock reading, so queued records carry the same
/// instant as the ledger entries that caused them.
pub trait Notifier: Send + Sync {
    fn send(&self, signal: &Signal, at: DateTime<Utc>) -> Result<()>;
}

/// A queued signal as stored in the outbox
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: Uuid,
    pub queued_at: DateTime<Utc>,
    pub signal: Signal,
}

/// JSONL outbox with file locking
///
/// Lock waits are bounded by `lock_timeout`, the same budget the store uses,
/// so a wedged delivery worker surfaces as [`crate::Error::LockTimeout`]
/// instead of stalling a pass.
#[derive(Clone, Debug)]
pub struct OutboxNotifier {
    path: PathBuf,
    lock_timeout: Duration,
}

impl OutboxNotifier {
    pub fn new(path: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            lock_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Everything queued so far
    pub fn records(&self) -> Result<Vec<OutboxRecord>> {
        read_outbox(&self.path, self.lock_timeout)
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl Notifier for OutboxNotifier {
    fn send(&self, signal: &Signal, at: DateTime<Utc>) -> Result<()> {
        self.ensure_parent_dir()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        acquire(&file, true, self.lock_timeout)?;

        let record = OutboxRecord {
            id: Uuid::new_v4(),
            queued_at: at,
            signal: signal.clone(),
        };
        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(&record)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        drop(writer);

        FileExt::unlock(&file)?;

        tracing::debug!("Queued signal {} in outbox", record.id);
        Ok(())
    }
}

/// Read all queued signals from an outbox file
pub fn read_outbox(path: &Path, lock_timeout: Duration) -> Result<Vec<OutboxRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    acquire(&file, false, lock_timeout)?;

    let reader = BufReader::new(&file);
    let mut records = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<OutboxRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!("Failed to parse outbox record at line {}: {}", line_num + 1, e);
            }
        }
    }

    FileExt::unlock(&file)?;
    Ok(records)
}

/// Best-effort real-time channel
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, signal: &Signal, _at: DateTime<Utc>) -> Result<()> {
        match signal {
            Signal::Reminder {
                user_id,
                medication_name,
                scheduled_slot,
            } => tracing::info!(
                target: crate::logging::REALTIME_TARGET,
                "reminder user={} medication={} slot={}",
                user_id,
                medication_name,
                scheduled_slot
            ),
            Signal::GuardianAlert {
                guardian_contact,
                patient_name,
                medication_name,
                missed_slot,
            } => tracing::info!(
                target: crate::logging::REALTIME_TARGET,
                "guardian_alert to={} patient={} medication={} slot={}",
                guardian_contact,
                patient_name,
                medication_name,
                missed_slot
            ),
        }
        Ok(())
    }
}
