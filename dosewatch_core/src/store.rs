//! File-backed store with locked, all-or-nothing transactions.
//!
//! The whole dataset (patients, medications, ledger, audit trail) lives in a
//! single JSON document. A sidecar lock file serializes access:
//! - readers hold a shared lock while loading the document
//! - writers hold an exclusive lock, mutate an in-memory copy, and commit it
//!   by writing a temp file, syncing it, and renaming it over the document
//!
//! A transaction whose closure fails, or that overruns its time budget, is
//! dropped before the rename, so no partial state is ever visible.

use crate::config::StoreConfig;
use crate::{AuditEvent, Error, Ledger, Medication, Patient, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use uuid::Uuid;

const DOCUMENT_FILE: &str = "dosewatch.json";
const LOCK_FILE: &str = "store.lock";
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Everything the engine persists
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub patients: Vec<Patient>,
    #[serde(default)]
    pub medications: Vec<Medication>,
    #[serde(default)]
    pub ledger: Ledger,
    #[serde(default)]
    pub audit: Vec<AuditEvent>,
}

impl StoreData {
    pub fn patient(&self, id: Uuid) -> Result<&Patient> {
        self.patients
            .iter()
            .find(|p| p.id == id)
            .ok_or(Error::PatientNotFound(id))
    }

    /// Medication by id; soft-deleted records are never returned
    pub fn medication(&self, id: Uuid) -> Option<&Medication> {
        self.medications
            .iter()
            .find(|m| m.id == id && !m.is_deleted)
    }

    pub fn medication_mut(&mut self, id: Uuid) -> Result<&mut Medication> {
        self.medications
            .iter_mut()
            .find(|m| m.id == id && !m.is_deleted)
            .ok_or(Error::MedicationNotFound(id))
    }

    /// Active, non-deleted medication, or a state error
    pub fn live_medication_mut(&mut self, id: Uuid) -> Result<&mut Medication> {
        let medication = self.medication_mut(id)?;
        if !medication.is_active {
            return Err(Error::MedicationInactive(id));
        }
        Ok(medication)
    }

    /// Non-deleted medications of one patient
    pub fn medications_for(&self, owner_id: Uuid) -> Vec<&Medication> {
        self.medications
            .iter()
            .filter(|m| m.owner_id == owner_id && !m.is_deleted)
            .collect()
    }

    /// Active, non-deleted, scheduled medications of every patient
    pub fn schedulable(&self) -> impl Iterator<Item = &Medication> {
        self.medications.iter().filter(|m| m.is_schedulable())
    }

    pub fn record_audit(&mut self, event: AuditEvent) {
        tracing::debug!("Audit {:?} for owner {}", event.kind, event.owner_id);
        self.audit.push(event);
    }
}

/// JSON document store guarded by an `fs2` lock file
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
    lock_timeout: Duration,
    transaction_timeout: Duration,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>, config: &StoreConfig) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            lock_timeout: config.lock_timeout(),
            transaction_timeout: Duration::from_millis(config.transaction_timeout_ms),
        })
    }

    pub fn document_path(&self) -> PathBuf {
        self.dir.join(DOCUMENT_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    /// Load a consistent snapshot under a shared lock
    pub fn read(&self) -> Result<StoreData> {
        let lock = self.open_lock_file()?;
        acquire(&lock, false, self.lock_timeout)?;
        let result = load_document(&self.document_path());
        FileExt::unlock(&lock)?;
        result
    }

    /// Run `f` against the current data under the exclusive lock and commit its changes.
    ///
    /// If `f` returns an error, or the transaction exceeds its time budget,
    /// nothing is written.
    pub fn transact<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut StoreData) -> Result<T>,
    {
        let started = Instant::now();
        let lock = self.open_lock_file()?;
        acquire(&lock, true, self.lock_timeout)?;

        let result = self.run_locked(started, f);

        FileExt::unlock(&lock)?;
        result
    }

    fn run_locked<T, F>(&self, started: Instant, f: F) -> Result<T>
    where
        F: FnOnce(&mut StoreData) -> Result<T>,
    {
        let mut data = load_document(&self.document_path())?;
        let value = f(&mut data)?;

        if started.elapsed() > self.transaction_timeout {
            tracing::warn!(
                "Transaction exceeded {:?}, rolling back",
                self.transaction_timeout
            );
            return Err(Error::TransactionTimeout(
                self.transaction_timeout.as_millis() as u64,
            ));
        }

        self.commit(&data)?;
        Ok(value)
    }

    /// Atomically replace the document: temp file, fsync, rename
    fn commit(&self, data: &StoreData) -> Result<()> {
        let temp = NamedTempFile::new_in(&self.dir)?;
        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            serde_json::to_writer(&mut writer, data)?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(self.document_path())
            .map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Committed store to {:?}", self.document_path());
        Ok(())
    }

    fn open_lock_file(&self) -> Result<File> {
        Ok(OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())?)
    }
}

/// Poll for a lock until `timeout` elapses
pub(crate) fn acquire(file: &File, exclusive: bool, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let attempt = if exclusive {
            FileExt::try_lock_exclusive(file)
        } else {
            FileExt::try_lock_shared(file)
        };

        match attempt {
            Ok(()) => return Ok(()),
            Err(e) if is_contended(&e) => {
                if Instant::now() >= deadline {
                    return Err(Error::LockTimeout(timeout.as_millis() as u64));
                }
                std::thread::sleep(LOCK_POLL_INTERVAL);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

pub(crate) fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn load_document(path: &Path) -> Result<StoreData> {
    if !path.exists() {
        return Ok(StoreData::default());
    }

    let mut contents = String::new();
    File::open(path)?.read_to_string(&mut contents)?;
    if contents.trim().is_empty() {
        return Ok(StoreData::default());
    }

    // A corrupt document is an error, never silently replaced by an empty one
    Ok(serde_json::from_str(&contents)?)
}
