//! Error types for the dosewatch_core library.

use chrono::NaiveDate;
use std::io;
use uuid::Uuid;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Broad error classes callers act on.
///
/// - `Validation`: bad input, rejected before touching the store
/// - `Conflict`: the work was already done (or is being done); safe to treat as handled
/// - `State`: the target record is missing, inactive or out of stock
/// - `Transient`: infrastructure failure; the unit was rolled back and may be retried
/// - `Fatal`: a sweep pass could not start at all
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Conflict,
    State,
    Transient,
    Fatal,
}

/// Core error type for dosewatch_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Slot string is not a valid `HH:MM` time of day
    #[error("Invalid slot '{0}': expected HH:MM")]
    InvalidSlot(String),

    /// Unknown IANA time zone identifier
    #[error("Invalid time zone '{0}'")]
    InvalidTimezone(String),

    /// Other input validation failure
    #[error("Validation error: {0}")]
    Validation(String),

    /// A taken report for the same slot arrived inside the duplicate window
    #[error("Duplicate submission for medication {medication_id} slot {slot}")]
    DuplicateSubmission { medication_id: Uuid, slot: String },

    /// The slot-instance already has a ledger entry
    #[error("Slot {slot} of medication {medication_id} on {date} is already resolved")]
    AlreadyResolved {
        medication_id: Uuid,
        slot: String,
        date: NaiveDate,
    },

    /// Another sweep pass holds the run lock
    #[error("A sweep pass is already running")]
    SweepInProgress,

    /// Another reminder pass holds its run lock
    #[error("A reminder pass is already running")]
    ReminderInProgress,

    /// Medication does not exist or was soft-deleted
    #[error("Medication {0} not found")]
    MedicationNotFound(Uuid),

    /// Medication exists but is not active
    #[error("Medication {0} is inactive")]
    MedicationInactive(Uuid),

    /// Patient does not exist
    #[error("Patient {0} not found")]
    PatientNotFound(Uuid),

    /// Medication belongs to someone else
    #[error("Medication {medication_id} does not belong to patient {owner_id}")]
    OwnerMismatch { medication_id: Uuid, owner_id: Uuid },

    /// No stock left to decrement
    #[error("Medication {0} has no remaining quantity")]
    OutOfStock(Uuid),

    /// Could not acquire a store lock in time
    #[error("Timed out after {0}ms waiting for store lock")]
    LockTimeout(u64),

    /// A transaction exceeded its time budget and was aborted
    #[error("Transaction exceeded {0}ms and was rolled back")]
    TransactionTimeout(u64),

    /// Sweep pass could not enumerate schedules
    #[error("Sweep aborted: {0}")]
    SweepAborted(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Classify this error for retry / reporting decisions
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Config(_)
            | Error::Toml(_)
            | Error::InvalidSlot(_)
            | Error::InvalidTimezone(_)
            | Error::Validation(_) => ErrorClass::Validation,

            Error::DuplicateSubmission { .. }
            | Error::AlreadyResolved { .. }
            | Error::SweepInProgress
            | Error::ReminderInProgress => ErrorClass::Conflict,

            Error::MedicationNotFound(_)
            | Error::MedicationInactive(_)
            | Error::PatientNotFound(_)
            | Error::OwnerMismatch { .. }
            | Error::OutOfStock(_) => ErrorClass::State,

            Error::SweepAborted(_) => ErrorClass::Fatal,

            Error::Io(_)
            | Error::Json(_)
            | Error::Csv(_)
            | Error::LockTimeout(_)
            | Error::TransactionTimeout(_)
            | Error::Other(_) => ErrorClass::Transient,
        }
    }

    /// True for errors meaning "someone already handled this"
    pub fn is_conflict(&self) -> bool {
        self.class() == ErrorClass::Conflict
    }
}
