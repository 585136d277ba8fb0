#![forbid(unsafe_code)]

//! Core domain model and business logic for the dosewatch adherence engine.
//!
//! This crate provides:
//! - Domain types (patients, medications, slots, dose outcomes, audit events)
//! - The file-backed store and its append-only dose ledger
//! - The adherence recorder and the missed-dose sweeper
//! - Read-only adherence analytics
//! - Notification signals, guardian lookup and CSV export

pub mod types;
pub mod error;
pub mod clock;
pub mod config;
pub mod logging;
pub mod window;
pub mod ledger;
pub mod store;
pub mod schedule;
pub mod guardians;
pub mod notify;
pub mod recorder;
pub mod sweeper;
pub mod analytics;
pub mod export;

// Re-export commonly used types
pub use error::{Error, ErrorClass, Result};
pub use types::*;
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{Config, DataPaths};
pub use ledger::Ledger;
pub use store::{FileStore, StoreData};
pub use schedule::{NewMedication, Schedule};
pub use guardians::{GuardianDirectory, JsonGuardianDirectory};
pub use notify::{LogNotifier, Notifier, OutboxNotifier, Signal};
pub use recorder::{DoseReport, Recorder};
pub use sweeper::{PassKind, RunLock, Sweeper};
pub use analytics::Analytics;
pub use export::export_ledger;
