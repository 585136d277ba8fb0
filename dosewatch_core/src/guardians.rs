//! Guardian resolution for missed-dose alerts.
//!
//! Patient-guardian links are managed by an external system; this crate only
//! reads them. The default directory loads a JSON array of [`GuardianLink`]
//! records from a file that system maintains.

use crate::{Guardian, GuardianLink, LinkStatus, Result};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Lookup of active guardians for a patient
pub trait GuardianDirectory: Send + Sync {
    fn active_guardians(&self, patient_id: Uuid) -> Result<Vec<Guardian>>;
}

/// Guardian links read from a JSON file on every lookup
#[derive(Clone, Debug)]
pub struct JsonGuardianDirectory {
    path: PathBuf,
}

impl JsonGuardianDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl GuardianDirectory for JsonGuardianDirectory {
    fn active_guardians(&self, patient_id: Uuid) -> Result<Vec<Guardian>> {
        let links = load_links(&self.path)?;
        Ok(active_for(&links, patient_id))
    }
}

/// Load guardian links from a JSON file
///
/// Returns an empty list if the file doesn't exist (no guardians linked).
/// Returns an error if the file exists but is malformed.
pub fn load_links(path: &Path) -> Result<Vec<GuardianLink>> {
    if !path.exists() {
        tracing::debug!("No guardian links file at {:?}", path);
        return Ok(Vec::new());
    }

    let contents = std::fs::read_to_string(path)?;
    let links: Vec<GuardianLink> = serde_json::from_str(&contents)?;
    tracing::debug!("Loaded {} guardian links from {:?}", links.len(), path);
    Ok(links)
}

/// Active guardians of `patient_id`, one per guardian id
fn active_for(links: &[GuardianLink], patient_id: Uuid) -> Vec<Guardian> {
    let mut guardians: Vec<Guardian> = Vec::new();
    for link in links
        .iter()
        .filter(|l| l.patient_id == patient_id && l.status == LinkStatus::Active)
    {
        if guardians.iter().all(|g| g.id != link.guardian_id) {
            guardians.push(Guardian {
                id: link.guardian_id,
                contact: link.guardian_contact.clone(),
            });
        }
    }
    guardians
}
