//! Prescription Store boundary.
//!
//! Every adapter hands back fully normalized [`ReminderRecord`]s: typed
//! prescriptions plus their discrete dose events. Nothing loosely typed gets
//! past this module.

pub mod http;
pub mod memory;
pub mod sqlite;
pub mod wire;

pub use http::HttpPrescriptionStore;
pub use memory::InMemoryPrescriptionStore;
pub use sqlite::SqlitePrescriptionStore;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::{DoseEvent, Prescription};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Prescription store unreachable at {0}")]
    Connection(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Prescription store returned error (status {status}): {body}")]
    Http { status: u16, body: String },

    #[error("Not authorized to access the prescription store")]
    Unauthorized,

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("Prescription not found: {0}")]
    PrescriptionNotFound(Uuid),

    #[error("Dose rejected: {0}")]
    Rejected(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl StoreError {
    /// Whether repeating the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Connection(_) | StoreError::Timeout(_) | StoreError::HttpClient(_) => true,
            StoreError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// A prescription together with every dose recorded against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderRecord {
    pub prescription: Prescription,
    pub dose_events: Vec<DoseEvent>,
}

pub trait PrescriptionStore: Send + Sync {
    /// All prescriptions of a patient with their dose history.
    fn list_reminders(&self, patient_id: Uuid) -> Result<Vec<ReminderRecord>, StoreError>;

    /// Append one dose event and return the patient's updated list.
    fn record_dose(
        &self,
        prescription_id: Uuid,
        patient_id: Uuid,
        taken_at: DateTime<Utc>,
    ) -> Result<Vec<ReminderRecord>, StoreError>;
}

/// Run `op` up to `max_attempts` times, sleeping `backoff * attempt` between
/// tries. Only transient errors are retried.
pub fn fetch_with_retry<T, F>(max_attempts: u32, backoff: Duration, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Result<T, StoreError>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                tracing::warn!(attempt, max_attempts, error = %e, "Store call failed, retrying");
                std::thread::sleep(backoff.saturating_mul(attempt));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Dose events across every record, in record order.
pub fn all_dose_events(records: &[ReminderRecord]) -> Vec<DoseEvent> {
    records
        .iter()
        .flat_map(|r| r.dose_events.iter().cloned())
        .collect()
}
