use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::frequency::DoseFrequency;

/// Name used when a prescription carries no medication lines.
pub const UNNAMED_MEDICATION: &str = "Medication";

/// One medication on a prescription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationLine {
    pub name: String,
    pub dosage: String,
    pub frequency: DoseFrequency,
    /// The frequency text as written by the prescriber.
    pub frequency_label: String,
}

impl MedicationLine {
    pub fn new(name: &str, dosage: &str, frequency_label: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            dosage: dosage.trim().to_string(),
            frequency: DoseFrequency::parse_or_default(frequency_label),
            frequency_label: frequency_label.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prescription {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub physician_id: Option<Uuid>,
    /// The first line is the primary one: it sets dose spacing and names
    /// reminders.
    pub medications: Vec<MedicationLine>,
    pub issued_at: DateTime<Utc>,
    /// `None` means the prescription never expires.
    pub expires_at: Option<DateTime<Utc>>,
    pub total_doses: u32,
    pub notes: Option<String>,
}

impl Prescription {
    pub fn primary_line(&self) -> Option<&MedicationLine> {
        self.medications.first()
    }

    pub fn medication_name(&self) -> &str {
        self.primary_line()
            .map(|line| line.name.as_str())
            .filter(|name| !name.is_empty())
            .unwrap_or(UNNAMED_MEDICATION)
    }

    pub fn dosage(&self) -> &str {
        self.primary_line().map(|line| line.dosage.as_str()).unwrap_or("")
    }

    pub fn frequency_label(&self) -> &str {
        self.primary_line()
            .map(|line| line.frequency_label.as_str())
            .unwrap_or("")
    }

    pub fn frequency(&self) -> DoseFrequency {
        self.primary_line()
            .map(|line| line.frequency)
            .unwrap_or_default()
    }

    pub fn dose_interval(&self) -> Duration {
        self.frequency().interval()
    }

    /// Expired strictly after `expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now > expires)
    }
}

/// A dose recorded as taken. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoseEvent {
    pub id: Uuid,
    pub prescription_id: Uuid,
    pub patient_id: Uuid,
    pub taken_at: DateTime<Utc>,
}

impl DoseEvent {
    pub fn new(prescription_id: Uuid, patient_id: Uuid, taken_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            prescription_id,
            patient_id,
            taken_at,
        }
    }
}
