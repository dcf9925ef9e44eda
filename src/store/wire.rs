//! Wire format of the portal's reminder API and its normalization.
//!
//! The API is loosely typed: camelCase or snake_case keys, optional fields,
//! counts as numbers or strings, and either a bare array or an object
//! wrapping it. Records that cannot be normalized are skipped with a warning
//! instead of failing the whole list.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{ReminderRecord, StoreError};
use crate::models::{DoseEvent, MedicationLine, Prescription};
use crate::schedule::slot_start;

/// Keys under which a wrapped response may carry its list.
const LIST_KEYS: &[&str] = &["reminders", "prescriptions", "data", "items"];

#[derive(Debug, Deserialize)]
struct WireReminder {
    #[serde(alias = "_id", alias = "prescriptionId", alias = "prescription_id")]
    id: Value,
    #[serde(default, alias = "patientId", alias = "patient")]
    patient_id: Option<Value>,
    #[serde(default, alias = "physicianId", alias = "doctorId", alias = "doctor")]
    physician_id: Option<Value>,
    #[serde(default, alias = "medicationLines")]
    medications: Option<Vec<WireMedication>>,
    #[serde(default, alias = "medicationName", alias = "medication")]
    medication_name: Option<String>,
    #[serde(default)]
    dosage: Option<String>,
    #[serde(default)]
    frequency: Option<String>,
    #[serde(
        default,
        alias = "issuedAt",
        alias = "issueDate",
        alias = "issue_date",
        alias = "startDate",
        alias = "createdAt"
    )]
    issued_at: Option<String>,
    #[serde(
        default,
        alias = "expiresAt",
        alias = "expirationDate",
        alias = "expiration_date",
        alias = "endDate"
    )]
    expires_at: Option<String>,
    #[serde(default, alias = "totalDoses")]
    total_doses: Option<LooseCount>,
    #[serde(default, alias = "dosesTaken")]
    doses_taken: Option<LooseCount>,
    #[serde(default, alias = "doseEvents", alias = "doses", alias = "doseHistory")]
    dose_events: Option<Vec<WireDoseEvent>>,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMedication {
    #[serde(default, alias = "medicationName", alias = "medication")]
    name: Option<String>,
    #[serde(default)]
    dosage: Option<String>,
    #[serde(default)]
    frequency: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireDoseEvent {
    Timestamp(String),
    Event {
        #[serde(default, alias = "_id")]
        id: Option<Value>,
        #[serde(alias = "takenAt", alias = "timestamp", alias = "time")]
        taken_at: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LooseCount {
    Number(f64),
    Text(String),
}

impl LooseCount {
    /// Non-negative whole count; anything unreadable is zero.
    fn value(&self) -> u32 {
        let raw = match self {
            LooseCount::Number(n) => *n,
            LooseCount::Text(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        };
        if raw.is_finite() && raw > 0.0 {
            raw.min(f64::from(u32::MAX)) as u32
        } else {
            0
        }
    }
}

/// Body of `POST /reminders/{id}/doses`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDoseRequest {
    pub patient_id: String,
    pub taken_at: String,
}

impl RecordDoseRequest {
    pub fn new(patient_id: Uuid, taken_at: DateTime<Utc>) -> Self {
        Self {
            patient_id: patient_id.to_string(),
            taken_at: taken_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Parse a reminder list response body for `patient_id`.
pub fn parse_reminder_list(body: &str, patient_id: Uuid) -> Result<Vec<ReminderRecord>, StoreError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| StoreError::ResponseParsing(e.to_string()))?;
    let items = extract_list(value)?;

    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<WireReminder>(item) {
            Ok(wire) => normalize_reminder(wire, patient_id),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable reminder record");
                None
            }
        })
        .collect())
}

fn extract_list(value: Value) -> Result<Vec<Value>, StoreError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => LIST_KEYS
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .ok_or_else(|| StoreError::ResponseParsing("No reminder list in response".into())),
        other => Err(StoreError::ResponseParsing(format!(
            "Expected a reminder list, got {}",
            type_name(&other)
        ))),
    }
}

fn normalize_reminder(wire: WireReminder, patient_id: Uuid) -> Option<ReminderRecord> {
    let Some(id) = value_uuid(&wire.id) else {
        tracing::warn!(id = %wire.id, "Skipping reminder with invalid id");
        return None;
    };

    let patient_id = wire
        .patient_id
        .as_ref()
        .and_then(value_uuid)
        .unwrap_or(patient_id);

    let Some(issued_at) = wire.issued_at.as_deref().and_then(parse_timestamp) else {
        tracing::warn!(prescription_id = %id, "Skipping reminder without a readable issue date");
        return None;
    };

    let expires_at = match wire.expires_at.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(text) => match parse_timestamp(text) {
            Some(at) => Some(at),
            None => {
                tracing::warn!(prescription_id = %id, expires_at = text, "Skipping reminder with unreadable expiration date");
                return None;
            }
        },
    };

    let total_doses = wire.total_doses.as_ref().map(LooseCount::value).unwrap_or(0);

    let mut medications: Vec<MedicationLine> = wire
        .medications
        .unwrap_or_default()
        .into_iter()
        .map(|m| {
            MedicationLine::new(
                m.name.as_deref().unwrap_or(""),
                m.dosage.as_deref().unwrap_or(""),
                m.frequency.as_deref().unwrap_or(""),
            )
        })
        .collect();
    if medications.is_empty() && wire.medication_name.is_some() {
        medications.push(MedicationLine::new(
            wire.medication_name.as_deref().unwrap_or(""),
            wire.dosage.as_deref().unwrap_or(""),
            wire.frequency.as_deref().unwrap_or(""),
        ));
    }

    let prescription = Prescription {
        id,
        patient_id,
        physician_id: wire.physician_id.as_ref().and_then(value_uuid),
        medications,
        issued_at,
        expires_at,
        total_doses,
        notes: wire.notes.filter(|n| !n.trim().is_empty()),
    };

    let dose_events = match wire.dose_events {
        Some(events) => events
            .into_iter()
            .filter_map(|event| normalize_dose_event(event, &prescription))
            .collect(),
        None => synthesize_from_counter(
            &prescription,
            wire.doses_taken.as_ref().map(LooseCount::value).unwrap_or(0),
        ),
    };

    Some(ReminderRecord {
        prescription,
        dose_events,
    })
}

fn normalize_dose_event(event: WireDoseEvent, prescription: &Prescription) -> Option<DoseEvent> {
    let (id, taken_at) = match event {
        WireDoseEvent::Timestamp(at) => (None, at),
        WireDoseEvent::Event { id, taken_at } => (id.as_ref().and_then(value_uuid), taken_at),
    };
    let Some(at) = parse_timestamp(&taken_at) else {
        tracing::warn!(prescription_id = %prescription.id, taken_at = %taken_at, "Skipping dose event with unreadable time");
        return None;
    };
    let mut event = DoseEvent::new(prescription.id, prescription.patient_id, at);
    if let Some(id) = id {
        event.id = id;
    }
    Some(event)
}

/// Counter-only backends report how many doses were taken but not when.
/// Place one event at the start of each satisfied slot so the calculator
/// reproduces the same count.
fn synthesize_from_counter(prescription: &Prescription, doses_taken: u32) -> Vec<DoseEvent> {
    let interval = prescription.frequency().interval_minutes();
    (0..doses_taken.min(prescription.total_doses))
        .map_while(|k| slot_start(prescription.issued_at, interval, k))
        .map(|at| DoseEvent::new(prescription.id, prescription.patient_id, at))
        .collect()
}

/// RFC 3339, naive date-time (taken as UTC) or a bare date (midnight UTC).
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn value_uuid(value: &Value) -> Option<Uuid> {
    value.as_str().and_then(|s| Uuid::parse_str(s.trim()).ok())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
