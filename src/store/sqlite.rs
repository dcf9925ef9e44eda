//! Authoritative local Prescription Store on SQLite.
//!
//! Unlike the HTTP client this adapter owns the data, so `record_dose`
//! re-evaluates the schedule inside the write transaction and refuses doses
//! that are not takeable at the recorded instant.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{PrescriptionStore, ReminderRecord, StoreError};
use crate::db::{
    open_database, open_memory_database, timestamp_from_sql, timestamp_to_sql, uuid_from_sql,
    DatabaseError,
};
use crate::models::{DoseEvent, DoseFrequency, MedicationLine, Prescription};
use crate::schedule::compute_schedule;

pub struct SqlitePrescriptionStore {
    conn: Mutex<Connection>,
}

impl SqlitePrescriptionStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::from_connection(open_database(path)?))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self::from_connection(open_memory_database()?))
    }

    /// Wrap an already migrated connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)
    }

    /// Insert or replace a prescription and its medication lines.
    pub fn upsert_prescription(&self, prescription: &Prescription) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(DatabaseError::from)?;
        insert_prescription(&tx, prescription)?;
        tx.commit().map_err(DatabaseError::from)?;
        Ok(())
    }

    /// Import a dose event verbatim, without eligibility checks.
    pub fn import_dose_event(&self, event: &DoseEvent) -> Result<(), StoreError> {
        let conn = self.conn()?;
        insert_dose_event(&conn, event)?;
        Ok(())
    }
}

impl PrescriptionStore for SqlitePrescriptionStore {
    fn list_reminders(&self, patient_id: Uuid) -> Result<Vec<ReminderRecord>, StoreError> {
        let conn = self.conn()?;
        Ok(load_patient_records(&conn, patient_id)?)
    }

    fn record_dose(
        &self,
        prescription_id: Uuid,
        patient_id: Uuid,
        taken_at: DateTime<Utc>,
    ) -> Result<Vec<ReminderRecord>, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(DatabaseError::from)?;

        let record = load_record(&tx, prescription_id)?
            .filter(|r| r.prescription.patient_id == patient_id)
            .ok_or(StoreError::PrescriptionNotFound(prescription_id))?;

        let schedule = compute_schedule(&record.prescription, &record.dose_events, taken_at);
        if schedule.is_expired() {
            return Err(StoreError::Rejected("prescription has expired".into()));
        }
        if !schedule.can_take_dose_now() {
            return Err(StoreError::Rejected("dose is not due yet".into()));
        }

        let event = DoseEvent::new(prescription_id, patient_id, taken_at);
        insert_dose_event(&tx, &event)?;
        let records = load_patient_records(&tx, patient_id)?;
        tx.commit().map_err(DatabaseError::from)?;

        tracing::info!(prescription_id = %prescription_id, event_id = %event.id, "Dose event stored");
        Ok(records)
    }
}

fn insert_prescription(conn: &Connection, rx: &Prescription) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO prescriptions
         (id, patient_id, physician_id, issued_at, expires_at, total_doses, notes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
            patient_id = excluded.patient_id,
            physician_id = excluded.physician_id,
            issued_at = excluded.issued_at,
            expires_at = excluded.expires_at,
            total_doses = excluded.total_doses,
            notes = excluded.notes",
        params![
            rx.id.to_string(),
            rx.patient_id.to_string(),
            rx.physician_id.map(|id| id.to_string()),
            timestamp_to_sql(rx.issued_at),
            rx.expires_at.map(timestamp_to_sql),
            rx.total_doses,
            rx.notes,
        ],
    )?;

    conn.execute(
        "DELETE FROM medication_lines WHERE prescription_id = ?1",
        params![rx.id.to_string()],
    )?;
    for (position, line) in rx.medications.iter().enumerate() {
        conn.execute(
            "INSERT INTO medication_lines
             (prescription_id, position, name, dosage, frequency_label, interval_minutes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                rx.id.to_string(),
                position as i64,
                line.name,
                line.dosage,
                line.frequency_label,
                line.frequency.interval_minutes(),
            ],
        )?;
    }
    Ok(())
}

fn insert_dose_event(conn: &Connection, event: &DoseEvent) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO dose_events (id, prescription_id, patient_id, taken_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            event.id.to_string(),
            event.prescription_id.to_string(),
            event.patient_id.to_string(),
            timestamp_to_sql(event.taken_at),
        ],
    )?;
    Ok(())
}

/// Raw prescription row before its text columns are validated.
struct PrescriptionRow {
    id: String,
    patient_id: String,
    physician_id: Option<String>,
    issued_at: String,
    expires_at: Option<String>,
    total_doses: u32,
    notes: Option<String>,
}

const PRESCRIPTION_COLUMNS: &str =
    "id, patient_id, physician_id, issued_at, expires_at, total_doses, notes";

fn prescription_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PrescriptionRow> {
    Ok(PrescriptionRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        physician_id: row.get(2)?,
        issued_at: row.get(3)?,
        expires_at: row.get(4)?,
        total_doses: row.get(5)?,
        notes: row.get(6)?,
    })
}

fn load_patient_records(
    conn: &Connection,
    patient_id: Uuid,
) -> Result<Vec<ReminderRecord>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PRESCRIPTION_COLUMNS} FROM prescriptions
         WHERE patient_id = ?1 ORDER BY issued_at, id"
    ))?;
    let rows = stmt
        .query_map(params![patient_id.to_string()], prescription_row)?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|row| build_record(conn, row))
        .collect()
}

fn load_record(conn: &Connection, prescription_id: Uuid) -> Result<Option<ReminderRecord>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {PRESCRIPTION_COLUMNS} FROM prescriptions WHERE id = ?1"),
            params![prescription_id.to_string()],
            prescription_row,
        )
        .optional()?;

    row.map(|row| build_record(conn, row)).transpose()
}

fn build_record(conn: &Connection, row: PrescriptionRow) -> Result<ReminderRecord, DatabaseError> {
    let id = uuid_from_sql("prescriptions.id", &row.id)?;
    let prescription = Prescription {
        id,
        patient_id: uuid_from_sql("prescriptions.patient_id", &row.patient_id)?,
        physician_id: row
            .physician_id
            .as_deref()
            .map(|v| uuid_from_sql("prescriptions.physician_id", v))
            .transpose()?,
        medications: load_medication_lines(conn, &row.id)?,
        issued_at: timestamp_from_sql("prescriptions.issued_at", &row.issued_at)?,
        expires_at: row
            .expires_at
            .as_deref()
            .map(|v| timestamp_from_sql("prescriptions.expires_at", v))
            .transpose()?,
        total_doses: row.total_doses,
        notes: row.notes,
    };
    let dose_events = load_dose_events(conn, &prescription)?;
    Ok(ReminderRecord {
        prescription,
        dose_events,
    })
}

fn load_medication_lines(conn: &Connection, prescription_id: &str) -> Result<Vec<MedicationLine>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT name, dosage, frequency_label, interval_minutes FROM medication_lines
         WHERE prescription_id = ?1 ORDER BY position",
    )?;
    let lines = stmt
        .query_map(params![prescription_id], |row| {
            Ok(MedicationLine {
                name: row.get(0)?,
                dosage: row.get(1)?,
                frequency_label: row.get(2)?,
                frequency: DoseFrequency::every_minutes(row.get(3)?),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(lines)
}

fn load_dose_events(conn: &Connection, prescription: &Prescription) -> Result<Vec<DoseEvent>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, patient_id, taken_at FROM dose_events
         WHERE prescription_id = ?1 ORDER BY taken_at",
    )?;
    let rows = stmt
        .query_map(params![prescription.id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, patient_id, taken_at)| {
            Ok(DoseEvent {
                id: uuid_from_sql("dose_events.id", &id)?,
                prescription_id: prescription.id,
                patient_id: uuid_from_sql("dose_events.patient_id", &patient_id)?,
                taken_at: timestamp_from_sql("dose_events.taken_at", &taken_at)?,
            })
        })
        .collect()
}
