use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{PrescriptionStore, ReminderRecord, StoreError};
use crate::models::{DoseEvent, Prescription};

/// In-process store for tests and demos. Failures can be queued to exercise
/// retry and error paths.
#[derive(Default)]
pub struct InMemoryPrescriptionStore {
    records: Mutex<Vec<ReminderRecord>>,
    failures: Mutex<VecDeque<StoreError>>,
    record_failures: Mutex<VecDeque<StoreError>>,
    list_calls: AtomicUsize,
    record_calls: AtomicUsize,
}

impl InMemoryPrescriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prescriptions(prescriptions: Vec<Prescription>) -> Self {
        let store = Self::new();
        for prescription in prescriptions {
            store.insert(prescription, Vec::new());
        }
        store
    }

    /// Add or replace a prescription with its dose history.
    pub fn insert(&self, prescription: Prescription, dose_events: Vec<DoseEvent>) {
        let mut records = lock(&self.records);
        records.retain(|r| r.prescription.id != prescription.id);
        records.push(ReminderRecord {
            prescription,
            dose_events,
        });
    }

    /// The next call (of either kind) fails with `error`.
    pub fn push_failure(&self, error: StoreError) {
        lock(&self.failures).push_back(error);
    }

    /// The next `record_dose` call fails with `error`; listing is unaffected.
    pub fn push_record_failure(&self, error: StoreError) {
        lock(&self.record_failures).push_back(error);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn record_calls(&self) -> usize {
        self.record_calls.load(Ordering::SeqCst)
    }

    pub fn dose_events(&self, prescription_id: Uuid) -> Vec<DoseEvent> {
        lock(&self.records)
            .iter()
            .filter(|r| r.prescription.id == prescription_id)
            .flat_map(|r| r.dose_events.iter().cloned())
            .collect()
    }

    fn take_failure(&self) -> Result<(), StoreError> {
        match lock(&self.failures).pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn records_for(records: &[ReminderRecord], patient_id: Uuid) -> Vec<ReminderRecord> {
        records
            .iter()
            .filter(|r| r.prescription.patient_id == patient_id)
            .cloned()
            .collect()
    }
}

impl PrescriptionStore for InMemoryPrescriptionStore {
    fn list_reminders(&self, patient_id: Uuid) -> Result<Vec<ReminderRecord>, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        Ok(Self::records_for(&lock(&self.records), patient_id))
    }

    fn record_dose(
        &self,
        prescription_id: Uuid,
        patient_id: Uuid,
        taken_at: DateTime<Utc>,
    ) -> Result<Vec<ReminderRecord>, StoreError> {
        self.record_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        if let Some(error) = lock(&self.record_failures).pop_front() {
            return Err(error);
        }

        let mut records = lock(&self.records);
        let record = records
            .iter_mut()
            .find(|r| r.prescription.id == prescription_id && r.prescription.patient_id == patient_id)
            .ok_or(StoreError::PrescriptionNotFound(prescription_id))?;
        record
            .dose_events
            .push(DoseEvent::new(prescription_id, patient_id, taken_at));

        Ok(Self::records_for(&records, patient_id))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
