//! Dose intake recorder.
//!
//! Checks eligibility against a freshly fetched schedule, appends one dose
//! event through the store and recomputes from what the store returns. These
//! checks are a guard for the user; the authoritative store repeats them.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::ReminderError;
use crate::models::{DoseEvent, Prescription, ReminderStatus};
use crate::notifier::ReminderNotifier;
use crate::schedule::{compute_schedule, DoseSchedule};
use crate::status::classify;
use crate::store::{fetch_with_retry, PrescriptionStore, ReminderRecord, StoreError};

/// Result of a successful dose record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatedSchedule {
    pub prescription: Prescription,
    pub schedule: DoseSchedule,
    pub status: ReminderStatus,
    /// The patient's full list as returned by the store.
    pub records: Vec<ReminderRecord>,
}

pub struct DoseIntakeRecorder {
    store: Arc<dyn PrescriptionStore>,
    clock: Arc<dyn Clock>,
    double_submit_window: Duration,
    max_fetch_attempts: u32,
    retry_backoff: StdDuration,
}

impl DoseIntakeRecorder {
    pub fn new(store: Arc<dyn PrescriptionStore>, clock: Arc<dyn Clock>, config: &EngineConfig) -> Self {
        Self {
            store,
            clock,
            double_submit_window: config.double_submit_window(),
            max_fetch_attempts: config.max_fetch_attempts,
            retry_backoff: config.retry_backoff(),
        }
    }

    /// Record a dose taken now.
    pub fn record_dose(
        &self,
        prescription_id: Uuid,
        patient_id: Uuid,
        notifier: &mut ReminderNotifier,
    ) -> Result<UpdatedSchedule, ReminderError> {
        self.record_dose_at(prescription_id, patient_id, self.clock.now(), notifier)
    }

    pub fn record_dose_at(
        &self,
        prescription_id: Uuid,
        patient_id: Uuid,
        at: DateTime<Utc>,
        notifier: &mut ReminderNotifier,
    ) -> Result<UpdatedSchedule, ReminderError> {
        let records = fetch_with_retry(self.max_fetch_attempts, self.retry_backoff, || {
            self.store.list_reminders(patient_id)
        })?;
        let record = find_record(&records, prescription_id)?;

        let schedule = compute_schedule(&record.prescription, &record.dose_events, at);
        self.check_eligible(record, &schedule, at)?;

        let updated = self
            .store
            .record_dose(prescription_id, patient_id, at)
            .map_err(|e| match e {
                StoreError::PrescriptionNotFound(id) => ReminderError::PrescriptionNotFound(id),
                StoreError::Rejected(reason) => {
                    tracing::info!(prescription_id = %prescription_id, reason = %reason, "Store rejected dose");
                    ReminderError::NotReady {
                        prescription_id,
                        next_dose_time: schedule.next_dose_time(),
                    }
                }
                other => {
                    tracing::warn!(prescription_id = %prescription_id, error = %other, "Recording dose failed");
                    ReminderError::FetchFailed(other)
                }
            })?;

        let mut updated = updated;
        if find_record(&updated, prescription_id).is_err() {
            // The store accepted the dose but left the prescription out of
            // its reply: keep the fetched record with the new event.
            tracing::warn!(prescription_id = %prescription_id, "Store reply omits recorded prescription");
            let mut kept = record.clone();
            kept.dose_events
                .push(DoseEvent::new(prescription_id, patient_id, at));
            updated.push(kept);
        }

        notifier.dose_taken(prescription_id);
        let schedules: Vec<DoseSchedule> = updated
            .iter()
            .map(|r| compute_schedule(&r.prescription, &r.dose_events, at))
            .collect();
        notifier.sync_all(
            updated.iter().map(|r| &r.prescription).zip(schedules.iter()),
            at,
        );

        let record = find_record(&updated, prescription_id)?;
        let schedule = compute_schedule(&record.prescription, &record.dose_events, at);
        let status = classify(&schedule);

        tracing::info!(
            prescription_id = %prescription_id,
            doses_taken = schedule.doses_taken,
            total_doses = schedule.total_doses,
            status = %status,
            "Dose recorded"
        );

        Ok(UpdatedSchedule {
            prescription: record.prescription.clone(),
            schedule,
            status,
            records: updated.clone(),
        })
    }

    fn check_eligible(
        &self,
        record: &ReminderRecord,
        schedule: &DoseSchedule,
        at: DateTime<Utc>,
    ) -> Result<(), ReminderError> {
        let prescription_id = record.prescription.id;

        if let Some(expired_at) = record.prescription.expires_at.filter(|_| schedule.is_expired()) {
            return Err(ReminderError::ScheduleExpired {
                prescription_id,
                expired_at,
            });
        }

        let not_ready = || ReminderError::NotReady {
            prescription_id,
            next_dose_time: schedule.next_dose_time(),
        };

        if !schedule.can_take_dose_now() {
            return Err(not_ready());
        }

        let window_start = at - self.double_submit_window;
        let recent = record
            .dose_events
            .iter()
            .any(|e| e.prescription_id == prescription_id && e.taken_at > window_start);
        if recent {
            tracing::debug!(prescription_id = %prescription_id, "Dose submitted again within double-submit window");
            return Err(not_ready());
        }

        Ok(())
    }
}

fn find_record(records: &[ReminderRecord], prescription_id: Uuid) -> Result<&ReminderRecord, ReminderError> {
    records
        .iter()
        .find(|r| r.prescription.id == prescription_id)
        .ok_or(ReminderError::PrescriptionNotFound(prescription_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::models::{MedicationLine, PermissionState, TicketState};
    use crate::notifier::RecordingScheduler;
    use crate::store::InMemoryPrescriptionStore;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    struct Fixture {
        store: Arc<InMemoryPrescriptionStore>,
        scheduler: Arc<RecordingScheduler>,
        notifier: ReminderNotifier,
        recorder: DoseIntakeRecorder,
        rx: Prescription,
    }

    fn fixture(total_doses: u32) -> Fixture {
        let rx = Prescription {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            physician_id: None,
            medications: vec![MedicationLine::new("Amoxicillin", "500mg", "every 12 hours")],
            issued_at: at(8, 0),
            expires_at: Some(at(8, 0) + Duration::days(10)),
            total_doses,
            notes: None,
        };
        let store = Arc::new(InMemoryPrescriptionStore::with_prescriptions(vec![rx.clone()]));
        let scheduler = Arc::new(RecordingScheduler::new());
        let notifier = ReminderNotifier::new(scheduler.clone(), PermissionState::Granted, "");
        let config = EngineConfig {
            retry_backoff_ms: 0,
            ..EngineConfig::default()
        };
        let recorder = DoseIntakeRecorder::new(
            store.clone(),
            Arc::new(FixedClock::new(at(8, 10))),
            &config,
        );
        Fixture {
            store,
            scheduler,
            notifier,
            recorder,
            rx,
        }
    }

    #[test]
    fn recording_advances_schedule_by_one_slot() {
        let mut f = fixture(4);
        let updated = f
            .recorder
            .record_dose(f.rx.id, f.rx.patient_id, &mut f.notifier)
            .unwrap();

        assert_eq!(updated.schedule.doses_taken, 1);
        assert_eq!(updated.schedule.doses_remaining, 3);
        assert_eq!(updated.schedule.next_dose_time(), Some(at(20, 0)));
        assert_eq!(updated.status, ReminderStatus::Upcoming);
        assert_eq!(f.store.dose_events(f.rx.id).len(), 1);
        assert_eq!(f.notifier.ticket_fire_at(f.rx.id), Some(at(20, 0)));
    }

    #[test]
    fn immediate_second_call_is_not_ready() {
        let mut f = fixture(4);
        f.recorder
            .record_dose_at(f.rx.id, f.rx.patient_id, at(8, 10), &mut f.notifier)
            .unwrap();
        let err = f
            .recorder
            .record_dose_at(f.rx.id, f.rx.patient_id, at(8, 10), &mut f.notifier)
            .unwrap_err();

        assert!(matches!(
            err,
            ReminderError::NotReady { next_dose_time: Some(next), .. } if next == at(20, 0)
        ));
        assert_eq!(f.store.record_calls(), 1);
        assert_eq!(f.store.dose_events(f.rx.id).len(), 1);
    }

    #[test]
    fn catch_up_double_click_is_not_ready() {
        let mut f = fixture(4);
        let first = f
            .recorder
            .record_dose_at(f.rx.id, f.rx.patient_id, at(20, 5), &mut f.notifier)
            .unwrap();
        // The 20:00 slot is still open, but a repeat within the window is a double click.
        assert!(first.schedule.can_take_dose_now());

        let second =
            f.recorder
                .record_dose_at(f.rx.id, f.rx.patient_id, at(20, 6), &mut f.notifier);
        assert!(matches!(second, Err(ReminderError::NotReady { .. })));

        let later = f
            .recorder
            .record_dose_at(f.rx.id, f.rx.patient_id, at(20, 30), &mut f.notifier)
            .unwrap();
        assert_eq!(later.schedule.doses_taken, 2);
    }

    #[test]
    fn early_dose_is_not_ready() {
        let mut f = fixture(4);
        f.recorder
            .record_dose_at(f.rx.id, f.rx.patient_id, at(8, 10), &mut f.notifier)
            .unwrap();
        let err = f
            .recorder
            .record_dose_at(f.rx.id, f.rx.patient_id, at(15, 0), &mut f.notifier)
            .unwrap_err();
        assert!(!err.is_user_visible());
    }

    #[test]
    fn expired_prescription_is_rejected_before_store() {
        let mut f = fixture(4);
        let late = f.rx.expires_at.unwrap() + Duration::minutes(1);
        let err = f
            .recorder
            .record_dose_at(f.rx.id, f.rx.patient_id, late, &mut f.notifier)
            .unwrap_err();
        assert!(matches!(err, ReminderError::ScheduleExpired { .. }));
        assert_eq!(f.store.record_calls(), 0);
    }

    #[test]
    fn unknown_prescription() {
        let mut f = fixture(4);
        let other = Uuid::new_v4();
        let err = f
            .recorder
            .record_dose_at(other, f.rx.patient_id, at(8, 10), &mut f.notifier)
            .unwrap_err();
        assert!(matches!(err, ReminderError::PrescriptionNotFound(id) if id == other));
    }

    #[test]
    fn store_failure_leaves_state_untouched() {
        let mut f = fixture(4);
        f.store.push_record_failure(StoreError::Http {
            status: 500,
            body: "boom".into(),
        });
        let err = f
            .recorder
            .record_dose_at(f.rx.id, f.rx.patient_id, at(8, 10), &mut f.notifier)
            .unwrap_err();

        assert!(matches!(err, ReminderError::FetchFailed(_)));
        assert!(f.store.dose_events(f.rx.id).is_empty());
        assert_eq!(f.scheduler.scheduled_count(), 0);
    }

    #[test]
    fn store_rejection_reads_as_not_ready() {
        let mut f = fixture(4);
        f.store
            .push_record_failure(StoreError::Rejected("dose is not due yet".into()));
        let err = f
            .recorder
            .record_dose_at(f.rx.id, f.rx.patient_id, at(8, 10), &mut f.notifier)
            .unwrap_err();
        assert!(matches!(err, ReminderError::NotReady { .. }));
    }

    #[test]
    fn transient_fetch_failure_is_retried() {
        let mut f = fixture(4);
        f.store.push_failure(StoreError::Connection("offline".into()));
        f.recorder
            .record_dose_at(f.rx.id, f.rx.patient_id, at(8, 10), &mut f.notifier)
            .unwrap();
        assert_eq!(f.store.list_calls(), 2);
    }

    #[test]
    fn completing_the_course_leaves_no_ticket() {
        let mut f = fixture(1);
        let updated = f
            .recorder
            .record_dose_at(f.rx.id, f.rx.patient_id, at(8, 10), &mut f.notifier)
            .unwrap();
        assert_eq!(updated.status, ReminderStatus::Complete);
        assert_eq!(updated.schedule.next_dose_time(), None);
        assert_eq!(f.notifier.ticket_state(f.rx.id), TicketState::Unscheduled);
        assert_eq!(f.scheduler.scheduled_count(), 0);
    }

    #[test]
    fn recording_cancels_ticket_of_satisfied_slot() {
        let mut f = fixture(4);
        f.recorder
            .record_dose_at(f.rx.id, f.rx.patient_id, at(8, 10), &mut f.notifier)
            .unwrap();
        let first_ticket = f.notifier.ticket(f.rx.id).unwrap();

        f.recorder
            .record_dose_at(f.rx.id, f.rx.patient_id, at(20, 1), &mut f.notifier)
            .unwrap();
        assert_ne!(f.notifier.ticket(f.rx.id), Some(first_ticket));
        assert_eq!(f.scheduler.pending_count(), 1);
        assert_eq!(
            f.notifier.ticket_fire_at(f.rx.id),
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap())
        );
    }

    /// Accepts doses but replies without the prescription just recorded.
    struct ForgetfulStore(InMemoryPrescriptionStore);

    impl PrescriptionStore for ForgetfulStore {
        fn list_reminders(&self, patient_id: Uuid) -> Result<Vec<ReminderRecord>, StoreError> {
            self.0.list_reminders(patient_id)
        }

        fn record_dose(
            &self,
            prescription_id: Uuid,
            patient_id: Uuid,
            taken_at: DateTime<Utc>,
        ) -> Result<Vec<ReminderRecord>, StoreError> {
            let mut records = self.0.record_dose(prescription_id, patient_id, taken_at)?;
            records.retain(|r| r.prescription.id != prescription_id);
            Ok(records)
        }
    }

    #[test]
    fn accepted_dose_missing_from_reply_still_succeeds() {
        let mut f = fixture(4);
        let store = Arc::new(ForgetfulStore(InMemoryPrescriptionStore::with_prescriptions(vec![
            f.rx.clone(),
        ])));
        let recorder = DoseIntakeRecorder::new(
            store.clone(),
            Arc::new(FixedClock::new(at(8, 10))),
            &EngineConfig {
                retry_backoff_ms: 0,
                ..EngineConfig::default()
            },
        );

        let updated = recorder
            .record_dose_at(f.rx.id, f.rx.patient_id, at(8, 10), &mut f.notifier)
            .unwrap();
        assert_eq!(store.0.dose_events(f.rx.id).len(), 1);
        assert_eq!(updated.schedule.doses_taken, 1);
        assert_eq!(updated.records.len(), 1);
        assert_eq!(
            f.notifier.ticket_fire_at(f.rx.id),
            Some(at(20, 0))
        );
    }
}
