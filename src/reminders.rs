//! Reminder board: the presentation driver of one patient's reminder view.
//!
//! Holds the last successfully fetched snapshot, derives view rows from it
//! on demand and keeps the notifier in step. A failed fetch or dose record
//! never replaces the snapshot; it only raises a dismissible banner.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::adherence::{achievement_progress, summarize, AchievementProgress, AdherenceSummary};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::ReminderError;
use crate::models::{PermissionState, Prescription, ReminderStatus};
use crate::notifier::{NotificationScheduler, PermissionProvider, ReminderNotifier};
use crate::recorder::DoseIntakeRecorder;
use crate::schedule::{compute_schedule, DoseSchedule, ScheduleState};
use crate::status::{classify, schedule_label};
use crate::store::{all_dose_events, fetch_with_retry, PrescriptionStore, ReminderRecord};

// ═══════════════════════════════════════════
// View types, serialised to the presentation layer
// ═══════════════════════════════════════════

/// One row of the reminder list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderView {
    pub prescription_id: Uuid,
    pub medication_name: String,
    pub dosage: String,
    pub frequency: String,
    pub doses_taken: u32,
    pub total_doses: u32,
    pub doses_remaining: u32,
    pub doses_missed: u32,
    pub status: ReminderStatus,
    pub time_until_next_dose: String,
    pub next_dose_time: Option<DateTime<Utc>>,
    /// Enables the "take dose" action.
    pub can_take_dose_now: bool,
    pub schedule_state: ScheduleState,
}

impl ReminderView {
    pub fn new(prescription: &Prescription, schedule: &DoseSchedule) -> Self {
        Self {
            prescription_id: prescription.id,
            medication_name: prescription.medication_name().to_string(),
            dosage: prescription.dosage().to_string(),
            frequency: prescription.frequency_label().to_string(),
            doses_taken: schedule.doses_taken,
            total_doses: schedule.total_doses,
            doses_remaining: schedule.doses_remaining,
            doses_missed: schedule.doses_missed,
            status: classify(schedule),
            time_until_next_dose: schedule_label(schedule),
            next_dose_time: schedule.next_dose_time(),
            can_take_dose_now: schedule.can_take_dose_now(),
            schedule_state: schedule.state.clone(),
        }
    }
}

/// Most urgent first, then earliest next dose; rows without one go last.
fn urgency_order(a: &ReminderView, b: &ReminderView) -> Ordering {
    a.status
        .urgency_rank()
        .cmp(&b.status.urgency_rank())
        .then_with(|| match (a.next_dose_time, b.next_dose_time) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.medication_name.cmp(&b.medication_name))
}

// ═══════════════════════════════════════════
// Board
// ═══════════════════════════════════════════

pub struct ReminderBoard {
    patient_id: Uuid,
    store: Arc<dyn PrescriptionStore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    recorder: DoseIntakeRecorder,
    notifier: ReminderNotifier,
    records: Vec<ReminderRecord>,
    last_refreshed: Option<DateTime<Utc>>,
    error_banner: Option<String>,
}

impl ReminderBoard {
    pub fn new(
        patient_id: Uuid,
        store: Arc<dyn PrescriptionStore>,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn NotificationScheduler>,
        permission: PermissionState,
        config: EngineConfig,
    ) -> Self {
        let recorder = DoseIntakeRecorder::new(store.clone(), clock.clone(), &config);
        let notifier = ReminderNotifier::new(scheduler, permission, &config.notification_icon);
        Self {
            patient_id,
            store,
            clock,
            config,
            recorder,
            notifier,
            records: Vec::new(),
            last_refreshed: None,
            error_banner: None,
        }
    }

    /// Fetch the patient's reminders and recompute everything.
    pub fn refresh(&mut self) -> Result<(), ReminderError> {
        let result = fetch_with_retry(
            self.config.max_fetch_attempts,
            self.config.retry_backoff(),
            || self.store.list_reminders(self.patient_id),
        );

        match result {
            Ok(records) => {
                let now = self.clock.now();
                tracing::debug!(patient_id = %self.patient_id, prescriptions = records.len(), "Reminders refreshed");
                self.records = records;
                self.last_refreshed = Some(now);
                self.error_banner = None;
                self.sync_notifier(now);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(patient_id = %self.patient_id, error = %e, "Fetching reminders failed");
                let err = ReminderError::FetchFailed(e);
                self.error_banner = Some(err.banner_message());
                Err(err)
            }
        }
    }

    /// Recompute schedules at the current instant and resync tickets. Call
    /// after a notification fires or on a periodic tick.
    pub fn tick(&mut self) {
        let now = self.clock.now();
        self.sync_notifier(now);
    }

    pub fn schedules(&self) -> Vec<DoseSchedule> {
        let now = self.clock.now();
        self.records
            .iter()
            .map(|r| compute_schedule(&r.prescription, &r.dose_events, now))
            .collect()
    }

    pub fn views(&self) -> Vec<ReminderView> {
        let now = self.clock.now();
        let mut views: Vec<ReminderView> = self
            .records
            .iter()
            .map(|r| {
                let schedule = compute_schedule(&r.prescription, &r.dose_events, now);
                ReminderView::new(&r.prescription, &schedule)
            })
            .collect();
        views.sort_by(urgency_order);
        views
    }

    pub fn view(&self, prescription_id: Uuid) -> Option<ReminderView> {
        let now = self.clock.now();
        self.records
            .iter()
            .find(|r| r.prescription.id == prescription_id)
            .map(|r| {
                let schedule = compute_schedule(&r.prescription, &r.dose_events, now);
                ReminderView::new(&r.prescription, &schedule)
            })
    }

    /// Record a dose taken now. The snapshot changes only on success;
    /// `NotReady` is silent.
    pub fn record_dose(&mut self, prescription_id: Uuid) -> Result<ReminderView, ReminderError> {
        match self
            .recorder
            .record_dose(prescription_id, self.patient_id, &mut self.notifier)
        {
            Ok(updated) => {
                self.records = updated.records;
                self.error_banner = None;
                Ok(ReminderView::new(&updated.prescription, &updated.schedule))
            }
            Err(e) => {
                if e.is_user_visible() {
                    self.error_banner = Some(e.banner_message());
                }
                Err(e)
            }
        }
    }

    pub fn adherence(&self) -> AdherenceSummary {
        summarize(&self.schedules())
    }

    pub fn achievements(&self) -> AchievementProgress {
        let summary = self.adherence();
        achievement_progress(&summary, &all_dose_events(&self.records), self.clock.now())
    }

    pub fn set_permission(&mut self, permission: PermissionState) {
        self.notifier.set_permission(permission);
        if permission == PermissionState::Granted {
            self.tick();
        }
    }

    /// Ask for notification permission. Denial leaves the board working
    /// without reminders.
    pub fn request_permission(&mut self, provider: &dyn PermissionProvider) -> PermissionState {
        if self.notifier.request_permission(provider).is_ok() {
            self.tick();
        }
        self.notifier.permission()
    }

    pub fn notifier(&self) -> &ReminderNotifier {
        &self.notifier
    }

    pub fn records(&self) -> &[ReminderRecord] {
        &self.records
    }

    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        self.last_refreshed
    }

    pub fn error_banner(&self) -> Option<&str> {
        self.error_banner.as_deref()
    }

    pub fn dismiss_error(&mut self) {
        self.error_banner = None;
    }

    fn sync_notifier(&mut self, now: DateTime<Utc>) {
        let schedules: Vec<DoseSchedule> = self
            .records
            .iter()
            .map(|r| compute_schedule(&r.prescription, &r.dose_events, now))
            .collect();
        self.notifier.sync_all(
            self.records.iter().map(|r| &r.prescription).zip(schedules.iter()),
            now,
        );
    }
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════
