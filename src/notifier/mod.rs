//! Reminder notifier.
//!
//! Keeps at most one cancellable notification ticket per prescription, for
//! the prescription's next dose. Every recomputation goes through [`ReminderNotifier::sync`],
//! which cancels a stale ticket before creating its replacement. Without
//! notification permission the notifier is a silent no-op and the reminder
//! view keeps working from computed schedules alone.

pub mod timer;

pub use timer::{RecordingScheduler, TokioNotificationScheduler};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ReminderError;
use crate::models::{PermissionState, Prescription, TicketState};
use crate::schedule::DoseSchedule;

pub const NOTIFICATION_TITLE: &str = "Medication reminder";

/// What the platform shows when a ticket fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderNotification {
    pub prescription_id: Uuid,
    pub title: String,
    pub body: String,
    pub icon: String,
    pub fire_at: DateTime<Utc>,
}

impl ReminderNotification {
    pub fn for_dose(prescription: &Prescription, fire_at: DateTime<Utc>, icon: &str) -> Self {
        let name = prescription.medication_name();
        let body = match prescription.dosage().trim() {
            "" => format!("Time to take {name}"),
            dosage => format!("Time to take {name} ({dosage})"),
        };
        Self {
            prescription_id: prescription.id,
            title: NOTIFICATION_TITLE.into(),
            body,
            icon: icon.into(),
            fire_at,
        }
    }
}

/// Opaque handle of a scheduled notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TicketHandle(pub u64);

/// Deferred, cancellable delivery of notifications.
pub trait NotificationScheduler: Send + Sync {
    fn schedule(&self, fire_at: DateTime<Utc>, payload: ReminderNotification) -> TicketHandle;

    /// Returns `false` when the ticket already fired or was cancelled.
    fn cancel(&self, handle: TicketHandle) -> bool;

    fn is_pending(&self, handle: TicketHandle) -> bool;
}

/// Surface that displays a fired notification.
pub trait NotificationSink: Send + Sync {
    fn show(&self, notification: &ReminderNotification);
}

/// Platform notification permission.
pub trait PermissionProvider: Send + Sync {
    fn query(&self) -> PermissionState;

    /// Ask the user. Only prompts while the state is `Prompt`.
    fn request(&self) -> PermissionState;
}

/// Sink that writes notifications to the log.
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn show(&self, notification: &ReminderNotification) {
        tracing::info!(
            prescription_id = %notification.prescription_id,
            title = %notification.title,
            body = %notification.body,
            "Reminder notification"
        );
    }
}

/// Sink that keeps every shown notification (for testing).
#[derive(Default)]
pub struct RecordingSink {
    shown: Mutex<Vec<ReminderNotification>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shown(&self) -> Vec<ReminderNotification> {
        self.shown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl NotificationSink for RecordingSink {
    fn show(&self, notification: &ReminderNotification) {
        self.shown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification.clone());
    }
}

/// Permission provider with a fixed answer (for testing and headless use).
pub struct StaticPermission {
    state: Mutex<PermissionState>,
    answer: PermissionState,
}

impl StaticPermission {
    /// Currently `state`; a prompt is answered with `answer`.
    pub fn new(state: PermissionState, answer: PermissionState) -> Self {
        Self {
            state: Mutex::new(state),
            answer,
        }
    }

    pub fn granted() -> Self {
        Self::new(PermissionState::Granted, PermissionState::Granted)
    }

    pub fn denied() -> Self {
        Self::new(PermissionState::Denied, PermissionState::Denied)
    }

    pub fn set(&self, state: PermissionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

impl PermissionProvider for StaticPermission {
    fn query(&self) -> PermissionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn request(&self) -> PermissionState {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == PermissionState::Prompt {
            *state = self.answer;
        }
        *state
    }
}

#[derive(Debug, Clone, Copy)]
struct ActiveTicket {
    handle: TicketHandle,
    fire_at: DateTime<Utc>,
}

/// Owner of every reminder ticket of one reminder view.
pub struct ReminderNotifier {
    scheduler: Arc<dyn NotificationScheduler>,
    permission: PermissionState,
    icon: String,
    tickets: HashMap<Uuid, ActiveTicket>,
}

impl ReminderNotifier {
    pub fn new(
        scheduler: Arc<dyn NotificationScheduler>,
        permission: PermissionState,
        icon: &str,
    ) -> Self {
        Self {
            scheduler,
            permission,
            icon: icon.into(),
            tickets: HashMap::new(),
        }
    }

    pub fn permission(&self) -> PermissionState {
        self.permission
    }

    /// Bring the ticket of one prescription in line with its schedule.
    ///
    /// A ticket is created only with granted permission and a next dose in
    /// the future, and only if no ticket exists for that same dose time.
    pub fn sync(&mut self, prescription: &Prescription, schedule: &DoseSchedule, now: DateTime<Utc>) {
        let target = if self.permission == PermissionState::Granted {
            schedule.next_dose_time().filter(|at| *at > now)
        } else {
            None
        };

        if let Some(existing) = self.tickets.get(&prescription.id) {
            if Some(existing.fire_at) == target {
                return;
            }
            self.cancel(prescription.id);
        }

        let Some(fire_at) = target else {
            return;
        };
        let payload = ReminderNotification::for_dose(prescription, fire_at, &self.icon);
        let handle = self.scheduler.schedule(fire_at, payload);
        tracing::debug!(prescription_id = %prescription.id, fire_at = %fire_at, ticket = handle.0, "Reminder scheduled");
        self.tickets
            .insert(prescription.id, ActiveTicket { handle, fire_at });
    }

    /// Sync every listed prescription and drop tickets of those no longer
    /// listed.
    pub fn sync_all<'a, I>(&mut self, entries: I, now: DateTime<Utc>)
    where
        I: IntoIterator<Item = (&'a Prescription, &'a DoseSchedule)>,
    {
        let mut listed = Vec::new();
        for (prescription, schedule) in entries {
            self.sync(prescription, schedule, now);
            listed.push(prescription.id);
        }

        let stale: Vec<Uuid> = self
            .tickets
            .keys()
            .filter(|id| !listed.contains(id))
            .copied()
            .collect();
        for id in stale {
            self.cancel(id);
        }
    }

    /// The dose of `prescription_id` was taken: its ticket is obsolete.
    pub fn dose_taken(&mut self, prescription_id: Uuid) -> bool {
        self.cancel(prescription_id)
    }

    /// Record a permission change. Losing permission cancels everything.
    pub fn set_permission(&mut self, permission: PermissionState) {
        if self.permission == PermissionState::Granted && permission != PermissionState::Granted {
            tracing::info!(permission = %permission, "Notification permission revoked, cancelling reminders");
            self.cancel_all();
        }
        self.permission = permission;
    }

    /// Ask the provider for permission. Denial is reported but leaves the
    /// notifier in its silent state.
    pub fn request_permission(&mut self, provider: &dyn PermissionProvider) -> Result<(), ReminderError> {
        let state = provider.request();
        self.set_permission(state);
        if state == PermissionState::Granted {
            Ok(())
        } else {
            tracing::info!(permission = %state, "Notification permission not granted");
            Err(ReminderError::PermissionDenied)
        }
    }

    pub fn cancel_all(&mut self) {
        let ids: Vec<Uuid> = self.tickets.keys().copied().collect();
        for id in ids {
            self.cancel(id);
        }
    }

    /// Cancel every ticket; called when the owning view goes away.
    pub fn teardown(&mut self) {
        if !self.tickets.is_empty() {
            tracing::debug!(tickets = self.tickets.len(), "Tearing down reminder notifier");
        }
        self.cancel_all();
    }

    pub fn ticket(&self, prescription_id: Uuid) -> Option<TicketHandle> {
        self.tickets.get(&prescription_id).map(|t| t.handle)
    }

    pub fn ticket_fire_at(&self, prescription_id: Uuid) -> Option<DateTime<Utc>> {
        self.tickets.get(&prescription_id).map(|t| t.fire_at)
    }

    pub fn ticket_state(&self, prescription_id: Uuid) -> TicketState {
        match self.tickets.get(&prescription_id) {
            None => TicketState::Unscheduled,
            Some(t) if self.scheduler.is_pending(t.handle) => TicketState::Scheduled,
            Some(_) => TicketState::Fired,
        }
    }

    /// Tickets still waiting to fire.
    pub fn active_ticket_count(&self) -> usize {
        self.tickets
            .values()
            .filter(|t| self.scheduler.is_pending(t.handle))
            .count()
    }

    fn cancel(&mut self, prescription_id: Uuid) -> bool {
        match self.tickets.remove(&prescription_id) {
            Some(ticket) => {
                let cancelled = self.scheduler.cancel(ticket.handle);
                tracing::debug!(prescription_id = %prescription_id, ticket = ticket.handle.0, cancelled, "Reminder cancelled");
                cancelled
            }
            None => false,
        }
    }
}

impl Drop for ReminderNotifier {
    fn drop(&mut self) {
        self.teardown();
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
