use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

/// Errors surfaced to the reminder view.
#[derive(Error, Debug)]
pub enum ReminderError {
    /// Fetching reminders or recording a dose failed. Previous state is kept.
    #[error("Could not reach the prescription store: {0}")]
    FetchFailed(#[from] StoreError),

    /// A dose was submitted outside its eligible window.
    #[error("Dose for prescription {prescription_id} is not due yet")]
    NotReady {
        prescription_id: Uuid,
        next_dose_time: Option<DateTime<Utc>>,
    },

    #[error("Notification permission denied")]
    PermissionDenied,

    #[error("Prescription {prescription_id} expired at {expired_at}")]
    ScheduleExpired {
        prescription_id: Uuid,
        expired_at: DateTime<Utc>,
    },

    #[error("Prescription not found: {0}")]
    PrescriptionNotFound(Uuid),
}

impl ReminderError {
    /// Whether the error belongs in the dismissible error banner. `NotReady`
    /// and `PermissionDenied` degrade silently instead.
    pub fn is_user_visible(&self) -> bool {
        !matches!(
            self,
            ReminderError::NotReady { .. } | ReminderError::PermissionDenied
        )
    }

    /// Message for the error banner.
    pub fn banner_message(&self) -> String {
        match self {
            ReminderError::FetchFailed(_) => {
                "Unable to load your medication reminders. Please try again.".into()
            }
            ReminderError::ScheduleExpired { .. } => {
                "This prescription has expired and has no active schedule.".into()
            }
            ReminderError::PrescriptionNotFound(_) => "This prescription is no longer available.".into(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_convert_to_fetch_failed() {
        let err: ReminderError = StoreError::Timeout(15).into();
        assert!(matches!(err, ReminderError::FetchFailed(StoreError::Timeout(15))));
        assert!(err.is_user_visible());
    }

    #[test]
    fn not_ready_and_permission_are_silent() {
        let not_ready = ReminderError::NotReady {
            prescription_id: Uuid::nil(),
            next_dose_time: None,
        };
        assert!(!not_ready.is_user_visible());
        assert!(!ReminderError::PermissionDenied.is_user_visible());
    }

    #[test]
    fn expired_is_distinct_from_missed() {
        let err = ReminderError::ScheduleExpired {
            prescription_id: Uuid::nil(),
            expired_at: Utc::now(),
        };
        assert!(err.is_user_visible());
        assert!(err.banner_message().contains("no active schedule"));
    }
}
