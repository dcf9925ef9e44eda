pub mod adherence;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod notifier;
pub mod recorder;
pub mod reminders;
pub mod schedule;
pub mod status;
pub mod store;

pub use adherence::{AchievementProgress, AdherenceSummary, PrescriptionAdherence};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::EngineConfig;
pub use error::ReminderError;
pub use models::{DoseEvent, DoseFrequency, MedicationLine, PermissionState, Prescription, ReminderStatus, TicketState};
pub use notifier::{NotificationScheduler, NotificationSink, PermissionProvider, ReminderNotifier};
pub use recorder::{DoseIntakeRecorder, UpdatedSchedule};
pub use reminders::{ReminderBoard, ReminderView};
pub use schedule::{compute_schedule, DoseSchedule, ScheduleState};
pub use store::{PrescriptionStore, ReminderRecord, StoreError};

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. `RUST_LOG` overrides the default
/// filter. Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init();
}
