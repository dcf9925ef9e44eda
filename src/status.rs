//! Status classifier and the "time until next dose" label.
//!
//! Both are pure and total: any schedule (or any `f64`) maps to exactly one
//! status and one label.

use crate::models::ReminderStatus;
use crate::schedule::{DoseSchedule, ScheduleState};

/// Below this many minutes a pending dose is `soon`.
pub const SOON_THRESHOLD_MINUTES: f64 = 60.0;
/// Below this many minutes a pending dose is `upcoming`; at or above, `scheduled`.
pub const UPCOMING_THRESHOLD_MINUTES: f64 = 1440.0;

/// Classify a schedule into its urgency bucket.
///
/// Expired schedules have nothing pending and read as `scheduled`; the view
/// model carries the expiry itself.
pub fn classify(schedule: &DoseSchedule) -> ReminderStatus {
    match schedule.state {
        ScheduleState::Complete => ReminderStatus::Complete,
        ScheduleState::Expired { .. } => ReminderStatus::Scheduled,
        ScheduleState::Pending {
            minutes_until_next_dose,
            can_take_dose_now,
            ..
        } => classify_minutes(
            minutes_until_next_dose,
            can_take_dose_now,
            schedule.interval_minutes,
        ),
    }
}

/// Classify a pending dose.
///
/// A dose whose whole slot window (`window_minutes`) has elapsed is overdue
/// even though it can still be taken; inside the window it is ready.
pub fn classify_minutes(minutes: f64, can_take_now: bool, window_minutes: u32) -> ReminderStatus {
    let window = f64::from(window_minutes.max(1));

    if minutes <= -window {
        ReminderStatus::Overdue
    } else if can_take_now {
        ReminderStatus::Ready
    } else if minutes < 0.0 {
        ReminderStatus::Overdue
    } else if minutes < SOON_THRESHOLD_MINUTES {
        ReminderStatus::Soon
    } else if minutes < UPCOMING_THRESHOLD_MINUTES {
        ReminderStatus::Upcoming
    } else {
        ReminderStatus::Scheduled
    }
}

impl ReminderStatus {
    /// Sort key for reminder lists, most urgent first.
    pub fn urgency_rank(&self) -> u8 {
        match self {
            ReminderStatus::Overdue => 0,
            ReminderStatus::Ready => 1,
            ReminderStatus::Soon => 2,
            ReminderStatus::Upcoming => 3,
            ReminderStatus::Scheduled => 4,
            ReminderStatus::Complete => 5,
        }
    }

    /// Whether the reminder needs the patient's attention now.
    pub fn needs_attention(&self) -> bool {
        matches!(self, ReminderStatus::Overdue | ReminderStatus::Ready)
    }
}

/// Human-readable time until the next dose: "Overdue", "N minutes",
/// "N hours" or "N days" (floored).
pub fn format_time_until(minutes: Option<f64>) -> String {
    let Some(minutes) = minutes.filter(|m| !m.is_nan()) else {
        return "No upcoming dose".into();
    };

    if minutes < 0.0 {
        "Overdue".into()
    } else if minutes < SOON_THRESHOLD_MINUTES {
        pluralize(minutes.floor(), "minute")
    } else if minutes < UPCOMING_THRESHOLD_MINUTES {
        pluralize((minutes / 60.0).floor(), "hour")
    } else {
        pluralize((minutes / 1440.0).floor(), "day")
    }
}

/// Label for a whole schedule, covering the non-pending states.
pub fn schedule_label(schedule: &DoseSchedule) -> String {
    match schedule.state {
        ScheduleState::Complete => "Course complete".into(),
        ScheduleState::Expired { .. } => "No active schedule".into(),
        ScheduleState::Pending {
            minutes_until_next_dose,
            ..
        } => format_time_until(Some(minutes_until_next_dose)),
    }
}

fn pluralize(count: f64, unit: &str) -> String {
    let count = count as u64;
    if count == 1 {
        format!("1 {unit}")
    } else {
        format!("{count} {unit}s")
    }
}
