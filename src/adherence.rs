//! Adherence aggregator.
//!
//! Turns computed schedules into per-prescription adherence rates, a
//! portal-wide summary and the running numbers an achievement tracker needs.
//! Everything here is pure and total.

use std::collections::BTreeSet;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::DoseEvent;
use crate::schedule::{DoseSchedule, ScheduleState};

/// Adherence of a single prescription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescriptionAdherence {
    pub prescription_id: Uuid,
    pub doses_taken: u32,
    pub total_doses: u32,
    pub doses_remaining: u32,
    pub doses_missed: u32,
    /// Whole percent, 0..=100.
    pub rate: u8,
    pub expired: bool,
}

/// Portal-level adherence across every prescription of a patient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdherenceSummary {
    /// Mean of the per-prescription rates of non-expired (pending or
    /// complete) prescriptions. Each prescription weighs the same regardless
    /// of its dose count.
    pub overall_rate: u8,
    pub total_taken: u32,
    pub total_remaining: u32,
    pub total_missed: u32,
    /// Prescriptions with a dose still to take.
    pub pending_prescriptions: u32,
    pub completed_prescriptions: u32,
    pub expired_prescriptions: u32,
    pub prescriptions: Vec<PrescriptionAdherence>,
}

/// Running counters consumed by the achievement collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementProgress {
    pub total_doses_taken: u32,
    pub courses_completed: u32,
    /// Prescriptions currently at a 100% rate.
    pub perfect_prescriptions: u32,
    pub current_streak_days: u32,
    pub longest_streak_days: u32,
    pub overall_rate: u8,
}

/// Percentage of `total` taken, rounded half up. Zero total means nothing
/// could be missed, so the rate is 100.
pub fn adherence_rate(taken: u32, total: u32) -> u8 {
    if total == 0 {
        return 100;
    }
    let taken = u64::from(taken.min(total));
    let total = u64::from(total);
    let rate = (200 * taken + total) / (2 * total);
    rate.min(100) as u8
}

pub fn prescription_adherence(schedule: &DoseSchedule) -> PrescriptionAdherence {
    PrescriptionAdherence {
        prescription_id: schedule.prescription_id,
        doses_taken: schedule.doses_taken,
        total_doses: schedule.total_doses,
        doses_remaining: schedule.doses_remaining,
        doses_missed: schedule.doses_missed,
        rate: adherence_rate(schedule.doses_taken, schedule.total_doses),
        expired: schedule.is_expired(),
    }
}

pub fn summarize(schedules: &[DoseSchedule]) -> AdherenceSummary {
    let prescriptions: Vec<PrescriptionAdherence> =
        schedules.iter().map(prescription_adherence).collect();

    let mut pending = 0;
    let mut completed = 0;
    let mut expired = 0;
    for schedule in schedules {
        match schedule.state {
            ScheduleState::Pending { .. } => pending += 1,
            ScheduleState::Complete => completed += 1,
            ScheduleState::Expired { .. } => expired += 1,
        }
    }

    let rated: Vec<u64> = prescriptions
        .iter()
        .filter(|p| !p.expired)
        .map(|p| u64::from(p.rate))
        .collect();
    let overall_rate = if rated.is_empty() {
        100
    } else {
        let sum: u64 = rated.iter().sum();
        let n = rated.len() as u64;
        ((2 * sum + n) / (2 * n)).min(100) as u8
    };

    AdherenceSummary {
        overall_rate,
        total_taken: prescriptions.iter().map(|p| p.doses_taken).sum(),
        total_remaining: prescriptions.iter().map(|p| p.doses_remaining).sum(),
        total_missed: prescriptions.iter().map(|p| p.doses_missed).sum(),
        pending_prescriptions: pending,
        completed_prescriptions: completed,
        expired_prescriptions: expired,
        prescriptions,
    }
}

pub fn achievement_progress(
    summary: &AdherenceSummary,
    dose_events: &[DoseEvent],
    now: DateTime<Utc>,
) -> AchievementProgress {
    let (current, longest) = dose_streaks(dose_events, now);
    AchievementProgress {
        total_doses_taken: summary.total_taken,
        courses_completed: summary.completed_prescriptions,
        perfect_prescriptions: summary
            .prescriptions
            .iter()
            .filter(|p| p.rate == 100 && p.total_doses > 0)
            .count() as u32,
        current_streak_days: current,
        longest_streak_days: longest,
        overall_rate: summary.overall_rate,
    }
}

/// `(current, longest)` runs of consecutive UTC days with at least one dose.
///
/// The current streak ends today, or yesterday when nothing has been taken
/// yet today. Events after `now` are ignored.
pub fn dose_streaks(dose_events: &[DoseEvent], now: DateTime<Utc>) -> (u32, u32) {
    let days: BTreeSet<NaiveDate> = dose_events
        .iter()
        .filter(|e| e.taken_at <= now)
        .map(|e| e.taken_at.date_naive())
        .collect();

    let mut longest = 0;
    let mut run = 0;
    let mut previous: Option<NaiveDate> = None;
    for day in &days {
        run = match previous {
            Some(prev) if prev.checked_add_days(Days::new(1)) == Some(*day) => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        previous = Some(*day);
    }

    let today = now.date_naive();
    let mut cursor = if days.contains(&today) {
        Some(today)
    } else {
        today.pred_opt().filter(|d| days.contains(d))
    };
    let mut current = 0;
    while let Some(day) = cursor.filter(|d| days.contains(d)) {
        current += 1;
        cursor = day.pred_opt();
    }

    (current, longest)
}
