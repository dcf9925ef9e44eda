//! Dose schedule calculator.
//!
//! Doses are evenly spaced slots starting at the prescription's issue time.
//! Slot `k` opens at `issued_at + k * interval` and its window closes one
//! interval later. Recorded dose events satisfy slots in time order: an
//! event satisfies the earliest outstanding slot it is not earlier than, so
//! a late dose catches the schedule up one slot at a time. The schedule is
//! derived on every read and never stored.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{DoseEvent, Prescription};

/// Where a prescription stands at the instant the schedule was computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ScheduleState {
    /// A dose slot is outstanding.
    Pending {
        next_dose_time: DateTime<Utc>,
        /// Negative when the slot has already opened.
        minutes_until_next_dose: f64,
        can_take_dose_now: bool,
    },
    /// Every slot has a matching dose event (or there were none to take).
    Complete,
    /// Doses remain but the prescription is past its expiration date.
    Expired { expired_at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoseSchedule {
    pub prescription_id: Uuid,
    pub interval_minutes: u32,
    pub total_doses: u32,
    pub doses_taken: u32,
    pub doses_remaining: u32,
    /// Outstanding slots whose window has fully elapsed.
    pub doses_missed: u32,
    pub state: ScheduleState,
}

impl DoseSchedule {
    pub fn next_dose_time(&self) -> Option<DateTime<Utc>> {
        match self.state {
            ScheduleState::Pending { next_dose_time, .. } => Some(next_dose_time),
            _ => None,
        }
    }

    pub fn minutes_until_next_dose(&self) -> Option<f64> {
        match self.state {
            ScheduleState::Pending {
                minutes_until_next_dose,
                ..
            } => Some(minutes_until_next_dose),
            _ => None,
        }
    }

    pub fn can_take_dose_now(&self) -> bool {
        matches!(
            self.state,
            ScheduleState::Pending {
                can_take_dose_now: true,
                ..
            }
        )
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, ScheduleState::Complete)
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.state, ScheduleState::Expired { .. })
    }
}

/// Derive the schedule of `prescription` at `now`.
///
/// Events for other prescriptions are ignored, so callers may pass a
/// patient's whole dose history.
pub fn compute_schedule(
    prescription: &Prescription,
    dose_events: &[DoseEvent],
    now: DateTime<Utc>,
) -> DoseSchedule {
    let frequency = prescription.frequency();
    let interval_minutes = frequency.interval_minutes();
    let interval = frequency.interval();
    let total_doses = prescription.total_doses;

    let mut taken_at: Vec<DateTime<Utc>> = dose_events
        .iter()
        .filter(|event| event.prescription_id == prescription.id)
        .map(|event| event.taken_at)
        .collect();
    taken_at.sort_unstable();

    let doses_taken = count_satisfied_slots(
        prescription.issued_at,
        interval_minutes,
        total_doses,
        &taken_at,
        now + interval,
    );
    let doses_remaining = total_doses - doses_taken;

    // Slots after expiry are reported through `Expired`, never as missed.
    let missed_cutoff = prescription.expires_at.map_or(now, |expires_at| expires_at.min(now));
    let elapsed_slots =
        elapsed_slot_count(prescription.issued_at, interval, missed_cutoff).min(total_doses);
    let doses_missed = elapsed_slots.saturating_sub(doses_taken);

    let state = if doses_taken >= total_doses {
        ScheduleState::Complete
    } else if let Some(expired_at) = prescription
        .expires_at
        .filter(|_| prescription.is_expired_at(now))
    {
        ScheduleState::Expired { expired_at }
    } else {
        let next_dose_time = slot_start(prescription.issued_at, interval_minutes, doses_taken)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let until = next_dose_time.signed_duration_since(now);
        ScheduleState::Pending {
            next_dose_time,
            minutes_until_next_dose: until.num_milliseconds() as f64 / 60_000.0,
            can_take_dose_now: next_dose_time <= now,
        }
    };

    DoseSchedule {
        prescription_id: prescription.id,
        interval_minutes,
        total_doses,
        doses_taken,
        doses_remaining,
        doses_missed,
        state,
    }
}

/// Start of slot `index`, or `None` past the representable range.
pub fn slot_start(
    issued_at: DateTime<Utc>,
    interval_minutes: u32,
    index: u32,
) -> Option<DateTime<Utc>> {
    let offset = i64::from(interval_minutes).checked_mul(i64::from(index))?;
    issued_at.checked_add_signed(Duration::try_minutes(offset)?)
}

/// Walk slots in order, consuming sorted events. A slot is satisfied by the
/// first unconsumed event at or after its start and no later than `horizon`.
fn count_satisfied_slots(
    issued_at: DateTime<Utc>,
    interval_minutes: u32,
    total_doses: u32,
    taken_at: &[DateTime<Utc>],
    horizon: DateTime<Utc>,
) -> u32 {
    let mut cursor = 0;
    let mut satisfied = 0;

    while satisfied < total_doses {
        let Some(start) = slot_start(issued_at, interval_minutes, satisfied) else {
            break;
        };
        while cursor < taken_at.len() && taken_at[cursor] < start {
            cursor += 1;
        }
        match taken_at.get(cursor) {
            Some(at) if *at <= horizon => {
                satisfied += 1;
                cursor += 1;
            }
            _ => break,
        }
    }

    satisfied
}

/// Number of slots whose window has closed at or before `now`.
fn elapsed_slot_count(issued_at: DateTime<Utc>, interval: Duration, now: DateTime<Utc>) -> u32 {
    let elapsed_ms = now.signed_duration_since(issued_at).num_milliseconds();
    let interval_ms = interval.num_milliseconds().max(1);
    if elapsed_ms <= 0 {
        return 0;
    }
    u32::try_from(elapsed_ms / interval_ms).unwrap_or(u32::MAX)
}
