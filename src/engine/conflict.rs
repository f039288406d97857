use crate::limits::*;
use crate::model::*;

use super::{EngineError, ReservationConflict};

/// Outcome of a conflict check. `has_conflict` iff `conflicts` is non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictCheck {
    pub has_conflict: bool,
    pub conflicts: Vec<Reservation>,
}

impl ConflictCheck {
    fn from_conflicts(conflicts: Vec<Reservation>) -> Self {
        Self {
            has_conflict: !conflicts.is_empty(),
            conflicts,
        }
    }
}

/// Turn `start + duration_minutes` into a span, rejecting empty and out-of-range intervals.
pub(crate) fn candidate_span(start: Timestamp, duration_minutes: i64) -> Result<Span, EngineError> {
    if duration_minutes <= 0 {
        return Err(EngineError::InvalidDuration {
            duration: duration_minutes,
        });
    }
    if duration_minutes > MAX_DURATION_MINUTES {
        return Err(EngineError::LimitExceeded("duration too long"));
    }
    let span = Span::from_minutes(start, duration_minutes)
        .ok_or(EngineError::LimitExceeded("timestamp out of range"))?;
    validate_span(&span)?;
    Ok(span)
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start.timestamp() < MIN_VALID_TIMESTAMP_SECS
        || span.end.timestamp() > MAX_VALID_TIMESTAMP_SECS
    {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// Query the schedule for reservations overlapping the candidate interval.
/// The caller holds the schedule lock.
pub(crate) fn check(
    schedule: &DeviceSchedule,
    start: Timestamp,
    duration_minutes: i64,
    exclude: Option<ReservationId>,
) -> Result<ConflictCheck, EngineError> {
    let span = candidate_span(start, duration_minutes)?;
    Ok(ConflictCheck::from_conflicts(
        schedule.find_overlapping(&span, exclude),
    ))
}

/// Like `check`, but a conflict is an error carrying the attempted interval.
pub(crate) fn ensure_free(
    schedule: &DeviceSchedule,
    span: &Span,
    exclude: Option<ReservationId>,
) -> Result<(), EngineError> {
    let conflicts = schedule.find_overlapping(span, exclude);
    if conflicts.is_empty() {
        return Ok(());
    }
    Err(EngineError::Conflict(Box::new(ReservationConflict {
        device_id: schedule.device_id,
        start_time: span.start,
        duration_minutes: span.duration_minutes(),
        conflicts,
    })))
}

/// Conflict check against a device with no schedule yet.
pub(crate) fn check_empty(start: Timestamp, duration_minutes: i64) -> Result<ConflictCheck, EngineError> {
    candidate_span(start, duration_minutes)?;
    Ok(ConflictCheck::from_conflicts(Vec::new()))
}

/// Whether a replayed event keeps the schedule overlap-free. A create or
/// move that would overlap is refused; deletes always apply.
pub(crate) fn admit_replayed(schedule: &DeviceSchedule, event: &Event) -> Result<(), EngineError> {
    match event {
        Event::ReservationCreated { reservation } => ensure_free(schedule, &reservation.span, None),
        Event::ReservationUpdated { id, span, .. } => ensure_free(schedule, span, Some(*id)),
        Event::ReservationDeleted { .. } => Ok(()),
    }
}
