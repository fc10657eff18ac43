use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    use crate::limits::*;
    if end <= start {
        return Err(EngineError::validation(
            "endTime",
            "end time must be after start time",
        ));
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if end - start > MAX_BOOKING_DURATION_MS {
        return Err(EngineError::LimitExceeded("booking too long"));
    }
    Ok(Span::new(start, end))
}

/// Bookings on `machine_id` that a booking over `span` would collide with.
///
/// A candidate only counts when it still reserves the machine (non-terminal
/// status) and is resolvable: maintenance, or a project that `project_resolves`
/// knows. `exclude` skips the booking being edited. Empty result means no
/// conflict.
pub fn find_conflicts<'a>(
    machine_id: Ulid,
    span: &Span,
    candidates: impl IntoIterator<Item = &'a Booking>,
    exclude: Option<&str>,
    project_resolves: impl Fn(&Ulid) -> bool,
) -> Vec<ConflictInfo> {
    candidates
        .into_iter()
        .filter(|b| b.machine_id == machine_id)
        .filter(|b| !b.status.is_terminal())
        .filter(|b| match &b.kind {
            BookingKind::Maintenance(_) => true,
            BookingKind::ProjectWork(pid) => project_resolves(pid),
        })
        .filter(|b| exclude != Some(b.id.as_str()))
        .filter(|b| b.span.overlaps(span))
        .map(ConflictInfo::from)
        .collect()
}
