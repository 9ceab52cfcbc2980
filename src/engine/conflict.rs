use ulid::Ulid;

use crate::model::{ProviderBook, TimeOfDay, Weekday};

use super::EngineError;

pub(crate) fn validate_interval(start: TimeOfDay, end: TimeOfDay) -> Result<(), EngineError> {
    if end <= start {
        return Err(EngineError::Validation("end must be after start"));
    }
    Ok(())
}

/// Reject the interval if it overlaps any other slot of this provider on the
/// same weekday. Half-open test: `new.start < other.end && other.start < new.end`.
/// `exclude` skips the slot being edited.
pub(crate) fn check_no_overlap(
    book: &ProviderBook,
    weekday: Weekday,
    start: TimeOfDay,
    end: TimeOfDay,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    for slot in book.slots_on(weekday) {
        if exclude == Some(slot.id) {
            continue;
        }
        if slot.overlaps(weekday, start, end) {
            return Err(EngineError::Conflict(slot.id));
        }
    }
    Ok(())
}
