use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_names(room_name: &str, owner_id: &str) -> Result<(), EngineError> {
    if room_name.is_empty() {
        return Err(EngineError::LimitExceeded("room name is empty"));
    }
    if room_name.len() > MAX_ROOM_NAME_LEN {
        return Err(EngineError::LimitExceeded("room name too long"));
    }
    if owner_id.is_empty() {
        return Err(EngineError::LimitExceeded("owner id is empty"));
    }
    if owner_id.len() > MAX_OWNER_ID_LEN {
        return Err(EngineError::LimitExceeded("owner id too long"));
    }
    Ok(())
}

/// Overlap re-check. Caller holds the RoomDay write lock.
pub(crate) fn check_no_conflict(day: &DayState, span: &SlotSpan) -> Result<(), EngineError> {
    if day.reservations.len() >= MAX_RESERVATIONS_PER_ROOM_DAY {
        return Err(EngineError::LimitExceeded("too many reservations for room and day"));
    }
    match day.overlapping(span).next() {
        Some(existing) => Err(EngineError::Conflict {
            with: existing.id,
            span: existing.span(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn day_with(spans: &[(Slot, Slot)]) -> DayState {
        let date = NaiveDate::from_ymd_opt(2026, 5, 4).unwrap();
        let mut day = DayState::new(RoomDay::new("A201", date));
        for &(begin, duration) in spans {
            day.insert(Reservation {
                id: Ulid::new(),
                room_name: "A201".into(),
                date,
                begin_slot: begin,
                duration,
                owner_id: "alice".into(),
            });
        }
        day
    }

    #[test]
    fn adjacent_is_not_a_conflict() {
        let day = day_with(&[(20, 4)]);
        assert!(check_no_conflict(&day, &SlotSpan::new(18, 20)).is_ok());
        assert!(check_no_conflict(&day, &SlotSpan::new(24, 26)).is_ok());
    }

    #[test]
    fn overlap_reports_the_existing_reservation() {
        let day = day_with(&[(20, 4)]);
        let existing = day.reservations[0].id;
        match check_no_conflict(&day, &SlotSpan::new(23, 25)) {
            Err(EngineError::Conflict { with, span }) => {
                assert_eq!(with, existing);
                assert_eq!(span, SlotSpan::new(20, 24));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn enclosing_span_conflicts() {
        let day = day_with(&[(30, 1)]);
        assert!(matches!(
            check_no_conflict(&day, &SlotSpan::new(16, 42)),
            Err(EngineError::Conflict { .. })
        ));
    }

    #[test]
    fn name_limits() {
        assert!(validate_names("A201", "alice").is_ok());
        assert!(validate_names("", "alice").is_err());
        assert!(validate_names("A201", "").is_err());
        assert!(validate_names(&"x".repeat(MAX_ROOM_NAME_LEN + 1), "alice").is_err());
        assert!(validate_names("A201", &"x".repeat(MAX_OWNER_ID_LEN + 1)).is_err());
    }
}
