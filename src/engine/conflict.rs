use ulid::Ulid;

use crate::model::*;

use super::ValidationError;

/// First active booking on the room that overlaps `slot`, ignoring `excluding`.
pub(crate) fn find_conflict<'a>(
    rs: &'a RoomState,
    slot: &Slot,
    excluding: Option<Ulid>,
) -> Option<&'a Booking> {
    rs.active_on(slot.date)
        .filter(|b| Some(b.id) != excluding)
        .find(|b| b.slot.overlaps(slot))
}

/// Is the room free for `slot`? A room switched off by an administrator never is.
pub fn is_available(rs: &RoomState, slot: &Slot, excluding: Option<Ulid>) -> bool {
    rs.room.available && find_conflict(rs, slot, excluding).is_none()
}

pub(crate) fn check_no_conflict(
    rs: &RoomState,
    slot: &Slot,
    excluding: Option<Ulid>,
) -> Result<(), ValidationError> {
    if !rs.room.available {
        return Err(ValidationError::Conflict { with: None });
    }
    match find_conflict(rs, slot, excluding) {
        Some(other) => Err(ValidationError::Conflict { with: Some(other.id) }),
        None => Ok(()),
    }
}
