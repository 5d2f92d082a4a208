use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::conflict::check_no_conflict;
use super::{BookingPolicy, ValidationError};

/// Apply every booking rule in order; the first failure wins.
///
/// 1. not before `today`
/// 2. start before end
/// 3. duration within the policy bounds, inclusive
/// 4. at least one participant and no more than the room holds
/// 5. no active booking on the room overlaps, apart from `excluding`
///
/// Edits pass their own id as `excluding` so a booking never conflicts with itself.
pub fn check(
    slot: &Slot,
    participants: u32,
    rs: &RoomState,
    policy: &BookingPolicy,
    today: NaiveDate,
    excluding: Option<Ulid>,
) -> Result<(), ValidationError> {
    if slot.date < today {
        return Err(ValidationError::PastDate {
            date: slot.date,
            today,
        });
    }
    if !slot.is_well_formed() {
        return Err(ValidationError::InvalidInterval {
            start: slot.start,
            end: slot.end,
        });
    }
    let duration = slot.duration();
    if duration < policy.min_duration || duration > policy.max_duration {
        return Err(ValidationError::DurationOutOfRange {
            minutes: slot.duration_minutes(),
            min: policy.min_duration.num_minutes(),
            max: policy.max_duration.num_minutes(),
        });
    }
    if participants == 0 {
        return Err(ValidationError::NoParticipants);
    }
    if participants > rs.room.capacity {
        return Err(ValidationError::CapacityExceeded {
            participants,
            capacity: rs.room.capacity,
        });
    }
    check_no_conflict(rs, slot, excluding)
}

/// Validate a new booking and pick its initial status from the approval table.
pub fn validate(
    req: &BookingRequest,
    rs: &RoomState,
    policy: &BookingPolicy,
    today: NaiveDate,
) -> Result<BookingStatus, ValidationError> {
    check(&req.slot, req.participants, rs, policy, today, None)?;
    Ok(policy.approval.initial_status(req.requester.role))
}
