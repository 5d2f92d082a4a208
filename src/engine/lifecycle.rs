use chrono::{NaiveDateTime, TimeDelta};

use crate::model::*;

use super::TransitionError;

/// True while the booking's start is strictly more than `lead` away from `now`.
pub fn is_modifiable(booking: &Booking, now: NaiveDateTime, lead: TimeDelta) -> bool {
    booking.slot.starts_at() - now > lead
}

fn check_lead_time(booking: &Booking, now: NaiveDateTime, lead: TimeDelta) -> Result<(), TransitionError> {
    if is_modifiable(booking, now, lead) {
        Ok(())
    } else {
        Err(TransitionError::InsideLeadTime {
            starts_in: booking.slot.starts_at() - now,
            lead,
        })
    }
}

/// Gate shared by cancellation and edits: owner or administrator, still active,
/// outside the lead-time window.
pub fn check_changeable(
    booking: &Booking,
    actor: &Actor,
    now: NaiveDateTime,
    lead: TimeDelta,
) -> Result<(), TransitionError> {
    if actor.user_id != booking.user_id && !actor.role.is_admin() {
        return Err(TransitionError::NotOwner);
    }
    if booking.status.is_final() {
        return Err(TransitionError::AlreadyFinal {
            status: booking.status,
        });
    }
    check_lead_time(booking, now, lead)
}

/// Status that `action` moves `booking` to, or why it may not.
///
/// ```text
/// pending ──confirm──▶ confirmed
/// pending ──refuse───▶ refused
/// pending / confirmed ──cancel──▶ cancelled
/// ```
pub fn next_status(
    booking: &Booking,
    action: Action,
    actor: &Actor,
    now: NaiveDateTime,
    lead: TimeDelta,
) -> Result<BookingStatus, TransitionError> {
    match action {
        Action::Confirm | Action::Refuse => {
            if !actor.role.is_admin() {
                return Err(TransitionError::NotReviewer { role: actor.role });
            }
            match booking.status {
                BookingStatus::Pending => {}
                status if status.is_final() => return Err(TransitionError::AlreadyFinal { status }),
                status => return Err(TransitionError::NotPending { status }),
            }
            Ok(if action == Action::Confirm {
                BookingStatus::Confirmed
            } else {
                BookingStatus::Refused
            })
        }
        Action::Cancel => {
            check_changeable(booking, actor, now, lead)?;
            Ok(BookingStatus::Cancelled)
        }
    }
}
