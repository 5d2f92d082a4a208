use chrono::{NaiveDate, NaiveTime, TimeDelta};
use thiserror::Error;
use ulid::Ulid;

use crate::model::{BookingStatus, Role};

/// Why a proposed booking was rejected. Every variant is fixable by the requester.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("date {date} is in the past (today is {today})")]
    PastDate { date: NaiveDate, today: NaiveDate },
    #[error("end {end} must be after start {start}")]
    InvalidInterval { start: NaiveTime, end: NaiveTime },
    #[error("duration of {minutes} minutes is outside [{min}, {max}] minutes")]
    DurationOutOfRange { minutes: i64, min: i64, max: i64 },
    #[error("{participants} participants exceed room capacity {capacity}")]
    CapacityExceeded { participants: u32, capacity: u32 },
    #[error("a booking needs at least one participant")]
    NoParticipants,
    /// `with` is `None` when the slot check passed but the commit failed; retry from scratch.
    #[error("room is not available for this slot")]
    Conflict { with: Option<Ulid> },
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::PastDate { .. } => "past_date",
            ValidationError::InvalidInterval { .. } => "invalid_interval",
            ValidationError::DurationOutOfRange { .. } => "duration_out_of_range",
            ValidationError::CapacityExceeded { .. } => "capacity_exceeded",
            ValidationError::NoParticipants => "no_participants",
            ValidationError::Conflict { .. } => "conflict",
        }
    }

    /// A conflict may clear once the competing booking is cancelled or refused.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ValidationError::Conflict { .. })
    }
}

/// Why a lifecycle action (or an edit) is not permitted now.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("only the requester or an administrator may change this booking")]
    NotOwner,
    #[error("{role} may not review bookings")]
    NotReviewer { role: Role },
    #[error("booking is already {status}")]
    AlreadyFinal { status: BookingStatus },
    #[error("only pending bookings can be reviewed; booking is {status}")]
    NotPending { status: BookingStatus },
    #[error("booking starts in {} minutes; changes close {} minutes before start",
        .starts_in.num_minutes(), .lead.num_minutes())]
    InsideLeadTime { starts_in: TimeDelta, lead: TimeDelta },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("room name already taken: {0}")]
    DuplicateName(String),
    #[error("room {0} still has pending or confirmed bookings")]
    RoomInUse(Ulid),
    #[error("invalid booking: {0}")]
    Validation(#[from] ValidationError),
    #[error("action not permitted now: {0}")]
    Transition(#[from] TransitionError),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            EngineError::Validation(e) => Some(e),
            _ => None,
        }
    }

    pub fn transition(&self) -> Option<&TransitionError> {
        match self {
            EngineError::Transition(e) => Some(e),
            _ => None,
        }
    }
}
