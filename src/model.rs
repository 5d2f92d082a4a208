use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Half-open slot `[start, end)` on a single calendar date, in facility local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot {
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Slot {
    pub fn new(date: NaiveDate, start: NaiveTime, end: NaiveTime) -> Self {
        Self { date, start, end }
    }

    pub fn is_well_formed(&self) -> bool {
        self.start < self.end
    }

    /// Exact length. Negative when `end` precedes `start`; never wraps past midnight.
    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    pub fn duration_minutes(&self) -> i64 {
        self.duration().num_minutes()
    }

    pub fn overlaps(&self, other: &Slot) -> bool {
        self.date == other.date && self.start < other.end && other.start < self.end
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start)
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        self.date.and_time(self.end)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}-{}",
            self.date,
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RoomCategory {
    LectureHall,
    TutorialRoom,
    Lab,
    ConferenceRoom,
    MeetingRoom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    Student,
    Professor,
    Administrator,
}

impl Role {
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Administrator)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Student => "student",
            Role::Professor => "professor",
            Role::Administrator => "administrator",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Refused,
}

impl BookingStatus {
    /// Active bookings hold their slot; everything else frees it.
    pub fn is_active(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn is_final(self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Refused)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Refused => "refused",
        })
    }
}

/// Lifecycle actions applied after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Confirm,
    Refuse,
    Cancel,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Confirm => "confirm",
            Action::Refuse => "refuse",
            Action::Cancel => "cancel",
        })
    }
}

/// Who is asking. Supplied by the caller's authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Ulid,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: Ulid, role: Role) -> Self {
        Self { user_id, role }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub name: String,
    pub building: String,
    pub floor: i32,
    pub capacity: u32,
    pub category: RoomCategory,
    pub equipment: BTreeSet<String>,
    /// Global kill-switch. A room with this off is never bookable.
    pub available: bool,
    pub description: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub user_id: Ulid,
    pub requester_role: Role,
    pub slot: Slot,
    pub reason: String,
    pub participants: u32,
    pub status: BookingStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub reminded: bool,
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Every booking ever made on this room, sorted by `(slot.date, slot.start)`.
    pub bookings: Vec<Booking>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by slot start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let key = booking.slot.starts_at();
        let pos = self
            .bookings
            .binary_search_by_key(&key, |b| b.slot.starts_at())
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// All bookings on `date`, any status. Binary search bounds the scan to that day.
    pub fn on_date(&self, date: NaiveDate) -> impl Iterator<Item = &Booking> {
        let lo = self.bookings.partition_point(|b| b.slot.date < date);
        let hi = self.bookings.partition_point(|b| b.slot.date <= date);
        self.bookings[lo..hi].iter()
    }

    /// Pending or confirmed bookings on `date`.
    pub fn active_on(&self, date: NaiveDate) -> impl Iterator<Item = &Booking> {
        self.on_date(date).filter(|b| b.status.is_active())
    }

    pub fn has_active_bookings(&self) -> bool {
        self.bookings.iter().any(|b| b.status.is_active())
    }

    /// Pending or confirmed bookings across all dates.
    pub fn active_count(&self) -> usize {
        self.bookings.iter().filter(|b| b.status.is_active()).count()
    }
}

/// Fields an administrator supplies when registering a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRoom {
    pub name: String,
    pub building: String,
    pub floor: i32,
    pub capacity: u32,
    pub category: RoomCategory,
    pub equipment: BTreeSet<String>,
    pub description: String,
    pub available: bool,
}

/// Editable room attributes. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomPatch {
    pub capacity: Option<u32>,
    pub available: Option<bool>,
    pub equipment: Option<BTreeSet<String>>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub room_id: Ulid,
    pub requester: Actor,
    pub slot: Slot,
    pub participants: u32,
    pub reason: String,
}

/// Fields a requester may change on an existing booking. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingChanges {
    pub slot: Option<Slot>,
    pub participants: Option<u32>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationKind {
    Confirmation,
    Reminder,
    Modification,
    Cancellation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Ulid,
    pub user_id: Ulid,
    pub booking_id: Option<Ulid>,
    pub kind: NotificationKind,
    pub message: String,
    pub read: bool,
    pub created_at: NaiveDateTime,
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    RoomUpdated {
        id: Ulid,
        capacity: u32,
        available: bool,
        equipment: BTreeSet<String>,
        description: String,
        updated_at: NaiveDateTime,
    },
    RoomDeleted {
        id: Ulid,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingEdited {
        id: Ulid,
        room_id: Ulid,
        slot: Slot,
        participants: u32,
        reason: String,
        updated_at: NaiveDateTime,
    },
    BookingStatusChanged {
        id: Ulid,
        room_id: Ulid,
        status: BookingStatus,
        updated_at: NaiveDateTime,
    },
    ReminderSent {
        id: Ulid,
        room_id: Ulid,
    },
}

// ── Query types ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomQuery {
    pub slot: Slot,
    pub min_capacity: Option<u32>,
    pub category: Option<RoomCategory>,
    pub building: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageReport {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub total: usize,
    pub by_status: BTreeMap<BookingStatus, usize>,
    pub by_role: BTreeMap<Role, usize>,
    /// Most booked rooms, descending, at most ten.
    pub top_rooms: Vec<(String, usize)>,
}
