// Hard caps on engine inputs. Exceeding any of these yields `EngineError::LimitExceeded`.

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_NAME_LEN: usize = 100;
pub const MAX_BUILDING_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 4_096;
pub const MAX_EQUIPMENT_ITEMS: usize = 64;
pub const MAX_REASON_LEN: usize = 2_000;
/// Pending plus confirmed bookings a room may hold; cancelled and refused ones
/// do not count.
pub const MAX_ACTIVE_BOOKINGS_PER_ROOM: usize = 100_000;

/// Widest date range a usage report may cover.
pub const MAX_REPORT_DAYS: i64 = 366;

/// How many rooms a usage report ranks.
pub const REPORT_TOP_ROOMS: usize = 10;
