use chrono::{NaiveDate, NaiveTime, TimeDelta};

use crate::model::*;

// ── Free-window computation ──────────────────────────────────────

/// Free windows of a room on `date` between `open` and `close`.
///
/// Starts from the opening hours and punches out every active booking.
/// A switched-off room has no free windows. Windows shorter than
/// `min_duration` are dropped.
pub fn free_windows(
    rs: &RoomState,
    date: NaiveDate,
    open: NaiveTime,
    close: NaiveTime,
    min_duration: Option<TimeDelta>,
) -> Vec<Slot> {
    if !rs.room.available || open >= close {
        return Vec::new();
    }
    let base = [Slot::new(date, open, close)];

    // active_on yields bookings sorted by start
    let taken: Vec<Slot> = rs.active_on(date).map(|b| b.slot).collect();
    let taken = merge_overlapping(&taken);

    let mut free = subtract_slots(&base, &taken);
    if let Some(min) = min_duration {
        free.retain(|s| s.duration() >= min);
    }
    free
}

/// Merge sorted overlapping/adjacent same-day slots into disjoint slots.
pub fn merge_overlapping(sorted: &[Slot]) -> Vec<Slot> {
    let mut merged: Vec<Slot> = Vec::new();
    for &slot in sorted {
        if let Some(last) = merged.last_mut()
            && slot.start <= last.end {
                last.end = last.end.max(slot.end);
                continue;
            }
        merged.push(slot);
    }
    merged
}

/// Remove `to_remove` from `base`. Both inputs sorted by start, same date.
pub fn subtract_slots(base: &[Slot], to_remove: &[Slot]) -> Vec<Slot> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Slot::new(b.date, current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Slot::new(b.date, current_start, current_end));
        }
    }

    result
}
