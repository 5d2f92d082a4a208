use std::collections::{BTreeMap, HashMap};

use chrono::{NaiveDate, NaiveTime, TimeDelta};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{availability, conflict, lifecycle, Engine, EngineError};

impl Engine {
    // ── Rooms ────────────────────────────────────────────────────

    pub async fn get_room(&self, id: Ulid) -> Option<Room> {
        let rs = self.get_room_state(&id)?;
        let guard = rs.read().await;
        Some(guard.room.clone())
    }

    pub async fn room_by_name(&self, name: &str) -> Option<Room> {
        let id = self.room_names.get(name).map(|e| *e.value())?;
        self.get_room(id).await
    }

    /// All rooms, ordered by building then name.
    pub async fn list_rooms(&self) -> Vec<Room> {
        let mut rooms = Vec::with_capacity(self.rooms.len());
        for rs in self.room_states() {
            rooms.push(rs.read().await.room.clone());
        }
        sort_rooms(&mut rooms);
        rooms
    }

    /// Whether `slot` can be booked on the room right now. An unknown room is
    /// never available.
    pub async fn is_room_available(&self, room_id: Ulid, slot: &Slot, excluding: Option<Ulid>) -> bool {
        match self.get_room_state(&room_id) {
            Some(rs) => conflict::is_available(&*rs.read().await, slot, excluding),
            None => false,
        }
    }

    /// Rooms free for the whole of `query.slot` that match every given filter.
    pub async fn search_rooms(&self, query: &RoomQuery) -> Vec<Room> {
        let mut found = Vec::new();
        for rs in self.room_states() {
            let guard = rs.read().await;
            let room = &guard.room;
            if query.min_capacity.is_some_and(|c| room.capacity < c)
                || query.category.is_some_and(|c| room.category != c)
                || query.building.as_ref().is_some_and(|b| &room.building != b)
            {
                continue;
            }
            if conflict::is_available(&guard, &query.slot, None) {
                found.push(room.clone());
            }
        }
        sort_rooms(&mut found);
        found
    }

    pub async fn free_windows(
        &self,
        room_id: Ulid,
        date: NaiveDate,
        open: NaiveTime,
        close: NaiveTime,
        min_duration: Option<TimeDelta>,
    ) -> Result<Vec<Slot>, EngineError> {
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(availability::free_windows(&guard, date, open, close, min_duration))
    }

    /// Pending and confirmed bookings of a room on one day, by start time.
    pub async fn room_schedule(&self, room_id: Ulid, date: NaiveDate) -> Result<Vec<Booking>, EngineError> {
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard.active_on(date).cloned().collect())
    }

    // ── Bookings ─────────────────────────────────────────────────

    pub async fn get_booking(&self, id: Ulid) -> Option<Booking> {
        let room_id = self.booking_to_room.get(&id).map(|e| *e.value())?;
        let rs = self.get_room_state(&room_id)?;
        let guard = rs.read().await;
        guard.booking(id).cloned()
    }

    /// Whether the booking may still be cancelled or edited.
    pub async fn is_modifiable(&self, id: Ulid) -> Result<bool, EngineError> {
        let booking = self.get_booking(id).await.ok_or(EngineError::NotFound(id))?;
        Ok(lifecycle::is_modifiable(
            &booking,
            self.now(),
            self.policy.modification_lead,
        ))
    }

    /// A user's bookings, latest slot first, optionally narrowed to one status.
    pub async fn bookings_for_user(&self, user_id: Ulid, status: Option<BookingStatus>) -> Vec<Booking> {
        let mut found = self
            .collect_bookings(|b| b.user_id == user_id && status.is_none_or(|s| b.status == s))
            .await;
        found.sort_by(|a, b| b.slot.starts_at().cmp(&a.slot.starts_at()));
        found
    }

    /// Requests awaiting an administrator, soonest slot first.
    pub async fn pending_bookings(&self) -> Vec<Booking> {
        let mut found = self
            .collect_bookings(|b| b.status == BookingStatus::Pending)
            .await;
        found.sort_by_key(|b| (b.slot.starts_at(), b.created_at));
        found
    }

    async fn collect_bookings(&self, keep: impl Fn(&Booking) -> bool) -> Vec<Booking> {
        let mut found = Vec::new();
        for rs in self.room_states() {
            let guard = rs.read().await;
            found.extend(guard.bookings.iter().filter(|b| keep(b)).cloned());
        }
        found
    }

    // ── Reports ──────────────────────────────────────────────────

    /// Booking counts for slots dated within `[from, to]`, every status included.
    pub async fn usage_report(&self, from: NaiveDate, to: NaiveDate) -> Result<UsageReport, EngineError> {
        if to < from {
            return Err(EngineError::LimitExceeded("report range ends before it starts"));
        }
        if (to - from).num_days() >= MAX_REPORT_DAYS {
            return Err(EngineError::LimitExceeded("report range too wide"));
        }

        let mut total = 0;
        let mut by_status = BTreeMap::new();
        let mut by_role = BTreeMap::new();
        let mut per_room: HashMap<String, usize> = HashMap::new();
        for rs in self.room_states() {
            let guard = rs.read().await;
            for b in guard.bookings.iter().filter(|b| (from..=to).contains(&b.slot.date)) {
                total += 1;
                *by_status.entry(b.status).or_insert(0) += 1;
                *by_role.entry(b.requester_role).or_insert(0) += 1;
                *per_room.entry(guard.room.name.clone()).or_insert(0) += 1;
            }
        }

        let mut top_rooms: Vec<(String, usize)> = per_room.into_iter().collect();
        top_rooms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_rooms.truncate(REPORT_TOP_ROOMS);

        Ok(UsageReport {
            from,
            to,
            total,
            by_status,
            by_role,
            top_rooms,
        })
    }
}

fn sort_rooms(rooms: &mut [Room]) {
    rooms.sort_by(|a, b| a.building.cmp(&b.building).then_with(|| a.name.cmp(&b.name)));
}
