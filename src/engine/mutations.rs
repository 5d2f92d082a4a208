use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{NaiveDateTime, TimeDelta};
use dashmap::mapref::entry::Entry;
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{
    action_label, BOOKINGS_CREATED_TOTAL, BOOKINGS_EDITED_TOTAL, BOOKINGS_REJECTED_TOTAL,
    REMINDERS_SENT_TOTAL, ROOMS_ACTIVE, TRANSITIONS_TOTAL,
};

use super::{lifecycle, validate, Engine, EngineError, ValidationError, WalCommand};

fn check_room_attrs(
    capacity: u32,
    equipment: &BTreeSet<String>,
    description: &str,
) -> Result<(), EngineError> {
    if capacity == 0 {
        return Err(EngineError::LimitExceeded("room capacity must be at least 1"));
    }
    if equipment.len() > MAX_EQUIPMENT_ITEMS {
        return Err(EngineError::LimitExceeded("too many equipment items"));
    }
    if equipment.iter().any(|e| e.len() > MAX_NAME_LEN) {
        return Err(EngineError::LimitExceeded("equipment item name too long"));
    }
    if description.len() > MAX_DESCRIPTION_LEN {
        return Err(EngineError::LimitExceeded("room description too long"));
    }
    Ok(())
}

/// A failed WAL write on create/edit surfaces as a retryable conflict: the
/// slot check passed, but the booking was not recorded.
fn commit_failed(e: EngineError) -> EngineError {
    match e {
        EngineError::WalError(msg) => {
            tracing::warn!("booking not committed: {msg}");
            EngineError::Validation(ValidationError::Conflict { with: None })
        }
        other => other,
    }
}

fn reject(e: ValidationError) -> EngineError {
    metrics::counter!(BOOKINGS_REJECTED_TOTAL, "reason" => e.code()).increment(1);
    tracing::debug!("booking rejected: {e}");
    EngineError::Validation(e)
}

impl Engine {
    // ── Rooms ────────────────────────────────────────────────────

    pub async fn create_room(&self, new: NewRoom) -> Result<Room, EngineError> {
        if self.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if new.name.trim().is_empty() || new.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("room name must be 1-100 bytes"));
        }
        if new.building.len() > MAX_BUILDING_LEN {
            return Err(EngineError::LimitExceeded("building name too long"));
        }
        check_room_attrs(new.capacity, &new.equipment, &new.description)?;

        let _gate = self.commit_gate.read().await;
        let id = Ulid::new();
        // Reserve the name first; the entry guard must not live across an await.
        match self.room_names.entry(new.name.clone()) {
            Entry::Occupied(_) => return Err(EngineError::DuplicateName(new.name)),
            Entry::Vacant(v) => {
                v.insert(id);
            }
        }

        let now = self.now();
        let room = Room {
            id,
            name: new.name,
            building: new.building,
            floor: new.floor,
            capacity: new.capacity,
            category: new.category,
            equipment: new.equipment,
            available: new.available,
            description: new.description,
            created_at: now,
            updated_at: now,
        };
        let event = Event::RoomCreated { room: room.clone() };
        if let Err(e) = self.wal_append(&event).await {
            self.room_names.remove(&room.name);
            return Err(e);
        }
        self.rooms
            .insert(id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
        metrics::gauge!(ROOMS_ACTIVE).set(self.rooms.len() as f64);
        tracing::info!("room {} ({}) registered", room.name, room.id);
        Ok(room)
    }

    /// Change a room's mutable attributes. Switching a room off blocks new
    /// bookings but leaves existing ones untouched.
    pub async fn update_room(&self, id: Ulid, patch: RoomPatch) -> Result<Room, EngineError> {
        let _gate = self.commit_gate.read().await;
        let mut guard = self.lock_room(id).await?;
        let current = &guard.room;
        let capacity = patch.capacity.unwrap_or(current.capacity);
        let available = patch.available.unwrap_or(current.available);
        let equipment = patch.equipment.unwrap_or_else(|| current.equipment.clone());
        let description = patch.description.unwrap_or_else(|| current.description.clone());
        check_room_attrs(capacity, &equipment, &description)?;

        let event = Event::RoomUpdated {
            id,
            capacity,
            available,
            equipment,
            description,
            updated_at: self.now(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.room.clone())
    }

    /// Remove a room. Refused while it still has pending or confirmed bookings;
    /// its cancelled and refused history goes with it.
    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let guard = self.lock_room(id).await?;
        if guard.has_active_bookings() {
            return Err(EngineError::RoomInUse(id));
        }
        self.wal_append(&Event::RoomDeleted { id }).await?;

        self.rooms.remove(&id);
        self.room_names.remove(&guard.room.name);
        for b in &guard.bookings {
            self.booking_to_room.remove(&b.id);
        }
        metrics::gauge!(ROOMS_ACTIVE).set(self.rooms.len() as f64);
        tracing::info!("room {} ({id}) deleted", guard.room.name);
        Ok(())
    }

    // ── Bookings ─────────────────────────────────────────────────

    /// Validate and record a booking request.
    ///
    /// Validation and the write happen under the room's write lock: of two
    /// concurrent overlapping requests, the second one sees the first and is
    /// rejected with a conflict naming it.
    pub async fn create_booking(&self, req: BookingRequest) -> Result<Booking, EngineError> {
        if req.reason.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("booking reason too long"));
        }
        let _gate = self.commit_gate.read().await;
        let mut guard = self.lock_room(req.room_id).await?;
        if guard.active_count() >= MAX_ACTIVE_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many active bookings on room"));
        }

        let now = self.now();
        let status = validate::validate(&req, &guard, &self.policy, now.date()).map_err(reject)?;

        let booking = Booking {
            id: Ulid::new(),
            room_id: req.room_id,
            user_id: req.requester.user_id,
            requester_role: req.requester.role,
            slot: req.slot,
            reason: req.reason,
            participants: req.participants,
            status,
            created_at: now,
            updated_at: now,
            reminded: false,
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event)
            .await
            .map_err(commit_failed)?;
        let room_name = guard.room.name.clone();
        drop(guard);

        metrics::counter!(BOOKINGS_CREATED_TOTAL, "status" => status.to_string()).increment(1);
        tracing::info!(
            "booking {} on {} {} by {} -> {status}",
            booking.id,
            room_name,
            booking.slot,
            booking.requester_role
        );
        self.emit(&booking, &room_name, NotificationKind::Confirmation);
        Ok(booking)
    }

    /// Change the slot, head-count or reason of a booking. The new values go
    /// through the same rules as a new request, ignoring the booking itself
    /// for conflicts. The status is kept.
    pub async fn edit_booking(
        &self,
        id: Ulid,
        actor: Actor,
        changes: BookingChanges,
    ) -> Result<Booking, EngineError> {
        if let Some(reason) = &changes.reason
            && reason.len() > MAX_REASON_LEN
        {
            return Err(EngineError::LimitExceeded("booking reason too long"));
        }
        let _gate = self.commit_gate.read().await;
        let mut guard = self.resolve_booking_write(id).await?;
        let current = guard.booking(id).cloned().ok_or(EngineError::NotFound(id))?;

        let now = self.now();
        lifecycle::check_changeable(&current, &actor, now, self.policy.modification_lead)?;

        let slot = changes.slot.unwrap_or(current.slot);
        let participants = changes.participants.unwrap_or(current.participants);
        validate::check(&slot, participants, &guard, &self.policy, now.date(), Some(id))
            .map_err(reject)?;

        let event = Event::BookingEdited {
            id,
            room_id: current.room_id,
            slot,
            participants,
            reason: changes.reason.unwrap_or(current.reason),
            updated_at: now,
        };
        self.persist_and_apply(&mut guard, &event)
            .await
            .map_err(commit_failed)?;
        let updated = guard.booking(id).cloned().ok_or(EngineError::NotFound(id))?;
        let room_name = guard.room.name.clone();
        drop(guard);

        metrics::counter!(BOOKINGS_EDITED_TOTAL).increment(1);
        tracing::info!("booking {id} edited by {}: now {}", actor.user_id, updated.slot);
        self.emit(&updated, &room_name, NotificationKind::Modification);
        Ok(updated)
    }

    /// Confirm, refuse or cancel a booking. The status check and the write
    /// happen under one lock, so of two concurrent actions on the same
    /// pending booking exactly one takes effect.
    pub async fn transition_booking(
        &self,
        id: Ulid,
        action: Action,
        actor: Actor,
    ) -> Result<Booking, EngineError> {
        let _gate = self.commit_gate.read().await;
        let mut guard = self.resolve_booking_write(id).await?;
        let current = guard.booking(id).cloned().ok_or(EngineError::NotFound(id))?;

        let now = self.now();
        let next = lifecycle::next_status(&current, action, &actor, now, self.policy.modification_lead)
            .inspect_err(|_| {
                metrics::counter!(TRANSITIONS_TOTAL,
                    "action" => action_label(action), "outcome" => "denied")
                .increment(1);
            })?;

        let event = Event::BookingStatusChanged {
            id,
            room_id: current.room_id,
            status: next,
            updated_at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let updated = guard.booking(id).cloned().ok_or(EngineError::NotFound(id))?;
        let room_name = guard.room.name.clone();
        drop(guard);

        metrics::counter!(TRANSITIONS_TOTAL,
            "action" => action_label(action), "outcome" => "applied")
        .increment(1);
        tracing::info!("booking {id}: {} -> {next} ({action} by {})", current.status, actor.role);

        let kind = match action {
            Action::Confirm => NotificationKind::Confirmation,
            Action::Refuse => NotificationKind::Modification,
            Action::Cancel => NotificationKind::Cancellation,
        };
        self.emit(&updated, &room_name, kind);
        Ok(updated)
    }

    // ── Reminders ────────────────────────────────────────────────

    /// Confirmed bookings starting within `(now, now + lead]` that have not
    /// been reminded yet.
    pub async fn due_reminders(&self, now: NaiveDateTime, lead: TimeDelta) -> Vec<Ulid> {
        let horizon = now + lead;
        let mut due = Vec::new();
        for rs in self.room_states() {
            let guard = rs.read().await;
            due.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| b.status == BookingStatus::Confirmed && !b.reminded)
                    .filter(|b| {
                        let start = b.slot.starts_at();
                        start > now && start <= horizon
                    })
                    .map(|b| b.id),
            );
        }
        due
    }

    /// Send the reminder for one booking and mark it so it is never sent
    /// twice. Returns false if the booking no longer qualifies.
    pub async fn send_reminder(&self, id: Ulid) -> Result<bool, EngineError> {
        let _gate = self.commit_gate.read().await;
        let mut guard = self.resolve_booking_write(id).await?;
        let booking = guard.booking(id).cloned().ok_or(EngineError::NotFound(id))?;
        if booking.status != BookingStatus::Confirmed
            || booking.reminded
            || booking.slot.starts_at() <= self.now()
        {
            return Ok(false);
        }

        let event = Event::ReminderSent {
            id,
            room_id: booking.room_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let room_name = guard.room.name.clone();
        drop(guard);

        metrics::counter!(REMINDERS_SENT_TOTAL).increment(1);
        self.emit(&booking, &room_name, NotificationKind::Reminder);
        Ok(true)
    }

    // ── WAL maintenance ──────────────────────────────────────────

    /// Rewrite the WAL with one `RoomCreated` per room followed by one
    /// `BookingCreated` per booking, carrying its current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;

        let mut events = Vec::new();
        for rs in self.room_states() {
            let guard = rs.read().await;
            events.push(Event::RoomCreated {
                room: guard.room.clone(),
            });
            events.extend(guard.bookings.iter().map(|b| Event::BookingCreated {
                booking: b.clone(),
            }));
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
