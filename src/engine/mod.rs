mod availability;
mod conflict;
mod error;
pub mod lifecycle;
mod mutations;
mod policy;
mod queries;
#[cfg(test)]
mod tests;
pub mod validate;

pub use availability::{free_windows, merge_overlapping, subtract_slots};
pub use conflict::is_available;
pub use error::{EngineError, TransitionError, ValidationError};
pub use policy::{ApprovalPolicy, BookingPolicy, InitialStatus};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDateTime;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::clock::Clock;
use crate::config::Config;
use crate::model::*;
use crate::notify::{self, NotificationSink};
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL. Every append already queued when the
/// task wakes joins the same batch and shares one fsync. Control commands are
/// handled after the batch they interrupted is committed.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut batch: Vec<PendingAppend> = Vec::new();
    while let Some(cmd) = rx.recv().await {
        let mut control = match cmd {
            WalCommand::Append { event, response } => {
                batch.push((event, response));
                None
            }
            other => Some(other),
        };
        while control.is_none() {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => control = Some(other),
                Err(_) => break,
            }
        }
        if !batch.is_empty() {
            commit_batch(&mut wal, &mut batch);
        }
        if let Some(cmd) = control {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't leak into
    // the next batch; every caller in this batch is told it failed.
    let flushed = wal.flush_sync();
    let result = appended.and(flushed);

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched"),
    }
}

/// The reservation engine: room registry, booking validation and lifecycle.
///
/// Each room sits behind its own `RwLock`. Every write to a room's bookings
/// (validate, log, apply) happens under that room's write lock, so two
/// overlapping requests for the same room can never both be accepted.
pub struct Engine {
    pub(super) rooms: DashMap<Ulid, SharedRoomState>,
    pub(super) room_names: DashMap<String, Ulid>,
    /// Reverse lookup: booking id → room id
    pub(super) booking_to_room: DashMap<Ulid, Ulid>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Writers hold it shared; compaction holds it exclusively so the
    /// snapshot it writes can't miss a concurrent append.
    pub(super) commit_gate: RwLock<()>,
    pub(super) sink: Arc<dyn NotificationSink>,
    pub(super) clock: Arc<dyn Clock>,
    pub policy: BookingPolicy,
}

/// Apply an event to a room (no locking; caller holds the lock).
fn apply_to_room(rs: &mut RoomState, event: &Event, booking_index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::BookingCreated { booking } => {
            booking_index.insert(booking.id, booking.room_id);
            rs.insert_booking(booking.clone());
        }
        Event::BookingEdited {
            id,
            slot,
            participants,
            reason,
            updated_at,
            ..
        } => {
            // Re-insert so the list stays sorted when the slot moves.
            if let Some(mut booking) = rs.remove_booking(*id) {
                booking.slot = *slot;
                booking.participants = *participants;
                booking.reason = reason.clone();
                booking.updated_at = *updated_at;
                rs.insert_booking(booking);
            }
        }
        Event::BookingStatusChanged {
            id,
            status,
            updated_at,
            ..
        } => {
            if let Some(booking) = rs.booking_mut(*id) {
                booking.status = *status;
                booking.updated_at = *updated_at;
            }
        }
        Event::ReminderSent { id, .. } => {
            if let Some(booking) = rs.booking_mut(*id) {
                booking.reminded = true;
            }
        }
        Event::RoomUpdated {
            capacity,
            available,
            equipment,
            description,
            updated_at,
            ..
        } => {
            rs.room.capacity = *capacity;
            rs.room.available = *available;
            rs.room.equipment = equipment.clone();
            rs.room.description = description.clone();
            rs.room.updated_at = *updated_at;
        }
        // Created/deleted are handled at the DashMap level
        Event::RoomCreated { .. } | Event::RoomDeleted { .. } => {}
    }
}

/// Room an event touches (for events other than create/delete).
fn event_room_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BookingCreated { booking } => Some(booking.room_id),
        Event::BookingEdited { room_id, .. }
        | Event::BookingStatusChanged { room_id, .. }
        | Event::ReminderSent { room_id, .. } => Some(*room_id),
        Event::RoomUpdated { id, .. } => Some(*id),
        Event::RoomCreated { .. } | Event::RoomDeleted { .. } => None,
    }
}

impl Engine {
    /// Replay the WAL at `wal_path`, cutting off any torn tail, and start its
    /// writer task. Must be called
    /// inside a tokio runtime.
    pub fn new(
        wal_path: PathBuf,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        policy: BookingPolicy,
    ) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            room_names: DashMap::new(),
            booking_to_room: DashMap::new(),
            wal_tx,
            commit_gate: RwLock::new(()),
            sink,
            clock,
            policy,
        };

        // Replay: we are the sole owner of these Arcs, so try_write never
        // contends. Never block here; this may run inside an async context.
        for event in &events {
            match event {
                Event::RoomCreated { room } => {
                    engine.room_names.insert(room.name.clone(), room.id);
                    engine
                        .rooms
                        .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
                }
                Event::RoomDeleted { id } => engine.forget_room(*id),
                other => {
                    if let Some(room_id) = event_room_id(other)
                        && let Some(rs) = engine.get_room_state(&room_id)
                        && let Ok(mut guard) = rs.try_write()
                    {
                        apply_to_room(&mut guard, other, &engine.booking_to_room);
                    }
                }
            }
        }
        metrics::gauge!(crate::observability::ROOMS_ACTIVE).set(engine.rooms.len() as f64);
        tracing::info!(
            "engine ready: {} rooms, {} bookings replayed from {}",
            engine.rooms.len(),
            engine.booking_to_room.len(),
            wal_path.display()
        );

        Ok(engine)
    }

    /// Open the engine described by `config`, creating its data directory.
    pub fn from_config(config: &Config, sink: Arc<dyn NotificationSink>) -> io::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        Self::new(
            config.wal_path(),
            sink,
            Arc::new(config.clock()),
            config.policy(),
        )
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append, then apply. Nothing is applied if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.booking_to_room);
        Ok(())
    }

    pub(super) fn get_room_state(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub(super) fn room_states(&self) -> Vec<SharedRoomState> {
        self.rooms.iter().map(|e| e.value().clone()).collect()
    }

    /// Acquire a room's write lock. Fails if the room was deleted while we waited.
    pub(super) async fn lock_room(
        &self,
        room_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.write_owned().await;
        if !self.rooms.contains_key(&room_id) {
            return Err(EngineError::NotFound(room_id));
        }
        Ok(guard)
    }

    /// Lookup booking → room, then lock that room for writing.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let room_id = self
            .booking_to_room
            .get(&booking_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(booking_id))?;
        self.lock_room(room_id).await
    }

    pub(super) fn forget_room(&self, id: Ulid) {
        if let Some((_, rs)) = self.rooms.remove(&id)
            && let Ok(guard) = rs.try_read()
        {
            self.room_names.remove(&guard.room.name);
            for b in &guard.bookings {
                self.booking_to_room.remove(&b.id);
            }
        }
    }

    /// Hand a notification to the sink. Failures are logged and counted, never returned.
    pub(super) fn emit(&self, booking: &Booking, room_name: &str, kind: NotificationKind) {
        let notification = notify::build(booking, room_name, kind, self.now());
        if let Err(e) = self.sink.emit(notification) {
            metrics::counter!(crate::observability::NOTIFICATIONS_FAILED_TOTAL).increment(1);
            tracing::warn!("notification for booking {} not delivered: {e}", booking.id);
        }
    }
}
