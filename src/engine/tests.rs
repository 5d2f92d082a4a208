use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{NaiveDate, NaiveTime, TimeDelta};

use super::*;
use crate::clock::ManualClock;
use crate::model::Notification;
use crate::notify::{NotifyError, NotifyHub};

// ── Helpers ──────────────────────────────────────────────

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("roombook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
}

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn slot(d: u32, sh: u32, sm: u32, eh: u32, em: u32) -> Slot {
    Slot::new(day(d), t(sh, sm), t(eh, em))
}

fn student() -> Actor {
    Actor::new(Ulid::new(), Role::Student)
}

fn professor() -> Actor {
    Actor::new(Ulid::new(), Role::Professor)
}

fn admin() -> Actor {
    Actor::new(Ulid::new(), Role::Administrator)
}

fn new_room(name: &str, capacity: u32) -> NewRoom {
    NewRoom {
        name: name.into(),
        building: "A".into(),
        floor: 0,
        capacity,
        category: RoomCategory::LectureHall,
        equipment: BTreeSet::from(["projector".to_string()]),
        description: String::new(),
        available: true,
    }
}

fn request(room_id: Ulid, requester: Actor, slot: Slot, participants: u32) -> BookingRequest {
    BookingRequest {
        room_id,
        requester,
        slot,
        participants,
        reason: "course".into(),
    }
}

/// Engine whose clock reads 2025-06-01 08:00.
fn engine_at(name: &str) -> (Engine, Arc<NotifyHub>, Arc<ManualClock>) {
    let hub = Arc::new(NotifyHub::new());
    let clock = Arc::new(ManualClock::new(day(1).and_time(t(8, 0))));
    let engine = Engine::new(
        test_wal_path(name),
        hub.clone(),
        clock.clone(),
        BookingPolicy::default(),
    )
    .unwrap();
    (engine, hub, clock)
}

struct FailingSink {
    attempts: AtomicUsize,
}

impl NotificationSink for FailingSink {
    fn emit(&self, _notification: Notification) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(NotifyError::Unavailable("mail relay down".into()))
    }
}

// ── Scenarios ────────────────────────────────────────────

#[tokio::test]
async fn student_booking_starts_pending() {
    let (engine, hub, _) = engine_at("student_pending.wal");
    let room = engine.create_room(new_room("A1", 30)).await.unwrap();
    let who = student();

    let b = engine
        .create_booking(request(room.id, who, slot(10, 10, 0, 11, 0), 20))
        .await
        .unwrap();
    assert_eq!(b.status, BookingStatus::Pending);
    assert_eq!(b.requester_role, Role::Student);

    let inbox = hub.list(who.user_id);
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind, NotificationKind::Confirmation);
    assert_eq!(inbox[0].booking_id, Some(b.id));
}

#[tokio::test]
async fn overlapping_request_conflicts_until_first_is_refused() {
    let (engine, _, _) = engine_at("conflict_then_refuse.wal");
    let room = engine.create_room(new_room("A1", 30)).await.unwrap();

    let first = engine
        .create_booking(request(room.id, student(), slot(10, 10, 0, 11, 0), 20))
        .await
        .unwrap();

    let err = engine
        .create_booking(request(room.id, professor(), slot(10, 10, 0, 11, 0), 20))
        .await
        .unwrap_err();
    assert_eq!(
        err.validation(),
        Some(&ValidationError::Conflict { with: Some(first.id) })
    );

    engine
        .transition_booking(first.id, Action::Refuse, admin())
        .await
        .unwrap();

    let second = engine
        .create_booking(request(room.id, professor(), slot(10, 10, 0, 11, 0), 20))
        .await
        .unwrap();
    assert_eq!(second.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn short_and_crowded_requests_rejected() {
    let (engine, _, _) = engine_at("short_crowded.wal");
    let room = engine.create_room(new_room("A1", 30)).await.unwrap();

    let err = engine
        .create_booking(request(room.id, student(), slot(10, 10, 0, 10, 20), 5))
        .await
        .unwrap_err();
    assert!(matches!(
        err.validation(),
        Some(ValidationError::DurationOutOfRange { minutes: 20, .. })
    ));

    let err = engine
        .create_booking(request(room.id, student(), slot(10, 10, 0, 11, 0), 35))
        .await
        .unwrap_err();
    assert_eq!(
        err.validation(),
        Some(&ValidationError::CapacityExceeded {
            participants: 35,
            capacity: 30
        })
    );
    assert!(engine.room_schedule(room.id, day(10)).await.unwrap().is_empty());
}

#[tokio::test]
async fn cancel_respects_lead_time() {
    let (engine, hub, clock) = engine_at("cancel_lead.wal");
    let room = engine.create_room(new_room("A1", 30)).await.unwrap();
    let prof = professor();

    let b = engine
        .create_booking(request(room.id, prof, slot(1, 9, 30, 10, 30), 10))
        .await
        .unwrap();
    // Starts in 90 minutes.
    assert!(!engine.is_modifiable(b.id).await.unwrap());
    let err = engine
        .transition_booking(b.id, Action::Cancel, prof)
        .await
        .unwrap_err();
    assert!(matches!(
        err.transition(),
        Some(TransitionError::InsideLeadTime { .. })
    ));
    assert_eq!(
        engine.get_booking(b.id).await.unwrap().status,
        BookingStatus::Confirmed
    );

    // Rewind: now the same booking starts in 3 hours.
    clock.set(day(1).and_time(t(6, 30)));
    assert!(engine.is_modifiable(b.id).await.unwrap());
    let cancelled = engine
        .transition_booking(b.id, Action::Cancel, prof)
        .await
        .unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert_eq!(hub.list(prof.user_id)[0].kind, NotificationKind::Cancellation);
}

#[tokio::test]
async fn exactly_two_hours_is_too_late() {
    let (engine, _, _) = engine_at("lead_boundary.wal");
    let room = engine.create_room(new_room("A1", 30)).await.unwrap();
    let prof = professor();
    let b = engine
        .create_booking(request(room.id, prof, slot(1, 10, 0, 11, 0), 10))
        .await
        .unwrap();
    assert!(!engine.is_modifiable(b.id).await.unwrap());
    assert!(engine.transition_booking(b.id, Action::Cancel, prof).await.is_err());
}

#[tokio::test]
async fn refused_booking_is_terminal() {
    let (engine, hub, _) = engine_at("refuse_twice.wal");
    let room = engine.create_room(new_room("A1", 30)).await.unwrap();
    let who = student();
    let b = engine
        .create_booking(request(room.id, who, slot(10, 14, 0, 15, 0), 10))
        .await
        .unwrap();

    let refused = engine
        .transition_booking(b.id, Action::Refuse, admin())
        .await
        .unwrap();
    assert_eq!(refused.status, BookingStatus::Refused);

    let err = engine
        .transition_booking(b.id, Action::Refuse, admin())
        .await
        .unwrap_err();
    assert_eq!(
        err.transition(),
        Some(&TransitionError::AlreadyFinal {
            status: BookingStatus::Refused
        })
    );
    // Creation + refusal; the failed second refusal sends nothing.
    assert_eq!(hub.list(who.user_id).len(), 2);
    assert_eq!(hub.list(who.user_id)[0].kind, NotificationKind::Modification);
}

// ── Lifecycle permissions ────────────────────────────────

#[tokio::test]
async fn only_admins_review() {
    let (engine, _, _) = engine_at("only_admins_review.wal");
    let room = engine.create_room(new_room("A1", 30)).await.unwrap();
    let b = engine
        .create_booking(request(room.id, student(), slot(10, 14, 0, 15, 0), 10))
        .await
        .unwrap();

    let err = engine
        .transition_booking(b.id, Action::Confirm, professor())
        .await
        .unwrap_err();
    assert_eq!(
        err.transition(),
        Some(&TransitionError::NotReviewer {
            role: Role::Professor
        })
    );

    let confirmed = engine
        .transition_booking(b.id, Action::Confirm, admin())
        .await
        .unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);

    let err = engine
        .transition_booking(b.id, Action::Refuse, admin())
        .await
        .unwrap_err();
    assert!(matches!(
        err.transition(),
        Some(TransitionError::NotPending { .. })
    ));
}

#[tokio::test]
async fn strangers_cannot_cancel_but_admins_can() {
    let (engine, _, _) = engine_at("cancel_permissions.wal");
    let room = engine.create_room(new_room("A1", 30)).await.unwrap();
    let b = engine
        .create_booking(request(room.id, professor(), slot(10, 14, 0, 15, 0), 10))
        .await
        .unwrap();

    let err = engine
        .transition_booking(b.id, Action::Cancel, student())
        .await
        .unwrap_err();
    assert_eq!(err.transition(), Some(&TransitionError::NotOwner));

    let cancelled = engine
        .transition_booking(b.id, Action::Cancel, admin())
        .await
        .unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
}

#[tokio::test]
async fn concurrent_reviews_apply_once() {
    let (engine, _, _) = engine_at("concurrent_reviews.wal");
    let engine = Arc::new(engine);
    let room = engine.create_room(new_room("A1", 30)).await.unwrap();
    let b = engine
        .create_booking(request(room.id, student(), slot(10, 14, 0, 15, 0), 10))
        .await
        .unwrap();
    let id = b.id;

    let confirm = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.transition_booking(id, Action::Confirm, admin()).await })
    };
    let refuse = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.transition_booking(id, Action::Refuse, admin()).await })
    };
    let results = [confirm.await.unwrap(), refuse.await.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
}

#[tokio::test]
async fn unknown_booking_not_found() {
    let (engine, _, _) = engine_at("unknown_booking.wal");
    let id = Ulid::new();
    assert!(matches!(
        engine.transition_booking(id, Action::Confirm, admin()).await,
        Err(EngineError::NotFound(x)) if x == id
    ));
    assert!(matches!(engine.is_modifiable(id).await, Err(EngineError::NotFound(_))));
}

// ── Edits ────────────────────────────────────────────────

#[tokio::test]
async fn edit_moves_slot_and_keeps_status() {
    let (engine, hub, _) = engine_at("edit_moves.wal");
    let room = engine.create_room(new_room("A1", 30)).await.unwrap();
    let who = student();
    let b = engine
        .create_booking(request(room.id, who, slot(10, 10, 0, 11, 0), 10))
        .await
        .unwrap();

    // Overlaps its own old slot only.
    let edited = engine
        .edit_booking(
            b.id,
            who,
            BookingChanges {
                slot: Some(slot(10, 10, 30, 12, 0)),
                participants: Some(25),
                reason: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(edited.slot, slot(10, 10, 30, 12, 0));
    assert_eq!(edited.participants, 25);
    assert_eq!(edited.reason, "course");
    assert_eq!(edited.status, BookingStatus::Pending);
    assert_eq!(hub.list(who.user_id)[0].kind, NotificationKind::Modification);

    // The old window is free again, the new one is not.
    assert!(engine.is_room_available(room.id, &slot(10, 9, 30, 10, 30), None).await);
    assert!(!engine.is_room_available(room.id, &slot(10, 11, 0, 11, 30), None).await);
    assert!(engine.is_room_available(room.id, &slot(10, 11, 0, 11, 30), Some(b.id)).await);
}

#[tokio::test]
async fn edit_rejected_on_conflict_or_capacity() {
    let (engine, _, _) = engine_at("edit_rejected.wal");
    let room = engine.create_room(new_room("A1", 30)).await.unwrap();
    let who = professor();
    let mine = engine
        .create_booking(request(room.id, who, slot(10, 8, 0, 9, 0), 10))
        .await
        .unwrap();
    let theirs = engine
        .create_booking(request(room.id, professor(), slot(10, 9, 0, 10, 0), 10))
        .await
        .unwrap();

    let err = engine
        .edit_booking(
            mine.id,
            who,
            BookingChanges {
                slot: Some(slot(10, 8, 30, 9, 30)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(
        err.validation(),
        Some(&ValidationError::Conflict {
            with: Some(theirs.id)
        })
    );

    let err = engine
        .edit_booking(
            mine.id,
            who,
            BookingChanges {
                participants: Some(31),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err.validation(),
        Some(ValidationError::CapacityExceeded { .. })
    ));
    assert_eq!(engine.get_booking(mine.id).await.unwrap(), mine);
}

#[tokio::test]
async fn edit_needs_owner_and_open_window() {
    let (engine, _, _) = engine_at("edit_gate.wal");
    let room = engine.create_room(new_room("A1", 30)).await.unwrap();
    let who = professor();
    let soon = engine
        .create_booking(request(room.id, who, slot(1, 9, 0, 10, 0), 10))
        .await
        .unwrap();
    let later = engine
        .create_booking(request(room.id, who, slot(12, 9, 0, 10, 0), 10))
        .await
        .unwrap();

    let err = engine
        .edit_booking(soon.id, who, BookingChanges::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err.transition(),
        Some(TransitionError::InsideLeadTime { .. })
    ));

    let err = engine
        .edit_booking(later.id, student(), BookingChanges::default())
        .await
        .unwrap_err();
    assert_eq!(err.transition(), Some(&TransitionError::NotOwner));

    engine
        .transition_booking(later.id, Action::Cancel, who)
        .await
        .unwrap();
    let err = engine
        .edit_booking(later.id, who, BookingChanges::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err.transition(),
        Some(TransitionError::AlreadyFinal { .. })
    ));
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overlapping_creates_one_wins() {
    let (engine, _, _) = engine_at("concurrent_creates.wal");
    let engine = Arc::new(engine);
    let room = engine.create_room(new_room("A1", 30)).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..16u32 {
        let engine = engine.clone();
        // All overlap 10:00-10:30.
        let s = slot(10, 9, 30 + (i % 2) * 15, 10, 30 + (i % 3) * 10);
        handles.push(tokio::spawn(async move {
            engine.create_booking(request(room.id, professor(), s, 5)).await
        }));
    }
    let results = futures::future::join_all(handles).await;
    let winners = results.iter().filter(|r| r.as_ref().unwrap().is_ok()).count();
    assert_eq!(winners, 1);
    for r in results {
        if let Err(e) = r.unwrap() {
            assert!(e.validation().is_some_and(ValidationError::is_retryable));
        }
    }
    assert_eq!(engine.room_schedule(room.id, day(10)).await.unwrap().len(), 1);
}

// ── Persistence ──────────────────────────────────────────

#[tokio::test]
async fn wal_replay_restores_state() {
    let path = test_wal_path("replay.wal");
    let clock = Arc::new(ManualClock::new(day(1).and_time(t(8, 0))));
    let who = student();

    let (room_id, kept, cancelled, edited) = {
        let engine = Engine::new(
            path.clone(),
            Arc::new(NotifyHub::new()),
            clock.clone(),
            BookingPolicy::default(),
        )
        .unwrap();
        let room = engine.create_room(new_room("A1", 30)).await.unwrap();
        engine
            .update_room(
                room.id,
                RoomPatch {
                    capacity: Some(40),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let kept = engine
            .create_booking(request(room.id, who, slot(10, 10, 0, 11, 0), 35))
            .await
            .unwrap();
        engine
            .transition_booking(kept.id, Action::Confirm, admin())
            .await
            .unwrap();
        let cancelled = engine
            .create_booking(request(room.id, who, slot(11, 10, 0, 11, 0), 10))
            .await
            .unwrap();
        engine
            .transition_booking(cancelled.id, Action::Cancel, who)
            .await
            .unwrap();
        let edited = engine
            .create_booking(request(room.id, who, slot(12, 10, 0, 11, 0), 10))
            .await
            .unwrap();
        let edited = engine
            .edit_booking(
                edited.id,
                who,
                BookingChanges {
                    slot: Some(slot(12, 14, 0, 16, 0)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        (room.id, kept.id, cancelled.id, edited)
    };

    let engine = Engine::new(path, Arc::new(NotifyHub::new()), clock, BookingPolicy::default())
        .unwrap();
    let room = engine.room_by_name("A1").await.unwrap();
    assert_eq!(room.id, room_id);
    assert_eq!(room.capacity, 40);
    assert_eq!(
        engine.get_booking(kept).await.unwrap().status,
        BookingStatus::Confirmed
    );
    assert_eq!(
        engine.get_booking(cancelled).await.unwrap().status,
        BookingStatus::Cancelled
    );
    assert_eq!(engine.get_booking(edited.id).await.unwrap(), edited);
    assert_eq!(engine.bookings_for_user(who.user_id, None).await.len(), 3);
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compaction.wal");
    let clock = Arc::new(ManualClock::new(day(1).and_time(t(8, 0))));
    let who = professor();
    let booking_id = {
        let engine = Engine::new(
            path.clone(),
            Arc::new(NotifyHub::new()),
            clock.clone(),
            BookingPolicy::default(),
        )
        .unwrap();
        let room = engine.create_room(new_room("A1", 30)).await.unwrap();
        let gone = engine.create_room(new_room("A2", 30)).await.unwrap();
        engine.delete_room(gone.id).await.unwrap();
        let b = engine
            .create_booking(request(room.id, who, slot(10, 10, 0, 11, 0), 10))
            .await
            .unwrap();
        engine.transition_booking(b.id, Action::Cancel, who).await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 5);

        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        b.id
    };

    let events = crate::wal::Wal::replay(&path).unwrap();
    assert_eq!(events.len(), 2);

    let engine = Engine::new(path, Arc::new(NotifyHub::new()), clock, BookingPolicy::default())
        .unwrap();
    assert_eq!(engine.list_rooms().await.len(), 1);
    assert!(engine.room_by_name("A2").await.is_none());
    assert_eq!(
        engine.get_booking(booking_id).await.unwrap().status,
        BookingStatus::Cancelled
    );
}

#[tokio::test]
async fn bookings_after_torn_tail_survive_restart() {
    use std::io::Write;

    let path = test_wal_path("torn_restart.wal");
    let clock = Arc::new(ManualClock::new(day(1).and_time(t(8, 0))));
    let open = |path: &PathBuf| {
        Engine::new(
            path.clone(),
            Arc::new(NotifyHub::new()),
            clock.clone(),
            BookingPolicy::default(),
        )
        .unwrap()
    };

    let room_id = {
        let engine = open(&path);
        engine.create_room(new_room("A1", 30)).await.unwrap().id
    };
    // Crash mid-frame.
    let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    f.write_all(&[0xde, 0xad, 0xbe]).unwrap();
    drop(f);

    let booking = {
        let engine = open(&path);
        engine
            .create_booking(request(room_id, professor(), slot(10, 10, 0, 11, 0), 10))
            .await
            .unwrap()
    };

    let engine = open(&path);
    assert_eq!(engine.get_booking(booking.id).await.unwrap(), booking);
}

#[tokio::test]
async fn partial_header_recovers_on_restart() {
    let path = test_wal_path("partial_header.wal");
    std::fs::write(&path, b"RBK").unwrap();
    let clock = Arc::new(ManualClock::new(day(1).and_time(t(8, 0))));

    {
        let engine = Engine::new(
            path.clone(),
            Arc::new(NotifyHub::new()),
            clock.clone(),
            BookingPolicy::default(),
        )
        .unwrap();
        engine.create_room(new_room("A1", 30)).await.unwrap();
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new()), clock, BookingPolicy::default())
        .unwrap();
    assert!(engine.room_by_name("A1").await.is_some());
}

// ── Commit failures ──────────────────────────────────────

/// Point the engine at a writer that is gone, so every append fails.
fn kill_wal_writer(engine: &mut Engine) {
    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    engine.wal_tx = tx;
}

#[tokio::test]
async fn failed_commit_on_create_is_a_retryable_conflict() {
    let (mut engine, hub, _) = engine_at("commit_fail_create.wal");
    let room = engine.create_room(new_room("A1", 30)).await.unwrap();
    kill_wal_writer(&mut engine);
    let who = professor();

    let err = engine
        .create_booking(request(room.id, who, slot(10, 10, 0, 11, 0), 10))
        .await
        .unwrap_err();
    assert_eq!(err.validation(), Some(&ValidationError::Conflict { with: None }));

    assert!(engine.room_schedule(room.id, day(10)).await.unwrap().is_empty());
    assert!(engine.bookings_for_user(who.user_id, None).await.is_empty());
    assert!(hub.list(who.user_id).is_empty());
}

#[tokio::test]
async fn failed_commit_on_edit_keeps_original() {
    let (mut engine, hub, _) = engine_at("commit_fail_edit.wal");
    let room = engine.create_room(new_room("A1", 30)).await.unwrap();
    let who = professor();
    let b = engine
        .create_booking(request(room.id, who, slot(10, 10, 0, 11, 0), 10))
        .await
        .unwrap();
    kill_wal_writer(&mut engine);

    let err = engine
        .edit_booking(
            b.id,
            who,
            BookingChanges {
                slot: Some(slot(10, 14, 0, 15, 0)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.validation(), Some(&ValidationError::Conflict { with: None }));

    assert_eq!(engine.get_booking(b.id).await.unwrap(), b.clone());
    assert_eq!(engine.room_schedule(room.id, day(10)).await.unwrap(), vec![b]);
    // Only the creation notice.
    assert_eq!(hub.list(who.user_id).len(), 1);
}

#[tokio::test]
async fn failed_commit_on_transition_keeps_status() {
    let (mut engine, hub, _) = engine_at("commit_fail_transition.wal");
    let room = engine.create_room(new_room("A1", 30)).await.unwrap();
    let who = student();
    let b = engine
        .create_booking(request(room.id, who, slot(10, 10, 0, 11, 0), 10))
        .await
        .unwrap();
    kill_wal_writer(&mut engine);

    let err = engine
        .transition_booking(b.id, Action::Confirm, admin())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::WalError(_)));

    assert_eq!(
        engine.get_booking(b.id).await.unwrap().status,
        BookingStatus::Pending
    );
    assert_eq!(engine.pending_bookings().await.len(), 1);
    assert_eq!(hub.list(who.user_id).len(), 1);
}

// ── Notifications ────────────────────────────────────────

#[tokio::test]
async fn failing_sink_does_not_fail_operations() {
    let sink = Arc::new(FailingSink {
        attempts: AtomicUsize::new(0),
    });
    let clock = Arc::new(ManualClock::new(day(1).and_time(t(8, 0))));
    let engine = Engine::new(
        test_wal_path("failing_sink.wal"),
        sink.clone(),
        clock,
        BookingPolicy::default(),
    )
    .unwrap();
    let room = engine.create_room(new_room("A1", 30)).await.unwrap();

    let b = engine
        .create_booking(request(room.id, student(), slot(10, 10, 0, 11, 0), 10))
        .await
        .unwrap();
    let confirmed = engine
        .transition_booking(b.id, Action::Confirm, admin())
        .await
        .unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 2);
}

// ── Rooms ────────────────────────────────────────────────

#[tokio::test]
async fn room_names_are_unique() {
    let (engine, _, _) = engine_at("unique_names.wal");
    engine.create_room(new_room("A1", 30)).await.unwrap();
    assert!(matches!(
        engine.create_room(new_room("A1", 10)).await,
        Err(EngineError::DuplicateName(n)) if n == "A1"
    ));
    assert!(matches!(
        engine.create_room(new_room("", 10)).await,
        Err(EngineError::LimitExceeded(_))
    ));
    assert!(matches!(
        engine.create_room(new_room("A3", 0)).await,
        Err(EngineError::LimitExceeded(_))
    ));
    assert_eq!(engine.list_rooms().await.len(), 1);
}

#[tokio::test]
async fn switched_off_room_refuses_new_bookings_only() {
    let (engine, _, _) = engine_at("switched_off.wal");
    let room = engine.create_room(new_room("A1", 30)).await.unwrap();
    let existing = engine
        .create_booking(request(room.id, professor(), slot(10, 10, 0, 11, 0), 25))
        .await
        .unwrap();

    let room = engine
        .update_room(
            room.id,
            RoomPatch {
                available: Some(false),
                capacity: Some(10),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!room.available);

    let err = engine
        .create_booking(request(room.id, professor(), slot(11, 10, 0, 11, 0), 5))
        .await
        .unwrap_err();
    assert_eq!(err.validation(), Some(&ValidationError::Conflict { with: None }));
    assert!(!engine.is_room_available(room.id, &slot(11, 10, 0, 11, 0), None).await);

    // Existing booking survives both the switch-off and the smaller capacity.
    assert_eq!(engine.get_booking(existing.id).await.unwrap(), existing);
}

#[tokio::test]
async fn delete_room_refused_while_in_use() {
    let (engine, _, _) = engine_at("delete_in_use.wal");
    let room = engine.create_room(new_room("A1", 30)).await.unwrap();
    let who = professor();
    let b = engine
        .create_booking(request(room.id, who, slot(10, 10, 0, 11, 0), 5))
        .await
        .unwrap();

    assert!(matches!(
        engine.delete_room(room.id).await,
        Err(EngineError::RoomInUse(_))
    ));

    engine.transition_booking(b.id, Action::Cancel, who).await.unwrap();
    engine.delete_room(room.id).await.unwrap();
    assert!(engine.get_room(room.id).await.is_none());
    assert!(engine.get_booking(b.id).await.is_none());
    assert!(!engine.is_room_available(room.id, &slot(10, 10, 0, 11, 0), None).await);

    // The name is free again.
    engine.create_room(new_room("A1", 30)).await.unwrap();
}

// ── Queries ──────────────────────────────────────────────

#[tokio::test]
async fn search_filters_and_availability() {
    let (engine, _, _) = engine_at("search.wal");
    let big = engine.create_room(new_room("A1", 100)).await.unwrap();
    let small = engine.create_room(new_room("A2", 10)).await.unwrap();
    let mut lab = new_room("B1", 40);
    lab.building = "B".into();
    lab.category = RoomCategory::Lab;
    let lab = engine.create_room(lab).await.unwrap();

    engine
        .create_booking(request(big.id, professor(), slot(10, 10, 0, 12, 0), 50))
        .await
        .unwrap();

    let query = RoomQuery {
        slot: slot(10, 11, 0, 12, 0),
        min_capacity: None,
        category: None,
        building: None,
    };
    let names: Vec<_> = engine
        .search_rooms(&query)
        .await
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, ["A2", "B1"]);

    let found = engine
        .search_rooms(&RoomQuery {
            min_capacity: Some(20),
            ..query.clone()
        })
        .await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, lab.id);

    let found = engine
        .search_rooms(&RoomQuery {
            building: Some("A".into()),
            ..query.clone()
        })
        .await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, small.id);

    let found = engine
        .search_rooms(&RoomQuery {
            slot: slot(10, 12, 0, 13, 0),
            category: Some(RoomCategory::LectureHall),
            ..query
        })
        .await;
    assert_eq!(found.len(), 2);
}

#[tokio::test]
async fn user_listing_and_admin_queue() {
    let (engine, _, _) = engine_at("listings.wal");
    let room = engine.create_room(new_room("A1", 30)).await.unwrap();
    let who = student();

    let early = engine
        .create_booking(request(room.id, who, slot(10, 10, 0, 11, 0), 5))
        .await
        .unwrap();
    let late = engine
        .create_booking(request(room.id, who, slot(20, 10, 0, 11, 0), 5))
        .await
        .unwrap();
    let mid = engine
        .create_booking(request(room.id, who, slot(15, 10, 0, 11, 0), 5))
        .await
        .unwrap();
    engine
        .create_booking(request(room.id, professor(), slot(11, 10, 0, 11, 0), 5))
        .await
        .unwrap();
    engine
        .transition_booking(mid.id, Action::Refuse, admin())
        .await
        .unwrap();

    let ids: Vec<_> = engine
        .bookings_for_user(who.user_id, None)
        .await
        .into_iter()
        .map(|b| b.id)
        .collect();
    assert_eq!(ids, [late.id, mid.id, early.id]);

    let pending: Vec<_> = engine.pending_bookings().await.into_iter().map(|b| b.id).collect();
    assert_eq!(pending, [early.id, late.id]);

    let refused = engine
        .bookings_for_user(who.user_id, Some(BookingStatus::Refused))
        .await;
    assert_eq!(refused.len(), 1);
}

#[tokio::test]
async fn free_windows_for_room() {
    let (engine, _, _) = engine_at("free_windows.wal");
    let room = engine.create_room(new_room("A1", 30)).await.unwrap();
    engine
        .create_booking(request(room.id, professor(), slot(10, 10, 0, 11, 0), 5))
        .await
        .unwrap();

    let free = engine
        .free_windows(room.id, day(10), t(8, 0), t(12, 0), Some(TimeDelta::minutes(30)))
        .await
        .unwrap();
    assert_eq!(free, vec![slot(10, 8, 0, 10, 0), slot(10, 11, 0, 12, 0)]);

    assert!(matches!(
        engine.free_windows(Ulid::new(), day(10), t(8, 0), t(12, 0), None).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn usage_report_counts() {
    let (engine, _, _) = engine_at("usage_report.wal");
    let a1 = engine.create_room(new_room("A1", 30)).await.unwrap();
    let a2 = engine.create_room(new_room("A2", 30)).await.unwrap();
    let who = student();

    for d in [10, 11, 12] {
        engine
            .create_booking(request(a1.id, who, slot(d, 10, 0, 11, 0), 5))
            .await
            .unwrap();
    }
    let b = engine
        .create_booking(request(a2.id, professor(), slot(10, 10, 0, 11, 0), 5))
        .await
        .unwrap();
    engine
        .transition_booking(b.id, Action::Cancel, admin())
        .await
        .unwrap();
    // Outside the range.
    engine
        .create_booking(request(a2.id, professor(), slot(20, 10, 0, 11, 0), 5))
        .await
        .unwrap();

    let report = engine.usage_report(day(10), day(12)).await.unwrap();
    assert_eq!(report.total, 4);
    assert_eq!(report.by_status[&BookingStatus::Pending], 3);
    assert_eq!(report.by_status[&BookingStatus::Cancelled], 1);
    assert_eq!(report.by_role[&Role::Student], 3);
    assert_eq!(report.by_role[&Role::Professor], 1);
    assert_eq!(report.top_rooms, vec![("A1".to_string(), 3), ("A2".to_string(), 1)]);

    assert!(engine.usage_report(day(12), day(10)).await.is_err());
    assert!(
        engine
            .usage_report(day(1), day(1) + TimeDelta::days(400))
            .await
            .is_err()
    );
}

#[tokio::test]
async fn past_dates_rejected_by_facility_clock() {
    let (engine, _, clock) = engine_at("past_dates.wal");
    let room = engine.create_room(new_room("A1", 30)).await.unwrap();
    clock.advance(TimeDelta::days(10));

    let err = engine
        .create_booking(request(room.id, professor(), slot(10, 10, 0, 11, 0), 5))
        .await
        .unwrap_err();
    assert!(matches!(err.validation(), Some(ValidationError::PastDate { .. })));

    // Same-day requests are allowed.
    engine
        .create_booking(request(room.id, professor(), slot(11, 10, 0, 11, 0), 5))
        .await
        .unwrap();
}
