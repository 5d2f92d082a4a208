use chrono::NaiveDateTime;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{Booking, Notification, NotificationKind};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification sink unavailable: {0}")]
    Unavailable(String),
}

/// Where the engine hands notifications. Delivery is best-effort: an error here
/// is logged by the engine and never undoes the booking change that caused it.
pub trait NotificationSink: Send + Sync {
    fn emit(&self, notification: Notification) -> Result<(), NotifyError>;
}

pub fn build(
    booking: &Booking,
    room_name: &str,
    kind: NotificationKind,
    now: NaiveDateTime,
) -> Notification {
    let slot = &booking.slot;
    let when = format!(
        "on {} from {} to {}",
        slot.date,
        slot.start.format("%H:%M"),
        slot.end.format("%H:%M")
    );
    let message = match kind {
        NotificationKind::Confirmation => {
            format!("Booking {} for room {room_name} {when}", booking.status)
        }
        NotificationKind::Modification => format!(
            "Your booking of room {room_name} {when} was updated - status: {}",
            booking.status
        ),
        NotificationKind::Cancellation => {
            format!("Your booking of room {room_name} {when} was cancelled")
        }
        NotificationKind::Reminder => {
            format!("Reminder: room {room_name} is booked for you {when}")
        }
    };
    Notification {
        id: Ulid::new(),
        user_id: booking.user_id,
        booking_id: Some(booking.id),
        kind,
        message,
        read: false,
        created_at: now,
    }
}

/// In-process sink: keeps a per-user inbox and fans out to live subscribers.
pub struct NotifyHub {
    inboxes: DashMap<Ulid, Vec<Notification>>,
    channels: DashMap<Ulid, broadcast::Sender<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            inboxes: DashMap::new(),
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a user's notifications. Creates the channel if needed.
    pub fn subscribe(&self, user_id: Ulid) -> broadcast::Receiver<Notification> {
        let sender = self
            .channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Newest first.
    pub fn list(&self, user_id: Ulid) -> Vec<Notification> {
        self.inboxes
            .get(&user_id)
            .map(|inbox| inbox.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    pub fn unread_count(&self, user_id: Ulid) -> usize {
        self.inboxes
            .get(&user_id)
            .map_or(0, |inbox| inbox.iter().filter(|n| !n.read).count())
    }

    /// Flip the read flag. Returns false if the user owns no such notification.
    pub fn mark_read(&self, user_id: Ulid, notification_id: Ulid) -> bool {
        let Some(mut inbox) = self.inboxes.get_mut(&user_id) else {
            return false;
        };
        match inbox.iter_mut().find(|n| n.id == notification_id) {
            Some(n) => {
                n.read = true;
                true
            }
            None => false,
        }
    }

    /// Returns how many notifications changed.
    pub fn mark_all_read(&self, user_id: Ulid) -> usize {
        let Some(mut inbox) = self.inboxes.get_mut(&user_id) else {
            return 0;
        };
        let mut flipped = 0;
        for n in inbox.iter_mut().filter(|n| !n.read) {
            n.read = true;
            flipped += 1;
        }
        flipped
    }
}

impl NotificationSink for NotifyHub {
    fn emit(&self, notification: Notification) -> Result<(), NotifyError> {
        if let Some(sender) = self.channels.get(&notification.user_id) {
            // No receivers left is fine; the inbox still has it.
            let _ = sender.send(notification.clone());
        }
        self.inboxes
            .entry(notification.user_id)
            .or_default()
            .push(notification);
        Ok(())
    }
}
