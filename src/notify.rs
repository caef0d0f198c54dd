use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for booking-engine events. Two feeds: per room
/// (calendar watchers, channel managers) and per booking (the guest's
/// notification stream). Delivery is fire-and-forget; the dispatcher
/// that fans out to email/push/SMS subscribes here.
pub struct NotifyHub {
    rooms: DashMap<Ulid, broadcast::Sender<Event>>,
    bookings: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            bookings: DashMap::new(),
        }
    }

    /// Subscribe to all events touching a room's calendar.
    pub fn subscribe_room(&self, room_id: Ulid) -> broadcast::Receiver<Event> {
        self.rooms
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Subscribe to one booking's lifecycle events.
    pub fn subscribe_booking(&self, booking_id: Ulid) -> broadcast::Receiver<Event> {
        self.bookings
            .entry(booking_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Route an event to its room and booking feeds. No-op when nobody
    /// is listening.
    pub fn send(&self, event: &Event) {
        if let Some(room_id) = event.room_id()
            && let Some(sender) = self.rooms.get(&room_id) {
                let _ = sender.send(event.clone());
            }
        if let Some(booking_id) = event.booking_id()
            && let Some(sender) = self.bookings.get(&booking_id) {
                let _ = sender.send(event.clone());
            }
    }

    /// Drop a booking's channel once its stream is no longer needed
    /// (e.g. long after it reached a terminal status).
    pub fn remove_booking(&self, booking_id: &Ulid) {
        self.bookings.remove(booking_id);
    }

    pub fn remove_room(&self, room_id: &Ulid) {
        self.rooms.remove(room_id);
    }
}
