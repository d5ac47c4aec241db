//! Room list reconciliation.
//!
//! Keeps the room list ordered most-recently-active first and maintains a
//! per-room unread counter from realtime events, so the list stays current
//! without refetching on every message.
//!
//! A message for a room that is not in the list means the list is stale
//! (for example, someone started a new conversation with us). The reconciler
//! requests a reload instead of guessing the room's metadata. Reloads are
//! coalesced: while one is in flight, further unknown rooms do not request
//! another.
//!
//! Servers may redeliver a message after a reconnect. The reconciler
//! remembers the most recent message ids it has counted so a redelivery
//! neither promotes the room nor bumps its counter a second time.

use std::collections::VecDeque;

use chatsync_proto::{MessageId, Room, RoomId};
use tracing::{debug, trace};

/// Outcome of applying a `message.received` event to the room list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomChange {
    /// Room moved to the front; carries its unread count afterwards
    Promoted {
        /// Unread count after the event
        unread: u32,
    },
    /// Room is unknown; the caller must reload the list
    ReloadRequested,
    /// Room is unknown but a reload is already in flight
    AwaitingReload,
    /// Message was already applied; nothing changed
    Duplicate,
}

/// Number of recently applied messages remembered for redelivery checks.
pub const RECENT_MESSAGES: usize = 512;

/// Ordered room list with unread counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomReconciler {
    /// Most recently active first
    rooms: Vec<Room>,
    /// Room currently open in the message view
    active: Option<RoomId>,
    /// A list reload has been requested and not yet completed
    reload_in_flight: bool,
    /// At least one list has been loaded
    loaded: bool,
    /// Recently applied messages, oldest first
    recent: VecDeque<(RoomId, MessageId)>,
}

impl RoomReconciler {
    /// Create an empty, not-yet-loaded list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rooms, most recently active first.
    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    /// Look up a room.
    pub fn get(&self, room_id: RoomId) -> Option<&Room> {
        self.rooms.iter().find(|room| room.id == room_id)
    }

    /// Room currently open, if any.
    pub fn active(&self) -> Option<RoomId> {
        self.active
    }

    /// Returns true if a reload is outstanding.
    pub fn reload_in_flight(&self) -> bool {
        self.reload_in_flight
    }

    /// Returns true once a list has been loaded.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Sum of unread counters.
    pub fn total_unread(&self) -> u64 {
        self.rooms.iter().map(|room| u64::from(room.unread_count)).sum()
    }

    /// Record that a list fetch is about to be issued.
    ///
    /// Returns false if one is already in flight, in which case the caller
    /// should not issue another.
    pub fn begin_reload(&mut self) -> bool {
        if self.reload_in_flight {
            trace!("room reload already in flight");
            return false;
        }
        self.reload_in_flight = true;
        true
    }

    /// Replace the list with a freshly fetched one.
    ///
    /// Server order is kept; duplicate ids keep their first occurrence. The
    /// open room's counter is forced to zero.
    pub fn replace(&mut self, rooms: Vec<Room>) {
        let mut seen = std::collections::HashSet::with_capacity(rooms.len());
        self.rooms = rooms.into_iter().filter(|room| seen.insert(room.id)).collect();

        if let Some(active) = self.active
            && let Some(room) = self.rooms.iter_mut().find(|room| room.id == active)
        {
            room.unread_count = 0;
        }

        self.reload_in_flight = false;
        self.loaded = true;
        debug!(rooms = self.rooms.len(), "room list replaced");
    }

    /// A list fetch failed. The stale list is kept.
    pub fn reload_failed(&mut self) {
        self.reload_in_flight = false;
    }

    /// Apply a `message.received` of `message_id` for `room_id`.
    ///
    /// Known rooms move to the front; their counter is incremented unless
    /// the room is open. A message applied recently is ignored.
    pub fn apply_message_received(&mut self, room_id: RoomId, message_id: MessageId) -> RoomChange {
        if !self.remember(room_id, message_id) {
            trace!(room_id, message_id, "redelivered message ignored");
            return RoomChange::Duplicate;
        }

        let Some(index) = self.rooms.iter().position(|room| room.id == room_id) else {
            return if self.begin_reload() {
                debug!(room_id, "message for unknown room, reloading list");
                RoomChange::ReloadRequested
            } else {
                RoomChange::AwaitingReload
            };
        };

        let mut room = self.rooms.remove(index);
        if self.active != Some(room_id) {
            room.unread_count = room.unread_count.saturating_add(1);
        }
        let unread = room.unread_count;
        self.rooms.insert(0, room);

        RoomChange::Promoted { unread }
    }

    /// Apply a `messages.read` for `room_id`: the counter becomes zero.
    ///
    /// Returns false if the room is unknown.
    pub fn apply_messages_read(&mut self, room_id: RoomId) -> bool {
        self.clear_unread(room_id)
    }

    /// Our own message was sent to `room_id`; move it to the front.
    pub fn note_local_send(&mut self, room_id: RoomId) {
        if let Some(index) = self.rooms.iter().position(|room| room.id == room_id) {
            let room = self.rooms.remove(index);
            self.rooms.insert(0, room);
        }
    }

    /// Mark `room_id` as open and zero its counter.
    ///
    /// The room need not be in the list yet (a freshly created direct room
    /// is opened before the reload lands); its counter is cleared when it
    /// arrives.
    pub fn open(&mut self, room_id: RoomId) {
        self.active = Some(room_id);
        self.clear_unread(room_id);
    }

    /// No room is open any more.
    pub fn close(&mut self) {
        self.active = None;
    }

    /// Record a delivery. Returns false if it was already recorded.
    fn remember(&mut self, room_id: RoomId, message_id: MessageId) -> bool {
        let key = (room_id, message_id);
        if self.recent.contains(&key) {
            return false;
        }
        if self.recent.len() == RECENT_MESSAGES {
            self.recent.pop_front();
        }
        self.recent.push_back(key);
        true
    }

    fn clear_unread(&mut self, room_id: RoomId) -> bool {
        match self.rooms.iter_mut().find(|room| room.id == room_id) {
            Some(room) => {
                room.unread_count = 0;
                true
            },
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use chatsync_proto::RoomKind;
    use chrono::DateTime;

    use super::*;

    fn room(id: RoomId, unread: u32) -> Room {
        Room {
            id,
            kind: RoomKind::Group,
            members: vec![],
            unread_count: unread,
            created_at: DateTime::from_timestamp(0, 0).unwrap().naive_utc(),
        }
    }

    fn ids(rooms: &RoomReconciler) -> Vec<RoomId> {
        rooms.rooms().iter().map(|r| r.id).collect()
    }

    fn unread(rooms: &RoomReconciler, id: RoomId) -> u32 {
        rooms.get(id).unwrap().unread_count
    }

    #[test]
    fn message_moves_room_to_front_and_counts_unread() {
        let mut rooms = RoomReconciler::new();
        rooms.replace(vec![room(1, 0), room(2, 0), room(3, 0)]);

        let change = rooms.apply_message_received(3, 100);

        assert_eq!(change, RoomChange::Promoted { unread: 1 });
        assert_eq!(ids(&rooms), vec![3, 1, 2]);
    }

    #[test]
    fn open_room_counter_stays_zero() {
        let mut rooms = RoomReconciler::new();
        rooms.replace(vec![room(1, 0), room(2, 4)]);
        rooms.open(2);
        assert_eq!(unread(&rooms, 2), 0);

        assert_eq!(rooms.apply_message_received(2, 100), RoomChange::Promoted { unread: 0 });
        assert_eq!(ids(&rooms), vec![2, 1]);
    }

    #[test]
    fn closed_room_counts_again() {
        let mut rooms = RoomReconciler::new();
        rooms.replace(vec![room(1, 0)]);
        rooms.open(1);
        rooms.close();

        assert_eq!(rooms.apply_message_received(1, 100), RoomChange::Promoted { unread: 1 });
    }

    #[test]
    fn redelivered_message_counts_once() {
        let mut rooms = RoomReconciler::new();
        rooms.replace(vec![room(1, 0), room(2, 2)]);

        assert_eq!(rooms.apply_message_received(2, 7), RoomChange::Promoted { unread: 3 });
        assert_eq!(rooms.apply_message_received(1, 8), RoomChange::Promoted { unread: 1 });
        assert_eq!(rooms.apply_message_received(2, 7), RoomChange::Duplicate);

        assert_eq!(unread(&rooms, 2), 3);
        assert_eq!(ids(&rooms), vec![1, 2]);

        // Same id in another room is a different message.
        assert_eq!(rooms.apply_message_received(1, 7), RoomChange::Promoted { unread: 2 });
    }

    #[test]
    fn redelivery_memory_is_bounded() {
        let mut rooms = RoomReconciler::new();
        rooms.replace(vec![room(1, 0)]);

        for id in 0..=RECENT_MESSAGES as u64 {
            rooms.apply_message_received(1, id);
        }
        assert_eq!(rooms.recent.len(), RECENT_MESSAGES);

        // The oldest entry was evicted and counts again.
        assert_eq!(rooms.apply_message_received(1, 0), RoomChange::Promoted { unread: RECENT_MESSAGES as u32 + 2 });
    }

    #[test]
    fn unknown_room_requests_one_reload() {
        let mut rooms = RoomReconciler::new();
        rooms.replace(vec![room(1, 0)]);

        assert_eq!(rooms.apply_message_received(9, 100), RoomChange::ReloadRequested);
        assert_eq!(rooms.apply_message_received(10, 101), RoomChange::AwaitingReload);
        assert_eq!(ids(&rooms), vec![1]);

        rooms.replace(vec![room(9, 1), room(10, 1), room(1, 0)]);
        assert!(!rooms.reload_in_flight());
        assert_eq!(rooms.apply_message_received(11, 102), RoomChange::ReloadRequested);
    }

    #[test]
    fn failed_reload_allows_another() {
        let mut rooms = RoomReconciler::new();
        assert_eq!(rooms.apply_message_received(9, 100), RoomChange::ReloadRequested);

        rooms.reload_failed();

        assert_eq!(rooms.apply_message_received(9, 101), RoomChange::ReloadRequested);
    }

    #[test]
    fn messages_read_zeroes_counter() {
        let mut rooms = RoomReconciler::new();
        rooms.replace(vec![room(1, 5), room(2, 3)]);

        assert!(rooms.apply_messages_read(2));
        assert!(!rooms.apply_messages_read(42));

        assert_eq!(unread(&rooms, 2), 0);
        assert_eq!(unread(&rooms, 1), 5);
        assert_eq!(ids(&rooms), vec![1, 2]);
    }

    #[test]
    fn replace_keeps_first_of_duplicate_ids() {
        let mut rooms = RoomReconciler::new();
        rooms.replace(vec![room(1, 2), room(2, 0), room(1, 7)]);

        assert_eq!(ids(&rooms), vec![1, 2]);
        assert_eq!(unread(&rooms, 1), 2);
    }

    #[test]
    fn reload_clears_open_room_counter() {
        let mut rooms = RoomReconciler::new();
        rooms.open(5);

        rooms.replace(vec![room(5, 3), room(6, 1)]);

        assert_eq!(unread(&rooms, 5), 0);
        assert_eq!(unread(&rooms, 6), 1);
        assert_eq!(rooms.total_unread(), 1);
    }

    #[test]
    fn local_send_promotes_without_counting() {
        let mut rooms = RoomReconciler::new();
        rooms.replace(vec![room(1, 0), room(2, 0)]);

        rooms.note_local_send(2);

        assert_eq!(ids(&rooms), vec![2, 1]);
        assert_eq!(unread(&rooms, 2), 0);
    }
}
