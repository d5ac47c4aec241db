//! Standard invariant checks.
//!
//! These invariants capture behavioral properties that must always hold.
//! They verify WHAT must be true, not specific test scenarios.

use std::collections::HashSet;

use chatsync_core::ConnectionPhase;

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};

/// Messages of the open room are strictly ascending by id.
///
/// Strictly ascending also means no id appears twice, so redelivered pushes
/// and history overlapping live arrivals must have been merged.
pub struct MessagesAscending;

impl Invariant for MessagesAscending {
    fn name(&self) -> &'static str {
        "messages_ascending"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for window in state.messages.windows(2) {
            if window[1].id <= window[0].id {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "room {:?}: message {} follows {}",
                        state.active_room, window[1].id, window[0].id
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Each room appears in the list at most once.
pub struct UniqueRooms;

impl Invariant for UniqueRooms {
    fn name(&self) -> &'static str {
        "unique_rooms"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        let mut seen = HashSet::new();
        for room in &state.rooms {
            if !seen.insert(room.id) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "room {} listed twice in {:?}",
                        room.id,
                        state.rooms.iter().map(|r| r.id).collect::<Vec<_>>()
                    ),
                });
            }
        }
        Ok(())
    }
}

/// The open room shows no unread messages, and messages are only shown for
/// an open room.
pub struct ActiveRoomKnown;

impl Invariant for ActiveRoomKnown {
    fn name(&self) -> &'static str {
        "active_room_known"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        match state.active_room {
            Some(active) => {
                if let Some(room) = state.room(active)
                    && room.unread != 0
                {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("open room {active} shows {} unread", room.unread),
                    });
                }
            },
            None => {
                if !state.messages.is_empty() {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("{} messages shown with no room open", state.messages.len()),
                    });
                }
            },
        }
        Ok(())
    }
}

/// The connection never reports `Open` once the client is expected to stay
/// down (signed out, session expired or shut down).
///
/// Not part of the standard set; add it for runs that end disconnected.
pub struct NeverOpenWhileDisconnected {
    expect_disconnected: bool,
}

impl NeverOpenWhileDisconnected {
    /// Check that the phase is not `Open` when `expect_disconnected`.
    pub fn new(expect_disconnected: bool) -> Self {
        Self { expect_disconnected }
    }
}

impl Invariant for NeverOpenWhileDisconnected {
    fn name(&self) -> &'static str {
        "never_open_while_disconnected"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        if self.expect_disconnected && state.phase == ConnectionPhase::Open {
            return Err(Violation {
                invariant: self.name(),
                message: "connection open after it was expected to stay down".to_string(),
            });
        }
        Ok(())
    }
}
