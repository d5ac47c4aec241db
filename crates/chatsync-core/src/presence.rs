//! Friend presence.
//!
//! The friend list is fetched once; `user.status` pushes then flip the
//! online flag of individual friends.

use chatsync_proto::{Friend, UserId, UserStatus};
use tracing::trace;

/// Friend list with live presence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceTracker {
    friends: Vec<Friend>,
}

impl PresenceTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Friends in the order they were fetched.
    pub fn friends(&self) -> &[Friend] {
        &self.friends
    }

    /// Friends with online ones first, otherwise in fetch order.
    pub fn sorted(&self) -> Vec<&Friend> {
        let mut sorted: Vec<&Friend> = self.friends.iter().collect();
        sorted.sort_by_key(|friend| !friend.online);
        sorted
    }

    /// Number of online friends.
    pub fn online_count(&self) -> usize {
        self.friends.iter().filter(|friend| friend.online).count()
    }

    /// Presence of `user_id`, if it is a friend.
    pub fn is_online(&self, user_id: UserId) -> Option<bool> {
        self.friends.iter().find(|friend| friend.id == user_id).map(|friend| friend.online)
    }

    /// Replace the list with a freshly fetched one.
    pub fn replace(&mut self, friends: Vec<Friend>) {
        self.friends = friends;
    }

    /// Apply a `user.status`. Returns false for users that are not friends.
    pub fn apply_status(&mut self, status: &UserStatus) -> bool {
        let Some(friend) = self.friends.iter_mut().find(|friend| friend.id == status.user_id) else {
            trace!(user_id = status.user_id, "status for non-friend ignored");
            return false;
        };
        friend.online = status.online;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn friend(id: UserId, name: &str, online: bool) -> Friend {
        Friend { id, username: name.into(), online }
    }

    #[test]
    fn status_flips_presence() {
        let mut presence = PresenceTracker::new();
        presence.replace(vec![friend(1, "kim", false), friend(2, "lee", true)]);

        assert!(presence.apply_status(&UserStatus { user_id: 1, username: None, online: true }));
        assert!(presence.apply_status(&UserStatus { user_id: 2, username: None, online: false }));

        assert_eq!(presence.is_online(1), Some(true));
        assert_eq!(presence.is_online(2), Some(false));
    }

    #[test]
    fn status_for_stranger_is_ignored() {
        let mut presence = PresenceTracker::new();
        presence.replace(vec![friend(1, "kim", false)]);

        assert!(!presence.apply_status(&UserStatus { user_id: 9, username: None, online: true }));
        assert_eq!(presence.is_online(9), None);
    }

    #[test]
    fn online_friends_sort_first_keeping_order() {
        let mut presence = PresenceTracker::new();
        presence.replace(vec![
            friend(1, "a", false),
            friend(2, "b", true),
            friend(3, "c", false),
            friend(4, "d", true),
        ]);

        let order: Vec<UserId> = presence.sorted().iter().map(|f| f.id).collect();

        assert_eq!(order, vec![2, 4, 1, 3]);
        assert_eq!(presence.online_count(), 2);
    }
}
