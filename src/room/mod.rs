//! Room module for the shared collaboration document.
//!
//! A room is a single shared document per editing session:
//! - A title/content pair with last-write-wins fields
//! - The roster of connected participants (set semantics)
//! - A map of broadcast cursor markers, keyed by participant id
//!
//! Rooms are created by the lifecycle manager, mutated by any connected
//! participant for the duration of the session, and deleted once the
//! roster becomes empty.

mod lifecycle;

pub use lifecycle::{generate_room_id, RoomLifecycleManager, RoomSeed, SweepConfig};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A participant in the roster. Roster membership compares the whole
/// pair, so join/leave are set-union/set-difference over `{id, name}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedUser {
    pub id: String,
    pub name: String,
}

impl ConnectedUser {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Ephemeral cursor marker for one participant.
///
/// Identity fields are carried redundantly with the roster entry since
/// cursor updates are independent writes. Pixel offsets are relative to
/// unscrolled content, not absolute screen position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorState {
    pub user_id: String,
    pub user_name: String,
    /// Character offset into the room content
    pub cursor_position: usize,
    pub relative_x: f64,
    pub relative_y: f64,
    /// Client timestamp of this sample (epoch millis)
    pub last_updated: i64,
}

impl CursorState {
    /// Screen-space position for a viewer whose editing surface is
    /// scrolled by `(scroll_x, scroll_y)`. Must be recomputed whenever
    /// the local view scrolls.
    pub fn viewport_position(&self, scroll_x: f64, scroll_y: f64) -> (f64, f64) {
        (self.relative_x - scroll_x, self.relative_y - scroll_y)
    }
}

/// The shared room document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    /// Back-reference to the content item this room was seeded from
    pub associated_content_id: Option<String>,
    pub title: String,
    pub content: String,
    pub connected_users: Vec<ConnectedUser>,
    pub user_cursors: HashMap<String, CursorState>,
    /// Epoch millis, store-assigned
    pub created_at: i64,
    /// Epoch millis, refreshed on every mutation
    pub updated_at: i64,
}

impl Room {
    /// Create a room pre-populated with seed title/content, an empty
    /// roster and no cursors.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        associated_content_id: Option<String>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: id.into(),
            associated_content_id,
            title: title.into(),
            content: content.into(),
            connected_users: Vec::new(),
            user_cursors: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the roster is empty (the deletion precondition).
    pub fn is_empty(&self) -> bool {
        self.connected_users.is_empty()
    }

    /// Set-union add. Returns `true` if the roster changed.
    pub fn add_user(&mut self, user: &ConnectedUser) -> bool {
        if self.connected_users.contains(user) {
            return false;
        }
        self.connected_users.push(user.clone());
        true
    }

    /// Set-difference removal of the matching `{id, name}` entry.
    /// Returns `true` if the roster changed.
    pub fn remove_user(&mut self, user: &ConnectedUser) -> bool {
        let before = self.connected_users.len();
        self.connected_users.retain(|u| u != user);
        self.connected_users.len() != before
    }

    /// Apply a partial update in place. Does not stamp `updated_at`;
    /// the store does that on commit.
    pub fn apply(&mut self, patch: &RoomPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(content) = &patch.content {
            self.content = content.clone();
        }
        if let Some(user) = &patch.add_user {
            self.add_user(user);
        }
        if let Some(user) = &patch.remove_user {
            self.remove_user(user);
        }
        if let Some(cursor) = &patch.set_cursor {
            self.user_cursors
                .insert(cursor.user_id.clone(), cursor.clone());
        }
        if let Some(user_id) = &patch.clear_cursor {
            self.user_cursors.remove(user_id);
        }
    }
}

/// A partial update to a single room. Fields left `None` are untouched;
/// roster edits are set operations and cursor edits touch a single map
/// entry, never the whole map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub add_user: Option<ConnectedUser>,
    pub remove_user: Option<ConnectedUser>,
    pub set_cursor: Option<CursorState>,
    /// Remove this participant's cursor key entirely. Readers treat an
    /// absent key and a cleared one identically.
    pub clear_cursor: Option<String>,
}

impl RoomPatch {
    /// Roster union for a joining participant.
    pub fn join(user: &ConnectedUser) -> Self {
        Self {
            add_user: Some(user.clone()),
            ..Self::default()
        }
    }

    /// Roster difference plus cursor removal for a leaving participant.
    pub fn leave(user: &ConnectedUser) -> Self {
        Self {
            remove_user: Some(user.clone()),
            clear_cursor: Some(user.id.clone()),
            ..Self::default()
        }
    }

    /// Field-path update of one cursor entry.
    pub fn cursor(cursor: CursorState) -> Self {
        Self {
            set_cursor: Some(cursor),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(user_id: &str, position: usize) -> CursorState {
        CursorState {
            user_id: user_id.to_string(),
            user_name: format!("{} name", user_id),
            cursor_position: position,
            relative_x: 12.0,
            relative_y: 34.0,
            last_updated: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_add_user_is_idempotent() {
        let mut room = Room::new("r1", "Title", "Body", None);
        let alice = ConnectedUser::new("u1", "Alice");

        assert!(room.add_user(&alice));
        assert!(!room.add_user(&alice));
        assert_eq!(room.connected_users.len(), 1);
    }

    #[test]
    fn test_remove_user_matches_whole_pair() {
        let mut room = Room::new("r1", "Title", "Body", None);
        let alice = ConnectedUser::new("u1", "Alice");
        room.add_user(&alice);

        // Same id under a different name is a different roster entry
        assert!(!room.remove_user(&ConnectedUser::new("u1", "Alicia")));
        assert_eq!(room.connected_users.len(), 1);

        assert!(room.remove_user(&alice));
        assert!(room.is_empty());
    }

    #[test]
    fn test_apply_text_patch() {
        let mut room = Room::new("r1", "Old", "Old body", None);
        room.apply(&RoomPatch {
            title: Some("New".to_string()),
            content: Some("New body".to_string()),
            ..RoomPatch::default()
        });

        assert_eq!(room.title, "New");
        assert_eq!(room.content, "New body");
    }

    #[test]
    fn test_cursor_patch_touches_single_entry() {
        let mut room = Room::new("r1", "Title", "Body", None);
        room.apply(&RoomPatch::cursor(cursor("u1", 5)));
        room.apply(&RoomPatch::cursor(cursor("u2", 9)));

        // Updating u1 leaves u2 untouched
        room.apply(&RoomPatch::cursor(cursor("u1", 7)));
        assert_eq!(room.user_cursors["u1"].cursor_position, 7);
        assert_eq!(room.user_cursors["u2"].cursor_position, 9);
    }

    #[test]
    fn test_leave_patch_clears_cursor_key() {
        let mut room = Room::new("r1", "Title", "Body", None);
        let alice = ConnectedUser::new("u1", "Alice");
        room.add_user(&alice);
        room.apply(&RoomPatch::cursor(cursor("u1", 3)));

        room.apply(&RoomPatch::leave(&alice));

        assert!(room.is_empty());
        assert!(!room.user_cursors.contains_key("u1"));
    }

    #[test]
    fn test_viewport_position_subtracts_scroll() {
        let c = cursor("u1", 0);
        assert_eq!(c.viewport_position(0.0, 0.0), (12.0, 34.0));
        assert_eq!(c.viewport_position(2.0, 10.0), (10.0, 24.0));
    }
}
