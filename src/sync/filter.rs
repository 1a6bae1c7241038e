//! Remote change filter: applies incoming snapshots to the session view
//! without clobbering an in-flight local edit, and without reintroducing
//! stale data after a local write completes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::time::Instant;

use crate::room::{ConnectedUser, CursorState, Room};

use super::buffer::{EditBuffer, TextField};
use super::SyncConfig;

/// The session's local materialization of a room, as shown to the editor:
/// text fields after optimistic echo, the roster, the cursor map and the
/// connection state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub title: String,
    pub content: String,
    pub connected_users: Vec<ConnectedUser>,
    pub user_cursors: HashMap<String, CursorState>,
    pub connected: bool,
    pub error: Option<String>,
}

impl RoomView {
    pub fn from_room(room: &Room) -> Self {
        Self {
            title: room.title.clone(),
            content: room.content.clone(),
            connected_users: room.connected_users.clone(),
            user_cursors: room.user_cursors.clone(),
            connected: true,
            error: None,
        }
    }
}

/// Merge one incoming snapshot into the session view.
///
/// Per text field: skip if a local write is pending or in flight, skip if
/// the suppression window since the last local edit has not passed,
/// otherwise apply the remote value. The roster and the cursor map are
/// applied verbatim from every snapshot; they are not locally buffered.
pub fn merge_snapshot(
    view: &mut RoomView,
    room: &Room,
    buffer: &EditBuffer,
    config: &SyncConfig,
    now: Instant,
) {
    if buffer.should_apply_remote(TextField::Content, now, config.suppression_window) {
        view.content = room.content.clone();
    }
    if buffer.should_apply_remote(TextField::Title, now, config.suppression_window) {
        view.title = room.title.clone();
    }

    view.connected_users = room.connected_users.clone();
    view.user_cursors = room.user_cursors.clone();
    view.connected = true;
    view.error = None;
}
