//! Presence and cursor tracking for room sessions.
//!
//! The roster is maintained with idempotent set patches built in the room
//! model; this module owns the local participant's cursor samples, which
//! are broadcast on their own faster debounce, independent of the
//! title/content write path. Samples coalesce: only the newest position
//! is ever written out.

use crate::room::{ConnectedUser, CursorState, RoomPatch};

/// Debounced broadcaster state for the local participant's cursor.
#[derive(Debug)]
pub struct CursorTracker {
    user: ConnectedUser,
    pending: Option<CursorState>,
}

impl CursorTracker {
    pub fn new(user: ConnectedUser) -> Self {
        Self {
            user,
            pending: None,
        }
    }

    /// Record a cursor sample (movement, selection or typing),
    /// overwriting any sample not yet broadcast. `relative_x`/`relative_y`
    /// are the caret's pixel offset within the unscrolled editing
    /// surface.
    pub fn record(&mut self, cursor_position: usize, relative_x: f64, relative_y: f64) {
        self.pending = Some(CursorState {
            user_id: self.user.id.clone(),
            user_name: self.user.name.clone(),
            cursor_position,
            relative_x,
            relative_y,
            last_updated: chrono::Utc::now().timestamp_millis(),
        });
    }

    /// Take the latest sample as a single-entry field-path patch.
    pub fn take_patch(&mut self) -> Option<RoomPatch> {
        self.pending.take().map(RoomPatch::cursor)
    }

    /// Drop an unsent sample. Used on teardown.
    pub fn discard(&mut self) {
        self.pending = None;
    }
}
