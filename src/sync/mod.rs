//! Synchronization module for collaborative room sessions.
//!
//! Keeps a shared title/content pair, a participant roster and
//! per-participant cursor markers consistent across sessions connected to
//! the same room, using the room store's push-based subscription as
//! transport. It provides:
//! - An edit buffer with optimistic local echo and debounced writes
//! - A remote change filter that keeps stale echoes off fresh edits
//! - Presence and cursor broadcasting on an independent debounce
//! - One synchronizer instance per active room session
//!
//! Conflict policy is last-write-wins per field. The debounce and
//! suppression windows narrow the interval in which a session overwrites
//! its own fresh edit with a stale remote echo; they do not provide
//! convergence under concurrent edits.

pub mod buffer;
pub mod filter;
pub mod presence;
pub mod protocol;
pub mod synchronizer;

pub use filter::RoomView;
pub use synchronizer::RoomSynchronizer;

use std::time::Duration;

use crate::storage::StoreError;

/// Unique identifier for a room
pub type RoomId = String;

/// Unique identifier for a participant
pub type UserId = String;

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while running a room session
#[derive(Debug, Clone)]
pub enum SyncError {
    /// Room does not exist, or was deleted mid-session
    RoomNotFound(RoomId),
    /// The subscription transport failed
    ConnectionFailed(String),
    /// Storage operation failed
    Store(String),
}

impl SyncError {
    /// The message surfaced to the editing UI for this error. Only
    /// connection-level failures reach the user; per-write failures stay
    /// in the logs.
    pub fn ui_message(&self) -> &'static str {
        match self {
            SyncError::RoomNotFound(_) => "Room not found",
            SyncError::ConnectionFailed(_) | SyncError::Store(_) => "Failed to connect to room",
        }
    }
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::RoomNotFound(id) => write!(f, "Room not found: {}", id),
            SyncError::ConnectionFailed(msg) => write!(f, "Failed to connect to room: {}", msg),
            SyncError::Store(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RoomNotFound(id) => SyncError::RoomNotFound(id),
            other => SyncError::Store(other.to_string()),
        }
    }
}

/// Timing configuration for a room session
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Quiet period before buffered title/content edits are written out
    pub write_debounce: Duration,
    /// Window after a local edit during which remote values for that
    /// field are not applied
    pub suppression_window: Duration,
    /// Quiet period before the latest cursor sample is broadcast
    pub cursor_debounce: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            write_debounce: Duration::from_millis(150),
            suppression_window: Duration::from_millis(300),
            cursor_debounce: Duration::from_millis(100),
        }
    }
}
