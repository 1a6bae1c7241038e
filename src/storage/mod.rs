//! Storage module for room documents and their live subscriptions.
//!
//! The synchronizer never talks to the database directly; it goes through
//! the [`RoomStore`] trait, which wraps point reads/writes/deletes and a
//! push-based subscription against a single document per room. The
//! production implementation is Sled-backed; tests inject doubles.

mod sled_store;

pub use sled_store::SledRoomStore;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::room::{Room, RoomPatch};

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Sled database error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Room already exists: {0}")]
    AlreadyExists(String),

    #[error("Storage initialization failed: {0}")]
    InitFailed(String),
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Events pushed to room subscribers. Every committed mutation delivers a
/// full materialization of the document; deletion is terminal.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    Snapshot(Room),
    Deleted,
}

/// Point reads/writes/deletes and a live subscription against a single
/// room document.
///
/// Implementations must publish events to each subscriber in commit
/// order. A lagged subscriber may miss intermediate events; since every
/// snapshot is a full document, the next event catches it up.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Insert a full room document. Errors if the id is already taken.
    async fn create_room(&self, room: &Room) -> StoreResult<()>;

    /// Awaited point read.
    async fn get_room(&self, room_id: &str) -> StoreResult<Option<Room>>;

    /// Atomic read-modify-write of a single room: last-write-wins field
    /// updates, roster set operations and single-cursor-entry updates.
    /// Stamps `updated_at` on commit.
    async fn apply_patch(&self, room_id: &str, patch: RoomPatch) -> StoreResult<()>;

    /// Idempotent delete; publishes [`RoomEvent::Deleted`] if the room
    /// existed.
    async fn delete_room(&self, room_id: &str) -> StoreResult<()>;

    /// Current snapshot plus a live event feed for one room.
    async fn subscribe(
        &self,
        room_id: &str,
    ) -> StoreResult<(Room, broadcast::Receiver<RoomEvent>)>;

    /// All stored rooms (sweep support).
    async fn list_rooms(&self) -> StoreResult<Vec<Room>>;
}

/// Configuration for the storage layer
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the Sled database directory
    pub path: String,
    /// Cache size in bytes
    pub cache_size: u64,
    /// Flush interval in milliseconds (0 = immediate)
    pub flush_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "./data/draftroom.sled".to_string(),
            cache_size: 64 * 1024 * 1024,
            flush_interval_ms: 500,
        }
    }
}

impl StoreConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_cache_size(mut self, size: u64) -> Self {
        self.cache_size = size;
        self
    }
}
