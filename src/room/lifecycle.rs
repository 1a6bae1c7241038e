//! Room lifecycle: creation/seeding, empty-room deletion and the idle
//! sweep.
//!
//! Deletion happens in two places. The leave path checks synchronously so
//! the last participant leaving removes the room deterministically. The
//! periodic sweep is the safety net for rooms abandoned without a clean
//! leave (crashed tab, network loss before the leave write landed).

use std::sync::Arc;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{error, info};

use crate::storage::{RoomStore, StoreResult};

use super::Room;

const ROOM_ID_LEN: usize = 9;

/// Short random lowercase alphanumeric room id, generated at creation.
pub fn generate_room_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ROOM_ID_LEN)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

/// Seed material for a new room.
#[derive(Debug, Clone, Default)]
pub struct RoomSeed {
    pub title: String,
    pub content: String,
    pub source_content_id: Option<String>,
}

/// Schedule for the background sweep of abandoned rooms.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// How often the sweep runs
    pub interval: Duration,
    /// Minimum idle age before an empty room is deleted
    pub idle_after: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            idle_after: Duration::from_secs(3600),
        }
    }
}

/// Creates rooms pre-populated from source content and deletes rooms
/// whose roster has emptied.
pub struct RoomLifecycleManager {
    store: Arc<dyn RoomStore>,
}

impl RoomLifecycleManager {
    pub fn new(store: Arc<dyn RoomStore>) -> Self {
        Self { store }
    }

    /// Generate a room id and write the initial document: seed
    /// title/content, empty roster, no cursors.
    pub async fn create_room(&self, seed: RoomSeed) -> StoreResult<Room> {
        let room = Room::new(
            generate_room_id(),
            seed.title,
            seed.content,
            seed.source_content_id,
        );
        self.store.create_room(&room).await?;
        info!("Created room: {}", room.id);
        Ok(room)
    }

    /// Delete the room iff it exists and its roster is empty. Returns
    /// whether a deletion happened.
    ///
    /// A room is only ever deleted while empty; a participant joining
    /// between the read and the delete is the one tolerated race, and the
    /// joiner's own leave path (or the sweep) covers it.
    pub async fn maybe_delete_if_empty(&self, room_id: &str) -> StoreResult<bool> {
        match self.store.get_room(room_id).await? {
            Some(room) if room.is_empty() => {
                self.store.delete_room(room_id).await?;
                info!("Deleted empty room: {}", room_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Rooms with an empty roster whose last mutation is older than
    /// `idle`.
    pub async fn list_empty_rooms_older_than(&self, idle: Duration) -> StoreResult<Vec<Room>> {
        let cutoff = chrono::Utc::now().timestamp_millis() - idle.as_millis() as i64;
        let rooms = self.store.list_rooms().await?;
        Ok(rooms
            .into_iter()
            .filter(|room| room.is_empty() && room.updated_at < cutoff)
            .collect())
    }

    /// Delete every empty room idle for at least `idle`. Returns the
    /// number of rooms deleted; individual delete failures are logged and
    /// skipped.
    pub async fn sweep_idle_rooms(&self, idle: Duration) -> StoreResult<usize> {
        let stale = self.list_empty_rooms_older_than(idle).await?;
        let mut deleted = 0;
        for room in stale {
            match self.store.delete_room(&room.id).await {
                Ok(()) => deleted += 1,
                Err(e) => error!("Failed to delete idle room {}: {}", room.id, e),
            }
        }
        if deleted > 0 {
            info!("Cleaned up {} empty rooms", deleted);
        }
        Ok(deleted)
    }

    /// Spawn the periodic sweep task.
    pub fn start_sweeper(self: Arc<Self>, config: SweepConfig) -> tokio::task::JoinHandle<()> {
        let manager = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.interval);
            // The first tick completes immediately; skip it so the sweep
            // runs one full interval after startup.
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = manager.sweep_idle_rooms(config.idle_after).await {
                    error!("Room sweep failed: {}", e);
                }
            }
        })
    }
}
