//! Sled-backed room store with broadcast-based live subscriptions.
//!
//! Rooms are bincode rows in a single Sled tree. Each room has a
//! broadcast channel; every committed mutation publishes a full snapshot
//! to it. A per-room write lock serializes read-modify-write cycles so
//! publish order always equals commit order.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use sled::{Db, Tree};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::{RoomEvent, RoomStore, StoreConfig, StoreError, StoreResult};
use crate::room::{Room, RoomPatch};

const TREE_ROOMS: &str = "rooms";

/// Capacity of each per-room event channel. A subscriber that falls this
/// far behind misses intermediate snapshots; the next event carries the
/// full document, so nothing else is needed for catch-up.
const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct SledRoomStore {
    db: Arc<Db>,
    rooms: Tree,
    /// Live subscription channels, one per room with active interest
    watchers: DashMap<String, broadcast::Sender<RoomEvent>>,
    /// Per-room write locks: publish order must equal commit order
    write_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SledRoomStore {
    /// Open or create a room store at the configured path.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        let path = Path::new(&config.path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::InitFailed(format!("Failed to create directory: {}", e))
            })?;
        }

        let db = sled::Config::new()
            .path(&config.path)
            .cache_capacity(config.cache_size)
            .flush_every_ms(if config.flush_interval_ms > 0 {
                Some(config.flush_interval_ms)
            } else {
                None
            })
            .open()?;

        let rooms = db.open_tree(TREE_ROOMS)?;

        Ok(Self {
            db: Arc::new(db),
            rooms,
            watchers: DashMap::new(),
            write_locks: DashMap::new(),
        })
    }

    /// Open with default configuration
    pub fn open_default() -> StoreResult<Self> {
        Self::open(StoreConfig::default())
    }

    fn write_lock(&self, room_id: &str) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn read_room(&self, room_id: &str) -> StoreResult<Option<Room>> {
        match self.rooms.get(room_id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_room(&self, room: &Room) -> StoreResult<()> {
        let bytes = bincode::serialize(room)?;
        self.rooms.insert(room.id.as_bytes(), bytes)?;
        Ok(())
    }

    fn watcher(&self, room_id: &str) -> broadcast::Sender<RoomEvent> {
        self.watchers
            .entry(room_id.to_string())
            .or_insert_with(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0)
            .clone()
    }

    fn publish(&self, room_id: &str, event: RoomEvent) {
        if let Some(tx) = self.watchers.get(room_id) {
            let _ = tx.send(event);
        }
    }

    /// Force flush all pending writes to disk
    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[async_trait]
impl RoomStore for SledRoomStore {
    async fn create_room(&self, room: &Room) -> StoreResult<()> {
        let lock = self.write_lock(&room.id);
        let _guard = lock.lock();

        if self.rooms.contains_key(room.id.as_bytes())? {
            return Err(StoreError::AlreadyExists(room.id.clone()));
        }

        self.write_room(room)?;
        self.publish(&room.id, RoomEvent::Snapshot(room.clone()));
        debug!("Created room record: {}", room.id);
        Ok(())
    }

    async fn get_room(&self, room_id: &str) -> StoreResult<Option<Room>> {
        self.read_room(room_id)
    }

    async fn apply_patch(&self, room_id: &str, patch: RoomPatch) -> StoreResult<()> {
        let lock = self.write_lock(room_id);
        let _guard = lock.lock();

        let mut room = self
            .read_room(room_id)?
            .ok_or_else(|| StoreError::RoomNotFound(room_id.to_string()))?;

        room.apply(&patch);
        room.updated_at = chrono::Utc::now().timestamp_millis();

        self.write_room(&room)?;
        self.publish(room_id, RoomEvent::Snapshot(room));
        Ok(())
    }

    async fn delete_room(&self, room_id: &str) -> StoreResult<()> {
        let lock = self.write_lock(room_id);
        {
            let _guard = lock.lock();

            if self.rooms.remove(room_id.as_bytes())?.is_some() {
                self.publish(room_id, RoomEvent::Deleted);
                debug!("Deleted room record: {}", room_id);
            }
            // Dropping the sender closes the channel for any subscriber
            // that missed the Deleted event.
            self.watchers.remove(room_id);
        }
        self.write_locks.remove(room_id);
        Ok(())
    }

    // The snapshot and the subscription are taken under the write lock,
    // so no commit can fall between them.
    async fn subscribe(
        &self,
        room_id: &str,
    ) -> StoreResult<(Room, broadcast::Receiver<RoomEvent>)> {
        let lock = self.write_lock(room_id);
        let _guard = lock.lock();

        let room = self
            .read_room(room_id)?
            .ok_or_else(|| StoreError::RoomNotFound(room_id.to_string()))?;
        let rx = self.watcher(room_id).subscribe();
        Ok((room, rx))
    }

    async fn list_rooms(&self) -> StoreResult<Vec<Room>> {
        let mut rooms = Vec::new();
        for item in self.rooms.iter() {
            let (_, value) = item?;
            rooms.push(bincode::deserialize(&value)?);
        }
        Ok(rooms)
    }
}

impl Drop for SledRoomStore {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::{ConnectedUser, CursorState};
    use tempfile::TempDir;

    fn test_store() -> (TempDir, SledRoomStore) {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::new(dir.path().join("test.sled").to_string_lossy().to_string());
        let store = SledRoomStore::open(config).unwrap();
        (dir, store)
    }

    fn cursor(user_id: &str, position: usize) -> CursorState {
        CursorState {
            user_id: user_id.to_string(),
            user_name: format!("{} name", user_id),
            cursor_position: position,
            relative_x: 1.0,
            relative_y: 2.0,
            last_updated: 1_700_000_000_000,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (_dir, store) = test_store();
        let room = Room::new("r1", "Title", "Body", Some("post-1".to_string()));

        store.create_room(&room).await.unwrap();
        let loaded = store.get_room("r1").await.unwrap().unwrap();

        assert_eq!(loaded, room);
        assert!(store.get_room("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_duplicate_fails() {
        let (_dir, store) = test_store();
        let room = Room::new("r1", "Title", "Body", None);

        store.create_room(&room).await.unwrap();
        let err = store.create_room(&room).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_patch_stamps_updated_at() {
        let (_dir, store) = test_store();
        let mut room = Room::new("r1", "Title", "Body", None);
        room.updated_at = 0;
        store.create_room(&room).await.unwrap();

        store
            .apply_patch(
                "r1",
                RoomPatch {
                    content: Some("Edited".to_string()),
                    ..RoomPatch::default()
                },
            )
            .await
            .unwrap();

        let loaded = store.get_room("r1").await.unwrap().unwrap();
        assert_eq!(loaded.content, "Edited");
        assert!(loaded.updated_at > 0);
    }

    #[tokio::test]
    async fn test_patch_missing_room_fails() {
        let (_dir, store) = test_store();
        let err = store
            .apply_patch("nope", RoomPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RoomNotFound(_)));
    }

    #[tokio::test]
    async fn test_roster_set_semantics() {
        let (_dir, store) = test_store();
        store
            .create_room(&Room::new("r1", "Title", "Body", None))
            .await
            .unwrap();
        let alice = ConnectedUser::new("u1", "Alice");

        store
            .apply_patch("r1", RoomPatch::join(&alice))
            .await
            .unwrap();
        store
            .apply_patch("r1", RoomPatch::join(&alice))
            .await
            .unwrap();

        let loaded = store.get_room("r1").await.unwrap().unwrap();
        assert_eq!(loaded.connected_users, vec![alice.clone()]);

        store
            .apply_patch("r1", RoomPatch::leave(&alice))
            .await
            .unwrap();
        assert!(store.get_room("r1").await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cursor_field_path_update() {
        let (_dir, store) = test_store();
        store
            .create_room(&Room::new("r1", "Title", "Body", None))
            .await
            .unwrap();

        store
            .apply_patch("r1", RoomPatch::cursor(cursor("u1", 5)))
            .await
            .unwrap();
        store
            .apply_patch("r1", RoomPatch::cursor(cursor("u2", 8)))
            .await
            .unwrap();
        store
            .apply_patch("r1", RoomPatch::cursor(cursor("u1", 6)))
            .await
            .unwrap();

        let loaded = store.get_room("r1").await.unwrap().unwrap();
        assert_eq!(loaded.user_cursors.len(), 2);
        assert_eq!(loaded.user_cursors["u1"].cursor_position, 6);
        assert_eq!(loaded.user_cursors["u2"].cursor_position, 8);
    }

    #[tokio::test]
    async fn test_subscribe_delivers_snapshots_in_commit_order() {
        let (_dir, store) = test_store();
        store
            .create_room(&Room::new("r1", "Title", "v0", None))
            .await
            .unwrap();

        let (initial, mut rx) = store.subscribe("r1").await.unwrap();
        assert_eq!(initial.content, "v0");

        for value in ["v1", "v2", "v3"] {
            store
                .apply_patch(
                    "r1",
                    RoomPatch {
                        content: Some(value.to_string()),
                        ..RoomPatch::default()
                    },
                )
                .await
                .unwrap();
        }

        for expected in ["v1", "v2", "v3"] {
            match rx.recv().await.unwrap() {
                RoomEvent::Snapshot(room) => assert_eq!(room.content, expected),
                RoomEvent::Deleted => panic!("unexpected deletion"),
            }
        }
    }

    #[tokio::test]
    async fn test_subscribe_missing_room_fails() {
        let (_dir, store) = test_store();
        let err = store.subscribe("nope").await.unwrap_err();
        assert!(matches!(err, StoreError::RoomNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_publishes_deleted_event() {
        let (_dir, store) = test_store();
        store
            .create_room(&Room::new("r1", "Title", "Body", None))
            .await
            .unwrap();
        let (_initial, mut rx) = store.subscribe("r1").await.unwrap();

        store.delete_room("r1").await.unwrap();

        assert!(matches!(rx.recv().await.unwrap(), RoomEvent::Deleted));
        assert!(store.get_room("r1").await.unwrap().is_none());

        // Deleting again is a no-op
        store.delete_room("r1").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_rooms() {
        let (_dir, store) = test_store();
        store
            .create_room(&Room::new("r1", "A", "", None))
            .await
            .unwrap();
        store
            .create_room(&Room::new("r2", "B", "", None))
            .await
            .unwrap();

        let mut ids: Vec<String> = store
            .list_rooms()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["r1", "r2"]);
    }
}
