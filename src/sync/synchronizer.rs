//! Per-session room synchronizer.
//!
//! One instance per connected editing session. The synchronizer owns the
//! session state explicitly: view, edit buffer, cursor tracker and timer
//! handles live in one struct rather than being captured across callback
//! closures. Incoming snapshots pass through the remote change filter
//! before reaching the view; local edits are echoed immediately and
//! written out coalesced.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::room::{ConnectedUser, RoomLifecycleManager, RoomPatch};
use crate::storage::{RoomEvent, RoomStore, StoreError};

use super::buffer::{EditBuffer, TextField};
use super::filter::{self, RoomView};
use super::presence::CursorTracker;
use super::{SyncConfig, SyncError, SyncResult};

pub struct RoomSynchronizer {
    shared: Arc<Shared>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    store: Arc<dyn RoomStore>,
    lifecycle: Arc<RoomLifecycleManager>,
    config: SyncConfig,
    room_id: String,
    user: ConnectedUser,
    session: Mutex<Session>,
    view_tx: watch::Sender<RoomView>,
}

/// Mutable per-session state, owned by one synchronizer instance.
struct Session {
    view: RoomView,
    buffer: EditBuffer,
    cursor: CursorTracker,
    write_timer: Option<JoinHandle<()>>,
    cursor_timer: Option<JoinHandle<()>>,
    left: bool,
}

impl RoomSynchronizer {
    /// Join `room_id` as `user`: take the current snapshot and a live
    /// subscription, announce presence and start listening.
    ///
    /// A missing room fails with [`SyncError::RoomNotFound`]; a failed
    /// presence write does not fail the join, it only leaves stale roster
    /// state until the next successful write.
    pub async fn join(
        store: Arc<dyn RoomStore>,
        lifecycle: Arc<RoomLifecycleManager>,
        config: SyncConfig,
        room_id: impl Into<String>,
        user: ConnectedUser,
    ) -> SyncResult<Self> {
        let room_id = room_id.into();

        let (room, events) = store.subscribe(&room_id).await.map_err(|e| match e {
            StoreError::RoomNotFound(id) => SyncError::RoomNotFound(id),
            other => SyncError::ConnectionFailed(other.to_string()),
        })?;

        let view = RoomView::from_room(&room);
        let (view_tx, _) = watch::channel(view.clone());

        let shared = Arc::new(Shared {
            store,
            lifecycle,
            config,
            room_id,
            user: user.clone(),
            session: Mutex::new(Session {
                view,
                buffer: EditBuffer::new(),
                cursor: CursorTracker::new(user),
                write_timer: None,
                cursor_timer: None,
                left: false,
            }),
            view_tx,
        });

        if let Err(e) = shared
            .store
            .apply_patch(&shared.room_id, RoomPatch::join(&shared.user))
            .await
        {
            warn!(
                "Failed to add {} to room {}: {}",
                shared.user.id, shared.room_id, e
            );
        }

        info!("{} joined room {}", shared.user.id, shared.room_id);

        let listener = tokio::spawn(listen(Arc::clone(&shared), events));
        Ok(Self {
            shared,
            listener: Mutex::new(Some(listener)),
        })
    }

    pub fn room_id(&self) -> &str {
        &self.shared.room_id
    }

    pub fn user(&self) -> &ConnectedUser {
        &self.shared.user
    }

    /// Current session view.
    pub fn view(&self) -> RoomView {
        self.shared.session.lock().view.clone()
    }

    /// Watch channel carrying every view change; coalesces to the latest
    /// value for slow consumers.
    pub fn watch_view(&self) -> watch::Receiver<RoomView> {
        self.shared.view_tx.subscribe()
    }

    pub fn set_title(&self, title: String) {
        self.set_field(TextField::Title, title);
    }

    pub fn set_content(&self, content: String) {
        self.set_field(TextField::Content, content);
    }

    /// Optimistic echo into the view, then buffer the value and re-arm
    /// the shared debounce timer.
    fn set_field(&self, field: TextField, value: String) {
        let mut session = self.shared.session.lock();
        if session.left {
            return;
        }

        match field {
            TextField::Title => session.view.title = value.clone(),
            TextField::Content => session.view.content = value.clone(),
        }
        session.buffer.record(field, value, Instant::now());
        self.shared.view_tx.send_replace(session.view.clone());

        if let Some(timer) = session.write_timer.take() {
            timer.abort();
        }
        let shared = Arc::clone(&self.shared);
        session.write_timer = Some(tokio::spawn(async move {
            sleep(shared.config.write_debounce).await;
            flush_text(shared).await;
        }));
    }

    /// Record a cursor sample; broadcast on the independent, faster
    /// cursor debounce.
    pub fn update_cursor(&self, cursor_position: usize, relative_x: f64, relative_y: f64) {
        let mut session = self.shared.session.lock();
        if session.left {
            return;
        }

        session.cursor.record(cursor_position, relative_x, relative_y);

        if let Some(timer) = session.cursor_timer.take() {
            timer.abort();
        }
        let shared = Arc::clone(&self.shared);
        session.cursor_timer = Some(tokio::spawn(async move {
            sleep(shared.config.cursor_debounce).await;
            flush_cursor(shared).await;
        }));
    }

    /// Leave the room: cancel unflushed timers (a debounced write must
    /// not land after the participant is gone), withdraw presence and
    /// cursor, and delete the room if this was the last participant.
    /// Idempotent.
    pub async fn leave(&self) {
        {
            let mut session = self.shared.session.lock();
            if session.left {
                return;
            }
            session.left = true;
            if let Some(timer) = session.write_timer.take() {
                timer.abort();
            }
            if let Some(timer) = session.cursor_timer.take() {
                timer.abort();
            }
            session.buffer.discard();
            session.cursor.discard();
        }
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }

        let shared = &self.shared;
        if let Err(e) = shared
            .store
            .apply_patch(&shared.room_id, RoomPatch::leave(&shared.user))
            .await
        {
            warn!(
                "Failed to remove {} from room {}: {}",
                shared.user.id, shared.room_id, e
            );
        }

        match shared.lifecycle.maybe_delete_if_empty(&shared.room_id).await {
            Ok(true) => debug!(
                "Room {} deleted after last participant left",
                shared.room_id
            ),
            Ok(false) => {}
            // Left orphaned until the periodic sweep catches it
            Err(e) => warn!("Empty-room check failed for {}: {}", shared.room_id, e),
        }

        info!("{} left room {}", shared.user.id, shared.room_id);
    }
}

impl Drop for RoomSynchronizer {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        let mut session = self.shared.session.lock();
        if let Some(timer) = session.write_timer.take() {
            timer.abort();
        }
        if let Some(timer) = session.cursor_timer.take() {
            timer.abort();
        }
    }
}

/// Subscription loop: every snapshot goes through the remote change
/// filter; deletion and transport loss become room-level error states.
/// No automatic resubscribe is attempted.
async fn listen(shared: Arc<Shared>, mut events: broadcast::Receiver<RoomEvent>) {
    loop {
        match events.recv().await {
            Ok(RoomEvent::Snapshot(room)) => {
                let mut session = shared.session.lock();
                if session.left {
                    break;
                }
                let now = Instant::now();
                let session = &mut *session;
                filter::merge_snapshot(&mut session.view, &room, &session.buffer, &shared.config, now);
                shared.view_tx.send_replace(session.view.clone());
            }
            Ok(RoomEvent::Deleted) => {
                let mut session = shared.session.lock();
                if !session.left {
                    session.view.connected = false;
                    session.view.error = Some(
                        SyncError::RoomNotFound(shared.room_id.clone())
                            .ui_message()
                            .to_string(),
                    );
                    shared.view_tx.send_replace(session.view.clone());
                }
                break;
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                // Full snapshots: the next event catches us up
                warn!(
                    "Room {} subscription lagged by {} events",
                    shared.room_id, missed
                );
            }
            Err(broadcast::error::RecvError::Closed) => {
                let mut session = shared.session.lock();
                if !session.left {
                    session.view.connected = false;
                    session.view.error = Some(
                        SyncError::ConnectionFailed("subscription closed".to_string())
                            .ui_message()
                            .to_string(),
                    );
                    shared.view_tx.send_replace(session.view.clone());
                }
                break;
            }
        }
    }
}

/// Debounce expiry for the text fields: issue one write carrying every
/// buffered value. Optimistic local state is never rolled back on
/// failure.
async fn flush_text(shared: Arc<Shared>) {
    let patch = {
        let mut session = shared.session.lock();
        session.write_timer = None;
        if session.left {
            return;
        }
        session.buffer.begin_flush()
    };

    let Some(patch) = patch else { return };
    if let Err(e) = shared.store.apply_patch(&shared.room_id, patch).await {
        error!(
            "Failed to write buffered edit for room {}: {}",
            shared.room_id, e
        );
    }
    shared.session.lock().buffer.finish_flush();
}

/// Cursor debounce expiry: write the newest sample as a field-path
/// update.
async fn flush_cursor(shared: Arc<Shared>) {
    let patch = {
        let mut session = shared.session.lock();
        session.cursor_timer = None;
        if session.left {
            return;
        }
        session.cursor.take_patch()
    };

    let Some(patch) = patch else { return };
    if let Err(e) = shared.store.apply_patch(&shared.room_id, patch).await {
        warn!(
            "Failed to update cursor position in room {}: {}",
            shared.room_id, e
        );
    }
}
