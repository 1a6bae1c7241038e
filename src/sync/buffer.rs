//! Local edit buffer: optimistic echo and debounced outbound writes.
//!
//! Keystroke-rate UI updates are decoupled from network-rate persistence.
//! Edits land in the session's view immediately; the buffer tracks what
//! still needs writing and coalesces rapid edits so only the latest value
//! per field ever reaches the store. Title and content share one debounce
//! deadline; recording either field re-arms it.

use std::time::Duration;

use tokio::time::Instant;

use crate::room::RoomPatch;

/// The two text fields covered by the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    Title,
    Content,
}

#[derive(Debug, Default)]
struct FieldSlot {
    /// Latest value not yet handed to a write
    pending: Option<String>,
    /// A write carrying this field has been issued and has not settled
    in_flight: bool,
    /// When the participant last edited this field locally
    last_local_edit: Option<Instant>,
}

impl FieldSlot {
    fn dirty(&self) -> bool {
        self.pending.is_some() || self.in_flight
    }
}

/// Explicit per-session edit state: pending values, in-flight flags and
/// last-edit timestamps, owned by exactly one synchronizer per room
/// subscription.
#[derive(Debug, Default)]
pub struct EditBuffer {
    title: FieldSlot,
    content: FieldSlot,
}

impl EditBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, field: TextField) -> &FieldSlot {
        match field {
            TextField::Title => &self.title,
            TextField::Content => &self.content,
        }
    }

    fn slot_mut(&mut self, field: TextField) -> &mut FieldSlot {
        match field {
            TextField::Title => &mut self.title,
            TextField::Content => &mut self.content,
        }
    }

    /// Record a local edit. The caller has already echoed the value into
    /// the session view; the buffer only tracks what still needs writing.
    pub fn record(&mut self, field: TextField, value: String, now: Instant) {
        let slot = self.slot_mut(field);
        slot.pending = Some(value);
        slot.last_local_edit = Some(now);
    }

    /// Move every buffered value into flight and return the single write
    /// to issue, or `None` when nothing is buffered. Intermediate values
    /// recorded before this call are already gone; only the latest
    /// survives.
    pub fn begin_flush(&mut self) -> Option<RoomPatch> {
        let title = self.title.pending.take();
        let content = self.content.pending.take();
        if title.is_none() && content.is_none() {
            return None;
        }
        if title.is_some() {
            self.title.in_flight = true;
        }
        if content.is_some() {
            self.content.in_flight = true;
        }
        Some(RoomPatch {
            title,
            content,
            ..RoomPatch::default()
        })
    }

    /// Mark the in-flight write as settled (success or failure). Values
    /// recorded while the write was in flight stay pending for the next
    /// flush.
    pub fn finish_flush(&mut self) {
        self.title.in_flight = false;
        self.content.in_flight = false;
    }

    /// Whether an incoming remote value for `field` may be applied
    /// locally. Suppressed while a write is buffered or in flight, and
    /// for `suppression_window` after the last local edit: a remote
    /// snapshot reflecting an older value can arrive just after a local
    /// edit, before the write has even been scheduled.
    pub fn should_apply_remote(
        &self,
        field: TextField,
        now: Instant,
        suppression_window: Duration,
    ) -> bool {
        let slot = self.slot(field);
        if slot.dirty() {
            return false;
        }
        match slot.last_local_edit {
            Some(edited) => now.duration_since(edited) >= suppression_window,
            None => true,
        }
    }

    /// Drop buffered values without writing them. Used on teardown: a
    /// debounced write must not land after the participant has left.
    pub fn discard(&mut self) {
        self.title.pending = None;
        self.content.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(300);

    #[tokio::test(start_paused = true)]
    async fn test_rapid_edits_coalesce_to_latest() {
        let mut buffer = EditBuffer::new();
        let now = Instant::now();

        for value in ["H", "He", "Hel", "Hell", "Hello"] {
            buffer.record(TextField::Content, value.to_string(), now);
        }

        let patch = buffer.begin_flush().unwrap();
        assert_eq!(patch.content.as_deref(), Some("Hello"));
        assert!(patch.title.is_none());

        // Nothing left to write
        buffer.finish_flush();
        assert!(buffer.begin_flush().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_flush_carries_both_fields() {
        let mut buffer = EditBuffer::new();
        let now = Instant::now();

        buffer.record(TextField::Title, "Draft".to_string(), now);
        buffer.record(TextField::Content, "Body".to_string(), now);

        let patch = buffer.begin_flush().unwrap();
        assert_eq!(patch.title.as_deref(), Some("Draft"));
        assert_eq!(patch.content.as_deref(), Some("Body"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_suppressed_while_pending_or_in_flight() {
        let mut buffer = EditBuffer::new();
        let now = Instant::now();
        buffer.record(TextField::Content, "mine".to_string(), now);

        tokio::time::advance(Duration::from_secs(10)).await;
        let later = Instant::now();

        // Pending: suppressed even long after the edit
        assert!(!buffer.should_apply_remote(TextField::Content, later, WINDOW));

        // In flight: still suppressed
        buffer.begin_flush().unwrap();
        assert!(!buffer.should_apply_remote(TextField::Content, later, WINDOW));

        // Settled and outside the window: remote applies
        buffer.finish_flush();
        assert!(buffer.should_apply_remote(TextField::Content, later, WINDOW));
    }

    #[tokio::test(start_paused = true)]
    async fn test_suppression_window_after_flush() {
        let mut buffer = EditBuffer::new();
        buffer.record(TextField::Content, "mine".to_string(), Instant::now());
        buffer.begin_flush().unwrap();
        buffer.finish_flush();

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(!buffer.should_apply_remote(TextField::Content, Instant::now(), WINDOW));

        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(buffer.should_apply_remote(TextField::Content, Instant::now(), WINDOW));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fields_are_suppressed_independently() {
        let mut buffer = EditBuffer::new();
        let now = Instant::now();
        buffer.record(TextField::Title, "mine".to_string(), now);

        assert!(!buffer.should_apply_remote(TextField::Title, now, WINDOW));
        assert!(buffer.should_apply_remote(TextField::Content, now, WINDOW));
    }

    #[tokio::test(start_paused = true)]
    async fn test_discard_drops_buffered_values() {
        let mut buffer = EditBuffer::new();
        buffer.record(TextField::Content, "never written".to_string(), Instant::now());

        buffer.discard();
        assert!(buffer.begin_flush().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_during_flight_stays_pending() {
        let mut buffer = EditBuffer::new();
        let now = Instant::now();
        buffer.record(TextField::Content, "v1".to_string(), now);
        buffer.begin_flush().unwrap();

        buffer.record(TextField::Content, "v2".to_string(), now);
        buffer.finish_flush();

        let patch = buffer.begin_flush().unwrap();
        assert_eq!(patch.content.as_deref(), Some("v2"));
    }
}
