//! JSON WebSocket protocol between an editing client and its room
//! session.
//!
//! Messages are `type`-tagged JSON text frames with camelCase field
//! names. The server pushes the full session view on every change, so a
//! client never needs a catch-up exchange.

use serde::{Deserialize, Serialize};

use super::filter::RoomView;

/// Messages sent by the editing client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Replace the draft content. Echoed optimistically, persisted
    /// debounced.
    SetContent { content: String },
    /// Replace the draft title. Same path as content.
    SetTitle { title: String },
    /// Cursor sample: character offset plus pixel offsets relative to
    /// unscrolled content.
    Cursor {
        cursor_position: usize,
        relative_x: f64,
        relative_y: f64,
    },
    /// Explicitly leave the room. Teardown without this message runs the
    /// same leave flow.
    Leave,
    Ping { timestamp: i64 },
}

/// Messages sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Full session view; sent once on connect and then on every change.
    Room {
        #[serde(flatten)]
        view: RoomView,
    },
    /// Room-level failure ("Room not found", "Failed to connect to
    /// room").
    Error { message: String },
    Pong { timestamp: i64, server_time: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_client_edit() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"setContent","content":"Hello"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::SetContent { content } if content == "Hello"));
    }

    #[test]
    fn test_decode_cursor_sample() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"cursor","cursorPosition":12,"relativeX":140.5,"relativeY":32.0}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Cursor {
                cursor_position,
                relative_x,
                relative_y,
            } => {
                assert_eq!(cursor_position, 12);
                assert_eq!(relative_x, 140.5);
                assert_eq!(relative_y, 32.0);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_encode_room_view_is_flattened() {
        let msg = ServerMessage::Room {
            view: RoomView {
                title: "Draft".to_string(),
                content: "Body".to_string(),
                connected: true,
                ..RoomView::default()
            },
        };

        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "room");
        assert_eq!(json["title"], "Draft");
        assert_eq!(json["connectedUsers"], serde_json::json!([]));
        assert_eq!(json["connected"], true);
    }

    #[test]
    fn test_unknown_message_type_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"dance"}"#).is_err());
    }
}
