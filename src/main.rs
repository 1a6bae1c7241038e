//! Draftroom Server - Real-Time Collaborative Draft Editing
//!
//! A collaboration server where each room is a shared title/content
//! document with last-write-wins fields, a participant roster and
//! broadcast cursor markers:
//! - Sled-backed room store with push-based live subscriptions
//! - One per-session synchronizer per WebSocket connection, with
//!   debounced writes and stale-echo suppression
//! - Lifecycle management: seeded creation, last-leaver deletion and an
//!   hourly sweep of abandoned rooms

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use anyhow::Context;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};

mod content;
mod room;
mod storage;
mod sync;

use content::ContentClient;
use room::{ConnectedUser, RoomLifecycleManager, RoomSeed, SweepConfig};
use storage::{RoomStore, SledRoomStore, StoreConfig};
use sync::{
    protocol::{ClientMessage, ServerMessage},
    RoomSynchronizer, SyncConfig,
};

// ============================================================================
// APPLICATION STATE
// ============================================================================

/// Shared application state
pub struct AppState {
    store: Arc<dyn RoomStore>,
    lifecycle: Arc<RoomLifecycleManager>,
    content: ContentClient,
    sync_config: SyncConfig,
    started_at: std::time::Instant,
}

// ============================================================================
// API TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    active_rooms: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomRequest {
    source_content_id: Option<String>,
    /// Inline seed; takes precedence over a content fetch
    title: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomResponse {
    room_id: String,
    source_content_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RoomDetailResponse {
    room_id: String,
    title: String,
    participant_count: usize,
    associated_content_id: Option<String>,
    created_at: i64,
    updated_at: i64,
}

#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
    details: Option<String>,
}

// ============================================================================
// HTTP HANDLERS
// ============================================================================

/// Health check endpoint
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let active_rooms = state
        .store
        .list_rooms()
        .await
        .map(|rooms| rooms.len())
        .unwrap_or(0);

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        active_rooms,
    })
}

/// Create a room, optionally seeded from an existing content item.
async fn create_room(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateRoomRequest>,
) -> Result<Json<CreateRoomResponse>, (StatusCode, Json<ApiError>)> {
    let seed = if payload.title.is_some() || payload.content.is_some() {
        RoomSeed {
            title: payload.title.unwrap_or_default(),
            content: payload.content.unwrap_or_default(),
            source_content_id: payload.source_content_id,
        }
    } else if let Some(content_id) = payload.source_content_id {
        match state.content.fetch_source(&content_id).await {
            Ok(source) => RoomSeed {
                title: source.title,
                content: source.content,
                source_content_id: Some(content_id),
            },
            Err(e) => {
                error!("Failed to fetch seed content {}: {}", content_id, e);
                return Err((
                    StatusCode::BAD_GATEWAY,
                    Json(ApiError {
                        error: "Failed to load source content".to_string(),
                        details: Some(e.to_string()),
                    }),
                ));
            }
        }
    } else {
        RoomSeed::default()
    };

    match state.lifecycle.create_room(seed).await {
        Ok(room) => Ok(Json(CreateRoomResponse {
            room_id: room.id,
            source_content_id: room.associated_content_id,
        })),
        Err(e) => {
            error!("Error creating room: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError {
                    error: "Failed to create room".to_string(),
                    details: Some(e.to_string()),
                }),
            ))
        }
    }
}

/// Room metadata
async fn get_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomDetailResponse>, StatusCode> {
    let room = state
        .store
        .get_room(&room_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(RoomDetailResponse {
        room_id: room.id,
        title: room.title,
        participant_count: room.connected_users.len(),
        associated_content_id: room.associated_content_id,
        created_at: room.created_at,
        updated_at: room.updated_at,
    }))
}

// ============================================================================
// WEBSOCKET HANDLER
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WsParams {
    user_id: Option<String>,
    user_name: Option<String>,
}

/// WebSocket upgrade handler
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let user = ConnectedUser::new(
        params
            .user_id
            .unwrap_or_else(|| format!("anon-{}", uuid::Uuid::new_v4())),
        params.user_name.unwrap_or_else(|| "Anonymous User".to_string()),
    );

    info!("WebSocket upgrade request for room {} by {}", room_id, user.id);
    ws.on_upgrade(move |socket| handle_session(socket, room_id, user, state))
}

/// Drive one room session over a WebSocket connection.
async fn handle_session(
    socket: WebSocket,
    room_id: String,
    user: ConnectedUser,
    state: Arc<AppState>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let synchronizer = match RoomSynchronizer::join(
        state.store.clone(),
        state.lifecycle.clone(),
        state.sync_config.clone(),
        room_id.clone(),
        user.clone(),
    )
    .await
    {
        Ok(synchronizer) => Arc::new(synchronizer),
        Err(e) => {
            warn!("Failed to join room {}: {}", room_id, e);
            let msg = ServerMessage::Error {
                message: e.ui_message().to_string(),
            };
            let _ = send_server_message(&mut ws_sender, &msg).await;
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let mut view_rx = synchronizer.watch_view();

    // Task forwarding view changes and queued replies to the client
    let mut send_task = tokio::spawn(async move {
        let initial = ServerMessage::Room {
            view: view_rx.borrow_and_update().clone(),
        };
        if send_server_message(&mut ws_sender, &initial).await.is_err() {
            return;
        }

        loop {
            tokio::select! {
                changed = view_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let msg = ServerMessage::Room { view: view_rx.borrow_and_update().clone() };
                    if send_server_message(&mut ws_sender, &msg).await.is_err() {
                        break;
                    }
                }
                queued = rx.recv() => {
                    match queued {
                        Some(msg) => {
                            if send_server_message(&mut ws_sender, &msg).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    });

    // Task translating client messages into synchronizer calls
    let recv_synchronizer = synchronizer.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(client_msg) => {
                        if handle_client_message(client_msg, &recv_synchronizer, &tx) {
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to decode client message: {}", e),
                },
                Message::Close(_) => {
                    debug!("WebSocket closed by client");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => { recv_task.abort(); }
        _ = &mut recv_task => { send_task.abort(); }
    }

    // Teardown runs the full leave flow even without an explicit Leave
    synchronizer.leave().await;
    info!("{} disconnected from room {}", user.id, room_id);
}

/// Returns `true` when the session should end.
fn handle_client_message(
    msg: ClientMessage,
    synchronizer: &Arc<RoomSynchronizer>,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) -> bool {
    match msg {
        ClientMessage::SetContent { content } => {
            synchronizer.set_content(content);
            false
        }
        ClientMessage::SetTitle { title } => {
            synchronizer.set_title(title);
            false
        }
        ClientMessage::Cursor {
            cursor_position,
            relative_x,
            relative_y,
        } => {
            synchronizer.update_cursor(cursor_position, relative_x, relative_y);
            false
        }
        ClientMessage::Ping { timestamp } => {
            let _ = tx.send(ServerMessage::Pong {
                timestamp,
                server_time: chrono::Utc::now().timestamp_millis(),
            });
            false
        }
        ClientMessage::Leave => true,
    }
}

/// Send a server message as a JSON text frame.
async fn send_server_message(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(text) => sender.send(Message::Text(text)).await,
        Err(e) => {
            warn!("Failed to encode server message: {}", e);
            Ok(())
        }
    }
}

// ============================================================================
// MAIN ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "draftroom_server=info,tower_http=info".into()),
        )
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize storage
    let storage_path =
        std::env::var("STORAGE_PATH").unwrap_or_else(|_| "./data/draftroom.sled".to_string());

    info!("Initializing storage at: {}", storage_path);

    let store: Arc<dyn RoomStore> = Arc::new(
        SledRoomStore::open(StoreConfig::new(&storage_path)).context("Failed to open room store")?,
    );

    let lifecycle = Arc::new(RoomLifecycleManager::new(store.clone()));
    let content = ContentClient::from_env();

    // Background sweep of abandoned rooms
    let sweep_interval = std::env::var("SWEEP_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(SweepConfig::default().interval);
    let _sweeper = lifecycle.clone().start_sweeper(SweepConfig {
        interval: sweep_interval,
        ..SweepConfig::default()
    });

    let state = Arc::new(AppState {
        store,
        lifecycle,
        content,
        sync_config: SyncConfig::default(),
        started_at: std::time::Instant::now(),
    });

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/rooms", post(create_room))
        .route("/api/rooms/:room_id", get(get_room))
        .route("/ws/:room_id", get(ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(5000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("🚀 Draftroom server v{} starting", env!("CARGO_PKG_VERSION"));
    info!("   Listening on: http://{}", addr);
    info!("   WebSocket: ws://{}/ws/:room_id", addr);
    info!("   Health check: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
