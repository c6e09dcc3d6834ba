// src/server.rs

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::broadcast::Registry;
use crate::state::PipelineStatus;
use crate::store::FrameStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<FrameStore>,
    pub registry: Arc<Registry>,
    pub status: Arc<PipelineStatus>,
    pub stream_fps: f64,
    /// Flips to true on shutdown so long-lived client loops end and the
    /// server can drain its connections.
    pub shutdown: watch::Receiver<bool>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/video/stream", get(video_stream))
        .route("/api/ws/alerts", get(ws_alerts))
        .route("/api/stats", get(stats))
        .with_state(state)
}

#[derive(Deserialize)]
struct ClientQuery {
    // Accepted for forward compatibility; a single camera feed serves all
    // viewers, so it does not filter anything yet.
    #[allow(dead_code)]
    patient_id: Option<String>,
}

/// MJPEG stream: one independent loop per viewer at the configured cadence,
/// reading only the latest snapshot. A missing frame skips the tick; the
/// loop ends when the client goes away and the body stream is dropped.
async fn video_stream(
    State(state): State<AppState>,
    Query(_query): Query<ClientQuery>,
) -> impl IntoResponse {
    let store = Arc::clone(&state.store);
    let shutdown = state.shutdown.clone();
    let period = Duration::from_secs_f64(1.0 / state.stream_fps.max(1.0));

    let stream = async_stream::stream! {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if *shutdown.borrow() {
                break;
            }
            let snapshot = store.read();
            if let Some(jpeg) = snapshot.jpeg.as_ref() {
                yield Ok::<Bytes, Infallible>(mjpeg_part(jpeg));
            }
        }
    };

    (
        [(
            header::CONTENT_TYPE,
            "multipart/x-mixed-replace; boundary=frame",
        )],
        Body::from_stream(stream),
    )
}

fn mjpeg_part(jpeg: &[u8]) -> Bytes {
    let mut part = Vec::with_capacity(jpeg.len() + 64);
    part.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

async fn ws_alerts(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(_query): Query<ClientQuery>,
) -> Response {
    let registry = Arc::clone(&state.registry);
    let shutdown = state.shutdown.clone();
    ws.on_upgrade(move |socket| handle_alert_socket(socket, registry, shutdown))
}

/// One task per subscriber: forward broadcast messages until a send fails,
/// the peer closes, or the server shuts down. Client payloads are read
/// purely to notice closure and are discarded.
async fn handle_alert_socket(
    mut socket: WebSocket,
    registry: Arc<Registry>,
    mut shutdown: watch::Receiver<bool>,
) {
    let (id, mut rx) = registry.register();

    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                match outgoing {
                    Some(text) => {
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    registry.unregister(id);
    debug!(subscriber = id, "alert socket closed");
}

#[derive(Serialize)]
struct StatsResponse {
    fps: f32,
    is_processing: bool,
    fall_count: u64,
}

/// Reachable even when the pipeline failed to start; it then reports a
/// non-processing state instead of an error.
async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        fps: state.status.fps(),
        is_processing: state.status.is_processing(),
        fall_count: state.status.fall_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mjpeg_part_wraps_the_payload_with_boundary_and_header() {
        let part = mjpeg_part(&[0xFF, 0xD8, 0xFF]);
        let expected_prefix = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
        assert!(part.starts_with(expected_prefix));
        assert!(part.ends_with(b"\xFF\xD8\xFF\r\n"));
    }

    #[test]
    fn stats_response_serializes_to_the_expected_shape() {
        let json = serde_json::to_value(StatsResponse {
            fps: 24.5,
            is_processing: true,
            fall_count: 3,
        })
        .unwrap();
        assert_eq!(json["fps"], 24.5f32);
        assert_eq!(json["is_processing"], true);
        assert_eq!(json["fall_count"], 3);
    }
}
