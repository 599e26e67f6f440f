use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use futures_util::stream::{self, Stream};
use serde::Deserialize;
use soundmaster_proto::protocol::{Broadcast, Command, PlayerState, QualityTier};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

use crate::controller::ControllerHandle;

#[derive(Clone)]
struct HttpState {
    controller: ControllerHandle,
}

#[derive(Deserialize)]
struct SwitchRequest {
    url: String,
}

pub fn router(controller: ControllerHandle) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/play", post(play))
        .route("/api/pause", post(pause))
        .route("/api/toggle", post(toggle))
        .route("/api/mute", post(toggle_mute))
        .route("/api/retry", post(retry))
        .route("/api/volume/:volume", post(set_volume))
        .route("/api/quality/:tier", post(set_quality))
        .route("/api/switch", post(switch_stream))
        .route("/api/events", get(events))
        .layer(CorsLayer::permissive())
        .with_state(HttpState { controller })
}

pub fn start_server(
    bind_address: String,
    port: u16,
    controller: ControllerHandle,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(controller);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

fn dispatch(state: &HttpState, cmd: Command) -> StatusCode {
    info!("HTTP API: {:?}", cmd);
    match state.controller.send(cmd) {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            error!("HTTP API: {}", e);
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn get_state(State(state): State<HttpState>) -> Json<PlayerState> {
    Json(state.controller.state())
}

async fn play(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::Play)
}

async fn pause(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::Pause)
}

async fn toggle(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::TogglePlayback)
}

async fn toggle_mute(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::ToggleMute)
}

async fn retry(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::RetryStreams)
}

/// Volume as a percentage, 0-100.
async fn set_volume(State(state): State<HttpState>, Path(volume): Path<u8>) -> StatusCode {
    if volume > 100 {
        return StatusCode::BAD_REQUEST;
    }
    dispatch(
        &state,
        Command::SetVolume {
            value: f32::from(volume) / 100.0,
        },
    )
}

async fn set_quality(State(state): State<HttpState>, Path(tier): Path<String>) -> Response {
    match tier.parse::<QualityTier>() {
        Ok(tier) => dispatch(&state, Command::ChangeQuality { tier }).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

async fn switch_stream(
    State(state): State<HttpState>,
    Json(req): Json<SwitchRequest>,
) -> StatusCode {
    let url = req.url.trim();
    if url.is_empty() {
        return StatusCode::BAD_REQUEST;
    }
    dispatch(
        &state,
        Command::SwitchToStream {
            url: url.to_string(),
        },
    )
}

// ── server-sent events ────────────────────────────────────────────────────────

/// Current state first, then every state change and broadcast as it happens.
struct EventFeed {
    state: watch::Receiver<PlayerState>,
    broadcasts: broadcast::Receiver<Broadcast>,
    sent_snapshot: bool,
}

impl EventFeed {
    async fn next(&mut self) -> Option<Broadcast> {
        if !self.sent_snapshot {
            self.sent_snapshot = true;
            let data = self.state.borrow_and_update().clone();
            return Some(Broadcast::State { data });
        }
        loop {
            tokio::select! {
                changed = self.state.changed() => {
                    changed.ok()?;
                    let data = self.state.borrow_and_update().clone();
                    return Some(Broadcast::State { data });
                }
                msg = self.broadcasts.recv() => match msg {
                    Ok(msg) => return Some(msg),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("SSE client lagged, skipped {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    }
}

fn to_event(msg: &Broadcast) -> Event {
    let name = match msg {
        Broadcast::State { .. } => "state",
        Broadcast::Notification { .. } => "notification",
        Broadcast::Log { .. } => "log",
    };
    Event::default()
        .event(name)
        .data(serde_json::to_string(msg).unwrap_or_default())
}

async fn events(
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let feed = EventFeed {
        state: state.controller.subscribe(),
        broadcasts: state.controller.notifications(),
        sent_snapshot: false,
    };
    let stream = stream::unfold(feed, |mut feed| async move {
        let msg = feed.next().await?;
        Some((Ok::<_, Infallible>(to_event(&msg)), feed))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
