use crate::core::DaemonEvent;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use lofi_proto::protocol::{Command, Mood, PlayerSnapshot};
use lofi_proto::state::StateManager;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Clone)]
struct HttpState {
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
}

pub fn router(state_manager: Arc<StateManager>, event_tx: mpsc::Sender<DaemonEvent>) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/station/:id", post(select_station))
        .route("/api/toggle", post(toggle))
        .route("/api/next", post(next_station))
        .route("/api/prev", post(prev_station))
        .route("/api/random", post(random_station))
        .route("/api/volume/:level", post(set_volume))
        .route("/api/mute", post(toggle_mute))
        .route("/api/mood/:mood", post(set_mood))
        .with_state(HttpState {
            state_manager,
            event_tx,
        })
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state_manager, event_tx);

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

async fn get_state(State(state): State<HttpState>) -> Json<PlayerSnapshot> {
    Json(state.state_manager.get_state().await)
}

async fn dispatch(state: &HttpState, cmd: Command) -> StatusCode {
    info!("HTTP API: {:?}", cmd);
    if state.event_tx.send(DaemonEvent::ClientCommand(cmd)).await.is_err() {
        error!("HTTP API: daemon event channel closed");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

async fn select_station(State(state): State<HttpState>, Path(id): Path<String>) -> StatusCode {
    let known = state
        .state_manager
        .get_state()
        .await
        .stations
        .iter()
        .any(|s| s.id == id);
    if !known {
        warn!("HTTP API: unknown station '{}'", id);
        return StatusCode::NOT_FOUND;
    }
    dispatch(&state, Command::SelectStation { id }).await
}

async fn toggle(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::TogglePlayPause).await
}

async fn next_station(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::SkipNext).await
}

async fn prev_station(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::SkipPrev).await
}

async fn random_station(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::Random).await
}

async fn set_volume(State(state): State<HttpState>, Path(level): Path<i32>) -> StatusCode {
    let level = level.clamp(0, 100) as u8;
    dispatch(&state, Command::SetVolume { level }).await
}

async fn toggle_mute(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::ToggleMute).await
}

async fn set_mood(State(state): State<HttpState>, Path(mood): Path<String>) -> StatusCode {
    match mood.parse::<Mood>() {
        Ok(mood) => dispatch(&state, Command::SetMood { mood }).await,
        Err(e) => {
            warn!("HTTP API: {}", e);
            StatusCode::BAD_REQUEST
        }
    }
}
