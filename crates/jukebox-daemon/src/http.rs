use crate::core::DaemonEvent;
use crate::state::StateManager;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use jukebox_core::catalog::{Catalog, CatalogClient, UserPlaylist};
use jukebox_proto::protocol::{Command, JukeboxState};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct HttpState {
    pub state_manager: Arc<StateManager>,
    pub event_tx: mpsc::Sender<DaemonEvent>,
    pub catalog: CatalogClient,
}

#[derive(Serialize)]
struct VolumeStatus {
    volume: u8,
}

pub fn router(app_state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/toggle", get(toggle).post(toggle))
        .route("/api/next", get(next_track).post(next_track))
        .route("/api/prev", get(prev_track).post(prev_track))
        .route("/api/select/:idx", get(select_track).post(select_track))
        .route("/api/shuffle/:on", get(set_shuffle).post(set_shuffle))
        .route("/api/volume/:pct", get(set_volume).post(set_volume))
        .route("/api/volume", get(get_volume))
        .route("/api/playlist/:id", get(change_playlist).post(change_playlist))
        .route("/api/refresh", get(refresh).post(refresh))
        .route("/api/users/:uid/playlists", get(user_playlists))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(app_state)
}

pub fn start_server(bind_address: String, port: u16, app_state: HttpState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(app_state);

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

async fn dispatch(state: &HttpState, cmd: Command) -> StatusCode {
    info!("HTTP API: {:?}", cmd);
    if state.event_tx.send(DaemonEvent::ClientCommand(cmd)).await.is_err() {
        error!("Failed to forward HTTP command");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

async fn get_state(State(state): State<HttpState>) -> Json<JukeboxState> {
    Json(state.state_manager.get_state().await)
}

async fn toggle(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::TogglePlay).await
}

async fn next_track(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::Next).await
}

async fn prev_track(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::Prev).await
}

async fn select_track(State(state): State<HttpState>, Path(idx): Path<usize>) -> StatusCode {
    let len = state.state_manager.get_state().await.tracks.len();
    if idx >= len {
        warn!("HTTP API: select {} out of range ({} tracks)", idx, len);
        return StatusCode::BAD_REQUEST;
    }
    dispatch(&state, Command::Select { index: idx }).await
}

async fn set_shuffle(State(state): State<HttpState>, Path(on): Path<bool>) -> StatusCode {
    dispatch(&state, Command::SetShuffle { enabled: on }).await
}

async fn set_volume(State(state): State<HttpState>, Path(pct): Path<i32>) -> StatusCode {
    let value = (pct as f32 / 100.0).clamp(0.0, 1.0);
    dispatch(&state, Command::SetVolume { value }).await
}

async fn get_volume(State(state): State<HttpState>) -> Json<VolumeStatus> {
    let volume = (state.state_manager.get_state().await.volume * 100.0).round() as u8;
    Json(VolumeStatus { volume })
}

async fn change_playlist(State(state): State<HttpState>, Path(id): Path<String>) -> StatusCode {
    dispatch(&state, Command::ChangePlaylist { playlist_id: id }).await
}

async fn refresh(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::Refresh).await
}

async fn user_playlists(
    State(state): State<HttpState>,
    Path(uid): Path<String>,
) -> Result<Json<Vec<UserPlaylist>>, StatusCode> {
    match state.catalog.user_playlists(&uid).await {
        Ok(lists) => Ok(Json(lists)),
        Err(e) => {
            warn!("HTTP API: user playlists for {} failed: {}", uid, e);
            Err(StatusCode::BAD_GATEWAY)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use jukebox_proto::protocol::Track;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app() -> (Router, mpsc::Receiver<DaemonEvent>) {
        let (event_tx, event_rx) = mpsc::channel(8);
        let initial = JukeboxState {
            tracks: vec![Track::default(), Track::default()],
            volume: 0.42,
            ..JukeboxState::default()
        };
        let app_state = HttpState {
            state_manager: Arc::new(StateManager::new(initial)),
            event_tx,
            catalog: CatalogClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap(),
        };
        (router(app_state), event_rx)
    }

    async fn call(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_state_endpoint_returns_snapshot() {
        let (app, _rx) = app();
        let (status, body) = call(app, "/api/state").await;
        assert_eq!(status, StatusCode::OK);
        let state: JukeboxState = serde_json::from_slice(&body).unwrap();
        assert_eq!(state.tracks.len(), 2);
        assert_eq!(state.rev, 1);
    }

    #[tokio::test]
    async fn test_volume_endpoints() {
        let (app, mut rx) = app();
        let (_, body) = call(app.clone(), "/api/volume").await;
        assert_eq!(body, br#"{"volume":42}"#);

        let (status, _) = call(app, "/api/volume/150").await;
        assert_eq!(status, StatusCode::OK);
        match rx.recv().await {
            Some(DaemonEvent::ClientCommand(Command::SetVolume { value })) => assert_eq!(value, 1.0),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_select_checks_range() {
        let (app, mut rx) = app();
        let (status, _) = call(app.clone(), "/api/select/2").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(app, "/api/select/1").await;
        assert_eq!(status, StatusCode::OK);
        assert!(matches!(
            rx.recv().await,
            Some(DaemonEvent::ClientCommand(Command::Select { index: 1 }))
        ));
    }

    #[tokio::test]
    async fn test_shuffle_and_playlist_forwarding() {
        let (app, mut rx) = app();
        call(app.clone(), "/api/shuffle/true").await;
        call(app, "/api/playlist/123").await;
        assert!(matches!(
            rx.recv().await,
            Some(DaemonEvent::ClientCommand(Command::SetShuffle { enabled: true }))
        ));
        match rx.recv().await {
            Some(DaemonEvent::ClientCommand(Command::ChangePlaylist { playlist_id })) => {
                assert_eq!(playlist_id, "123")
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
