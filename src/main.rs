use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use caruso::adapters::ffmpeg::FfmpegSpawner;
use caruso::domain::session::{StreamOptions, StreamSession};
use caruso::{Config, MediaError, MediaManager};
use chrono::Utc;
use dotenv::dotenv;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

struct AppState {
    manager: MediaManager<FfmpegSpawner>,
    config: Config,
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    let state = Arc::new(AppState {
        manager: MediaManager::new(&config, FfmpegSpawner::new()),
        config: config.clone(),
    });

    // Surface lifecycle notifications in the service log.
    let mut events = state.manager.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::info!(?event, "media event"),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event log fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let app = Router::new()
        .route("/streams", get(list_streams))
        .route(
            "/streams/:id",
            get(get_stream).post(start_stream).delete(stop_stream),
        )
        .route(
            "/recordings/:id",
            post(start_recording).delete(stop_recording),
        )
        .route("/probe", post(probe))
        .route("/snapshot", post(snapshot))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", config.addr, config.port))
        .await
        .expect("Failed to bind TCP listener");
    tracing::info!("Listening at {}:{}", config.addr, config.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .expect("Server failed to start");

    // Tear down every stream and recording before the process exits.
    state.manager.shutdown().await;
}

#[derive(Debug, Deserialize)]
struct StartStreamRequest {
    source_uri: String,
    #[serde(default)]
    options: StreamOptions,
}

async fn start_stream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<StartStreamRequest>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let playlist = state
        .manager
        .acquire(&id, &req.source_uri, &req.options)
        .await
        .map_err(error_response)?;
    Ok(Json(json!({ "id": id, "playlist": playlist })))
}

async fn stop_stream(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Json<Value> {
    let stopped = state.manager.release(&id).await;
    Json(json!({ "id": id, "stopped": stopped }))
}

async fn get_stream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StreamSession>, StatusCode> {
    state
        .manager
        .get_session(&id)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn list_streams(State(state): State<Arc<AppState>>) -> Json<Vec<StreamSession>> {
    Json(state.manager.list_active_sessions().await)
}

#[derive(Debug, Deserialize)]
struct StartRecordingRequest {
    source_uri: String,
    output_path: Option<PathBuf>,
    duration_secs: Option<u64>,
}

async fn start_recording(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<StartRecordingRequest>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let output = state
        .manager
        .start_recording(
            &id,
            &req.source_uri,
            req.output_path,
            req.duration_secs.map(Duration::from_secs),
        )
        .await
        .map_err(error_response)?;
    Ok(Json(json!({ "id": id, "output": output })))
}

async fn stop_recording(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Json<Value> {
    let stopped = state.manager.stop_recording(&id).await;
    Json(json!({ "id": id, "stopped": stopped }))
}

#[derive(Debug, Deserialize)]
struct ProbeRequest {
    source_uri: String,
    timeout_secs: Option<u64>,
}

async fn probe(State(state): State<Arc<AppState>>, Json(req): Json<ProbeRequest>) -> Json<Value> {
    let timeout = req
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(state.config.probe_timeout);
    let accessible = state.manager.probe(&req.source_uri, timeout).await;
    Json(json!({ "source_uri": req.source_uri, "accessible": accessible }))
}

#[derive(Debug, Deserialize)]
struct SnapshotRequest {
    source_uri: String,
    output_path: Option<PathBuf>,
    timeout_secs: Option<u64>,
}

async fn snapshot(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SnapshotRequest>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let output = req.output_path.unwrap_or_else(|| {
        state
            .config
            .media_dir
            .join("snapshots")
            .join(format!("{}.jpg", Utc::now().timestamp_millis()))
    });
    let timeout = req
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(state.config.probe_timeout);
    let path = state
        .manager
        .snapshot(&req.source_uri, &output, timeout)
        .await
        .map_err(error_response)?;
    Ok(Json(json!({ "output": path })))
}

fn error_response(err: MediaError) -> (StatusCode, String) {
    let status = match &err {
        MediaError::RecordingBusy(_) => StatusCode::CONFLICT,
        MediaError::StartupTimeout { .. } | MediaError::Timeout { .. } => {
            StatusCode::GATEWAY_TIMEOUT
        }
        MediaError::StartupFailed { .. }
        | MediaError::ProcessFailed { .. }
        | MediaError::SnapshotMissing(_) => StatusCode::BAD_GATEWAY,
        MediaError::Spawn { .. } | MediaError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}
