//! CORS proxy for browser clients.
//!
//! Browsers can't call the engine cross-origin, so this mirrors its three
//! endpoints under /api/ with permissive CORS, plus a small text-file
//! listing for feeding saved articles to such clients. The native player
//! never routes through here; it talks to the engine directly.

use std::path::PathBuf;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::config::{EngineConfig, ProxyConfig};

#[derive(Clone)]
pub struct ProxyState {
    http: reqwest::Client,
    engine_url: String,
    files_dir: PathBuf,
}

#[derive(Deserialize)]
struct AudioQueryParams {
    text: String,
    speaker: u32,
}

#[derive(Deserialize)]
struct SynthesisParams {
    speaker: u32,
}

type ApiError = (StatusCode, Json<Value>);

pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/api/speakers", get(handle_speakers))
        .route("/api/audio_query", post(handle_audio_query))
        .route("/api/synthesis", post(handle_synthesis))
        .route("/api/files", get(handle_files))
        .route("/api/file/{filename}", get(handle_file))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until shutdown.
pub async fn serve(
    engine: &EngineConfig,
    proxy: &ProxyConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = ProxyState {
        http: reqwest::Client::builder()
            .timeout(Duration::from_secs(engine.timeout_secs))
            .build()
            .expect("Failed to create HTTP client"),
        engine_url: engine.url.trim_end_matches('/').to_string(),
        files_dir: PathBuf::from(&proxy.files_dir),
    };
    let engine_url = state.engine_url.clone();
    let app = router(state);

    let addr = format!("127.0.0.1:{}", proxy.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Proxy listening on {addr}, forwarding to {engine_url}");
    axum::serve(listener, app).await?;
    Ok(())
}

fn engine_unreachable(e: impl std::fmt::Display) -> ApiError {
    warn!("Engine request failed: {e}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "cannot reach the VOICEVOX engine" })),
    )
}

fn not_found() -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "file not found" })),
    )
}

async fn handle_speakers(State(state): State<ProxyState>) -> Result<Json<Value>, ApiError> {
    let resp = state
        .http
        .get(format!("{}/speakers", state.engine_url))
        .send()
        .await
        .map_err(engine_unreachable)?;
    let data = resp.json::<Value>().await.map_err(engine_unreachable)?;
    Ok(Json(data))
}

async fn handle_audio_query(
    State(state): State<ProxyState>,
    Query(params): Query<AudioQueryParams>,
) -> Result<Json<Value>, ApiError> {
    let speaker = params.speaker.to_string();
    let resp = state
        .http
        .post(format!("{}/audio_query", state.engine_url))
        .query(&[("text", params.text.as_str()), ("speaker", speaker.as_str())])
        .send()
        .await
        .map_err(engine_unreachable)?;
    let data = resp.json::<Value>().await.map_err(engine_unreachable)?;
    Ok(Json(data))
}

async fn handle_synthesis(
    State(state): State<ProxyState>,
    Query(params): Query<SynthesisParams>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let speaker = params.speaker.to_string();
    let resp = state
        .http
        .post(format!("{}/synthesis", state.engine_url))
        .query(&[("speaker", speaker.as_str())])
        .json(&body)
        .send()
        .await
        .map_err(engine_unreachable)?;

    let mime = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("audio/wav")
        .to_string();
    let bytes = resp.bytes().await.map_err(engine_unreachable)?;
    Ok(([(header::CONTENT_TYPE, mime)], bytes.to_vec()))
}

async fn handle_files(State(state): State<ProxyState>) -> Result<Json<Value>, ApiError> {
    let mut entries = tokio::fs::read_dir(&state.files_dir).await.map_err(|e| {
        warn!("Could not list {}: {e}", state.files_dir.display());
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "could not list files" })),
        )
    })?;

    let mut files = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        if let Ok(name) = entry.file_name().into_string() {
            if name.ends_with(".txt") {
                files.push(name);
            }
        }
    }
    files.sort();
    Ok(Json(json!(files)))
}

async fn handle_file(
    State(state): State<ProxyState>,
    Path(filename): Path<String>,
) -> Result<Json<Value>, ApiError> {
    // The listing is flat; anything path-like is rejected outright.
    if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
        return Err(not_found());
    }

    let path = state.files_dir.join(&filename);
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => Ok(Json(json!({ "content": content }))),
        Err(_) => Err(not_found()),
    }
}
