use crate::detect::rtdetr::RtdetrDetector;
use crate::error::ExtractError;
use crate::pipeline::types::Detection;
use crate::pipeline::{cropper, sampler};
use crate::run_context::{self, RunMetadata};
use crate::video::Backend;
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Shared handler state: the roots and pipeline knobs from the CLI.
pub struct AppState {
    pub video_root: PathBuf,
    pub output_root: PathBuf,
    pub model_path: String,
    pub backend: Backend,
    pub interval_seconds: NonZeroU32,
    pub target_size: u32,
}

#[derive(Serialize)]
pub struct VideoInfo {
    pub name: String,
    pub path: String,
}

#[derive(Serialize)]
pub struct RunInfo {
    pub name: String,
    pub metadata: RunMetadata,
}

#[derive(Deserialize)]
pub struct ScanRequest {
    pub video_path: String,
}

#[derive(Deserialize)]
pub struct ExtractRequest {
    pub filepath: String,
    pub detection: Detection,
}

#[derive(Serialize)]
pub struct ExtractResponse {
    pub image: String,
}

pub async fn get_videos(State(state): State<Arc<AppState>>) -> Json<Vec<VideoInfo>> {
    let videos = run_context::list_videos(&state.video_root);

    let info_list = videos
        .into_iter()
        .map(|video_path| {
            let name = video_path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("unknown")
                .to_string();
            VideoInfo {
                name,
                path: video_path.to_string_lossy().to_string(),
            }
        })
        .collect();

    Json(info_list)
}

pub async fn get_runs(State(state): State<Arc<AppState>>) -> Json<Vec<RunInfo>> {
    let runs = run_context::list_runs(&state.output_root).unwrap_or_default();

    let info_list = runs
        .into_iter()
        .map(|(name, metadata)| RunInfo { name, metadata })
        .collect();

    Json(info_list)
}

pub async fn get_run_detections(
    State(state): State<Arc<AppState>>,
    UrlPath(run_id): UrlPath<String>,
) -> Result<Json<Vec<Detection>>, StatusCode> {
    let output_dir = state.output_root.join(&run_id);
    if !output_dir.is_dir() {
        return Err(StatusCode::NOT_FOUND);
    }

    run_context::read_detections(&output_dir)
        .map(Json)
        .map_err(|e| {
            tracing::error!("failed to read detections for {}: {:#}", run_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

/// Scan one clip and persist its detections. The model is loaded per request;
/// each scan is independent of every other.
pub async fn scan_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ScanRequest>,
) -> Result<Json<Vec<Detection>>, StatusCode> {
    let result = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<Detection>> {
        let mut detector = RtdetrDetector::new(&state.model_path, state.target_size)?;
        // Sample before touching the output root: a failed scan must leave no
        // run behind, or the clip would never be rescanned.
        let detections = sampler::process(
            &payload.video_path,
            state.backend,
            &mut detector,
            state.interval_seconds,
        )?;
        run_context::record_run(
            &state.output_root,
            &state.video_root,
            Path::new(&payload.video_path),
            &detections,
        )?;
        Ok(detections)
    })
    .await;

    match result {
        Ok(Ok(detections)) => Ok(Json(detections)),
        Ok(Err(e)) => {
            tracing::error!("scan failed: {:#}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
        Err(e) => {
            tracing::error!("scan task panicked: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn extract_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ExtractRequest>,
) -> Result<Json<ExtractResponse>, ExtractError> {
    let backend = state.backend;
    let image = tokio::task::spawn_blocking(move || {
        cropper::extract_box_as_b64(&payload.filepath, backend, &payload.detection)
    })
    .await
    .map_err(|e| ExtractError::Encode(anyhow::anyhow!("extract task panicked: {e}")))??;

    Ok(Json(ExtractResponse { image }))
}
