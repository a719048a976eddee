//! HTTP route handlers.

use crate::state::AppState;
use crate::ws::ws_handler;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{middleware, Json, Router};
use gaze_core::catalog::{
    BackupDocument, FaceFilter, RecognitionMode, RestoreMode, RestoreOptions,
};
use gaze_core::search::captions::CaptionFormat;
use gaze_core::{GazeError, MediaFilter, MediaType, SearchRequest};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Error wrapper mapping engine errors onto HTTP statuses.
pub struct ApiError(GazeError);

impl From<GazeError> for ApiError {
    fn from(error: GazeError) -> Self {
        ApiError(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GazeError::LibraryNotFound { .. }
            | GazeError::MediaNotFound { .. }
            | GazeError::PersonNotFound { .. }
            | GazeError::FaceNotFound { .. }
            | GazeError::FileNotFound(_) => StatusCode::NOT_FOUND,
            GazeError::AlreadyScanning { .. } => StatusCode::CONFLICT,
            GazeError::Validation { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .route("/libraries", post(create_library).get(list_libraries))
        .route("/libraries/:id", delete(delete_library))
        .route("/libraries/:id/scan", post(scan_library))
        .route("/media", get(list_media))
        .route("/media/groups", get(media_groups))
        .route("/media/:id", get(get_media))
        .route("/media/:id/retry", post(retry_media))
        .route("/media/:id/favorite", post(set_media_favorite))
        .route("/media/:id/tags", post(add_tag).get(list_tags))
        .route("/media/:id/tags/:tag", delete(remove_tag))
        .route("/videos/:id/frames", get(list_frames))
        .route("/search", post(search))
        .route("/search/export/captions/:id", get(export_captions))
        .route("/jobs/status", get(jobs_status))
        .route("/jobs/start", post(jobs_start))
        .route("/jobs/pause", post(jobs_pause))
        .route("/jobs/resume", post(jobs_resume))
        .route("/jobs/:media_id", delete(jobs_cancel))
        .route("/faces", get(list_faces))
        .route("/faces/:face_id/assign", post(assign_face))
        .route("/faces/:face_id/reference", post(mark_reference))
        .route("/faces/merge", post(merge_persons))
        .route("/faces/persons", get(list_persons).post(create_person))
        .route(
            "/faces/persons/:id/recognition-mode",
            put(set_recognition_mode),
        )
        .route("/faces/persons/:id/favorite", post(set_person_favorite))
        .route("/settings", get(get_settings).put(put_setting))
        .route("/stats", get(stats))
        .route("/maintenance/wipe-derived", post(wipe_derived))
        .route("/backup/export", get(backup_export))
        .route("/backup/restore", post(backup_restore))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            crate::auth::require_auth,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ----------------------------------------------------------------------
// Health
// ----------------------------------------------------------------------

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let ffmpeg = which_ok("ffmpeg");
    let ffprobe = which_ok("ffprobe");
    let stats = state.engine.stats().ok();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "ffmpeg": ffmpeg,
        "ffprobe": ffprobe,
        "media_total": stats.as_ref().map(|s| s.media_total),
    }))
}

fn which_ok(binary: &str) -> bool {
    std::process::Command::new(binary)
        .arg("-version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

// ----------------------------------------------------------------------
// Libraries
// ----------------------------------------------------------------------

#[derive(Deserialize)]
struct CreateLibraryRequest {
    folder_path: String,
    name: Option<String>,
    #[serde(default = "default_true")]
    recursive: bool,
}

fn default_true() -> bool {
    true
}

async fn create_library(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateLibraryRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let library_id = state.engine.add_library(
        &request.folder_path,
        request.name.as_deref(),
        request.recursive,
    )?;
    Ok(Json(json!({ "library_id": library_id })))
}

async fn list_libraries(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<serde_json::Value>> {
    let libraries = state.engine.list_libraries()?;
    Ok(Json(json!({ "libraries": libraries })))
}

async fn delete_library(
    State(state): State<Arc<AppState>>,
    Path(library_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let deleted = state.engine.delete_library(&library_id)?;
    if !deleted {
        return Err(GazeError::LibraryNotFound { library_id }.into());
    }
    Ok(Json(json!({ "deleted": true })))
}

async fn scan_library(
    State(state): State<Arc<AppState>>,
    Path(library_id): Path<String>,
) -> ApiResult<Response> {
    if state.engine.is_scanning(&library_id) {
        return Err(GazeError::AlreadyScanning { library_id }.into());
    }
    state
        .engine
        .catalog()
        .get_library(&library_id)?
        .ok_or(GazeError::LibraryNotFound {
            library_id: library_id.clone(),
        })?;

    let engine_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = engine_state.engine.scan_library(&library_id).await {
            tracing::warn!("Scan failed for {}: {}", library_id, e);
            return;
        }
        // Newly queued items start indexing without an explicit kick.
        let _ = engine_state.engine.start_indexing(10).await;
    });
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "scanning" }))).into_response())
}

// ----------------------------------------------------------------------
// Media
// ----------------------------------------------------------------------

#[derive(Deserialize)]
struct MediaQuery {
    library_id: Option<String>,
    media_type: Option<String>,
    status: Option<String>,
    #[serde(default)]
    favorites_only: bool,
    tag: Option<String>,
    #[serde(default)]
    include_live_photo_components: bool,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    50
}

async fn list_media(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MediaQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let filter = MediaFilter {
        library_id: query.library_id,
        media_type: query.media_type.as_deref().and_then(MediaType::from_str),
        status: query.status,
        include_live_photo_components: query.include_live_photo_components,
        favorites_only: query.favorites_only,
        tag: query.tag,
        limit: query.limit,
        offset: query.offset,
    };
    let (media, total) = state.engine.list_media(&filter)?;
    Ok(Json(json!({ "media": media, "total": total })))
}

#[derive(Deserialize)]
struct GroupsQuery {
    library_id: Option<String>,
}

async fn media_groups(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GroupsQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let groups = state
        .engine
        .catalog()
        .media_date_groups(query.library_id.as_deref())?;
    let groups: Vec<serde_json::Value> = groups
        .into_iter()
        .map(|(month, count)| json!({ "month": month, "count": count }))
        .collect();
    Ok(Json(json!({ "groups": groups })))
}

async fn get_media(
    State(state): State<Arc<AppState>>,
    Path(media_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let item = state
        .engine
        .get_media(&media_id)?
        .ok_or(GazeError::MediaNotFound {
            media_id: media_id.clone(),
        })?;
    let tags = state.engine.catalog().list_media_tags(&media_id)?;
    let favorite = state.engine.catalog().is_media_favorite(&media_id)?;
    Ok(Json(json!({ "media": item, "tags": tags, "favorite": favorite })))
}

async fn retry_media(
    State(state): State<Arc<AppState>>,
    Path(media_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.engine.retry_media(&media_id)?;
    let started = state.engine.start_indexing(1).await?;
    Ok(Json(json!({ "requeued": true, "started": started })))
}

async fn list_frames(
    State(state): State<Arc<AppState>>,
    Path(media_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let frames = state.engine.catalog().list_frames(&media_id)?;
    Ok(Json(json!({ "frames": frames })))
}

// ----------------------------------------------------------------------
// Favorites and tags
// ----------------------------------------------------------------------

#[derive(Deserialize)]
struct FavoriteRequest {
    favorite: bool,
}

async fn set_media_favorite(
    State(state): State<Arc<AppState>>,
    Path(media_id): Path<String>,
    Json(request): Json<FavoriteRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .engine
        .catalog()
        .set_media_favorite(&media_id, request.favorite)?;
    Ok(Json(json!({ "favorite": request.favorite })))
}

async fn set_person_favorite(
    State(state): State<Arc<AppState>>,
    Path(person_id): Path<String>,
    Json(request): Json<FavoriteRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .engine
        .catalog()
        .set_person_favorite(&person_id, request.favorite)?;
    Ok(Json(json!({ "favorite": request.favorite })))
}

#[derive(Deserialize)]
struct TagRequest {
    tag: String,
}

async fn add_tag(
    State(state): State<Arc<AppState>>,
    Path(media_id): Path<String>,
    Json(request): Json<TagRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state.engine.catalog().add_media_tag(&media_id, &request.tag)?;
    Ok(Json(json!({ "added": true })))
}

async fn list_tags(
    State(state): State<Arc<AppState>>,
    Path(media_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let tags = state.engine.catalog().list_media_tags(&media_id)?;
    Ok(Json(json!({ "tags": tags })))
}

async fn remove_tag(
    State(state): State<Arc<AppState>>,
    Path((media_id, tag)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let removed = state.engine.catalog().remove_media_tag(&media_id, &tag)?;
    Ok(Json(json!({ "removed": removed })))
}

// ----------------------------------------------------------------------
// Search
// ----------------------------------------------------------------------

async fn search(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<Json<gaze_core::SearchResponse>> {
    let state_for_task = state.clone();
    let response = tokio::task::spawn_blocking(move || {
        state_for_task.engine.search(&request)
    })
    .await
    .map_err(|e| GazeError::Other(format!("search task panicked: {e}")))??;
    Ok(Json(response))
}

#[derive(Deserialize)]
struct CaptionsQuery {
    #[serde(default = "default_caption_format")]
    format: CaptionFormat,
}

fn default_caption_format() -> CaptionFormat {
    CaptionFormat::Srt
}

async fn export_captions(
    State(state): State<Arc<AppState>>,
    Path(media_id): Path<String>,
    Query(query): Query<CaptionsQuery>,
) -> ApiResult<String> {
    Ok(state.engine.export_captions(&media_id, query.format)?)
}

// ----------------------------------------------------------------------
// Jobs
// ----------------------------------------------------------------------

async fn jobs_status(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<serde_json::Value>> {
    let jobs = state.engine.list_jobs(50)?;
    let running = state.engine.scheduler().running_media_ids();
    let queued = state.engine.catalog().count_queued()?;
    Ok(Json(json!({
        "jobs": jobs,
        "running": running,
        "queued": queued,
        "paused": state.engine.scheduler().is_paused(),
    })))
}

#[derive(Deserialize)]
struct JobsStartRequest {
    #[serde(default = "default_start_limit")]
    limit: usize,
}

fn default_start_limit() -> usize {
    10
}

async fn jobs_start(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JobsStartRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let started = state.engine.start_indexing(request.limit).await?;
    Ok(Json(json!({ "started": started })))
}

async fn jobs_pause(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    state.engine.pause_indexing();
    Json(json!({ "paused": true }))
}

async fn jobs_resume(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<serde_json::Value>> {
    let started = state.engine.resume_indexing().await?;
    Ok(Json(json!({ "paused": false, "started": started })))
}

async fn jobs_cancel(
    State(state): State<Arc<AppState>>,
    Path(media_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let stopped = state.engine.stop_indexing(Some(&media_id))?;
    Ok(Json(json!({ "stopped": stopped })))
}

// ----------------------------------------------------------------------
// Faces and persons
// ----------------------------------------------------------------------

#[derive(Deserialize)]
struct FacesQuery {
    media_id: Option<String>,
    person_id: Option<String>,
    #[serde(default)]
    unassigned: bool,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

/// Face row DTO without the raw embedding blob.
#[derive(Serialize)]
struct FaceDto {
    face_id: String,
    video_id: String,
    frame_id: String,
    timestamp_ms: i64,
    bbox: (f64, f64, f64, f64),
    confidence: f64,
    crop_path: Option<String>,
    person_id: Option<String>,
    assignment_source: Option<String>,
    assignment_confidence: Option<f64>,
}

async fn list_faces(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FacesQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let filter = FaceFilter {
        media_id: query.media_id,
        person_id: query.person_id,
        unassigned_only: query.unassigned,
        limit: query.limit,
        offset: query.offset,
    };
    let faces: Vec<FaceDto> = state
        .engine
        .list_faces(&filter)?
        .into_iter()
        .map(|f| FaceDto {
            face_id: f.face_id,
            video_id: f.video_id,
            frame_id: f.frame_id,
            timestamp_ms: f.timestamp_ms,
            bbox: (f.bbox_x, f.bbox_y, f.bbox_w, f.bbox_h),
            confidence: f.confidence,
            crop_path: f.crop_path,
            person_id: f.person_id,
            assignment_source: f.assignment_source.map(|s| s.as_str().to_string()),
            assignment_confidence: f.assignment_confidence,
        })
        .collect();
    Ok(Json(json!({ "faces": faces })))
}

#[derive(Deserialize)]
struct AssignRequest {
    person_id: Option<String>,
}

async fn assign_face(
    State(state): State<Arc<AppState>>,
    Path(face_id): Path<String>,
    Json(request): Json<AssignRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .engine
        .assign_face(&face_id, request.person_id.as_deref())?;
    Ok(Json(json!({ "assigned": request.person_id })))
}

#[derive(Deserialize)]
struct ReferenceRequest {
    person_id: String,
}

async fn mark_reference(
    State(state): State<Arc<AppState>>,
    Path(face_id): Path<String>,
    Json(request): Json<ReferenceRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .engine
        .mark_face_reference(&face_id, &request.person_id)?;
    Ok(Json(json!({ "reference": true })))
}

#[derive(Deserialize)]
struct MergeRequest {
    source_person_id: String,
    target_person_id: String,
}

async fn merge_persons(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MergeRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let moved = state
        .engine
        .merge_persons(&request.source_person_id, &request.target_person_id)?;
    Ok(Json(json!({ "moved_faces": moved })))
}

async fn list_persons(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<serde_json::Value>> {
    let persons = state.engine.list_persons()?;
    Ok(Json(json!({ "persons": persons })))
}

#[derive(Deserialize)]
struct CreatePersonRequest {
    name: String,
}

async fn create_person(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreatePersonRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let person_id = state.engine.create_person(&request.name)?;
    Ok(Json(json!({ "person_id": person_id })))
}

#[derive(Deserialize)]
struct RecognitionModeRequest {
    mode: String,
}

async fn set_recognition_mode(
    State(state): State<Arc<AppState>>,
    Path(person_id): Path<String>,
    Json(request): Json<RecognitionModeRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let mode = RecognitionMode::from_str(&request.mode).ok_or(GazeError::Validation {
        field: "mode".into(),
        message: format!("unknown recognition mode: {}", request.mode),
    })?;
    state.engine.set_recognition_mode(&person_id, mode)?;
    Ok(Json(json!({ "mode": mode.as_str() })))
}

// ----------------------------------------------------------------------
// Settings, stats, maintenance, backup
// ----------------------------------------------------------------------

async fn get_settings(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<serde_json::Value>> {
    let entries = state.engine.list_settings()?;
    let map: serde_json::Map<String, serde_json::Value> = entries.into_iter().collect();
    Ok(Json(json!({ "settings": map })))
}

#[derive(Deserialize)]
struct PutSettingRequest {
    key: String,
    value: serde_json::Value,
}

async fn put_setting(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PutSettingRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state.engine.set_setting(&request.key, &request.value)?;
    Ok(Json(json!({ "saved": true })))
}

async fn stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<gaze_core::EngineStats>> {
    Ok(Json(state.engine.stats()?))
}

async fn wipe_derived(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<serde_json::Value>> {
    state.engine.wipe_derived()?;
    Ok(Json(json!({ "wiped": true })))
}

async fn backup_export(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<BackupDocument>> {
    Ok(Json(state.engine.export_backup()?))
}

#[derive(Deserialize)]
struct RestoreRequest {
    #[serde(default = "default_restore_mode")]
    mode: RestoreMode,
    #[serde(default)]
    skip_missing_paths: bool,
    document: BackupDocument,
}

fn default_restore_mode() -> RestoreMode {
    RestoreMode::Merge
}

async fn backup_restore(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RestoreRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let report = state.engine.restore_backup(
        &request.document,
        &RestoreOptions {
            mode: request.mode,
            skip_missing_paths: request.skip_missing_paths,
        },
    )?;
    Ok(Json(json!({ "report": report })))
}
