//! Actix Web surface: realtime session routes, the MJPEG stream publisher,
//! batch video inference, artifact downloads, and Prometheus metrics.
//!
//! Handlers stay thin: they validate input, call into the realtime engine or
//! batch module, and encode responses. Blocking work (opening sources,
//! scoring videos) runs on the blocking pool.

use std::sync::Arc;

use actix_web::{
    App, HttpResponse, HttpServer,
    web::{self, Bytes},
};
use anyhow::{Context, Result};
use async_stream::stream;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::annotation;
use crate::batch;
use crate::config::AppConfig;
use crate::realtime::{
    CleanupQueue, Lifecycle, RegistryError, SessionRecord, SessionRegistry,
};
use crate::telemetry;
use inference_core::OnnxEngine;

/// Shared state backing all HTTP handlers.
pub struct AppState {
    pub config: AppConfig,
    pub registry: Arc<SessionRegistry>,
    pub cleanup: Arc<CleanupQueue>,
    pub engine: Arc<OnnxEngine>,
}

/// Bind and run the HTTP server until shutdown.
pub async fn run(state: AppState) -> Result<()> {
    let listen_addr = state.config.server.listen_addr.clone();
    let state = web::Data::new(state);

    info!(listen = %listen_addr, "starting http server");
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(web::PayloadConfig::new(512 * 1024 * 1024))
            .route(
                "/api/realtimeinference/create",
                web::post().to(create_session),
            )
            .route(
                "/api/realtimeinference/session/{session_id}",
                web::get().to(stream_session),
            )
            .route(
                "/api/realtimeinference/delete",
                web::post().to(delete_sessions),
            )
            .route("/api/realtimeinference/sync", web::post().to(sync_sessions))
            .route("/api/videoinference", web::post().to(video_inference))
            .route(
                "/api/videoinference/video/{video_id}",
                web::get().to(result_video),
            )
            .route(
                "/api/videoinference/cover/{video_id}",
                web::get().to(result_cover),
            )
            .route("/api/videoinference/delete", web::post().to(delete_videos))
            .route("/metrics", web::get().to(metrics_endpoint))
    })
    .bind(&listen_addr)
    .with_context(|| format!("failed to bind {listen_addr}"))?
    .run()
    .await
    .context("http server terminated abnormally")
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest {
    session_id: Option<String>,
    source: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteSessionsRequest {
    session_ids: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncSessionsRequest {
    sessions: Vec<SessionRecord>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteVideosRequest {
    video_ids: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoInferenceQuery {
    video_id: Option<String>,
}

/// Open a pipeline for the supplied source and register it.
///
/// The persisted session record is the caller's concern; this route only
/// manages the live pipeline.
async fn create_session(
    state: web::Data<AppState>,
    request: web::Json<CreateSessionRequest>,
) -> HttpResponse {
    let request = request.into_inner();
    let session_id = request
        .session_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    if !valid_identifier(&session_id) {
        return HttpResponse::BadRequest().json(json!({ "error": "invalid session id" }));
    }

    let registry = state.registry.clone();
    let source = request.source;
    let create_id = session_id.clone();
    let created = web::block(move || registry.create(&create_id, &source)).await;

    match created {
        Ok(Ok(_)) => HttpResponse::Ok().json(json!({ "sessionId": session_id })),
        Ok(Err(RegistryError::AlreadyExists(id))) => HttpResponse::Conflict()
            .json(json!({ "error": format!("session {id} already exists") })),
        Ok(Err(err)) => {
            error!("session creation failed: {err}");
            HttpResponse::InternalServerError().json(json!({ "error": err.to_string() }))
        }
        Err(err) => {
            error!("session creation task failed: {err}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// MJPEG stream publisher: poll the session's published result at the
/// configured cadence, skip not-ready polls, and end the stream once the
/// session stops.
async fn stream_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> HttpResponse {
    let session_id = path.into_inner();
    let Some(session) = state.registry.lookup(&session_id) else {
        return HttpResponse::NotFound().finish();
    };

    let poll_interval = state.config.frames_interval();
    let annotation_config = state.config.annotation.clone();

    let body = stream! {
        let mut interval = actix_web::rt::time::interval(poll_interval.max(std::time::Duration::from_millis(1)));
        loop {
            interval.tick().await;
            if session.lifecycle() != Lifecycle::Running {
                break;
            }
            let Some(scored) = session.result() else {
                continue;
            };

            let mut frame = scored.frame;
            annotation::annotate_frame(&mut frame, scored.score, &annotation_config);
            match annotation::encode_jpeg(&frame, annotation_config.jpeg_quality) {
                Ok(jpeg) => {
                    let mut payload = Vec::with_capacity(jpeg.len() + 64);
                    payload.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
                    payload.extend_from_slice(&jpeg);
                    payload.extend_from_slice(b"\r\n");
                    yield Ok::<Bytes, actix_web::Error>(Bytes::from(payload));
                }
                Err(err) => {
                    error!("annotated frame encoding failed: {err}");
                }
            }
        }
    };

    HttpResponse::Ok()
        .append_header(("Cache-Control", "no-cache"))
        .append_header((
            "Content-Type",
            "multipart/x-mixed-replace; boundary=frame",
        ))
        .streaming(body)
}

/// Release and unregister each listed session; unknown ids are skipped.
async fn delete_sessions(
    state: web::Data<AppState>,
    request: web::Json<DeleteSessionsRequest>,
) -> HttpResponse {
    let registry = state.registry.clone();
    let session_ids = request.into_inner().session_ids;

    let deleted = web::block(move || {
        session_ids
            .iter()
            .filter(|id| registry.delete(id).is_ok())
            .count()
    })
    .await;

    match deleted {
        Ok(count) => HttpResponse::Ok().json(json!({ "deletedCount": count })),
        Err(err) => {
            error!("session deletion task failed: {err}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Full-replace reconciliation against the caller's persisted session list.
async fn sync_sessions(
    state: web::Data<AppState>,
    request: web::Json<SyncSessionsRequest>,
) -> HttpResponse {
    let registry = state.registry.clone();
    let records = request.into_inner().sessions;

    let outcome = web::block(move || registry.resync(&records)).await;
    match outcome {
        Ok(outcome) => HttpResponse::Ok().json(json!({
            "sessionCount": outcome.active,
            "skipped": outcome
                .failures
                .iter()
                .map(|(id, err)| json!({ "sessionId": id, "error": err.to_string() }))
                .collect::<Vec<_>>(),
        })),
        Err(err) => {
            error!("resync task failed: {err}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Score an uploaded video and render its annotated artifacts.
async fn video_inference(
    state: web::Data<AppState>,
    query: web::Query<VideoInferenceQuery>,
    payload: Bytes,
) -> HttpResponse {
    if payload.is_empty() {
        return HttpResponse::BadRequest().json(json!({ "error": "empty video payload" }));
    }

    let video_id = query
        .into_inner()
        .video_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    if !valid_identifier(&video_id) {
        return HttpResponse::BadRequest().json(json!({ "error": "invalid video id" }));
    }

    let engine = state.engine.clone();
    let cleanup = state.cleanup.clone();
    let server_config = state.config.server.clone();
    let annotation_config = state.config.annotation.clone();
    let job_id = video_id.clone();

    let scores = web::block(move || {
        batch::run_video_job(
            &engine,
            &server_config,
            &annotation_config,
            &cleanup,
            &job_id,
            &payload,
        )
    })
    .await;

    match scores {
        Ok(Ok(scores)) => {
            HttpResponse::Ok().json(json!({ "videoId": video_id, "scores": scores }))
        }
        Ok(Err(err)) => {
            error!("batch video job failed: {err:#}");
            HttpResponse::BadRequest().json(json!({ "error": err.to_string() }))
        }
        Err(err) => {
            error!("batch video task failed: {err}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

async fn result_video(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    serve_artifact(&state, &path.into_inner(), ArtifactKind::Video)
}

async fn result_cover(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    serve_artifact(&state, &path.into_inner(), ArtifactKind::Cover)
}

/// Queue result artifacts of each listed video for deferred deletion.
async fn delete_videos(
    state: web::Data<AppState>,
    request: web::Json<DeleteVideosRequest>,
) -> HttpResponse {
    let video_ids = request.into_inner().video_ids;

    let mut deleted = 0;
    for video_id in &video_ids {
        if !valid_identifier(video_id) {
            continue;
        }
        let paths = batch::ArtifactPaths::for_video(&state.config.server, video_id);
        state.cleanup.enqueue(paths.video);
        state.cleanup.enqueue(paths.cover);
        deleted += 1;
    }

    HttpResponse::Ok().json(json!({ "deletedCount": deleted }))
}

async fn metrics_endpoint() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().finish(),
    }
}

enum ArtifactKind {
    Video,
    Cover,
}

fn serve_artifact(state: &AppState, video_id: &str, kind: ArtifactKind) -> HttpResponse {
    if !valid_identifier(video_id) {
        return HttpResponse::BadRequest().finish();
    }

    let paths = batch::ArtifactPaths::for_video(&state.config.server, video_id);
    let (path, content_type) = match kind {
        ArtifactKind::Video => (paths.video, "video/mp4"),
        ArtifactKind::Cover => (paths.cover, "image/jpeg"),
    };

    match std::fs::read(&path) {
        Ok(bytes) => HttpResponse::Ok().content_type(content_type).body(bytes),
        Err(_) => HttpResponse::NotFound().finish(),
    }
}

/// Identifiers come from callers and end up in artifact paths; restrict them
/// to a safe alphabet.
fn valid_identifier(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
