//! Video job handlers.

use std::path::{Component, Path as FsPath, PathBuf};
use std::sync::OnceLock;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use validator::Validate;

use vgen_media::fs_utils::{remove_dir_if_empty, remove_file_quietly};
use vgen_models::{
    JobId, JobRecord, JobStatus, Narration, OutputLocation, PipelineKind, RenderParameters,
};
use vgen_store::{ListQuery, Page};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Request to render a composition without narration.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RenderVideoRequest {
    #[validate(length(min = 1, max = 128))]
    pub composition_id: Option<String>,
    pub parameters: Option<Value>,
    #[validate(length(min = 1, max = 512))]
    pub output_location: Option<String>,
}

/// Request to narrate text and render a composition timed to it.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateWithAudioRequest {
    #[validate(length(max = 5000))]
    pub text: Option<String>,
    #[serde(alias = "lang")]
    #[validate(length(max = 16))]
    pub language: Option<String>,
    #[validate(length(min = 1, max = 128))]
    pub composition_id: Option<String>,
    pub parameters: Option<Value>,
    #[validate(length(min = 1, max = 512))]
    pub output_location: Option<String>,
}

/// Response for an admitted job.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAccepted {
    pub job_id: JobId,
    pub status: JobStatus,
    pub output_location: OutputLocation,
    /// Where the artifact will be downloadable once completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Submit a render-only job.
pub async fn render_video(
    State(state): State<AppState>,
    Json(request): Json<RenderVideoRequest>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    request.validate()?;
    let job = build_job(
        &state,
        request.composition_id,
        request.parameters,
        request.output_location.as_deref(),
        None,
    )?;
    admit(&state, job).await
}

/// Submit a narrate-and-render job.
pub async fn generate_with_audio(
    State(state): State<AppState>,
    Json(request): Json<GenerateWithAudioRequest>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    request.validate()?;
    let text = request
        .text
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::validation("Text is required"))?;

    let job = build_job(
        &state,
        request.composition_id,
        request.parameters,
        request.output_location.as_deref(),
        Some(Narration::new(text, request.language)),
    )?;
    admit(&state, job).await
}

fn build_job(
    state: &AppState,
    composition_id: Option<String>,
    parameters: Option<Value>,
    output_location: Option<&str>,
    narration: Option<Narration>,
) -> ApiResult<JobRecord> {
    let composition_id = match composition_id.map(|c| c.trim().to_string()) {
        Some(id) if !id.is_empty() => {
            if !composition_id_pattern().is_match(&id) {
                return Err(ApiError::validation(format!(
                    "Invalid compositionId: {}",
                    id
                )));
            }
            id
        }
        _ => state.defaults.composition_id.clone(),
    };

    let parameters = parse_parameters(parameters, state)?;
    let job_id = JobId::new();
    let output_path =
        resolve_output_path(&state.output_dir, &job_id, output_location, &composition_id)?;

    let mut job = JobRecord::new(
        composition_id,
        parameters,
        OutputLocation::local(output_path),
        narration,
    );
    job.id = job_id;
    Ok(job)
}

fn composition_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").unwrap())
}

fn parse_parameters(raw: Option<Value>, state: &AppState) -> ApiResult<RenderParameters> {
    let parameters = match raw {
        None | Some(Value::Null) => RenderParameters::default(),
        Some(value @ Value::Object(_)) => RenderParameters::from_value(value)
            .map_err(|e| ApiError::validation(format!("Invalid parameters: {}", e)))?,
        Some(_) => return Err(ApiError::validation("parameters must be a JSON object")),
    }
    .or_defaults(&state.defaults.parameters);

    parameters.validate().map_err(ApiError::validation)?;
    Ok(parameters)
}

/// Resolve where the artifact is written: `<output_dir>/<jobId>/<name>`.
///
/// Each job owns its directory, so two jobs never share a file. Callers may
/// only name a relative path; without one the name is
/// `<compositionId>-<millis>.mp4`.
pub fn resolve_output_path(
    output_dir: &FsPath,
    job_id: &JobId,
    requested: Option<&str>,
    composition_id: &str,
) -> ApiResult<PathBuf> {
    let job_dir = output_dir.join(job_id.as_str());
    let Some(requested) = requested.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(job_dir.join(format!(
            "{}-{}.mp4",
            composition_id,
            Utc::now().timestamp_millis()
        )));
    };

    let relative = FsPath::new(requested);
    if relative.is_absolute() || requested.starts_with('/') || requested.starts_with('\\') {
        return Err(ApiError::bad_request(
            "outputLocation must be relative to the output directory",
        ));
    }
    if !relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(ApiError::bad_request(
            "outputLocation must not contain '..' or '.' segments",
        ));
    }

    Ok(job_dir.join(relative))
}

/// Public link for an artifact: the stored object URL once published, a
/// link into `/api/video/files` while it is still local.
pub fn artifact_url(state: &AppState, location: &OutputLocation) -> Option<String> {
    if location.is_remote() {
        return Some(location.as_str().to_string());
    }
    let path = location.local_path()?;
    let relative = path.strip_prefix(&state.output_dir).ok()?;
    let encoded = relative
        .components()
        .map(|c| urlencoding::encode(&c.as_os_str().to_string_lossy()).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    if encoded.is_empty() {
        return None;
    }
    Some(format!(
        "{}/api/video/files/{}",
        state.config.public_base_url, encoded
    ))
}

/// Persist then enqueue. A job the executor refuses is marked failed so no
/// record is left pending without a worker.
async fn admit(state: &AppState, job: JobRecord) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    let pipeline = job.pipeline_kind();
    state.jobs.create(&job).await?;

    let accepted = JobAccepted {
        job_id: job.id.clone(),
        status: job.status,
        url: artifact_url(state, &job.output_location),
        output_location: job.output_location.clone(),
    };

    if let Err(e) = state.executor.submit(job) {
        warn!(job_id = %accepted.job_id, "Job rejected: {}", e);
        metrics::record_job_rejected(pipeline.as_str());
        if let Err(store_err) = state.jobs.fail(&accepted.job_id, e.to_string()).await {
            warn!(job_id = %accepted.job_id, "Failed to mark rejected job: {}", store_err);
        }
        return Err(if e.is_capacity() {
            ApiError::ServiceUnavailable(e.to_string())
        } else {
            ApiError::Conflict(e.to_string())
        });
    }

    metrics::record_job_submitted(pipeline.as_str());
    info!(
        job_id = %accepted.job_id,
        pipeline = pipeline_label(pipeline),
        "Job accepted"
    );
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

fn pipeline_label(kind: PipelineKind) -> &'static str {
    match kind {
        PipelineKind::RenderOnly => "render",
        PipelineKind::NarrateAndRender => "narrated",
    }
}

/// Job status as returned to clients.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    #[serde(flatten)]
    pub job: JobRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Jobs waiting for a worker slot; present while the job is pending
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_depth: Option<usize>,
}

impl JobView {
    fn new(state: &AppState, job: JobRecord) -> Self {
        let url = artifact_url(state, &job.output_location);
        let queue_depth = (job.status == JobStatus::Pending).then(|| state.executor.queue_depth());
        Self {
            job,
            url,
            queue_depth,
        }
    }
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobView>> {
    let job = state
        .jobs
        .get(&JobId::from_string(job_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Job not found"))?;
    Ok(Json(JobView::new(&state, job)))
}

/// Paging query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u64,
}

impl Pagination {
    pub fn from_page<T>(page: &Page<T>) -> Self {
        Self {
            page: page.page,
            limit: page.limit,
            total: page.total,
            pages: page.pages(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub items: Vec<JobView>,
    pub pagination: Pagination,
}

/// Jobs, newest first, optionally filtered by status.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> ApiResult<Json<JobListResponse>> {
    let status = params
        .status
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(str::parse::<JobStatus>)
        .transpose()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let query = ListQuery {
        page: params.page.unwrap_or(1),
        limit: params.limit.unwrap_or(10),
        status,
    }
    .normalized();

    let page = state.jobs.list(query).await?;
    let pagination = Pagination::from_page(&page);
    Ok(Json(JobListResponse {
        items: page
            .items
            .into_iter()
            .map(|job| JobView::new(&state, job))
            .collect(),
        pagination,
    }))
}

#[derive(Debug, Serialize)]
pub struct DeleteJobResponse {
    pub success: bool,
}

/// Cancel a job if it is still running, remove its artifact, then the record.
///
/// Artifact removal is best effort; the record is removed regardless.
pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<DeleteJobResponse>> {
    let job_id = JobId::from_string(job_id);
    let job = state
        .jobs
        .get(&job_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Job not found"))?;

    if state.executor.cancel(&job_id) {
        info!(job_id = %job_id, "Cancelled running job");
    }

    delete_artifact(&state, &job.output_location).await;

    state.jobs.delete(&job_id).await?;
    info!(job_id = %job_id, "Job deleted");
    Ok(Json(DeleteJobResponse { success: true }))
}

async fn delete_artifact(state: &AppState, location: &OutputLocation) {
    if location.is_remote() {
        match state.storage.locate(location.as_str()) {
            Some((bucket, key)) => {
                if let Err(e) = state.storage.delete_object(&bucket, &key).await {
                    warn!("Failed to delete artifact {}: {}", location, e);
                }
            }
            None => warn!("Artifact {} is not in the object store, leaving it", location),
        }
        return;
    }

    if let Some(path) = location.local_path() {
        if path.starts_with(&state.output_dir) {
            remove_file_quietly(&path).await;
            let mut dir = path.parent();
            while let Some(d) = dir.filter(|d| *d != state.output_dir.as_path()) {
                remove_dir_if_empty(d).await;
                dir = d.parent();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output_path() {
        let job_id = JobId::from_string("job-1");
        let path =
            resolve_output_path(FsPath::new("/data/videos"), &job_id, None, "HelloWorld").unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(path.starts_with("/data/videos/job-1"));
        assert!(name.starts_with("HelloWorld-"));
        assert!(name.ends_with(".mp4"));
    }

    #[test]
    fn test_relative_output_path() {
        let job_id = JobId::from_string("job-1");
        let path = resolve_output_path(
            FsPath::new("/data/videos"),
            &job_id,
            Some("promo/intro.mp4"),
            "X",
        )
        .unwrap();
        assert_eq!(path, PathBuf::from("/data/videos/job-1/promo/intro.mp4"));
    }

    #[test]
    fn test_same_requested_name_is_unique_per_job() {
        let dir = FsPath::new("/data/videos");
        let a = resolve_output_path(dir, &JobId::from_string("a"), Some("same.mp4"), "X").unwrap();
        let b = resolve_output_path(dir, &JobId::from_string("b"), Some("same.mp4"), "X").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.file_name(), b.file_name());
    }

    #[test]
    fn test_output_path_escapes_rejected() {
        let dir = FsPath::new("/data/videos");
        let job_id = JobId::from_string("job-1");
        for bad in ["/etc/passwd", "../out.mp4", "a/../../b.mp4", "./a.mp4"] {
            assert!(
                resolve_output_path(dir, &job_id, Some(bad), "X").is_err(),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_composition_id_pattern() {
        assert!(composition_id_pattern().is_match("HelloWorld"));
        assert!(composition_id_pattern().is_match("only-logo_2"));
        assert!(!composition_id_pattern().is_match("../x"));
        assert!(!composition_id_pattern().is_match("a b"));
    }
}
