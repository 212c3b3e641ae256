//! Narration-only (text-to-speech) handlers.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

use vgen_models::{TtsRecord, DEFAULT_LANGUAGE};
use vgen_store::ListQuery;

use crate::error::{ApiError, ApiResult};
use crate::handlers::video::{Pagination, PageParams};
use crate::metrics;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct GenerateTtsRequest {
    #[validate(length(max = 5000))]
    pub text: Option<String>,
    #[serde(alias = "language")]
    #[validate(length(max = 16))]
    pub lang: Option<String>,
}

/// Synthesize narration and record the result.
///
/// A failed synthesis is still recorded, with status `failed`, before the
/// error is returned.
pub async fn generate_tts(
    State(state): State<AppState>,
    Json(request): Json<GenerateTtsRequest>,
) -> ApiResult<Json<TtsRecord>> {
    request.validate()?;
    let text = request
        .text
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::validation("Text is required"))?
        .to_string();
    let lang = request
        .lang
        .filter(|l| !l.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

    match state.speech.synthesize(&text, &lang).await {
        Ok(result) => {
            let record = TtsRecord::completed(
                text,
                lang,
                result.file_id,
                result.filename,
                result.audio_url,
            );
            state.tts.create(&record).await?;
            metrics::record_tts_request("completed");
            info!(file_id = %record.file_id, "Narration generated");
            Ok(Json(record))
        }
        Err(e) => {
            metrics::record_tts_request("failed");
            let failed = TtsRecord::failed(text, lang);
            if let Err(store_err) = state.tts.create(&failed).await {
                warn!("Failed to record failed synthesis: {}", store_err);
            }
            Err(e.into())
        }
    }
}

#[derive(Serialize)]
pub struct TtsHistoryResponse {
    pub items: Vec<TtsRecord>,
    pub pagination: Pagination,
}

/// Narration history, newest first.
pub async fn tts_history(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> ApiResult<Json<TtsHistoryResponse>> {
    let query = ListQuery {
        page: params.page.unwrap_or(1),
        limit: params.limit.unwrap_or(10),
        status: None,
    }
    .normalized();

    let page = state.tts.list(query).await?;
    let pagination = Pagination::from_page(&page);
    Ok(Json(TtsHistoryResponse {
        items: page.items,
        pagination,
    }))
}

pub async fn get_tts(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> ApiResult<Json<TtsRecord>> {
    state
        .tts
        .get(&file_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("TTS request not found"))
}

#[derive(Serialize)]
pub struct DeleteTtsResponse {
    pub success: bool,
    pub message: String,
}

/// Remove a record, then best-effort remove its audio from the speech service.
pub async fn delete_tts(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> ApiResult<Json<DeleteTtsResponse>> {
    let record = state
        .tts
        .delete(&file_id)
        .await?
        .ok_or_else(|| ApiError::not_found("TTS request not found"))?;

    if !record.filename.is_empty() {
        if let Err(e) = state.speech.delete_audio(&record.filename).await {
            warn!(file_id = %file_id, "Failed to delete audio from speech service: {}", e);
        }
    }

    Ok(Json(DeleteTtsResponse {
        success: true,
        message: "TTS request deleted successfully".to_string(),
    }))
}
