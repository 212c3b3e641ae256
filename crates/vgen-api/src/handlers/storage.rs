//! Storage location handler.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageUrlResponse {
    pub success: bool,
    pub storage_url: String,
    pub audio_url: String,
    pub video_url: String,
    pub audio_bucket: String,
    pub video_bucket: String,
}

/// Public base URL of the object store and of each bucket.
pub async fn storage_urls(State(state): State<AppState>) -> Json<StorageUrlResponse> {
    let base = state.storage.public_base_url().trim_end_matches('/').to_string();

    Json(StorageUrlResponse {
        success: true,
        audio_url: format!("{}/{}", base, state.buckets.audio),
        video_url: format!("{}/{}", base, state.buckets.video),
        audio_bucket: state.buckets.audio.clone(),
        video_bucket: state.buckets.video.clone(),
        storage_url: base,
    })
}
