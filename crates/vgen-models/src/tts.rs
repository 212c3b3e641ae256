//! Narration-only (text-to-speech) records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a standalone synthesis request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TtsStatus {
    Pending,
    #[default]
    Completed,
    Failed,
}

impl TtsStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TtsStatus::Pending => "pending",
            TtsStatus::Completed => "completed",
            TtsStatus::Failed => "failed",
        }
    }
}

/// One synthesized (or attempted) narration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsRecord {
    /// Identifier assigned by the speech service (`failed-<millis>-<uuid>` for failures)
    pub file_id: String,
    pub text: String,
    #[serde(rename = "lang")]
    pub language: String,
    pub filename: String,
    /// Where the audio can be fetched
    pub url: String,
    pub status: TtsStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TtsRecord {
    /// Record for a successful synthesis.
    pub fn completed(
        text: impl Into<String>,
        language: impl Into<String>,
        file_id: impl Into<String>,
        filename: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            file_id: file_id.into(),
            text: text.into(),
            language: language.into(),
            filename: filename.into(),
            url: url.into(),
            status: TtsStatus::Completed,
            created_at: now,
            updated_at: now,
        }
    }

    /// Audit record for a failed synthesis attempt.
    pub fn failed(text: impl Into<String>, language: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            file_id: format!(
                "failed-{}-{}",
                now.timestamp_millis(),
                Uuid::new_v4().simple()
            ),
            text: text.into(),
            language: language.into(),
            filename: String::new(),
            url: String::new(),
            status: TtsStatus::Failed,
            created_at: now,
            updated_at: now,
        }
    }
}
