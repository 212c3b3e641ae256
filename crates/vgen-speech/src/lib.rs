//! Text-to-speech service client.
//!
//! The speech service is a small HTTP API:
//! - `POST /generate` `{text, lang}` -> `{success, file_id, filename, url, duration?}`
//! - `GET /audio/{filename}` serves the audio
//! - `DELETE /audio/{filename}` removes it
//! - `GET /health`

mod client;
mod error;

pub use client::{SpeechClient, SpeechConfig, SpeechSynthesizer, SynthesisResult};
pub use error::{SpeechError, SpeechResult};
