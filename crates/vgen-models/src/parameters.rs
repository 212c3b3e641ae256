//! Render parameters.
//!
//! The composition engine receives an open JSON object. Only the two keys
//! the pipeline itself reads and writes are typed; everything else rides
//! along untouched in `extra`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Parameters passed to a composition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderParameters {
    /// Narration audio the composition plays
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    /// Target frame count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_in_frames: Option<u32>,
    /// Opaque composition props
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RenderParameters {
    /// Build from an untyped JSON object.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn is_empty(&self) -> bool {
        self.audio_url.is_none() && self.duration_in_frames.is_none() && self.extra.is_empty()
    }

    /// Fill the opaque props from `defaults` when the caller supplied none.
    pub fn or_defaults(mut self, defaults: &Map<String, Value>) -> Self {
        if self.extra.is_empty() {
            self.extra = defaults.clone();
        }
        self
    }

    /// Reject values the engine cannot honour.
    pub fn validate(&self) -> Result<(), String> {
        if self.duration_in_frames == Some(0) {
            return Err("durationInFrames must be at least 1".to_string());
        }
        Ok(())
    }

    /// The full props object sent to the engine.
    pub fn to_props(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

/// Props of the stock `HelloWorld` composition.
pub fn default_composition_parameters() -> Map<String, Value> {
    match json!({
        "titleText": "Welcome",
        "titleColor": "#000000",
        "logoColor1": "#91EAE4",
        "logoColor2": "#86A8E7",
    }) {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_keys_split_from_extra() {
        let params = RenderParameters::from_value(json!({
            "titleText": "Hi",
            "audioUrl": "http://tts/audio/a.mp3",
            "durationInFrames": 90,
        }))
        .unwrap();

        assert_eq!(params.audio_url.as_deref(), Some("http://tts/audio/a.mp3"));
        assert_eq!(params.duration_in_frames, Some(90));
        assert_eq!(params.extra.len(), 1);
        assert_eq!(params.extra["titleText"], "Hi");
    }

    #[test]
    fn test_props_round_trip_keeps_unknown_keys() {
        let params = RenderParameters::from_value(json!({
            "nested": {"a": [1, 2]},
            "durationInFrames": 10,
        }))
        .unwrap();

        let props = params.to_props();
        assert_eq!(props["nested"]["a"][1], 2);
        assert_eq!(props["durationInFrames"], 10);
        assert!(props.get("audioUrl").is_none());
    }

    #[test]
    fn test_defaults_apply_only_when_empty() {
        let defaults = default_composition_parameters();

        let filled = RenderParameters::default().or_defaults(&defaults);
        assert_eq!(filled.extra["titleText"], "Welcome");

        let custom = RenderParameters::from_value(json!({"titleText": "Mine"}))
            .unwrap()
            .or_defaults(&defaults);
        assert_eq!(custom.extra.len(), 1);
        assert_eq!(custom.extra["titleText"], "Mine");
    }

    #[test]
    fn test_zero_frames_rejected() {
        let params = RenderParameters {
            duration_in_frames: Some(0),
            ..Default::default()
        };
        assert!(params.validate().is_err());
        assert!(RenderParameters::default().validate().is_ok());
    }
}
