use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Audio,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    Pcm16,
    G711Ulaw,
    G711Alaw,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputAudioTranscription {
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnDetection {
    ServerVad {
        threshold: f32,
        prefix_padding_ms: u32,
        silence_duration_ms: u32,
        create_response: bool,
    },
}

impl Default for TurnDetection {
    fn default() -> Self {
        TurnDetection::ServerVad {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
            create_response: true,
        }
    }
}

/// A tool the backend may invoke, as advertised by the session bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolDefinition {
    Function {
        name: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        parameters: Value,
    },
}

impl ToolDefinition {
    pub fn name(&self) -> &str {
        match self {
            ToolDefinition::Function { name, .. } => name,
        }
    }
}

/// Body of a `session.update` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    pub modalities: Vec<Modality>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    pub voice: String,
    pub input_audio_format: AudioFormat,
    pub output_audio_format: AudioFormat,
    pub input_audio_transcription: Option<InputAudioTranscription>,
    pub turn_detection: Option<TurnDetection>,
}

impl SessionConfig {
    /// Builds the configuration sent once the data channel opens.
    ///
    /// Server-side voice activity detection is only requested while the
    /// microphone is live; a muted session is driven by typed input.
    pub fn new(
        instructions: Option<String>,
        tools: Vec<ToolDefinition>,
        voice: impl Into<String>,
        microphone_enabled: bool,
    ) -> Self {
        Self {
            modalities: vec![Modality::Text, Modality::Audio],
            instructions,
            tools,
            voice: voice.into(),
            input_audio_format: AudioFormat::Pcm16,
            output_audio_format: AudioFormat::Pcm16,
            input_audio_transcription: Some(InputAudioTranscription {
                model: "whisper-1".to_string(),
            }),
            turn_detection: microphone_enabled.then(TurnDetection::default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_definition_from_bootstrap() {
        let tool: ToolDefinition = serde_json::from_value(json!({
            "type": "function",
            "name": "add_to_cart",
            "description": "Add items to the cart",
            "parameters": { "type": "object" }
        }))
        .unwrap();
        assert_eq!(tool.name(), "add_to_cart");
    }

    #[test]
    fn test_session_config_without_microphone_has_no_turn_detection() {
        let config = SessionConfig::new(Some("be helpful".into()), vec![], "alloy", false);
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["turn_detection"], Value::Null);
        assert_eq!(value["modalities"], json!(["text", "audio"]));
        assert_eq!(value["input_audio_format"], "pcm16");
        assert_eq!(value["input_audio_transcription"]["model"], "whisper-1");
    }

    #[test]
    fn test_session_config_with_microphone_uses_server_vad() {
        let config = SessionConfig::new(None, vec![], "alloy", true);
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["turn_detection"]["type"], "server_vad");
        assert!(value.get("instructions").is_none());
    }
}
