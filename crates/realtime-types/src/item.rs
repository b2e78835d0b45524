use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Message,
    FunctionCall,
    FunctionCallOutput,
}

/// One content part of a conversation item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText {
        text: String,
    },
    InputAudio {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audio: Option<String>,
        #[serde(default)]
        transcript: Option<String>,
    },
    Text {
        text: String,
    },
    Audio {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audio: Option<String>,
        #[serde(default)]
        transcript: Option<String>,
    },
    #[serde(other)]
    Other,
}

/// A conversation item as carried by `conversation.item.*` and
/// `response.output_item.*` events.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Item {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ItemType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ItemRole>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl Item {
    /// A user message carrying typed text.
    pub fn user_text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            kind: Some(ItemType::Message),
            role: Some(ItemRole::User),
            content: vec![ContentPart::InputText { text: text.into() }],
            ..Default::default()
        }
    }

    /// The answer to a backend-initiated function call.
    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            kind: Some(ItemType::FunctionCallOutput),
            call_id: Some(call_id.into()),
            output: Some(output.into()),
            ..Default::default()
        }
    }

    pub fn is_message(&self) -> bool {
        matches!(self.kind, Some(ItemType::Message))
    }

    /// The first textual content of the item, whether typed or transcribed.
    pub fn text(&self) -> Option<&str> {
        self.content.iter().find_map(|part| match part {
            ContentPart::InputText { text } | ContentPart::Text { text } => Some(text.as_str()),
            ContentPart::InputAudio { transcript, .. } | ContentPart::Audio { transcript, .. } => {
                transcript.as_deref()
            }
            ContentPart::Other => None,
        })
    }

    /// True when the item holds user audio whose transcript has not arrived yet.
    pub fn awaits_transcription(&self) -> bool {
        self.content.iter().any(|part| {
            matches!(
                part,
                ContentPart::InputAudio { transcript, .. }
                    if transcript.as_deref().is_none_or(str::is_empty)
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_text_item_serialization() {
        let item = Item::user_text("item_1", "show me red sneakers");
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "item_1",
                "type": "message",
                "role": "user",
                "content": [{ "type": "input_text", "text": "show me red sneakers" }]
            })
        );
    }

    #[test]
    fn test_function_call_output_serialization() {
        let item = Item::function_call_output("call_9", "{\"success\":true}");
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "function_call_output",
                "call_id": "call_9",
                "output": "{\"success\":true}"
            })
        );
    }

    #[test]
    fn test_pending_audio_transcription() {
        let item: Item = serde_json::from_value(json!({
            "id": "item_2",
            "type": "message",
            "role": "user",
            "content": [{ "type": "input_audio", "transcript": null }]
        }))
        .unwrap();
        assert!(item.awaits_transcription());
        assert_eq!(item.text(), None);
    }

    #[test]
    fn test_unknown_content_part_is_tolerated() {
        let item: Item = serde_json::from_value(json!({
            "id": "item_3",
            "type": "message",
            "role": "assistant",
            "content": [{ "type": "image", "url": "x" }, { "type": "text", "text": "hi" }]
        }))
        .unwrap();
        assert_eq!(item.content[0], ContentPart::Other);
        assert_eq!(item.text(), Some("hi"));
    }
}
