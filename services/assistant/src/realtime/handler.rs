//! Interprets inbound data-channel frames.

use super::Conversation;
use realtime_types::{ClientEvent, Item, ItemRole, ServerEvent};
use serde::Deserialize;
use serde_json::Value;
use shopper_core::{
    event_log::Direction,
    tools::ToolRegistry,
    transcript::{INAUDIBLE_PLACEHOLDER, ItemStatus, Role},
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What the session must do after an inbound frame was applied.
#[derive(Debug, Default, PartialEq)]
pub struct HandleOutcome {
    /// Backend-assigned session id, when the frame announced one.
    pub session_id: Option<String>,
    /// A tool call to run off the session task and answer afterwards.
    pub tool_call: Option<ToolCallRequest>,
}

/// A completed `function_call_arguments.done` awaiting dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
    pub session_id: String,
}

/// Applies server events to the conversation and answers tool calls.
#[derive(Clone)]
pub struct EventHandler {
    tools: ToolRegistry,
}

impl EventHandler {
    pub fn new(tools: ToolRegistry) -> Self {
        Self { tools }
    }

    /// Handles one raw frame. Every frame is logged before it is
    /// interpreted; one that is not JSON is logged as a string.
    pub async fn handle(
        &self,
        raw: &str,
        session_id: Option<&str>,
        conversation: &Mutex<Conversation>,
    ) -> HandleOutcome {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Dropping unparseable frame.");
                conversation
                    .lock()
                    .await
                    .events
                    .record(Direction::Server, Value::String(raw.to_string()));
                return HandleOutcome::default();
            }
        };
        conversation
            .lock()
            .await
            .events
            .record(Direction::Server, value.clone());

        let event = match ServerEvent::deserialize(&value) {
            Ok(event) => event,
            Err(e) => {
                warn!(event_type = event_type(&value), error = %e, "Malformed server event.");
                return HandleOutcome::default();
            }
        };
        debug!(event_type = event_type(&value), "Server event.");

        let mut outcome = HandleOutcome::default();
        match event {
            ServerEvent::SessionCreated { session } => {
                info!(session_id = ?session.id, "Realtime session created.");
                outcome.session_id = session.id;
            }
            ServerEvent::ConversationItemCreated { item, .. } => {
                apply_item_created(&item, &mut *conversation.lock().await);
            }
            ServerEvent::InputAudioTranscriptionCompleted {
                item_id, transcript, ..
            } => {
                let text = if transcript.trim().is_empty() {
                    INAUDIBLE_PLACEHOLDER
                } else {
                    transcript.as_str()
                };
                let mut conversation = conversation.lock().await;
                conversation.transcript.update_message(&item_id, text, false);
                conversation.transcript.set_status(&item_id, ItemStatus::Done);
            }
            ServerEvent::ResponseTextDelta { item_id, delta } => {
                let mut conversation = conversation.lock().await;
                let transcript = &mut conversation.transcript;
                if !transcript.contains(&item_id) {
                    transcript.add_message(&item_id, Role::Assistant, "", false);
                }
                transcript.update_message(&item_id, &delta, true);
            }
            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
                ..
            } => {
                outcome.tool_call = Some(ToolCallRequest {
                    call_id,
                    name,
                    arguments,
                    session_id: session_id.unwrap_or_default().to_string(),
                });
            }
            ServerEvent::ResponseOutputItemDone { item } => {
                if let Some(id) = item.id.as_deref() {
                    conversation
                        .lock()
                        .await
                        .transcript
                        .set_status(id, ItemStatus::Done);
                }
            }
            ServerEvent::ResponseDone { response } => {
                if response.status.as_deref() == Some("failed") {
                    warn!(details = ?response.status_details, "Response failed.");
                    conversation
                        .lock()
                        .await
                        .transcript
                        .add_breadcrumb("response failed", response.status_details);
                }
            }
            ServerEvent::Error { error } => {
                warn!(message = %error.message, code = ?error.code, "Backend reported an error.");
                conversation
                    .lock()
                    .await
                    .transcript
                    .add_breadcrumb("error", value.get("error").cloned());
            }
            ServerEvent::Other => {}
        }
        outcome
    }

    /// Dispatches a tool call and builds the reply frames: the serialized
    /// result followed by a request to continue the response.
    pub async fn answer_tool_call(
        &self,
        call: ToolCallRequest,
        conversation: &Mutex<Conversation>,
    ) -> Vec<ClientEvent> {
        let ToolCallRequest {
            call_id,
            name,
            arguments,
            session_id,
        } = call;
        let shown_arguments = serde_json::from_str::<Value>(&arguments)
            .unwrap_or_else(|_| Value::String(arguments.clone()));
        conversation
            .lock()
            .await
            .transcript
            .add_breadcrumb(format!("function call: {name}"), Some(shown_arguments));

        let result = self
            .tools
            .dispatch(&name, &arguments, &session_id)
            .await;
        let result = result.to_value();

        conversation
            .lock()
            .await
            .transcript
            .add_breadcrumb(format!("function call result: {name}"), Some(result.clone()));

        vec![
            ClientEvent::ConversationItemCreate {
                item: Item::function_call_output(call_id, result.to_string()),
            },
            ClientEvent::ResponseCreate,
        ]
    }
}

fn apply_item_created(item: &Item, conversation: &mut Conversation) {
    let (Some(id), true) = (item.id.as_deref(), item.is_message()) else {
        return;
    };
    let role = match item.role {
        Some(ItemRole::User) => Role::User,
        Some(ItemRole::Assistant) => Role::Assistant,
        _ => return,
    };
    let pending = role == Role::User && item.awaits_transcription();
    let text = item.text().unwrap_or_default();
    if !conversation.transcript.add_message(id, role, text, pending) {
        debug!(item_id = id, "Item already in transcript.");
        return;
    }
    // Typed user input is complete as soon as it is created.
    if role == Role::User && !pending {
        conversation.transcript.set_status(id, ItemStatus::Done);
    }
}

fn event_type(value: &Value) -> &str {
    value.get("type").and_then(Value::as_str).unwrap_or("unknown")
}
