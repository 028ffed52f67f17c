//! Message codec for the Live API
//!
//! The service is not consistent about `camelCase` vs `snake_case` keys, so
//! every field accepts both spellings on decode. Encoding always emits the
//! documented `camelCase` form.

use crate::config::LiveConfig;
use crate::error::{LiveError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MIME_JPEG: &str = "image/jpeg";
pub const MIME_PCM_16K: &str = "audio/pcm;rate=16000";

/// A function the model may call, declared in the setup message.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDeclaration {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<String>,
    /// JSON schema of the arguments object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default, alias = "mime_type", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub data: String,
}

impl InlineData {
    pub fn new(mime_type: &str, data: String) -> Self {
        Self {
            mime_type: Some(mime_type.to_string()),
            data,
        }
    }

    pub fn is_audio(&self) -> bool {
        self.mime_type
            .as_deref()
            .is_some_and(|m| m.starts_with("audio/"))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    #[serde(default, alias = "mime_type")]
    pub mime_type: String,
    #[serde(alias = "file_uri")]
    pub file_uri: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub response: Value,
}

impl FunctionResponse {
    /// Response that echoes the call's arguments back as `{"output": args}`.
    pub fn echo(call: &FunctionCall) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            response: serde_json::json!({
                "output": call.args.clone().unwrap_or(Value::Null)
            }),
        }
    }
}

/// One content part. Exactly one field is expected to be set.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, alias = "inline_data", skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
    #[serde(default, alias = "file_data", skip_serializing_if = "Option::is_none")]
    pub file_data: Option<FileData>,
    #[serde(default, alias = "function_call", skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, alias = "function_response", skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
}

impl Part {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn inline(mime_type: &str, data: String) -> Self {
        Self {
            inline_data: Some(InlineData::new(mime_type, data)),
            ..Default::default()
        }
    }

    pub fn function_response(response: FunctionResponse) -> Self {
        Self {
            function_response: Some(response),
            ..Default::default()
        }
    }
}

/// A role-tagged sequence of parts.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn new(role: &str, parts: Vec<Part>) -> Self {
        Self {
            role: Some(role.to_string()),
            parts,
        }
    }

    pub fn user(parts: Vec<Part>) -> Self {
        Self::new("user", parts)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(default, alias = "response_modalities", skip_serializing_if = "Vec::is_empty")]
    pub response_modalities: Vec<String>,
}

/// Tool switches. The built-in tools take an empty object when enabled.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Tools {
    #[serde(default, alias = "function_declarations", skip_serializing_if = "Option::is_none")]
    pub function_declarations: Option<Vec<FunctionDeclaration>>,
    #[serde(default, alias = "google_search", skip_serializing_if = "Option::is_none")]
    pub google_search: Option<Value>,
    #[serde(default, alias = "code_execution", skip_serializing_if = "Option::is_none")]
    pub code_execution: Option<Value>,
    #[serde(default, alias = "url_context", skip_serializing_if = "Option::is_none")]
    pub url_context: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AutomaticActivityDetection {
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, alias = "prefix_padding_ms", skip_serializing_if = "Option::is_none")]
    pub prefix_padding_ms: Option<u32>,
    #[serde(default, alias = "silence_duration_ms", skip_serializing_if = "Option::is_none")]
    pub silence_duration_ms: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputConfig {
    #[serde(default, alias = "automatic_activity_detection")]
    pub automatic_activity_detection: AutomaticActivityDetection,
}

/// Session setup message body.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    #[serde(default, alias = "generation_config", skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    #[serde(default, alias = "system_instruction", skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Tools>,
    #[serde(default, alias = "realtime_input_config", skip_serializing_if = "Option::is_none")]
    pub realtime_input_config: Option<RealtimeInputConfig>,
    #[serde(default, alias = "input_audio_transcription", skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<Value>,
    #[serde(default, alias = "output_audio_transcription", skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<Value>,
}

impl Setup {
    pub fn from_config(config: &LiveConfig) -> Self {
        let enabled = |on: bool| on.then(|| Value::Object(Default::default()));
        let function_declarations = if config.function_declarations.is_empty() {
            None
        } else {
            Some(config.function_declarations.clone())
        };

        Self {
            model: config.model.clone(),
            generation_config: Some(GenerationConfig {
                response_modalities: vec![config.response_modality.as_str().to_string()],
            }),
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part::text(config.system_instruction.clone())],
            }),
            tools: Some(Tools {
                function_declarations,
                google_search: enabled(config.google_search),
                code_execution: enabled(config.code_execution),
                url_context: enabled(config.url_context),
            }),
            realtime_input_config: Some(RealtimeInputConfig {
                automatic_activity_detection: AutomaticActivityDetection {
                    disabled: config.activity_detection_disabled,
                    prefix_padding_ms: Some(config.activity_detection_prefix_padding_ms),
                    silence_duration_ms: Some(config.activity_detection_silence_ms),
                },
            }),
            input_audio_transcription: enabled(config.input_audio_transcription),
            output_audio_transcription: enabled(config.output_audio_transcription),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    #[serde(default, alias = "turn_complete")]
    pub turn_complete: bool,
    #[serde(default)]
    pub turns: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    #[serde(alias = "mime_type")]
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    #[serde(default, alias = "media_chunks")]
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    #[serde(default, alias = "function_responses")]
    pub function_responses: Vec<FunctionResponse>,
}

/// Message sent from client to server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    #[serde(alias = "client_content")]
    ClientContent(ClientContent),
    #[serde(alias = "realtime_input")]
    RealtimeInput(RealtimeInput),
    #[serde(alias = "tool_response")]
    ToolResponse(ToolResponse),
}

impl ClientMessage {
    pub fn setup(config: &LiveConfig) -> Self {
        Self::Setup(Setup::from_config(config))
    }

    pub fn turn(turn_complete: bool, content: Content) -> Self {
        Self::ClientContent(ClientContent {
            turn_complete,
            turns: vec![content],
        })
    }

    pub fn media_chunk(mime_type: &str, data: String) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: mime_type.to_string(),
                data,
            }],
        })
    }

    pub fn tool_response(function_responses: Vec<FunctionResponse>) -> Self {
        Self::ToolResponse(ToolResponse { function_responses })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Transcription {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default, alias = "model_turn")]
    pub model_turn: Option<Content>,
    #[serde(default, alias = "turn_complete")]
    pub turn_complete: Option<bool>,
    #[serde(default, alias = "generation_complete")]
    pub generation_complete: Option<bool>,
    #[serde(default)]
    pub interrupted: Option<bool>,
    #[serde(default, alias = "input_transcription")]
    pub input_transcription: Option<Transcription>,
    #[serde(default, alias = "output_transcription")]
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    #[serde(default, alias = "function_calls")]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

/// Server -> client message. Every field is optional and unknown fields are
/// ignored, so the all-`None` value doubles as the "empty" sentinel.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default, alias = "setup_complete", skip_serializing_if = "Option::is_none")]
    pub setup_complete: Option<Value>,
    #[serde(default, alias = "server_content", skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
    #[serde(default, alias = "tool_call", skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    #[serde(default, alias = "tool_call_cancellation", skip_serializing_if = "Option::is_none")]
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    #[serde(default, alias = "go_away", skip_serializing_if = "Option::is_none")]
    pub go_away: Option<Value>,
    #[serde(default, alias = "session_resumption_update", skip_serializing_if = "Option::is_none")]
    pub session_resumption_update: Option<Value>,
    #[serde(default, alias = "usage_metadata", skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<Value>,
    #[serde(default, alias = "grounding_metadata", skip_serializing_if = "Option::is_none")]
    pub grounding_metadata: Option<Value>,
}

impl ServerMessage {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Parts of the model turn, if the message carries one.
    pub fn model_parts(&self) -> &[Part] {
        self.server_content
            .as_ref()
            .and_then(|c| c.model_turn.as_ref())
            .map(|t| t.parts.as_slice())
            .unwrap_or(&[])
    }

    /// Whether any model part carries audio-typed inline data.
    pub fn has_audio(&self) -> bool {
        self.model_parts()
            .iter()
            .any(|p| p.inline_data.as_ref().is_some_and(InlineData::is_audio))
    }

    pub fn function_calls(&self) -> Option<&[FunctionCall]> {
        self.tool_call.as_ref().map(|t| t.function_calls.as_slice())
    }
}

/// Encode an outbound message as JSON text.
pub fn encode(msg: &ClientMessage) -> Result<String> {
    Ok(serde_json::to_string(msg)?)
}

/// Decode a server payload. Blank or `null` payloads yield the empty message.
pub fn decode(text: &str) -> Result<ServerMessage> {
    match parse_value(text)? {
        None => Ok(ServerMessage::default()),
        Some(value) => serde_json::from_value(value).map_err(|e| LiveError::decode(e, text)),
    }
}

/// Lenient decoder for client messages, accepting either key spelling.
pub fn decode_client(text: &str) -> Result<Option<ClientMessage>> {
    match parse_value(text)? {
        None => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| LiveError::decode(e, text)),
    }
}

fn parse_value(text: &str) -> Result<Option<Value>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(trimmed).map_err(|e| LiveError::decode(e, text))?;
    if value.is_null() {
        return Ok(None);
    }
    if !value.is_object() {
        return Err(LiveError::decode("expected a JSON object", text));
    }
    Ok(Some(value))
}
