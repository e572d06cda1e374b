//! JSON message types of the Gemini Live `BidiGenerateContent` protocol and
//! their translation to and from the provider-neutral events.

use crate::events::{ClientCommand, EncodedBlob, ServerEvent, ToolCallRequest};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// A function the model may call, as declared in the setup message.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Fixed configuration sent once when the connection opens.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSetup {
    /// Full model resource name, e.g. `models/gemini-2.0-flash-live-001`.
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub tools: Vec<FunctionDeclaration>,
}

// --- Client -> server ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) enum ClientMessage {
    Setup(BidiGenerateContentSetup),
    RealtimeInput(BidiGenerateContentRealtimeInput),
    ToolResponse(BidiGenerateContentToolResponse),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BidiGenerateContentSetup {
    model: String,
    generation_config: GenerationConfig,
    system_instruction: Content,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    input_audio_transcription: AudioTranscriptionConfig,
    output_audio_transcription: AudioTranscriptionConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<ResponseModality>,
    speech_config: SpeechConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "UPPERCASE")]
enum ResponseModality {
    Audio,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Tool {
    function_declarations: Vec<FunctionDeclaration>,
}

/// Enables transcription; the server expects an empty object.
#[derive(Serialize)]
struct AudioTranscriptionConfig {}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BidiGenerateContentRealtimeInput {
    audio: Blob,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Blob {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BidiGenerateContentToolResponse {
    function_responses: Vec<FunctionResponse>,
}

#[derive(Serialize)]
struct FunctionResponse {
    id: String,
    name: String,
    response: Value,
}

impl ClientMessage {
    pub(crate) fn setup(setup: &SessionSetup) -> Self {
        let tools = if setup.tools.is_empty() {
            Vec::new()
        } else {
            vec![Tool {
                function_declarations: setup.tools.clone(),
            }]
        };
        ClientMessage::Setup(BidiGenerateContentSetup {
            model: setup.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec![ResponseModality::Audio],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: setup.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![Part {
                    text: setup.system_instruction.clone(),
                }],
            },
            tools,
            input_audio_transcription: AudioTranscriptionConfig {},
            output_audio_transcription: AudioTranscriptionConfig {},
        })
    }

    /// Maps a command to its wire message. `Close` has no JSON form.
    pub(crate) fn from_command(command: ClientCommand) -> Option<Self> {
        match command {
            ClientCommand::RealtimeInput(blob) => Some(ClientMessage::RealtimeInput(
                BidiGenerateContentRealtimeInput {
                    audio: Blob {
                        mime_type: blob.mime_type(),
                        data: base64::engine::general_purpose::STANDARD.encode(&blob.data),
                    },
                },
            )),
            ClientCommand::ToolResponse(response) => Some(ClientMessage::ToolResponse(
                BidiGenerateContentToolResponse {
                    function_responses: vec![FunctionResponse {
                        id: response.id,
                        name: response.name,
                        response: json!({ "result": Value::Object(response.result) }),
                    }],
                },
            )),
            ClientCommand::Close => None,
        }
    }
}

// --- Server -> client ---

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServerMessage {
    pub setup_complete: Option<Value>,
    pub server_content: Option<LiveServerContent>,
    pub tool_call: Option<LiveToolCall>,
    pub go_away: Option<GoAway>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LiveServerContent {
    pub model_turn: Option<ServerContentTurn>,
    pub input_transcription: Option<ServerTranscription>,
    pub output_transcription: Option<ServerTranscription>,
    pub turn_complete: Option<bool>,
    pub interrupted: Option<bool>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct ServerContentTurn {
    #[serde(default)]
    pub parts: Vec<ServerPart>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServerPart {
    pub inline_data: Option<ServerBlob>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServerBlob {
    #[serde(default)]
    pub mime_type: String,
    pub data: String,
}

#[derive(Deserialize, Debug)]
pub(crate) struct ServerTranscription {
    #[serde(default)]
    pub text: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LiveToolCall {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct FunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoAway {
    pub time_left: Option<String>,
}

/// Translates one server message into events.
///
/// Order within a message: open, input transcript, output transcript, tool
/// calls, audio, interruption, turn completion. Audio parts whose payload is
/// not valid base64 are skipped.
pub(crate) fn translate(message: ServerMessage) -> Vec<ServerEvent> {
    let mut events = Vec::new();

    if message.setup_complete.is_some() {
        events.push(ServerEvent::Opened);
    }

    let content = message.server_content.unwrap_or_default();
    if let Some(t) = content.input_transcription.filter(|t| !t.text.is_empty()) {
        events.push(ServerEvent::InputTranscriptFragment(t.text));
    }
    if let Some(t) = content.output_transcription.filter(|t| !t.text.is_empty()) {
        events.push(ServerEvent::OutputTranscriptFragment(t.text));
    }

    if let Some(call) = message.tool_call {
        let requests: Vec<_> = call
            .function_calls
            .into_iter()
            .map(|fc| ToolCallRequest {
                id: fc.id,
                name: fc.name,
                args: fc.args,
            })
            .collect();
        if !requests.is_empty() {
            events.push(ServerEvent::ToolCallRequest(requests));
        }
    }

    if let Some(turn) = content.model_turn {
        for blob in turn.parts.into_iter().filter_map(|p| p.inline_data) {
            match base64::engine::general_purpose::STANDARD.decode(&blob.data) {
                Ok(bytes) => events.push(ServerEvent::AudioChunk(EncodedBlob::from_mime(
                    &blob.mime_type,
                    bytes,
                ))),
                Err(e) => tracing::warn!(error = %e, "Dropping audio part with invalid base64"),
            }
        }
    }

    if content.interrupted == Some(true) {
        events.push(ServerEvent::Interrupted);
    }
    if content.turn_complete == Some(true) {
        events.push(ServerEvent::TurnComplete);
    }
    if let Some(go_away) = message.go_away {
        events.push(ServerEvent::GoAway {
            time_left: go_away.time_left,
        });
    }

    events
}

/// Parses a raw frame payload and translates it.
pub(crate) fn parse_server_frame(payload: &str) -> serde_json::Result<Vec<ServerEvent>> {
    serde_json::from_str::<ServerMessage>(payload).map(translate)
}
