//! Provider-neutral events and commands exchanged with a live session.

use serde_json::{Map, Value};

/// Sample rate assumed for inbound audio whose mime tag carries no rate.
pub const DEFAULT_RESPONSE_RATE: u32 = 24_000;

/// 16-bit little-endian PCM audio tagged with its rate and channel count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBlob {
    pub data: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl EncodedBlob {
    pub fn new(data: Vec<u8>, sample_rate: u32, channels: u16) -> Self {
        Self {
            data,
            sample_rate,
            channels,
        }
    }

    /// The wire tag, e.g. `audio/pcm;rate=16000`.
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    /// Builds a mono blob from a mime tag such as `audio/pcm;rate=24000`.
    pub fn from_mime(mime_type: &str, data: Vec<u8>) -> Self {
        let sample_rate = mime_type
            .split(';')
            .filter_map(|param| param.trim().strip_prefix("rate="))
            .find_map(|rate| rate.parse().ok())
            .unwrap_or(DEFAULT_RESPONSE_RATE);
        Self::new(data, sample_rate, 1)
    }
}

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub args: Map<String, Value>,
}

/// The answer to one [`ToolCallRequest`], correlated by `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResponse {
    pub id: String,
    pub name: String,
    pub result: Map<String, Value>,
}

/// Everything a live connection can report, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// The server acknowledged the setup; the session may start streaming.
    Opened,
    InputTranscriptFragment(String),
    OutputTranscriptFragment(String),
    TurnComplete,
    /// One or more function calls; each must be answered.
    ToolCallRequest(Vec<ToolCallRequest>),
    AudioChunk(EncodedBlob),
    /// The user spoke over the model; pending playback must be flushed.
    Interrupted,
    /// The server will disconnect soon.
    GoAway { time_left: Option<String> },
    ConnectionError(String),
    ConnectionClosed,
}

/// Messages the client sends over an open connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    RealtimeInput(EncodedBlob),
    ToolResponse(ToolCallResponse),
    /// Close the connection gracefully.
    Close,
}
