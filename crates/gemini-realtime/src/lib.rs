//! Client for the Gemini Live `BidiGenerateContent` streaming API.
//!
//! Raw server messages are translated into an ordered stream of
//! [`ServerEvent`]s; outbound traffic is expressed as [`ClientCommand`]s.

pub mod client;
pub mod events;
pub mod protocol;

pub use client::{Connector, GeminiLiveClient, LiveConnection};
pub use events::{ClientCommand, EncodedBlob, ServerEvent, ToolCallRequest, ToolCallResponse};
pub use protocol::{FunctionDeclaration, SessionSetup};
