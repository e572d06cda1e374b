//! Divewatch Voice Library Crate
//!
//! The real-time voice assistant: microphone capture and encoding, gapless
//! playback of streamed responses, transcript aggregation, tool dispatch over
//! the dive records, and the session controller tying them to a Gemini Live
//! connection. The `divewatch-voice` binary is a thin wrapper around this library.

pub mod capture;
pub mod codec;
pub mod config;
pub mod devices;
pub mod dispatcher;
pub mod error;
pub mod playback;
pub mod resample;
pub mod session;
pub mod transcript;

#[cfg(test)]
mod testing;
