//! Divewatch core: the dive-operation records the assistant can query, the
//! tools exposed to the voice model, and the one-shot generation client.

pub mod compliance;
pub mod llm_client;
pub mod records;
pub mod tools;
