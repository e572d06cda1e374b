/// Stands in for a side of the conversation that produced no text.
pub const EMPTY_SIDE_PLACEHOLDER: &str = "...";

/// One finished exchange between the operator and the assistant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptTurn {
    pub user_text: String,
    pub model_text: String,
}

/// Collects transcript fragments until the server marks the turn complete.
#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    pending_input: String,
    pending_output: String,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_input_fragment(&mut self, text: &str) {
        self.pending_input.push_str(text);
    }

    pub fn on_output_fragment(&mut self, text: &str) {
        self.pending_output.push_str(text);
    }

    /// Finalizes the pending turn and clears both buffers.
    ///
    /// Returns `None` when neither side said anything.
    pub fn on_turn_complete(&mut self) -> Option<TranscriptTurn> {
        let user_text = std::mem::take(&mut self.pending_input);
        let model_text = std::mem::take(&mut self.pending_output);
        let (user_text, model_text) = (user_text.trim(), model_text.trim());
        if user_text.is_empty() && model_text.is_empty() {
            return None;
        }
        Some(TranscriptTurn {
            user_text: or_placeholder(user_text),
            model_text: or_placeholder(model_text),
        })
    }

    pub fn has_pending(&self) -> bool {
        !self.pending_input.is_empty() || !self.pending_output.is_empty()
    }
}

fn or_placeholder(text: &str) -> String {
    if text.is_empty() {
        EMPTY_SIDE_PLACEHOLDER.to_string()
    } else {
        text.to_string()
    }
}
