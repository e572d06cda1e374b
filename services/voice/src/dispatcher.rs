//! Routes tool calls from the model to the local record queries.

use chrono::NaiveDate;
use divewatch_core::records::RecordStore;
use divewatch_core::tools::{ToolDefinition, ToolResult, builtin_tools};
use gemini_realtime::{FunctionDeclaration, ToolCallRequest, ToolCallResponse};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

pub struct ToolDispatcher {
    tools: HashMap<&'static str, ToolDefinition>,
    order: Vec<&'static str>,
    store: Arc<dyn RecordStore>,
    today: Clock,
}

impl ToolDispatcher {
    /// A dispatcher serving the built-in tools against `store`.
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self::with_tools(store, builtin_tools())
    }

    pub fn with_tools(store: Arc<dyn RecordStore>, definitions: Vec<ToolDefinition>) -> Self {
        let order = definitions.iter().map(|d| d.name).collect();
        let tools = definitions.into_iter().map(|d| (d.name, d)).collect();
        Self {
            tools,
            order,
            store,
            today: Arc::new(|| chrono::Local::now().date_naive()),
        }
    }

    /// Overrides the calendar used to decide what "today" is.
    pub fn with_clock(mut self, today: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.today = Arc::new(today);
        self
    }

    /// Declarations to announce in the session setup, in registration order.
    pub fn declarations(&self) -> Vec<FunctionDeclaration> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| FunctionDeclaration {
                name: tool.name.to_string(),
                description: tool.description.to_string(),
                parameters: tool.parameters.clone(),
            })
            .collect()
    }

    /// Runs the handler for `request`. Every request gets a response; an
    /// unknown tool name yields an error result instead of failing.
    pub fn dispatch(&self, request: &ToolCallRequest) -> ToolCallResponse {
        let result = match self.tools.get(request.name.as_str()) {
            Some(tool) => {
                info!(tool = %request.name, id = %request.id, "Dispatching tool call");
                (tool.handler)(self.store.as_ref(), &request.args, (self.today)())
            }
            None => {
                warn!(tool = %request.name, id = %request.id, "Model requested an unsupported tool");
                unsupported(&request.name)
            }
        };
        ToolCallResponse {
            id: request.id.clone(),
            name: request.name.clone(),
            result,
        }
    }
}

fn unsupported(name: &str) -> ToolResult {
    let mut result = ToolResult::new();
    result.insert(
        "error".to_string(),
        json!(format!("Herramienta no soportada: {}", name)),
    );
    result
}
