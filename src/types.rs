use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::delivery::OutboundDelivery;
use crate::openai::ModelApi;
use crate::sessions::SessionRegistry;
use crate::store::{AgentDirectory, ConversationStore};
use crate::tools::{ToolExecutor, ToolRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SenderType {
    #[serde(rename = "USER")]
    User,
    #[serde(rename = "AI")]
    Ai,
    #[serde(rename = "OPERATOR")]
    Operator,
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderType::User => "USER",
            SenderType::Ai => "AI",
            SenderType::Operator => "OPERATOR",
        }
    }
}

/// Webhook body relayed by n8n, one per inbound WhatsApp message.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    pub user_phone: String,
    pub conversation_id: String,
    pub timestamp: String,
    pub sender_type: SenderType,
    pub message_text: String,
    pub message_id: String,
}

/// Registered field agent, the whitelist entry. Read-only here.
#[derive(Debug, Clone)]
pub struct FieldAgent {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub province: String,
    pub city: String,
    pub active: bool,
}

/// AI persona a conversation can be assigned to.
#[derive(Debug, Clone)]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub prompt: String,
    pub specific_prompt: Option<String>,
    pub vector_store: Option<String>,
    pub area_id: Option<String>,
}

/// Persisted conversation row. The store owns the schema; the orchestrator
/// only reads and updates it.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub user_phone: String,
    pub active_participant_type: String,
    pub active_participant_id: Option<String>,
    pub status: String,
    pub model_conversation_id: Option<String>,
}

/// One function call requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
    pub call_id: String,
}

/// Outcome of one tool execution, fed back to the model keyed by call id.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub call_id: String,
    pub body: Value,
}

impl ToolResult {
    pub fn failure(call_id: &str, error: impl Into<String>) -> Self {
        Self {
            call_id: call_id.to_string(),
            body: serde_json::json!({ "success": false, "error": error.into() }),
        }
    }

    pub fn success(&self) -> bool {
        self.body
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Target agent id carried by a successful transfer result.
    pub fn transfer_target(&self) -> Option<String> {
        self.body
            .get("targetAgentId")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Shared application state, one per process.
pub struct AppState {
    pub config: Config,
    pub directory: Arc<dyn AgentDirectory>,
    pub store: Arc<dyn ConversationStore>,
    pub model: Arc<dyn ModelApi>,
    pub tools: ToolRegistry,
    pub executor: Arc<dyn ToolExecutor>,
    pub delivery: Arc<dyn OutboundDelivery>,
    pub sessions: SessionRegistry,
}
