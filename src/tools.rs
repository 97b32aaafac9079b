use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::ToolError;
use crate::types::{FieldAgent, ToolCall, ToolResult};

pub const TOOL_SAVE_FIELD_REPORT: &str = "save_field_report";
pub const TOOL_LIST_AVAILABLE_AGENTS: &str = "list_available_agents";
pub const TOOL_TRANSFER_CONVERSATION: &str = "transfer_conversation";
pub const TOOL_REQUEST_HUMAN_ASSISTANCE: &str = "request_human_assistance";

struct ToolSpec {
    endpoint_path: &'static str,
    schema: Value,
}

/// Closed registry of the tools the model may call. Lookup by name resolves
/// the internal endpoint; unknown names fail fast with a typed error instead
/// of falling through.
pub struct ToolRegistry {
    specs: BTreeMap<&'static str, ToolSpec>,
}

impl ToolRegistry {
    pub fn standard() -> Self {
        let mut specs = BTreeMap::new();
        specs.insert(
            TOOL_SAVE_FIELD_REPORT,
            ToolSpec {
                endpoint_path: "/api/tools/save-field-report",
                schema: json!({
                    "type": "function",
                    "name": TOOL_SAVE_FIELD_REPORT,
                    "description": "Guarda un reporte de campo como noticia. Llamala únicamente cuando ya tengas todos los datos obligatorios del evento.",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "titulo": { "type": "string", "description": "Título corto del evento reportado" },
                            "descripcion": { "type": "string", "description": "Descripción del evento" },
                            "cuerpo": { "type": "string", "description": "Detalle ampliado, opcional" },
                            "categoria": { "type": "string", "description": "Categoría del reporte" },
                            "urgencia": { "type": "string", "enum": ["alta", "media", "baja"] },
                            "provincia": { "type": "string" },
                            "ciudad": { "type": "string" },
                            "fecha_evento": { "type": "string", "description": "Fecha en que ocurrió el evento" },
                            "palabras_clave": { "type": "array", "items": { "type": "string" } },
                        },
                        "required": ["titulo", "descripcion", "categoria", "provincia", "ciudad", "fecha_evento"],
                    },
                    "strict": false,
                }),
            },
        );
        specs.insert(
            TOOL_LIST_AVAILABLE_AGENTS,
            ToolSpec {
                endpoint_path: "/api/tools/list-available-agents",
                schema: json!({
                    "type": "function",
                    "name": TOOL_LIST_AVAILABLE_AGENTS,
                    "description": "Lists all available AI agents with their areas. Use this to discover which agents are available before transferring a conversation.",
                    "parameters": { "type": "object", "properties": {}, "required": [] },
                    "strict": false,
                }),
            },
        );
        specs.insert(
            TOOL_TRANSFER_CONVERSATION,
            ToolSpec {
                endpoint_path: "/api/tools/transfer-conversation",
                schema: json!({
                    "type": "function",
                    "name": TOOL_TRANSFER_CONVERSATION,
                    "description": "Transfer an ongoing conversation to another AI agent. Use this when the conversation needs to be handled by a specialized agent from a different area.",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "conversationId": { "type": "string", "description": "The ID of the conversation to transfer (use the conversation_id variable)" },
                            "targetAgentId": { "type": "string", "description": "The UUID of the AI agent to transfer the conversation to (get this from list_available_agents)" },
                            "reason": { "type": "string", "description": "Optional reason for the transfer" },
                        },
                        "required": ["conversationId", "targetAgentId"],
                    },
                    "strict": false,
                }),
            },
        );
        specs.insert(
            TOOL_REQUEST_HUMAN_ASSISTANCE,
            ToolSpec {
                endpoint_path: "/api/tools/request-human-assistance",
                schema: json!({
                    "type": "function",
                    "name": TOOL_REQUEST_HUMAN_ASSISTANCE,
                    "description": "Request human operator assistance by changing the conversation status to waiting.",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "conversationId": { "type": "string" },
                            "reason": { "type": "string" },
                            "priority": { "type": "string", "enum": ["low", "medium", "high", "urgent"] },
                        },
                        "required": ["conversationId"],
                    },
                    "strict": false,
                }),
            },
        );
        Self { specs }
    }

    /// Function-tool schemas sent with every model turn. When the persona has
    /// a knowledge base attached, a `file_search` tool is appended.
    pub fn schemas(&self, vector_store: Option<&str>) -> Vec<Value> {
        let mut tools: Vec<Value> = self.specs.values().map(|spec| spec.schema.clone()).collect();
        if let Some(store_id) = vector_store {
            tools.push(json!({
                "type": "file_search",
                "file_search": { "vector_store_ids": [store_id] },
            }));
        }
        tools
    }

    pub fn endpoint(&self, name: &str) -> Result<&'static str, ToolError> {
        self.specs
            .get(name)
            .map(|spec| spec.endpoint_path)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))
    }
}

/// Executes one tool call on behalf of an identified field agent.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, call: &ToolCall, agent: &FieldAgent) -> ToolResult;
}

/// Maps tool names to internal HTTP endpoints and POSTs the parsed arguments,
/// with the sender's agent id injected so tools never trust model-provided
/// identity.
pub struct HttpToolExecutor {
    client: reqwest::Client,
    registry: ToolRegistry,
    base_url: String,
}

impl HttpToolExecutor {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            registry: ToolRegistry::standard(),
            base_url: config.tools_base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn call_endpoint(&self, call: &ToolCall, agent: &FieldAgent) -> Result<Value, ToolError> {
        let path = self.registry.endpoint(&call.name)?;

        let mut body = match &call.arguments {
            Value::Object(map) => Value::Object(map.clone()),
            Value::Null => json!({}),
            other => {
                return Err(ToolError::BadArguments(format!(
                    "expected an object, got {other}"
                )))
            }
        };
        if let Some(map) = body.as_object_mut() {
            map.entry("agente_id").or_insert(json!(agent.id));
        }

        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .map_err(|err| ToolError::Request(err.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ToolError::Endpoint {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(serde_json::from_str::<Value>(&text).unwrap_or_else(|_| json!({ "raw": text })))
    }
}

#[async_trait]
impl ToolExecutor for HttpToolExecutor {
    async fn execute(&self, call: &ToolCall, agent: &FieldAgent) -> ToolResult {
        info!(tool = %call.name, call_id = %call.call_id, "executing tool");
        match self.call_endpoint(call, agent).await {
            Ok(body) => ToolResult {
                call_id: call.call_id.clone(),
                body,
            },
            Err(err) => {
                warn!(tool = %call.name, error = %err, "tool execution failed");
                ToolResult::failure(&call.call_id, err.to_string())
            }
        }
    }
}
