use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};

use crate::config::Config;
use crate::types::ToolCall;

/// One request to the Responses API. Built once per turn; the chaining token
/// and the instructions are `Option`s that are omitted from the wire format
/// entirely when absent (the API rejects explicit nulls).
#[derive(Debug, Clone, Serialize)]
pub struct TurnRequest {
    pub conversation: String,
    pub input: TurnInput,
    pub prompt: PromptRef,
    pub store: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TurnInput {
    Text(String),
    Items(Vec<Value>),
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptRef {
    pub id: String,
    pub variables: PromptVariables,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptVariables {
    pub conversation_id: String,
}

impl TurnRequest {
    pub fn new(model_conversation_id: &str, prompt_id: &str, conversation_id: &str) -> Self {
        Self {
            conversation: model_conversation_id.to_string(),
            input: TurnInput::Text(String::new()),
            prompt: PromptRef {
                id: prompt_id.to_string(),
                variables: PromptVariables {
                    conversation_id: conversation_id.to_string(),
                },
            },
            store: true,
            tools: Vec::new(),
            instructions: None,
            previous_response_id: None,
        }
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.input = TurnInput::Text(text.to_string());
        self
    }

    pub fn with_tool_outputs(mut self, items: Vec<Value>) -> Self {
        self.input = TurnInput::Items(items);
        self
    }

    pub fn with_tools(mut self, tools: Vec<Value>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_instructions(mut self, instructions: Option<&str>) -> Self {
        self.instructions = instructions.map(str::to_string);
        self
    }

    pub fn with_previous_response(mut self, response_id: Option<&str>) -> Self {
        self.previous_response_id = response_id.map(str::to_string);
        self
    }
}

/// Parsed Responses API output: the response id used for chaining plus the
/// raw typed output items (message, function_call, reasoning, ...).
#[derive(Debug, Clone)]
pub struct ModelOutput {
    pub response_id: String,
    pub items: Vec<Value>,
}

impl ModelOutput {
    pub fn from_response_body(body: &Value) -> Self {
        Self {
            response_id: body
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            items: body
                .get("output")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        }
    }

    /// Function calls requested in this output, in submission order. The API
    /// returns arguments as a JSON string; older payloads carried an object.
    pub fn function_calls(&self) -> Vec<ToolCall> {
        self.items
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("function_call"))
            .filter_map(|item| {
                let name = item.get("name").and_then(Value::as_str)?;
                let call_id = item
                    .get("call_id")
                    .or_else(|| item.get("id"))
                    .and_then(Value::as_str)?;
                let arguments = match item.get("arguments") {
                    Some(Value::String(raw)) => {
                        serde_json::from_str::<Value>(raw).unwrap_or(Value::Null)
                    }
                    Some(other) => other.clone(),
                    None => Value::Null,
                };
                Some(ToolCall {
                    name: name.to_string(),
                    arguments,
                    call_id: call_id.to_string(),
                })
            })
            .collect()
    }

    /// Final assistant text: the first `message` item's `output_text` content.
    /// Reasoning items are skipped.
    pub fn message_text(&self) -> Option<String> {
        let message = self
            .items
            .iter()
            .find(|item| item.get("type").and_then(Value::as_str) == Some("message"))?;
        message
            .get("content")
            .and_then(Value::as_array)?
            .iter()
            .find(|c| c.get("type").and_then(Value::as_str) == Some("output_text"))
            .and_then(|c| c.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Boundary to the external model service.
#[async_trait]
pub trait ModelApi: Send + Sync {
    /// Creates a new server-side conversation and returns its opaque id.
    async fn create_conversation(&self) -> Result<String, String>;

    /// Runs one turn against an existing conversation.
    async fn turn(&self, request: &TurnRequest) -> Result<ModelOutput, String>;

    /// Single stateless call for the lightweight relevance rubric.
    async fn classify(&self, instructions: &str, input: &str) -> Result<String, String>;
}

pub struct OpenAiApi {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    classifier_model: String,
}

impl OpenAiApi {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            api_key: config.openai_api_key.clone(),
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            classifier_model: config.classifier_model.clone(),
        }
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, String> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|err| format!("openai request failed: {err}"))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            error!(%status, body = %text, "openai returned an error");
            return Err(format!("openai returned {status}: {text}"));
        }
        response
            .json::<Value>()
            .await
            .map_err(|err| format!("openai parse failed: {err}"))
    }
}

#[async_trait]
impl ModelApi for OpenAiApi {
    async fn create_conversation(&self) -> Result<String, String> {
        if self.api_key.trim().is_empty() {
            return Err("OPENAI_API_KEY not configured".to_string());
        }
        let body = serde_json::json!({ "metadata": { "source": "whatsapp" } });
        let payload = self.post_json("/conversations", &body).await?;
        payload
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| "conversation response had no id".to_string())
    }

    async fn turn(&self, request: &TurnRequest) -> Result<ModelOutput, String> {
        if self.api_key.trim().is_empty() {
            return Err("OPENAI_API_KEY not configured".to_string());
        }
        let body = serde_json::to_value(request)
            .map_err(|err| format!("turn request serialization failed: {err}"))?;
        debug!(conversation = %request.conversation, "sending model turn");
        let payload = self.post_json("/responses", &body).await?;
        Ok(ModelOutput::from_response_body(&payload))
    }

    async fn classify(&self, instructions: &str, input: &str) -> Result<String, String> {
        if self.api_key.trim().is_empty() {
            return Err("OPENAI_API_KEY not configured".to_string());
        }
        let body = serde_json::json!({
            "model": self.classifier_model,
            "instructions": instructions,
            "input": input,
            "store": false,
        });
        let payload = self.post_json("/responses", &body).await?;
        let output = ModelOutput::from_response_body(&payload);
        output
            .message_text()
            .ok_or_else(|| "classifier response had no text".to_string())
    }
}
