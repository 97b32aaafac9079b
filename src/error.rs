use thiserror::Error;

/// Failures raised while resolving or executing a model-requested tool call.
/// Every variant is converted into a failing tool result and handed back to
/// the model; none of them aborts the webhook request.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    Unknown(String),
    #[error("malformed tool arguments: {0}")]
    BadArguments(String),
    #[error("tool endpoint returned {status}: {body}")]
    Endpoint { status: u16, body: String },
    #[error("tool request failed: {0}")]
    Request(String),
}
