use futures_util::future::join_all;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::openai::{ModelApi, TurnRequest};
use crate::tools::{ToolExecutor, ToolRegistry, TOOL_SAVE_FIELD_REPORT, TOOL_TRANSFER_CONVERSATION};
use crate::types::{FieldAgent, Persona, ToolResult};

/// Outcome of one full orchestrated turn.
#[derive(Debug, Clone)]
pub struct AgentTurn {
    pub reply: Option<String>,
    pub transferred_to: Option<String>,
    pub report_saved: bool,
    pub last_response_id: Option<String>,
}

pub struct TurnContext<'a> {
    pub persona: &'a Persona,
    pub field_agent: &'a FieldAgent,
    pub conversation_id: &'a str,
    pub model_conversation_id: &'a str,
    pub previous_response_id: Option<&'a str>,
    pub max_rounds: usize,
}

/// Drives one inbound message through the model and the bounded tool-call
/// loop.
///
/// The first call carries the user text; every follow-up carries only the
/// tool outputs of the round, chained to the previous response id and
/// re-sending the tools list for schema re-validation. A tool's own failure
/// becomes a `success:false` output the model can react to; only a failed
/// model call aborts the turn. When the round budget runs out with calls
/// still pending, whatever text is present is surfaced as the best available
/// answer.
pub async fn run_agent_turn(
    model: &dyn ModelApi,
    tools: &ToolRegistry,
    executor: &dyn ToolExecutor,
    ctx: &TurnContext<'_>,
    message_text: &str,
) -> Result<AgentTurn, String> {
    let schemas = tools.schemas(ctx.persona.vector_store.as_deref());

    let request = TurnRequest::new(
        ctx.model_conversation_id,
        &ctx.persona.prompt,
        ctx.conversation_id,
    )
    .with_text(message_text)
    .with_tools(schemas.clone())
    .with_instructions(ctx.persona.specific_prompt.as_deref())
    .with_previous_response(ctx.previous_response_id);

    let mut current = model.turn(&request).await?;
    let mut transferred_to: Option<String> = None;
    let mut report_saved = false;

    for round in 1..=ctx.max_rounds {
        let calls = current.function_calls();
        if calls.is_empty() {
            break;
        }
        info!(round, count = calls.len(), "executing tool calls");

        // Calls in one round are independent by construction; run them
        // concurrently and reassemble by call id.
        let results: Vec<ToolResult> = join_all(
            calls
                .iter()
                .map(|call| executor.execute(call, ctx.field_agent)),
        )
        .await;

        let mut outputs: Vec<Value> = Vec::with_capacity(results.len());
        for (call, result) in calls.iter().zip(results.iter()) {
            debug_assert_eq!(call.call_id, result.call_id);
            if call.name == TOOL_TRANSFER_CONVERSATION && result.success() {
                if let Some(target) = result.transfer_target() {
                    // Last successfully executed transfer in the turn wins.
                    transferred_to = Some(target);
                }
            }
            if call.name == TOOL_SAVE_FIELD_REPORT && result.success() {
                report_saved = true;
            }
            outputs.push(json!({
                "type": "function_call_output",
                "call_id": result.call_id,
                "output": serde_json::to_string(&result.body)
                    .unwrap_or_else(|_| "{\"success\":false}".to_string()),
            }));
        }

        let follow_up = TurnRequest::new(
            ctx.model_conversation_id,
            &ctx.persona.prompt,
            ctx.conversation_id,
        )
        .with_tool_outputs(outputs)
        .with_tools(schemas.clone())
        .with_previous_response(Some(&current.response_id));

        match model.turn(&follow_up).await {
            Ok(next) => current = next,
            Err(err) => {
                warn!(round, error = %err, "follow-up model call failed");
                break;
            }
        }
    }

    if !current.function_calls().is_empty() {
        warn!(
            max_rounds = ctx.max_rounds,
            "tool-call rounds ended with calls still pending"
        );
    }

    Ok(AgentTurn {
        reply: current.message_text(),
        transferred_to,
        report_saved,
        last_response_id: Some(current.response_id),
    })
}
