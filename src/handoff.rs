use tracing::{info, warn};

use crate::delivery::OutboundDelivery;
use crate::openai::{ModelApi, TurnRequest};
use crate::prompting::{render_handoff_instruction, HandoffContext};
use crate::store::{AgentDirectory, ConversationStore};
use crate::types::{Conversation, SenderType};

const DEFAULT_AREA_NAME: &str = "nuestro equipo";
const HANDOFF_CONTEXT_MESSAGES: usize = 5;

/// Delivers the new persona's greeting after a conversation transfer.
///
/// The caller has already delivered the previous agent's reply; this step is
/// strictly second. The greeting call carries no tools, so it can never
/// trigger a further transfer. Any failure here degrades to "no greeting":
/// the authoritative assignment already happened inside the transfer tool.
pub async fn send_new_agent_greeting(
    directory: &dyn AgentDirectory,
    store: &dyn ConversationStore,
    model: &dyn ModelApi,
    delivery: &dyn OutboundDelivery,
    conversation: &Conversation,
    model_conversation_id: &str,
    target_agent_id: &str,
) {
    let Some(persona) = directory.persona(target_agent_id).await else {
        warn!(%target_agent_id, "transfer target persona not found, skipping greeting");
        return;
    };

    let area_name = match &persona.area_id {
        Some(area_id) => directory
            .area_name(area_id)
            .await
            .unwrap_or_else(|| DEFAULT_AREA_NAME.to_string()),
        None => DEFAULT_AREA_NAME.to_string(),
    };

    let recent = store
        .recent_user_messages(&conversation.id, HANDOFF_CONTEXT_MESSAGES)
        .await;
    let instruction = render_handoff_instruction(&HandoffContext {
        area_name: &area_name,
        recent_user_messages: &recent,
    });

    let request = TurnRequest::new(model_conversation_id, &persona.prompt, &conversation.id)
        .with_text(&instruction)
        .with_instructions(persona.specific_prompt.as_deref());

    let greeting = match model.turn(&request).await {
        Ok(output) => output.message_text(),
        Err(err) => {
            warn!(persona = %persona.name, error = %err, "greeting call failed");
            None
        }
    };

    let Some(greeting) = greeting else {
        return;
    };

    store
        .save_message(
            &conversation.id,
            SenderType::Ai,
            Some(&persona.id),
            &greeting,
        )
        .await;
    delivery.send_text(&conversation.user_phone, &greeting).await;
    info!(persona = %persona.name, conversation = %conversation.id, "handoff greeting sent");
}
