use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::agent_loop::{run_agent_turn, TurnContext};
use crate::gate::{
    is_report_related, is_reset_command, normalize_phone, phone_lookup_variants, OFF_TOPIC_TEXT,
    REJECTION_TEXT, RESET_CONFIRMATION_TEXT, TECH_ERROR_TEXT,
};
use crate::handoff::send_new_agent_greeting;
use crate::types::{AppState, Conversation, InboundMessage, SenderType};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/webhook/whatsapp", post(webhook_whatsapp))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true, "now": Utc::now().to_rfc3339() }))
}

const REQUIRED_FIELDS: &[&str] = &[
    "user_phone",
    "conversation_id",
    "timestamp",
    "sender_type",
    "message_text",
    "message_id",
];

async fn webhook_whatsapp(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let missing = REQUIRED_FIELDS
        .iter()
        .filter(|field| {
            body.get(**field)
                .and_then(Value::as_str)
                .map(|v| v.trim().is_empty())
                .unwrap_or(true)
        })
        .copied()
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "error": format!("Missing required fields: {}", missing.join(", ")),
            })),
        );
    }

    let message = match serde_json::from_value::<InboundMessage>(body) {
        Ok(message) => message,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "success": false,
                    "error": format!("Invalid webhook body: {err}"),
                })),
            );
        }
    };

    let (status, response) = process_inbound(&state, message).await;
    (status, Json(response))
}

/// Drives one inbound message through the full pipeline: whitelist gate,
/// reset command, relevance gate, session lookup or creation, agent turn with
/// tool rounds, transfer handoff, and outbound delivery. Every path answers
/// the sender with some text; the webhook caller always gets a structured
/// body.
pub async fn process_inbound(state: &AppState, message: InboundMessage) -> (StatusCode, Value) {
    info!(
        conversation = %message.conversation_id,
        sender = %message.user_phone,
        "inbound message received"
    );

    // Assistant and operator echoes are stored for history, never processed.
    if message.sender_type != SenderType::User {
        if state.store.conversation(&message.conversation_id).await.is_some() {
            state
                .store
                .save_message(
                    &message.conversation_id,
                    message.sender_type,
                    None,
                    &message.message_text,
                )
                .await;
        }
        return (
            StatusCode::OK,
            json!({ "success": true, "authorized": true, "processed": false }),
        );
    }

    // Hard authorization boundary: unknown senders never reach a model call.
    let normalized = normalize_phone(&message.user_phone);
    let variants = phone_lookup_variants(&normalized);
    let Some(field_agent) = state.directory.find_active_by_phone(&variants).await else {
        info!(phone = %normalized, "sender not whitelisted");
        state
            .delivery
            .send_text(&message.user_phone, REJECTION_TEXT)
            .await;
        return (
            StatusCode::OK,
            json!({ "success": true, "authorized": false }),
        );
    };

    if is_reset_command(&message.message_text) {
        return reset_conversation(state, &message).await;
    }

    if state.config.relevance_gate_enabled
        && !is_report_related(state.model.as_ref(), &message.message_text).await
    {
        state
            .delivery
            .send_text(&message.user_phone, OFF_TOPIC_TEXT)
            .await;
        return (
            StatusCode::OK,
            json!({ "success": true, "authorized": true, "relevant": false }),
        );
    }

    // Session lookup or creation. The persisted conversation row carries the
    // authoritative model-conversation handle; the registry is a cache seeded
    // from it.
    let existing = state.store.conversation(&message.conversation_id).await;
    if let Some(conversation) = &existing {
        if state.sessions.get(&message.conversation_id).await.is_none() {
            if let Some(model_conversation_id) = &conversation.model_conversation_id {
                if !model_conversation_id.trim().is_empty() {
                    state
                        .sessions
                        .insert(&message.conversation_id, model_conversation_id)
                        .await;
                }
            }
        }
    }

    let model_conversation_id = match state
        .sessions
        .get_or_create(&message.conversation_id, state.model.as_ref())
        .await
    {
        Ok(id) => id,
        Err(err) => {
            warn!(error = %err, "model conversation unavailable");
            state
                .delivery
                .send_text(&message.user_phone, TECH_ERROR_TEXT)
                .await;
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "success": false, "error": "Failed to create model conversation" }),
            );
        }
    };

    let conversation = match existing {
        Some(conversation) => {
            if conversation.model_conversation_id.as_deref() != Some(model_conversation_id.as_str())
            {
                state
                    .store
                    .update_model_conversation(&message.conversation_id, &model_conversation_id)
                    .await;
            }
            conversation
        }
        None => {
            let Some(orchestrator) = state.directory.orchestrator_persona().await else {
                state
                    .delivery
                    .send_text(&message.user_phone, TECH_ERROR_TEXT)
                    .await;
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "success": false, "error": "Orchestrator agent not found" }),
                );
            };
            let conversation = Conversation {
                id: message.conversation_id.clone(),
                user_phone: message.user_phone.clone(),
                active_participant_type: "AI_AGENT".to_string(),
                active_participant_id: Some(orchestrator.id.clone()),
                status: "open".to_string(),
                model_conversation_id: Some(model_conversation_id.clone()),
            };
            if !state.store.create_conversation(&conversation).await {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "success": false, "error": "Failed to create conversation" }),
                );
            }
            conversation
        }
    };

    state
        .store
        .save_message(
            &message.conversation_id,
            SenderType::User,
            None,
            &message.message_text,
        )
        .await;

    // Resolve the active persona, falling back to the orchestrator.
    let persona = match &conversation.active_participant_id {
        Some(id) => match state.directory.persona(id).await {
            Some(persona) => Some(persona),
            None => state.directory.orchestrator_persona().await,
        },
        None => state.directory.orchestrator_persona().await,
    };
    let Some(persona) = persona else {
        state
            .delivery
            .send_text(&message.user_phone, TECH_ERROR_TEXT)
            .await;
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "success": false, "error": "No active agent found" }),
        );
    };

    let previous_response_id = state.sessions.last_response_id(&message.conversation_id).await;
    let context = TurnContext {
        persona: &persona,
        field_agent: &field_agent,
        conversation_id: &message.conversation_id,
        model_conversation_id: &model_conversation_id,
        previous_response_id: previous_response_id.as_deref(),
        max_rounds: state.config.max_tool_rounds,
    };

    let turn = match run_agent_turn(
        state.model.as_ref(),
        &state.tools,
        state.executor.as_ref(),
        &context,
        &message.message_text,
    )
    .await
    {
        Ok(turn) => turn,
        Err(err) => {
            warn!(error = %err, "agent turn failed");
            state
                .delivery
                .send_text(&message.user_phone, TECH_ERROR_TEXT)
                .await;
            return (
                StatusCode::OK,
                json!({ "success": true, "authorized": true, "replied": false }),
            );
        }
    };

    if let Some(response_id) = &turn.last_response_id {
        state
            .sessions
            .set_last_response_id(&message.conversation_id, response_id)
            .await;
    }

    let Some(reply) = &turn.reply else {
        warn!(conversation = %message.conversation_id, "agent returned no text");
        state
            .delivery
            .send_text(&message.user_phone, TECH_ERROR_TEXT)
            .await;
        return (
            StatusCode::OK,
            json!({ "success": true, "authorized": true, "replied": false }),
        );
    };

    state
        .store
        .save_message(
            &message.conversation_id,
            SenderType::Ai,
            Some(&persona.id),
            reply,
        )
        .await;

    // The current agent's reply goes out first; the transfer greeting, if
    // any, strictly after.
    state.delivery.send_text(&message.user_phone, reply).await;

    if let Some(target_agent_id) = &turn.transferred_to {
        send_new_agent_greeting(
            state.directory.as_ref(),
            state.store.as_ref(),
            state.model.as_ref(),
            state.delivery.as_ref(),
            &conversation,
            &model_conversation_id,
            target_agent_id,
        )
        .await;
    }

    // A saved report closes the reporting session; the next message starts a
    // fresh model conversation.
    if turn.report_saved {
        state.sessions.reset(&message.conversation_id).await;
        state
            .store
            .clear_model_conversation(&message.conversation_id)
            .await;
    }

    (
        StatusCode::OK,
        json!({
            "success": true,
            "authorized": true,
            "replied": true,
            "transferred": turn.transferred_to.is_some(),
            "report_saved": turn.report_saved,
        }),
    )
}

async fn reset_conversation(state: &AppState, message: &InboundMessage) -> (StatusCode, Value) {
    info!(conversation = %message.conversation_id, "reset command received");

    let fresh = match state.model.create_conversation().await {
        Ok(id) => id,
        Err(err) => {
            warn!(error = %err, "reset failed to create a fresh model conversation");
            state
                .delivery
                .send_text(&message.user_phone, TECH_ERROR_TEXT)
                .await;
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "success": false, "error": "Failed to create model conversation" }),
            );
        }
    };

    state.sessions.reset(&message.conversation_id).await;
    state.sessions.insert(&message.conversation_id, &fresh).await;

    if state.store.conversation(&message.conversation_id).await.is_some() {
        if let Some(orchestrator) = state.directory.orchestrator_persona().await {
            state
                .store
                .reset_conversation(&message.conversation_id, &orchestrator.id, &fresh)
                .await;
        }
    }

    state
        .delivery
        .send_text(&message.user_phone, RESET_CONFIRMATION_TEXT)
        .await;

    (
        StatusCode::OK,
        json!({ "success": true, "authorized": true, "reset": true }),
    )
}
