use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use tracing::error;
use uuid::Uuid;

use crate::types::{Conversation, FieldAgent, Persona, SenderType};

/// Read-only view over the registered-agent and persona tables.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    /// Looks up an active field agent whose stored phone matches any of the
    /// given variants (digits-only and "+"-prefixed).
    async fn find_active_by_phone(&self, variants: &[String]) -> Option<FieldAgent>;

    async fn persona(&self, id: &str) -> Option<Persona>;

    /// The default persona new and reset conversations are assigned to.
    async fn orchestrator_persona(&self) -> Option<Persona>;

    async fn area_name(&self, area_id: &str) -> Option<String>;
}

/// Conversation and message rows. The store owns the schema; these operations
/// are the only ones the orchestrator needs.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn conversation(&self, id: &str) -> Option<Conversation>;

    async fn create_conversation(&self, conversation: &Conversation) -> bool;

    async fn update_model_conversation(&self, id: &str, model_conversation_id: &str) -> bool;

    /// Drops the stored model-conversation handle so the next message starts
    /// a fresh session.
    async fn clear_model_conversation(&self, id: &str) -> bool;

    /// Points the conversation back at the orchestrator persona with a fresh
    /// model conversation, reopening it.
    async fn reset_conversation(
        &self,
        id: &str,
        orchestrator_id: &str,
        model_conversation_id: &str,
    ) -> bool;

    async fn save_message(
        &self,
        conversation_id: &str,
        sender_type: SenderType,
        sender_id: Option<&str>,
        text: &str,
    ) -> bool;

    /// Most recent user-authored message texts, oldest first, bounded.
    async fn recent_user_messages(&self, conversation_id: &str, limit: usize) -> Vec<String>;
}

pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

#[async_trait]
impl AgentDirectory for PgStore {
    async fn find_active_by_phone(&self, variants: &[String]) -> Option<FieldAgent> {
        let row = sqlx::query(
            "SELECT id::text AS id, nombre, telefono, \
                    COALESCE(provincia, '') AS provincia, \
                    COALESCE(ciudad, '') AS ciudad, activo \
             FROM agente_campo \
             WHERE telefono = ANY($1::text[]) AND activo = true \
             LIMIT 1",
        )
        .bind(variants)
        .fetch_optional(&self.db)
        .await
        .ok()
        .flatten()?;
        Some(FieldAgent {
            id: row.get("id"),
            name: row.get("nombre"),
            phone: row.get("telefono"),
            province: row.get("provincia"),
            city: row.get("ciudad"),
            active: row.get("activo"),
        })
    }

    async fn persona(&self, id: &str) -> Option<Persona> {
        let row = sqlx::query(
            "SELECT id::text AS id, name, prompt, specific_prompt, vector_store, area_id::text AS area_id \
             FROM ai_agent WHERE id::text = $1 LIMIT 1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .ok()
        .flatten()?;
        Some(parse_persona_row(&row))
    }

    async fn orchestrator_persona(&self) -> Option<Persona> {
        let row = sqlx::query(
            "SELECT id::text AS id, name, prompt, specific_prompt, vector_store, area_id::text AS area_id \
             FROM ai_agent WHERE name = 'Orchestrator' LIMIT 1",
        )
        .fetch_optional(&self.db)
        .await
        .ok()
        .flatten()?;
        Some(parse_persona_row(&row))
    }

    async fn area_name(&self, area_id: &str) -> Option<String> {
        sqlx::query_scalar::<_, String>("SELECT name FROM area WHERE id::text = $1 LIMIT 1")
            .bind(area_id)
            .fetch_optional(&self.db)
            .await
            .ok()
            .flatten()
    }
}

fn parse_persona_row(row: &sqlx::postgres::PgRow) -> Persona {
    Persona {
        id: row.get("id"),
        name: row.get("name"),
        prompt: row.get("prompt"),
        specific_prompt: row.get("specific_prompt"),
        vector_store: row.get("vector_store"),
        area_id: row.get("area_id"),
    }
}

#[async_trait]
impl ConversationStore for PgStore {
    async fn conversation(&self, id: &str) -> Option<Conversation> {
        let row = sqlx::query(
            "SELECT id, user_phone, active_participant_type, \
                    active_participant_id::text AS active_participant_id, \
                    status, openai_conversation_id \
             FROM conversation WHERE id = $1 LIMIT 1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .ok()
        .flatten()?;
        Some(Conversation {
            id: row.get("id"),
            user_phone: row.get("user_phone"),
            active_participant_type: row.get("active_participant_type"),
            active_participant_id: row.get("active_participant_id"),
            status: row.get("status"),
            model_conversation_id: row.get("openai_conversation_id"),
        })
    }

    async fn create_conversation(&self, conversation: &Conversation) -> bool {
        let inserted = sqlx::query(
            "INSERT INTO conversation \
             (id, user_phone, active_participant_type, active_participant_id, status, openai_conversation_id) \
             VALUES ($1, $2, $3, $4::uuid, $5, $6)",
        )
        .bind(&conversation.id)
        .bind(&conversation.user_phone)
        .bind(&conversation.active_participant_type)
        .bind(&conversation.active_participant_id)
        .bind(&conversation.status)
        .bind(&conversation.model_conversation_id)
        .execute(&self.db)
        .await;
        if let Err(err) = &inserted {
            error!(conversation_id = %conversation.id, error = %err, "conversation insert failed");
        }
        inserted.is_ok()
    }

    async fn update_model_conversation(&self, id: &str, model_conversation_id: &str) -> bool {
        sqlx::query("UPDATE conversation SET openai_conversation_id = $2 WHERE id = $1")
            .bind(id)
            .bind(model_conversation_id)
            .execute(&self.db)
            .await
            .is_ok()
    }

    async fn clear_model_conversation(&self, id: &str) -> bool {
        sqlx::query("UPDATE conversation SET openai_conversation_id = NULL WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .is_ok()
    }

    async fn reset_conversation(
        &self,
        id: &str,
        orchestrator_id: &str,
        model_conversation_id: &str,
    ) -> bool {
        sqlx::query(
            "UPDATE conversation SET \
             active_participant_id = $2::uuid, \
             active_participant_type = 'AI_AGENT', \
             status = 'open', \
             openai_conversation_id = $3 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(orchestrator_id)
        .bind(model_conversation_id)
        .execute(&self.db)
        .await
        .is_ok()
    }

    async fn save_message(
        &self,
        conversation_id: &str,
        sender_type: SenderType,
        sender_id: Option<&str>,
        text: &str,
    ) -> bool {
        let saved = sqlx::query(
            "INSERT INTO message (id, conversation_id, sender_type, sender_id, text, timestamp) \
             VALUES ($1::uuid, $2, $3, $4::uuid, $5, $6)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(conversation_id)
        .bind(sender_type.as_str())
        .bind(sender_id)
        .bind(text)
        .bind(now_iso())
        .execute(&self.db)
        .await;
        if let Err(err) = &saved {
            error!(%conversation_id, error = %err, "message insert failed");
        }
        saved.is_ok()
    }

    async fn recent_user_messages(&self, conversation_id: &str, limit: usize) -> Vec<String> {
        let rows = sqlx::query(
            "SELECT text FROM message \
             WHERE conversation_id = $1 AND sender_type = 'USER' \
             ORDER BY timestamp DESC LIMIT $2",
        )
        .bind(conversation_id)
        .bind(limit as i64)
        .fetch_all(&self.db)
        .await
        .unwrap_or_default();
        // Chronological order for the handoff context.
        rows.iter()
            .rev()
            .map(|row| row.get::<String, _>("text"))
            .collect()
    }
}
