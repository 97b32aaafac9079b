use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::openai::ModelApi;

#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub model_session_id: String,
    pub last_response_id: Option<String>,
}

/// In-process map from conversation id to the model-side session handle and
/// the chaining token of the latest turn.
///
/// This is a cache, not a source of truth: each webhook invocation may land
/// on a fresh process, and real continuity is carried by the model service's
/// own conversation object persisted alongside the conversation row. The lock
/// is only held for map operations, never across calls to external services,
/// so unrelated conversations are not serialized behind each other.
pub struct SessionRegistry {
    entries: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, conversation_id: &str) -> Option<SessionEntry> {
        let entries = self.entries.lock().await;
        entries.get(conversation_id).cloned()
    }

    /// Records a mapping, overwriting any previous one. Concurrent creations
    /// for the same conversation race last-writer-wins; a stray duplicate
    /// model session is wasted but never incorrect.
    pub async fn insert(&self, conversation_id: &str, model_session_id: &str) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            conversation_id.to_string(),
            SessionEntry {
                model_session_id: model_session_id.to_string(),
                last_response_id: None,
            },
        );
    }

    /// Returns the existing model session for this conversation or creates a
    /// new one on the model service. Creation happens outside the lock.
    pub async fn get_or_create(
        &self,
        conversation_id: &str,
        model: &dyn ModelApi,
    ) -> Result<String, String> {
        if let Some(entry) = self.get(conversation_id).await {
            return Ok(entry.model_session_id);
        }
        let created = model.create_conversation().await?;
        let mut entries = self.entries.lock().await;
        let entry = entries
            .entry(conversation_id.to_string())
            .or_insert_with(|| SessionEntry {
                model_session_id: created.clone(),
                last_response_id: None,
            });
        Ok(entry.model_session_id.clone())
    }

    /// Clears the mapping; the next `get_or_create` starts fresh.
    pub async fn reset(&self, conversation_id: &str) {
        let mut entries = self.entries.lock().await;
        entries.remove(conversation_id);
    }

    pub async fn last_response_id(&self, conversation_id: &str) -> Option<String> {
        let entries = self.entries.lock().await;
        entries
            .get(conversation_id)
            .and_then(|entry| entry.last_response_id.clone())
    }

    pub async fn set_last_response_id(&self, conversation_id: &str, response_id: &str) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(conversation_id) {
            entry.last_response_id = Some(response_id.to_string());
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
