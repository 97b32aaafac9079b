//! End-to-end pipeline scenarios over in-memory collaborators: whitelist
//! rejection, reset, off-topic screening, report saving, and transfer
//! handoff ordering.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::http::StatusCode;
use serde_json::{json, Value};

use reportero::config::Config;
use reportero::delivery::OutboundDelivery;
use reportero::gate::{OFF_TOPIC_TEXT, REJECTION_TEXT, RESET_CONFIRMATION_TEXT};
use reportero::openai::{ModelApi, ModelOutput, TurnRequest};
use reportero::sessions::SessionRegistry;
use reportero::store::{AgentDirectory, ConversationStore};
use reportero::tools::{ToolExecutor, ToolRegistry};
use reportero::types::{
    AppState, Conversation, FieldAgent, InboundMessage, Persona, SenderType, ToolCall, ToolResult,
};
use reportero::webhook::process_inbound;

const AGENT_PHONE: &str = "5491122334455";

struct FakeDirectory {
    agents: Vec<FieldAgent>,
    personas: Vec<Persona>,
    areas: HashMap<String, String>,
}

impl FakeDirectory {
    fn with_registered_agent() -> Self {
        Self {
            agents: vec![FieldAgent {
                id: "fa-1".to_string(),
                name: "Marta".to_string(),
                phone: AGENT_PHONE.to_string(),
                province: "Buenos Aires".to_string(),
                city: "La Plata".to_string(),
                active: true,
            }],
            personas: vec![
                Persona {
                    id: "orq-1".to_string(),
                    name: "Orchestrator".to_string(),
                    prompt: "pmpt_orq".to_string(),
                    specific_prompt: None,
                    vector_store: None,
                    area_id: None,
                },
                Persona {
                    id: "agent-2".to_string(),
                    name: "Prensa".to_string(),
                    prompt: "pmpt_prensa".to_string(),
                    specific_prompt: Some("Hablá en tono institucional.".to_string()),
                    vector_store: None,
                    area_id: Some("area-7".to_string()),
                },
            ],
            areas: HashMap::from([("area-7".to_string(), "Prensa".to_string())]),
        }
    }
}

#[async_trait]
impl AgentDirectory for FakeDirectory {
    async fn find_active_by_phone(&self, variants: &[String]) -> Option<FieldAgent> {
        self.agents
            .iter()
            .find(|agent| agent.active && variants.iter().any(|v| *v == agent.phone))
            .cloned()
    }

    async fn persona(&self, id: &str) -> Option<Persona> {
        self.personas.iter().find(|p| p.id == id).cloned()
    }

    async fn orchestrator_persona(&self) -> Option<Persona> {
        self.personas.iter().find(|p| p.name == "Orchestrator").cloned()
    }

    async fn area_name(&self, area_id: &str) -> Option<String> {
        self.areas.get(area_id).cloned()
    }
}

#[derive(Default)]
struct MemStore {
    conversations: Mutex<HashMap<String, Conversation>>,
    messages: Mutex<Vec<(String, SenderType, Option<String>, String)>>,
}

#[async_trait]
impl ConversationStore for MemStore {
    async fn conversation(&self, id: &str) -> Option<Conversation> {
        self.conversations.lock().unwrap().get(id).cloned()
    }

    async fn create_conversation(&self, conversation: &Conversation) -> bool {
        self.conversations
            .lock()
            .unwrap()
            .insert(conversation.id.clone(), conversation.clone());
        true
    }

    async fn update_model_conversation(&self, id: &str, model_conversation_id: &str) -> bool {
        if let Some(conversation) = self.conversations.lock().unwrap().get_mut(id) {
            conversation.model_conversation_id = Some(model_conversation_id.to_string());
        }
        true
    }

    async fn clear_model_conversation(&self, id: &str) -> bool {
        if let Some(conversation) = self.conversations.lock().unwrap().get_mut(id) {
            conversation.model_conversation_id = None;
        }
        true
    }

    async fn reset_conversation(
        &self,
        id: &str,
        orchestrator_id: &str,
        model_conversation_id: &str,
    ) -> bool {
        if let Some(conversation) = self.conversations.lock().unwrap().get_mut(id) {
            conversation.active_participant_id = Some(orchestrator_id.to_string());
            conversation.active_participant_type = "AI_AGENT".to_string();
            conversation.status = "open".to_string();
            conversation.model_conversation_id = Some(model_conversation_id.to_string());
        }
        true
    }

    async fn save_message(
        &self,
        conversation_id: &str,
        sender_type: SenderType,
        sender_id: Option<&str>,
        text: &str,
    ) -> bool {
        self.messages.lock().unwrap().push((
            conversation_id.to_string(),
            sender_type,
            sender_id.map(str::to_string),
            text.to_string(),
        ));
        true
    }

    async fn recent_user_messages(&self, conversation_id: &str, limit: usize) -> Vec<String> {
        let messages = self.messages.lock().unwrap();
        let mut texts: Vec<String> = messages
            .iter()
            .filter(|(id, sender, _, _)| id == conversation_id && *sender == SenderType::User)
            .map(|(_, _, _, text)| text.clone())
            .collect();
        let start = texts.len().saturating_sub(limit);
        texts.drain(..start);
        texts
    }
}

struct FakeModel {
    turn_script: Mutex<Vec<Value>>,
    turns: Mutex<Vec<Value>>,
    conversations_created: AtomicUsize,
    classify_answer: Result<String, String>,
    classify_calls: AtomicUsize,
}

impl FakeModel {
    fn new(mut turn_script: Vec<Value>) -> Self {
        turn_script.reverse();
        Self {
            turn_script: Mutex::new(turn_script),
            turns: Mutex::new(Vec::new()),
            conversations_created: AtomicUsize::new(0),
            classify_answer: Ok("sí".to_string()),
            classify_calls: AtomicUsize::new(0),
        }
    }

    fn answering(mut self, answer: &str) -> Self {
        self.classify_answer = Ok(answer.to_string());
        self
    }

    fn classifier_failing(mut self) -> Self {
        self.classify_answer = Err("openai returned 500: boom".to_string());
        self
    }

    fn recorded_turns(&self) -> Vec<Value> {
        self.turns.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelApi for FakeModel {
    async fn create_conversation(&self) -> Result<String, String> {
        let n = self.conversations_created.fetch_add(1, Ordering::SeqCst);
        Ok(format!("conv_{n}"))
    }

    async fn turn(&self, request: &TurnRequest) -> Result<ModelOutput, String> {
        self.turns
            .lock()
            .unwrap()
            .push(serde_json::to_value(request).unwrap());
        match self.turn_script.lock().unwrap().pop() {
            Some(body) => Ok(ModelOutput::from_response_body(&body)),
            None => Err("turn script exhausted".to_string()),
        }
    }

    async fn classify(&self, _instructions: &str, _input: &str) -> Result<String, String> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        self.classify_answer.clone()
    }
}

struct FakeExecutor {
    results: HashMap<String, Value>,
    executed: Mutex<Vec<ToolCall>>,
}

impl FakeExecutor {
    fn new(results: Vec<(&str, Value)>) -> Self {
        Self {
            results: results
                .into_iter()
                .map(|(id, body)| (id.to_string(), body))
                .collect(),
            executed: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ToolExecutor for FakeExecutor {
    async fn execute(&self, call: &ToolCall, _agent: &FieldAgent) -> ToolResult {
        self.executed.lock().unwrap().push(call.clone());
        let body = self
            .results
            .get(&call.call_id)
            .cloned()
            .unwrap_or_else(|| json!({ "success": false, "error": "unscripted tool call" }));
        ToolResult {
            call_id: call.call_id.clone(),
            body,
        }
    }
}

#[derive(Default)]
struct RecordingDelivery {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingDelivery {
    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutboundDelivery for RecordingDelivery {
    async fn send_text(&self, to: &str, text: &str) -> bool {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), text.to_string()));
        true
    }
}

struct Harness {
    state: AppState,
    model: Arc<FakeModel>,
    store: Arc<MemStore>,
    executor: Arc<FakeExecutor>,
    delivery: Arc<RecordingDelivery>,
}

fn harness(model: FakeModel, executor: FakeExecutor) -> Harness {
    let model = Arc::new(model);
    let store = Arc::new(MemStore::default());
    let executor = Arc::new(executor);
    let delivery = Arc::new(RecordingDelivery::default());
    let state = AppState {
        config: Config::default(),
        directory: Arc::new(FakeDirectory::with_registered_agent()),
        store: store.clone(),
        model: model.clone(),
        tools: ToolRegistry::standard(),
        executor: executor.clone(),
        delivery: delivery.clone(),
        sessions: SessionRegistry::new(),
    };
    Harness {
        state,
        model,
        store,
        executor,
        delivery,
    }
}

fn inbound(phone: &str, text: &str) -> InboundMessage {
    InboundMessage {
        user_phone: phone.to_string(),
        conversation_id: "wa_conv_1".to_string(),
        timestamp: "2025-06-01T12:00:00Z".to_string(),
        sender_type: SenderType::User,
        message_text: text.to_string(),
        message_id: "msg_1".to_string(),
    }
}

fn text_output(id: &str, text: &str) -> Value {
    json!({
        "id": id,
        "output": [
            { "type": "message", "content": [{ "type": "output_text", "text": text }] },
        ],
    })
}

fn call_output(id: &str, name: &str, call_id: &str, args: Value) -> Value {
    json!({
        "id": id,
        "output": [{
            "type": "function_call",
            "name": name,
            "call_id": call_id,
            "arguments": args.to_string(),
        }],
    })
}

#[tokio::test]
async fn unregistered_sender_is_rejected_without_model_calls() {
    let h = harness(FakeModel::new(vec![]), FakeExecutor::new(vec![]));

    let (status, body) = process_inbound(&h.state, inbound("5491100000000", "hola")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["authorized"], false);

    let sent = h.delivery.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, REJECTION_TEXT);

    assert!(h.model.recorded_turns().is_empty());
    assert_eq!(h.model.conversations_created.load(Ordering::SeqCst), 0);
    assert_eq!(h.model.classify_calls.load(Ordering::SeqCst), 0);
    assert!(h.state.sessions.get("wa_conv_1").await.is_none());
}

#[tokio::test]
async fn reset_clears_the_session_and_confirms() {
    let h = harness(FakeModel::new(vec![]), FakeExecutor::new(vec![]));
    h.state.sessions.insert("wa_conv_1", "conv_old").await;
    h.store
        .create_conversation(&Conversation {
            id: "wa_conv_1".to_string(),
            user_phone: AGENT_PHONE.to_string(),
            active_participant_type: "AI_AGENT".to_string(),
            active_participant_id: Some("agent-2".to_string()),
            status: "open".to_string(),
            model_conversation_id: Some("conv_old".to_string()),
        })
        .await;

    let (status, body) = process_inbound(&h.state, inbound(AGENT_PHONE, "!reset")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reset"], true);

    let entry = h.state.sessions.get("wa_conv_1").await.unwrap();
    assert_ne!(entry.model_session_id, "conv_old");

    let row = h.store.conversation("wa_conv_1").await.unwrap();
    assert_eq!(row.active_participant_id.as_deref(), Some("orq-1"));
    assert_eq!(
        row.model_conversation_id.as_deref(),
        Some(entry.model_session_id.as_str())
    );

    let sent = h.delivery.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, RESET_CONFIRMATION_TEXT);

    // No conversational turn, no relevance classification.
    assert!(h.model.recorded_turns().is_empty());
    assert_eq!(h.model.classify_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn off_topic_message_short_circuits_without_session() {
    let h = harness(
        FakeModel::new(vec![]).answering("no, es una consulta general"),
        FakeExecutor::new(vec![]),
    );

    let (status, body) =
        process_inbound(&h.state, inbound(AGENT_PHONE, "¿qué tiempo hace mañana?")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["relevant"], false);

    let sent = h.delivery.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, OFF_TOPIC_TEXT);

    assert_eq!(h.model.classify_calls.load(Ordering::SeqCst), 1);
    assert!(h.model.recorded_turns().is_empty());
    assert_eq!(h.model.conversations_created.load(Ordering::SeqCst), 0);
    assert!(h.state.sessions.get("wa_conv_1").await.is_none());
    assert!(h.store.conversation("wa_conv_1").await.is_none());
}

#[tokio::test]
async fn saved_report_executes_one_tool_and_clears_the_session() {
    let h = harness(
        FakeModel::new(vec![
            call_output(
                "resp_1",
                "save_field_report",
                "call_1",
                json!({
                    "titulo": "Corte de ruta 9",
                    "descripcion": "Corte total a la altura del km 47",
                    "categoria": "infraestructura",
                    "provincia": "Salta",
                    "ciudad": "General Güemes",
                    "fecha_evento": "2025-06-01",
                }),
            ),
            text_output("resp_2", "Listo, guardé el reporte. ¡Gracias!"),
        ]),
        FakeExecutor::new(vec![(
            "call_1",
            json!({ "success": true, "noticia_id": 42 }),
        )]),
    );

    let (status, body) =
        process_inbound(&h.state, inbound(AGENT_PHONE, "corte total en la ruta 9")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["report_saved"], true);

    let executed = h.executor.executed.lock().unwrap().clone();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].name, "save_field_report");

    let turns = h.model.recorded_turns();
    assert_eq!(turns.len(), 2);
    let outputs = turns[1]["input"].as_array().unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0]["call_id"], "call_1");

    // Terminal tool action: session cleared in both cache and store.
    assert!(h.state.sessions.get("wa_conv_1").await.is_none());
    let row = h.store.conversation("wa_conv_1").await.unwrap();
    assert_eq!(row.model_conversation_id, None);

    let sent = h.delivery.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, "Listo, guardé el reporte. ¡Gracias!");
}

#[tokio::test]
async fn transfer_delivers_reply_then_tool_free_greeting() {
    let h = harness(
        FakeModel::new(vec![
            call_output(
                "resp_1",
                "transfer_conversation",
                "call_t",
                json!({ "conversationId": "wa_conv_1", "targetAgentId": "agent-2" }),
            ),
            text_output("resp_2", "Te derivo con el equipo de Prensa."),
            text_output(
                "resp_greeting",
                "Hola, soy el asistente del área de Prensa. Vi tu consulta sobre el acto.",
            ),
        ]),
        FakeExecutor::new(vec![(
            "call_t",
            json!({ "success": true, "targetAgentId": "agent-2" }),
        )]),
    );

    let (status, body) = process_inbound(
        &h.state,
        inbound(AGENT_PHONE, "necesito difundir el acto de mañana"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transferred"], true);

    // Ordering invariant: the original agent's reply strictly precedes the
    // new persona's greeting.
    let sent = h.delivery.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].1, "Te derivo con el equipo de Prensa.");
    assert!(sent[1].1.contains("área de Prensa"));

    // The greeting call must not carry tools, so it can never re-transfer.
    let turns = h.model.recorded_turns();
    assert_eq!(turns.len(), 3);
    assert!(turns[0]["tools"].is_array());
    assert!(turns[1]["tools"].is_array());
    assert!(turns[2].get("tools").is_none());
    let instruction = turns[2]["input"].as_str().unwrap();
    assert!(instruction.contains("INSTRUCCIÓN INTERNA"));
    assert!(instruction.contains("Prensa"));

    // Greeting persisted under the new persona's identity.
    let messages = h.store.messages.lock().unwrap().clone();
    let greeting_row = messages
        .iter()
        .find(|(_, sender, sender_id, _)| {
            *sender == SenderType::Ai && sender_id.as_deref() == Some("agent-2")
        })
        .expect("greeting message persisted");
    assert!(greeting_row.3.contains("Prensa"));
}

#[tokio::test]
async fn classifier_outage_fails_open() {
    // A broken relevance screen must not lock field agents out of reporting:
    // the message still reaches the conversational turn.
    let h = harness(
        FakeModel::new(vec![text_output("resp_1", "Entendido, ¿dónde fue el corte?")])
            .classifier_failing(),
        FakeExecutor::new(vec![]),
    );

    let (status, body) =
        process_inbound(&h.state, inbound(AGENT_PHONE, "hubo un corte en la ruta 9")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["replied"], true);
    assert_eq!(h.model.classify_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.model.recorded_turns().len(), 1);

    let sent = h.delivery.sent();
    assert_eq!(sent.len(), 1);
    assert_ne!(sent[0].1, OFF_TOPIC_TEXT);
    assert_eq!(sent[0].1, "Entendido, ¿dónde fue el corte?");
}

#[tokio::test]
async fn model_outage_still_answers_the_user() {
    // Classifier passes, but the conversational turn itself fails.
    let h = harness(FakeModel::new(vec![]), FakeExecutor::new(vec![]));

    let (status, body) =
        process_inbound(&h.state, inbound(AGENT_PHONE, "hubo un incidente en la plaza")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["replied"], false);

    let sent = h.delivery.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.contains("problema técnico"));
}

#[tokio::test]
async fn second_message_chains_to_the_previous_response() {
    let h = harness(
        FakeModel::new(vec![
            text_output("resp_1", "Entendido, ¿en qué ciudad fue?"),
            text_output("resp_2", "Gracias, ya lo registro."),
        ]),
        FakeExecutor::new(vec![]),
    );

    let (_, _) = process_inbound(&h.state, inbound(AGENT_PHONE, "hubo un corte")).await;
    let (_, _) = process_inbound(&h.state, inbound(AGENT_PHONE, "en La Plata")).await;

    let turns = h.model.recorded_turns();
    assert_eq!(turns.len(), 2);
    assert!(turns[0].get("previous_response_id").is_none());
    assert_eq!(turns[1]["previous_response_id"], "resp_1");
    // Both turns ride the same model conversation.
    assert_eq!(turns[0]["conversation"], turns[1]["conversation"]);
}
