use tracing::warn;

use crate::openai::ModelApi;
use crate::prompting::render_relevance_rubric;

/// Fixed text sent to senders that are not registered as field agents.
pub const REJECTION_TEXT: &str = "Tu número no está registrado como agente de campo. \
Si creés que se trata de un error, contactá al equipo de coordinación.";

/// Fixed text sent when a message is screened out as off-topic.
pub const OFF_TOPIC_TEXT: &str = "Este canal está reservado para reportes de campo. \
Por favor enviá la información del evento que querés reportar.";

/// Confirmation after a successful conversation reset.
pub const RESET_CONFIRMATION_TEXT: &str = "Reset completado";

/// Fallback when an upstream service failed and no reply could be produced.
pub const TECH_ERROR_TEXT: &str = "Tuvimos un problema técnico procesando tu mensaje. \
Por favor intentá de nuevo en unos minutos.";

const RESET_COMMANDS: &[&str] = &["!reset", "!nuevo"];

/// Canonicalizes a phone number to its digits. Total and idempotent.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Phone variants to match against stored agent numbers: the digits-only form
/// and the same with a leading "+".
pub fn phone_lookup_variants(normalized: &str) -> [String; 2] {
    [normalized.to_string(), format!("+{normalized}")]
}

pub fn is_reset_command(text: &str) -> bool {
    let trimmed = text.trim();
    RESET_COMMANDS
        .iter()
        .any(|cmd| trimmed.eq_ignore_ascii_case(cmd))
}

/// Parses the classifier's free-text verdict. Accepts the Spanish and English
/// affirmative variants the small model actually produces.
pub fn parse_affirmative(answer: &str) -> bool {
    let normalized = answer.to_lowercase();
    let first_word = normalized
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_matches(|c: char| c.is_ascii_punctuation());
    matches!(first_word, "si" | "sí" | "yes")
}

/// Screens a message with one lightweight model call before it reaches the
/// conversational agent. Reset commands always pass. A classifier failure
/// fails open: a wasted model turn is cheaper than silently dropping a
/// legitimate report.
pub async fn is_report_related(model: &dyn ModelApi, text: &str) -> bool {
    if is_reset_command(text) {
        return true;
    }
    match model.classify(&render_relevance_rubric(), text).await {
        Ok(answer) => parse_affirmative(&answer),
        Err(err) => {
            warn!(error = %err, "relevance classifier failed, letting message through");
            true
        }
    }
}
