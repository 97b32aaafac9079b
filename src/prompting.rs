use minijinja::{context, Environment};

const RELEVANCE_RUBRIC_TEMPLATE: &str = include_str!("prompts/relevance_rubric.j2");
const HANDOFF_INSTRUCTION_TEMPLATE: &str = include_str!("prompts/handoff_instruction.j2");

pub fn render_relevance_rubric() -> String {
    let mut env = Environment::new();
    if env
        .add_template("relevance_rubric", RELEVANCE_RUBRIC_TEMPLATE)
        .is_err()
    {
        return RELEVANCE_RUBRIC_TEMPLATE.to_string();
    }
    let Ok(template) = env.get_template("relevance_rubric") else {
        return RELEVANCE_RUBRIC_TEMPLATE.to_string();
    };
    template
        .render(context! {})
        .unwrap_or_else(|_| RELEVANCE_RUBRIC_TEMPLATE.to_string())
}

pub struct HandoffContext<'a> {
    pub area_name: &'a str,
    pub recent_user_messages: &'a [String],
}

/// Internal instruction for the post-transfer greeting call: the new persona
/// introduces itself and answers the carried-over context directly.
pub fn render_handoff_instruction(ctx: &HandoffContext<'_>) -> String {
    let mut env = Environment::new();
    if env
        .add_template("handoff_instruction", HANDOFF_INSTRUCTION_TEMPLATE)
        .is_err()
    {
        return fallback_handoff_instruction(ctx);
    }
    let Ok(template) = env.get_template("handoff_instruction") else {
        return fallback_handoff_instruction(ctx);
    };
    template
        .render(context! {
            area_name => ctx.area_name,
            recent_user_messages => ctx.recent_user_messages,
        })
        .unwrap_or_else(|_| fallback_handoff_instruction(ctx))
}

fn fallback_handoff_instruction(ctx: &HandoffContext<'_>) -> String {
    let mut prompt = format!(
        "INSTRUCCIÓN INTERNA: Preséntate brevemente como el asistente del área de {}. \
         Luego, basándote en el contexto de la conversación previa, responde directamente \
         la consulta del usuario de manera útil y profesional.",
        ctx.area_name
    );
    if !ctx.recent_user_messages.is_empty() {
        prompt.push_str("\n\nContexto de la conversación previa:\n");
        for message in ctx.recent_user_messages {
            prompt.push_str(&format!("- {message}\n"));
        }
        prompt.push_str("\nEl usuario necesita ayuda con lo mencionado arriba.");
    }
    prompt
}
