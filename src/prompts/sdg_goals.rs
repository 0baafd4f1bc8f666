//! SDG goal-assignment prompts.
//!
//! Step two of classification, only for articles already judged relevant.
//! The goal list in the system prompt is generated from [`crate::sdg::GOALS`].

use crate::sdg::GOALS;

const SYSTEM_PROMPT_HEAD: &str = r#"You are a research-impact analyst. The research output below has already been judged relevant to the UN Sustainable Development Goals. Assign the goals it contributes to, based ONLY on the provided fields (title/abstract/journal).

Rules you MUST follow:
- Use only goal numbers from the list below.
- Assign the goals the work directly advances; usually one to three. Do not list every loosely related goal.
- Output MUST be valid JSON only (no extra text), for machine parsing.

Goals:
"#;

const SYSTEM_PROMPT_TAIL: &str = r#"
Output format (strict JSON, no markdown):
{
  "goals": [13, 15],
  "reason": "Brief explanation in English"
}"#;

/// System prompt with the numbered goal list
pub fn system_prompt() -> String {
    let goals = GOALS
        .iter()
        .map(|(id, name)| format!("{}. {}", id, name))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{}{}\n{}", SYSTEM_PROMPT_HEAD, goals, SYSTEM_PROMPT_TAIL)
}

/// Placeholders: {article_json}, {relevance_reason}
pub const USER_PROMPT_TEMPLATE: &str = r#"Assign Sustainable Development Goals to the following research output.

Why it was judged relevant:
{relevance_reason}

Article data (JSON):
{article_json}

Output strict JSON only (no markdown code blocks, no extra text):
{
  "goals": [goal numbers],
  "reason": "Brief explanation"
}"#;

pub fn build_user_prompt(article_json: &str, relevance_reason: &str) -> String {
    USER_PROMPT_TEMPLATE
        .replace("{relevance_reason}", relevance_reason)
        .replace("{article_json}", article_json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_lists_all_goals() {
        let prompt = system_prompt();
        assert!(prompt.contains("1. No Poverty"));
        assert!(prompt.contains("17. Partnerships for the Goals"));
    }

    #[test]
    fn test_build_user_prompt() {
        let prompt = build_user_prompt(r#"{"title": "t"}"#, "mentions drought");
        assert!(prompt.contains("mentions drought"));
        assert!(prompt.contains(r#"{"title": "t"}"#));
    }
}
