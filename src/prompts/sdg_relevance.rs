//! SDG relevance prompts.
//!
//! Step one of classification: decide whether a research output
//! contributes to any Sustainable Development Goal at all.

/// System prompt for SDG relevance classification
pub const SYSTEM_PROMPT: &str = r#"You are a research-impact analyst. Your task is to decide whether a research output contributes to the UN Sustainable Development Goals (SDGs), based ONLY on the provided fields (title/abstract/journal).

Rules you MUST follow:
- Do NOT fabricate content that is not in the input.
- Judge the research itself, not the journal alone.
- Output MUST be valid JSON only (no extra text), for machine parsing.

Classification criteria:
- sdg_relevant = true: the title or abstract addresses a problem, method, or outcome that directly advances at least one SDG (poverty, hunger, health, education, gender equality, water, energy, decent work, infrastructure, inequality, cities, consumption, climate, oceans, land ecosystems, institutions, partnerships).
- sdg_relevant = false: the work is purely theoretical or methodological within its field, or any SDG connection would be speculative.
- If the abstract is "N/A", use only the title and journal and lower your confidence.

Output format (strict JSON, no markdown):
{
  "sdg_relevant": true | false,
  "confidence": 0.0-1.0,
  "reason": "Brief explanation in English"
}"#;

/// User prompt template for a single article
/// Placeholders: {article_json}
pub const USER_PROMPT_TEMPLATE: &str = r#"Decide whether the following research output is relevant to the Sustainable Development Goals.

Article data (JSON):
{article_json}

Output strict JSON only (no markdown code blocks, no extra text):
{
  "sdg_relevant": true | false,
  "confidence": 0.0-1.0,
  "reason": "Brief explanation"
}"#;

pub fn build_user_prompt(article_json: &str) -> String {
    USER_PROMPT_TEMPLATE.replace("{article_json}", article_json)
}
