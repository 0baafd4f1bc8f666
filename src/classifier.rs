//! External SDG classifier.
//!
//! [`SdgClassifier`] is the seam the gatekeeper calls. [`LlmClassifier`]
//! implements it against any OpenAI-compatible chat completions API, one
//! request per article with bounded concurrency. A single failed request
//! fails the whole batch.

use crate::error::{ExpertsError, Result};
use crate::models::MergedRow;
use crate::prompts::{sdg_goals, sdg_relevance};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum concurrent LLM API requests
const MAX_CONCURRENT_REQUESTS: usize = 10;

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Attempts per article when the model answers with unparsable output
const MAX_PARSE_ATTEMPTS: usize = 2;

/// Article fields the classifier sees
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArticleText {
    pub article_uuid: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub journal_title: String,
}

impl From<&MergedRow> for ArticleText {
    fn from(r: &MergedRow) -> Self {
        Self {
            article_uuid: r.article_id.clone(),
            title: r.title.clone(),
            abstract_text: r.abstract_text.clone(),
            journal_title: r.journal_title.clone(),
        }
    }
}

/// Step one output
#[derive(Debug, Clone, PartialEq)]
pub struct RelevanceVerdict {
    pub article_uuid: String,
    pub sdg_relevant: bool,
    pub confidence: f64,
    pub reason: String,
}

/// Step two output
#[derive(Debug, Clone, PartialEq)]
pub struct GoalAssignment {
    pub article_uuid: String,
    pub goals: Vec<u8>,
    pub reason: String,
}

/// Black-box classifier over a batch of unclassified articles
#[async_trait]
pub trait SdgClassifier: Send + Sync {
    /// One verdict per input article.
    async fn classify_relevance(&self, articles: &[ArticleText]) -> Result<Vec<RelevanceVerdict>>;

    /// Goals for the articles whose verdict is relevant.
    async fn assign_goals(
        &self,
        articles: &[ArticleText],
        verdicts: &[RelevanceVerdict],
    ) -> Result<Vec<GoalAssignment>>;
}

/// LLM configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

/// Token usage tracking
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Accumulated token usage with atomic counters
#[derive(Default)]
struct AtomicTokenUsage {
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    total_tokens: AtomicU64,
}

impl AtomicTokenUsage {
    fn add(&self, usage: &TokenUsage) {
        self.prompt_tokens.fetch_add(usage.prompt_tokens, Ordering::Relaxed);
        self.completion_tokens.fetch_add(usage.completion_tokens, Ordering::Relaxed);
        self.total_tokens.fetch_add(usage.total_tokens, Ordering::Relaxed);
    }

    fn get(&self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
            total_tokens: self.total_tokens.load(Ordering::Relaxed),
        }
    }
}

/// OpenAI-compatible API response structures
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct LlmRelevanceOutput {
    sdg_relevant: bool,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct LlmGoalsOutput {
    #[serde(default)]
    goals: Vec<serde_json::Value>,
    #[serde(default)]
    reason: String,
}

/// Classifier backed by an OpenAI-compatible chat completions endpoint
pub struct LlmClassifier {
    client: reqwest::Client,
    config: LlmConfig,
    usage: AtomicTokenUsage,
}

impl LlmClassifier {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ExpertsError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            usage: AtomicTokenUsage::default(),
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Tokens spent so far by this classifier
    pub fn token_usage(&self) -> TokenUsage {
        self.usage.get()
    }

    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let request_body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt}
            ],
            "temperature": 0.1,
        });

        let api_url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&api_url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ExpertsError::Api {
                code: status.as_u16(),
                message: format!("LLM API error: {} - {}", status, error_text),
            });
        }

        let api_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ExpertsError::Parse(format!("Failed to parse LLM response: {}", e)))?;

        if let Some(u) = api_response.usage {
            self.usage.add(&TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            });
        }

        Ok(api_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default())
    }

    /// Send one prompt and parse the answer, re-asking once on unparsable output.
    async fn ask<T, F>(&self, system_prompt: &str, user_prompt: &str, article: &str, parse: F) -> Result<T>
    where
        F: Fn(&str) -> std::result::Result<T, String>,
    {
        let mut last_error = String::new();
        for attempt in 1..=MAX_PARSE_ATTEMPTS {
            let content = self.complete(system_prompt, user_prompt).await?;
            match parse(&content) {
                Ok(parsed) => return Ok(parsed),
                Err(e) => {
                    let preview: String = content.chars().take(200).collect();
                    warn!(
                        article = article,
                        attempt = attempt,
                        error = %e,
                        content_preview = %preview,
                        "Unparsable LLM output"
                    );
                    last_error = e;
                }
            }
        }
        Err(ExpertsError::Classifier(format!(
            "Unparsable output for article {}: {}",
            article, last_error
        )))
    }

    async fn relevance_one(&self, article: &ArticleText) -> Result<RelevanceVerdict> {
        let article_json = serde_json::to_string_pretty(article)?;
        let user_prompt = sdg_relevance::build_user_prompt(&article_json);

        let output: LlmRelevanceOutput = self
            .ask(sdg_relevance::SYSTEM_PROMPT, &user_prompt, &article.article_uuid, |c| {
                parse_json_output(c)
            })
            .await?;

        debug!(article = %article.article_uuid, relevant = output.sdg_relevant, "Relevance classified");
        Ok(RelevanceVerdict {
            article_uuid: article.article_uuid.clone(),
            sdg_relevant: output.sdg_relevant,
            confidence: output.confidence.clamp(0.0, 1.0),
            reason: output.reason,
        })
    }

    async fn goals_one(&self, system_prompt: &str, article: &ArticleText, reason: &str) -> Result<GoalAssignment> {
        let article_json = serde_json::to_string_pretty(article)?;
        let user_prompt = sdg_goals::build_user_prompt(&article_json, reason);

        let output: LlmGoalsOutput = self
            .ask(system_prompt, &user_prompt, &article.article_uuid, |c| parse_json_output(c))
            .await?;

        let goals = parse_goal_ids(&output.goals);
        debug!(article = %article.article_uuid, goals = ?goals, "Goals assigned");
        Ok(GoalAssignment {
            article_uuid: article.article_uuid.clone(),
            goals,
            reason: output.reason,
        })
    }
}

#[async_trait]
impl SdgClassifier for LlmClassifier {
    async fn classify_relevance(&self, articles: &[ArticleText]) -> Result<Vec<RelevanceVerdict>> {
        if articles.is_empty() {
            return Ok(Vec::new());
        }

        info!(count = articles.len(), model = %self.config.model, "Starting SDG relevance classification");

        let verdicts: Vec<RelevanceVerdict> = stream::iter(articles.iter().cloned())
            .map(move |article| async move { self.relevance_one(&article).await })
            .buffered(MAX_CONCURRENT_REQUESTS)
            .try_collect()
            .await?;

        let usage = self.usage.get();
        info!(
            classified = verdicts.len(),
            relevant = verdicts.iter().filter(|v| v.sdg_relevant).count(),
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "Relevance classification complete"
        );
        Ok(verdicts)
    }

    async fn assign_goals(
        &self,
        articles: &[ArticleText],
        verdicts: &[RelevanceVerdict],
    ) -> Result<Vec<GoalAssignment>> {
        let relevant: HashMap<&str, &RelevanceVerdict> = verdicts
            .iter()
            .filter(|v| v.sdg_relevant)
            .map(|v| (v.article_uuid.as_str(), v))
            .collect();

        let targets: Vec<(ArticleText, String)> = articles
            .iter()
            .filter_map(|a| {
                relevant
                    .get(a.article_uuid.as_str())
                    .map(|v| (a.clone(), v.reason.clone()))
            })
            .collect();

        if targets.is_empty() {
            return Ok(Vec::new());
        }

        info!(count = targets.len(), "Starting SDG goal assignment");
        let goals_prompt = sdg_goals::system_prompt();
        let system_prompt = goals_prompt.as_str();

        let assignments: Vec<GoalAssignment> = stream::iter(targets)
            .map(move |(article, reason)| async move {
                self.goals_one(system_prompt, &article, &reason).await
            })
            .buffered(MAX_CONCURRENT_REQUESTS)
            .try_collect()
            .await?;

        let usage = self.usage.get();
        info!(
            assigned = assignments.len(),
            total_tokens = usage.total_tokens,
            "Goal assignment complete"
        );
        Ok(assignments)
    }
}

fn parse_json_output<T: serde::de::DeserializeOwned>(content: &str) -> std::result::Result<T, String> {
    serde_json::from_str(&extract_json(content)).map_err(|e| e.to_string())
}

/// Goal ids from model output: numbers, numeric strings, or labels like "SDG 13".
/// Anything outside 1..=17 is dropped.
fn parse_goal_ids(raw: &[serde_json::Value]) -> Vec<u8> {
    let mut goals: Vec<u8> = raw
        .iter()
        .filter_map(|v| match v {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => {
                let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
                digits.parse().ok()
            }
            _ => None,
        })
        .filter(|g| (1..=17).contains(g))
        .map(|g| g as u8)
        .collect();
    goals.sort_unstable();
    goals.dedup();
    goals
}

/// Extract JSON from LLM response (handles markdown code blocks)
fn extract_json(content: &str) -> String {
    let trimmed = content.trim();

    if trimmed.starts_with("```") {
        let lines: Vec<&str> = trimmed.lines().collect();
        if lines.len() >= 2 {
            let end = if lines.last().map(|l| l.trim()) == Some("```") {
                lines.len() - 1
            } else {
                lines.len()
            };
            return lines[1..end].join("\n");
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return trimmed[start..=end].to_string();
        }
    }

    trimmed.to_string()
}
