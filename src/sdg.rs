//! Sustainable Development Goal classification store and gatekeeper.
//!
//! The classification table holds exactly one row per `article_uuid`. The
//! gatekeeper only ever sends articles missing from that table to the
//! classifier, and writes nothing unless the whole batch succeeded.

use crate::classifier::{ArticleText, GoalAssignment, RelevanceVerdict, SdgClassifier};
use crate::error::{ExpertsError, Result};
use crate::models::MergedRow;
use crate::store;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

/// The 17 UN Sustainable Development Goals
pub const GOALS: [(u8, &str); 17] = [
    (1, "No Poverty"),
    (2, "Zero Hunger"),
    (3, "Good Health and Well-being"),
    (4, "Quality Education"),
    (5, "Gender Equality"),
    (6, "Clean Water and Sanitation"),
    (7, "Affordable and Clean Energy"),
    (8, "Decent Work and Economic Growth"),
    (9, "Industry, Innovation and Infrastructure"),
    (10, "Reduced Inequalities"),
    (11, "Sustainable Cities and Communities"),
    (12, "Responsible Consumption and Production"),
    (13, "Climate Action"),
    (14, "Life Below Water"),
    (15, "Life on Land"),
    (16, "Peace, Justice and Strong Institutions"),
    (17, "Partnerships for the Goals"),
];

/// Delimiter for goal lists inside a CSV cell
pub const GOAL_DELIMITER: &str = ";";

pub fn goal_name(id: u8) -> Option<&'static str> {
    GOALS.iter().find(|(g, _)| *g == id).map(|(_, name)| *name)
}

pub fn is_valid_goal(id: u8) -> bool {
    (1..=17).contains(&id)
}

/// One stored classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdgClassification {
    pub article_uuid: String,
    pub title: String,
    pub sdg_relevant: bool,
    /// Goal numbers joined by [`GOAL_DELIMITER`], empty when not relevant
    pub goals: String,
    pub goal_names: String,
    pub confidence: f64,
    pub reason: String,
    /// RFC 3339 timestamp
    pub classified_at: String,
}

impl SdgClassification {
    pub fn goal_ids(&self) -> Vec<u8> {
        self.goals
            .split(GOAL_DELIMITER)
            .filter_map(|g| g.trim().parse().ok())
            .collect()
    }
}

/// What the classification stage did
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifyOutcome {
    /// Every article already had a classification; the classifier was not called.
    NothingToClassify,
    /// `added` new rows appended; the store now holds `total`.
    Classified { added: usize, total: usize },
    /// The classifier failed; nothing was written and `pending` articles
    /// will be selected again next run.
    Failed { pending: usize, reason: String },
}

/// Distinct articles from the merged table that have no classification yet,
/// in first-seen order.
pub fn select_unclassified(rows: &[MergedRow], classified: &HashSet<String>) -> Vec<ArticleText> {
    let mut picked: HashSet<&str> = HashSet::new();
    rows.iter()
        .filter(|r| !classified.contains(&r.article_id))
        .filter(|r| picked.insert(r.article_id.as_str()))
        .map(ArticleText::from)
        .collect()
}

fn combine(
    articles: &[ArticleText],
    verdicts: &[RelevanceVerdict],
    assignments: &[GoalAssignment],
) -> Result<Vec<SdgClassification>> {
    let verdicts: HashMap<&str, &RelevanceVerdict> =
        verdicts.iter().map(|v| (v.article_uuid.as_str(), v)).collect();
    let assignments: HashMap<&str, &GoalAssignment> =
        assignments.iter().map(|a| (a.article_uuid.as_str(), a)).collect();
    let classified_at = Utc::now().to_rfc3339();

    articles
        .iter()
        .map(|article| {
            let verdict = verdicts.get(article.article_uuid.as_str()).ok_or_else(|| {
                ExpertsError::Classifier(format!(
                    "No relevance verdict for article {}",
                    article.article_uuid
                ))
            })?;

            let mut goals: Vec<u8> = assignments
                .get(article.article_uuid.as_str())
                .map(|a| a.goals.iter().copied().filter(|g| is_valid_goal(*g)).collect())
                .unwrap_or_default();
            goals.sort_unstable();
            goals.dedup();

            // A relevant article that maps to no goal is not relevant after all.
            let sdg_relevant = verdict.sdg_relevant && !goals.is_empty();
            if !sdg_relevant {
                goals.clear();
            }

            let reason = assignments
                .get(article.article_uuid.as_str())
                .map(|a| a.reason.clone())
                .filter(|r| sdg_relevant && !r.is_empty())
                .unwrap_or_else(|| verdict.reason.clone());

            Ok(SdgClassification {
                article_uuid: article.article_uuid.clone(),
                title: article.title.clone(),
                sdg_relevant,
                goals: goals
                    .iter()
                    .map(|g| g.to_string())
                    .collect::<Vec<_>>()
                    .join(GOAL_DELIMITER),
                goal_names: goals
                    .iter()
                    .filter_map(|g| goal_name(*g))
                    .collect::<Vec<_>>()
                    .join("; "),
                confidence: verdict.confidence,
                reason,
                classified_at: classified_at.clone(),
            })
        })
        .collect()
}

/// Classify every article in `merged_rows` that the store at `store_path`
/// does not know yet, and append the results.
pub async fn classify_new_articles<C>(
    merged_rows: &[MergedRow],
    store_path: &Path,
    classifier: &C,
) -> Result<ClassifyOutcome>
where
    C: SdgClassifier + ?Sized,
{
    let existing: Vec<SdgClassification> = store::load_rows(store_path)?;
    let classified: HashSet<String> = existing.iter().map(|c| c.article_uuid.clone()).collect();

    let pending = select_unclassified(merged_rows, &classified);
    if pending.is_empty() {
        info!(classified = classified.len(), "No new articles to classify");
        return Ok(ClassifyOutcome::NothingToClassify);
    }

    info!(
        pending = pending.len(),
        already_classified = classified.len(),
        "Classifying new articles"
    );

    let outcome = async {
        let verdicts = classifier.classify_relevance(&pending).await?;
        let assignments = classifier.assign_goals(&pending, &verdicts).await?;
        combine(&pending, &verdicts, &assignments)
    }
    .await;

    let new_rows = match outcome {
        Ok(rows) => rows,
        Err(e) => {
            warn!(pending = pending.len(), error = %e, "Classification failed, nothing persisted");
            return Ok(ClassifyOutcome::Failed {
                pending: pending.len(),
                reason: e.to_string(),
            });
        }
    };

    let relevant = new_rows.iter().filter(|r| r.sdg_relevant).count();
    let total = store::append_rows(store_path, &new_rows)?;
    info!(added = new_rows.len(), relevant = relevant, total = total, "Classifications saved");

    Ok(ClassifyOutcome::Classified {
        added: new_rows.len(),
        total,
    })
}
