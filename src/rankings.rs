//! Journal ranking enrichment.
//!
//! Joins the research-outputs table with a local journal ranking sheet
//! (CSV with `title`, `issn`, `rank` columns). Articles are matched by
//! normalized ISSN first, then by case-insensitive journal title.

use crate::error::Result;
use crate::models::{is_available, Article, AuthorList, NOT_AVAILABLE};
use crate::store;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// One row of the ranking sheet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRanking {
    pub title: String,
    #[serde(default)]
    pub issn: String,
    pub rank: String,
}

/// Research output with its journal rank
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedArticle {
    pub article_uuid: String,
    pub title: String,
    pub publication_year: String,
    pub doi: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub journal_title: String,
    pub journal_issn: String,
    pub authors: AuthorList,
    pub journal_rank: String,
}

/// Counts from one enrichment pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankingReport {
    pub articles: usize,
    pub matched: usize,
}

/// `0016-7061` and `00167061` compare equal; a trailing check digit `x` is upper-cased.
fn normalize_issn(issn: &str) -> String {
    issn.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Lookup index over the ranking sheet. The first row wins for duplicate keys.
pub struct RankingIndex {
    by_issn: HashMap<String, String>,
    by_title: HashMap<String, String>,
}

impl RankingIndex {
    pub fn new(rankings: &[JournalRanking]) -> Self {
        let mut by_issn = HashMap::new();
        let mut by_title = HashMap::new();

        for r in rankings {
            if is_available(&r.issn) {
                by_issn
                    .entry(normalize_issn(&r.issn))
                    .or_insert_with(|| r.rank.clone());
            }
            if is_available(&r.title) {
                by_title
                    .entry(normalize_title(&r.title))
                    .or_insert_with(|| r.rank.clone());
            }
        }

        Self { by_issn, by_title }
    }

    pub fn lookup(&self, article: &Article) -> Option<&str> {
        let by_issn = is_available(&article.journal_issn)
            .then(|| self.by_issn.get(&normalize_issn(&article.journal_issn)))
            .flatten();

        by_issn
            .or_else(|| {
                is_available(&article.journal_title)
                    .then(|| self.by_title.get(&normalize_title(&article.journal_title)))
                    .flatten()
            })
            .map(String::as_str)
    }
}

pub fn rank_articles(articles: &[Article], index: &RankingIndex) -> Vec<RankedArticle> {
    articles
        .iter()
        .map(|a| {
            let rank = index.lookup(a);
            if rank.is_none() {
                debug!(article = %a.article_uuid, journal = %a.journal_title, "No journal rank");
            }
            RankedArticle {
                article_uuid: a.article_uuid.clone(),
                title: a.title.clone(),
                publication_year: a.publication_year.clone(),
                doi: a.doi.clone(),
                abstract_text: a.abstract_text.clone(),
                journal_title: a.journal_title.clone(),
                journal_issn: a.journal_issn.clone(),
                authors: a.authors.clone(),
                journal_rank: rank.unwrap_or(NOT_AVAILABLE).to_string(),
            }
        })
        .collect()
}

/// Rank every stored article and replace the ranked table.
pub fn write_ranked(articles_path: &Path, journals_path: &Path, out_path: &Path) -> Result<RankingReport> {
    let rankings: Vec<JournalRanking> = store::load_rows(journals_path)?;
    let articles: Vec<Article> = store::load_rows(articles_path)?;
    let index = RankingIndex::new(&rankings);

    let ranked = rank_articles(&articles, &index);
    let matched = ranked.iter().filter(|r| r.journal_rank != NOT_AVAILABLE).count();
    store::write_rows(out_path, &ranked)?;

    info!(
        journals = rankings.len(),
        articles = ranked.len(),
        matched = matched,
        "Journal rankings applied"
    );
    Ok(RankingReport {
        articles: ranked.len(),
        matched,
    })
}
