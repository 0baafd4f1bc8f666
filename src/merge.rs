//! Person × article relation.
//!
//! Explodes each article's author list into one row per author, joins the
//! rows against the persons table on the author uuid, and drops every row
//! whose author did not resolve. An article without any resolvable author
//! produces no rows at all.

use crate::error::Result;
use crate::models::{is_available, Article, MergedRow, Person};
use crate::store;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

/// Counts from one merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Rows produced by this merge
    pub rows_added: usize,
    /// Author references that had no matching person
    pub unresolved_authors: usize,
    /// Articles that produced zero rows
    pub articles_dropped: usize,
    /// Size of the merged table afterwards
    pub total_rows: usize,
}

fn merged_row(article: &Article, person: &Person) -> MergedRow {
    MergedRow {
        article_id: article.article_uuid.clone(),
        title: article.title.clone(),
        publication_year: article.publication_year.clone(),
        doi: article.doi.clone(),
        abstract_text: article.abstract_text.clone(),
        journal_title: article.journal_title.clone(),
        journal_issn: article.journal_issn.clone(),
        uuid: person.uuid.clone(),
        email: person.email.clone(),
        name: person.name.clone(),
        first_name: person.first_name.clone(),
        last_name: person.last_name.clone(),
        organization: person.organization.clone(),
        about: person.about.clone(),
    }
}

/// Join articles with persons, one row per resolved (article, author) pair.
///
/// An author listed twice on the same article yields one row.
pub fn merge_relations(articles: &[Article], persons: &[Person]) -> (Vec<MergedRow>, MergeReport) {
    let mut by_uuid: HashMap<&str, &Person> = HashMap::with_capacity(persons.len());
    for person in persons.iter().filter(|p| is_available(&p.uuid)) {
        by_uuid.entry(person.uuid.as_str()).or_insert(person);
    }

    let mut report = MergeReport::default();
    let mut rows = Vec::new();

    for article in articles {
        let before = rows.len();
        let mut seen: HashSet<&str> = HashSet::new();

        for author in article.authors.iter() {
            let resolved = if is_available(&author.uuid) {
                by_uuid.get(author.uuid.as_str())
            } else {
                None
            };
            match resolved {
                Some(person) => {
                    if seen.insert(person.uuid.as_str()) {
                        rows.push(merged_row(article, person));
                    }
                }
                None => report.unresolved_authors += 1,
            }
        }

        if rows.len() == before {
            debug!(article = %article.article_uuid, "No resolvable authors, article dropped");
            report.articles_dropped += 1;
        }
    }

    report.rows_added = rows.len();
    (rows, report)
}

/// Stored articles with no row in the merged table yet, in table order.
///
/// Covers both newly inserted articles and older ones whose authors were
/// unknown when they were first merged. An article that already has rows
/// is never returned, so merging the result cannot repeat a pair.
pub fn unmerged_articles(articles: &[Article], merged: &[MergedRow]) -> Vec<Article> {
    let merged_ids: HashSet<&str> = merged.iter().map(|r| r.article_id.as_str()).collect();
    articles
        .iter()
        .filter(|a| !merged_ids.contains(a.article_uuid.as_str()))
        .cloned()
        .collect()
}

/// Merge `articles` against `persons` and append the rows to the merged table.
///
/// The merged table is not deduplicated here; callers pass articles from
/// [`unmerged_articles`].
pub fn append_merged(path: &Path, articles: &[Article], persons: &[Person]) -> Result<MergeReport> {
    let (rows, mut report) = merge_relations(articles, persons);
    report.total_rows = store::append_rows(path, &rows)?;

    info!(
        articles = articles.len(),
        rows = report.rows_added,
        unresolved = report.unresolved_authors,
        dropped = report.articles_dropped,
        total = report.total_rows,
        "Merged relation updated"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuthorList, AuthorRef, NOT_AVAILABLE};

    fn person(uuid: &str, email: &str, name: &str) -> Person {
        Person {
            uuid: uuid.into(),
            email: email.into(),
            name: name.into(),
            first_name: NOT_AVAILABLE.into(),
            last_name: NOT_AVAILABLE.into(),
            organization: "Geography".into(),
            about: NOT_AVAILABLE.into(),
        }
    }

    fn article(id: &str, authors: &[&str]) -> Article {
        Article {
            article_uuid: id.into(),
            title: format!("Title {}", id),
            publication_year: "2022".into(),
            doi: NOT_AVAILABLE.into(),
            abstract_text: NOT_AVAILABLE.into(),
            journal_title: "Journal".into(),
            journal_issn: NOT_AVAILABLE.into(),
            authors: AuthorList(
                authors
                    .iter()
                    .map(|u| AuthorRef {
                        name: format!("Author {}", u),
                        uuid: (*u).into(),
                    })
                    .collect(),
            ),
        }
    }

    #[test]
    fn test_explode_and_join() {
        let persons = vec![person("p1", "a@x.edu", "Ann"), person("p2", "b@x.edu", "Ben")];
        let articles = vec![article("a1", &["p1", "ext", "p2"]), article("a2", &["p2"])];

        let (rows, report) = merge_relations(&articles, &persons);

        let pairs: Vec<(&str, &str)> = rows
            .iter()
            .map(|r| (r.article_id.as_str(), r.uuid.as_str()))
            .collect();
        assert_eq!(pairs, vec![("a1", "p1"), ("a1", "p2"), ("a2", "p2")]);
        assert_eq!(report.unresolved_authors, 1);
        assert_eq!(report.articles_dropped, 0);
        assert_eq!(rows[0].title, "Title a1");
        assert_eq!(rows[0].email, "a@x.edu");
        assert_eq!(rows[1].name, "Ben");
    }

    #[test]
    fn test_join_completeness() {
        let persons = vec![person("p1", "a@x.edu", "Ann")];
        let articles = vec![
            article("a1", &["ext1", "ext2"]),
            article("a2", &[]),
            article("a3", &["p1"]),
        ];

        let (rows, report) = merge_relations(&articles, &persons);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].article_id, "a3");
        assert_eq!(report.articles_dropped, 2);

        for row in &rows {
            let source = articles.iter().find(|a| a.article_uuid == row.article_id).unwrap();
            assert!(source.authors.iter().any(|a| a.uuid == row.uuid));
        }
    }

    #[test]
    fn test_sentinel_uuid_never_matches() {
        let persons = vec![person(NOT_AVAILABLE, "x@x.edu", "Nobody")];
        let articles = vec![article("a1", &[NOT_AVAILABLE])];
        let (rows, _) = merge_relations(&articles, &persons);
        assert!(rows.is_empty());
    }

    #[test]
    fn test_repeated_author_one_row() {
        let persons = vec![person("p1", "a@x.edu", "Ann")];
        let (rows, _) = merge_relations(&[article("a1", &["p1", "p1"])], &persons);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_unmerged_articles() {
        let persons = vec![person("p1", "a@x.edu", "Ann")];
        let articles = vec![article("a1", &["p1"]), article("a2", &["p9"]), article("a3", &["p1"])];
        let (rows, _) = merge_relations(&articles[..1], &persons);

        let pending: Vec<String> = unmerged_articles(&articles, &rows)
            .into_iter()
            .map(|a| a.article_uuid)
            .collect();
        assert_eq!(pending, vec!["a2", "a3"]);
    }

    #[test]
    fn test_append_merged_appends() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("person_research_outputs.csv");
        let persons = vec![person("p1", "a@x.edu", "Ann")];

        let first = append_merged(&path, &[article("a1", &["p1"])], &persons)?;
        assert_eq!(first.total_rows, 1);
        let second = append_merged(&path, &[article("a2", &["p1"])], &persons)?;
        assert_eq!(second.total_rows, 2);

        let stored: Vec<MergedRow> = store::load_rows(&path)?;
        assert_eq!(stored[1].article_id, "a2");

        let nothing = append_merged(&path, &[article("a3", &["ext"])], &persons)?;
        assert_eq!(nothing.rows_added, 0);
        assert_eq!(nothing.total_rows, 2);
        Ok(())
    }
}
