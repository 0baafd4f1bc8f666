//! Incremental update pipeline.
//!
//! One run, strictly in order:
//! 1. organisational units, persons, research outputs: fetch from the
//!    ledger offset, normalize, upsert into the keyed table, advance the
//!    offset when a terminal page was reached
//! 2. merge stored articles that have no merged rows yet with the full
//!    people table
//! 3. classify articles missing from the classification table
//! 4. apply journal rankings
//!
//! Each stream reports a [`StreamStatus`]; later stages look at the
//! status instead of shared state. A stream that failed to fetch still
//! stores what it got and leaves its offset alone.

use crate::classifier::SdgClassifier;
use crate::config::{DataLayout, PipelineConfig};
use crate::error::Result;
use crate::experts::{ExpertsClient, FetchOutcome, StreamKind};
use crate::ledger::OffsetLedger;
use crate::merge::{self, MergeReport};
use crate::models::{is_available, Article, MergedRow, OrgUnit, Person};
use crate::normalize;
use crate::rankings::{self, RankingReport};
use crate::sdg::{self, ClassifyOutcome};
use crate::store::{self, RunLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

/// Result of fetching one stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStatus {
    HasNewData,
    NoNewData,
    FetchFailed(String),
}

/// Per-stream counts for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    pub stream: StreamKind,
    pub status: StreamStatus,
    pub fetched: usize,
    pub inserted: usize,
    pub table_rows: usize,
    pub offset: u64,
}

struct StreamSync<T> {
    summary: StreamSummary,
    table: Vec<T>,
}

/// Drop records whose key is the sentinel; upserting them would collapse
/// unrelated records onto one row.
fn keyed_records<T, K>(stream: StreamKind, records: Vec<T>, key: K) -> Vec<T>
where
    K: Fn(&T) -> String,
{
    let total = records.len();
    let keyed: Vec<T> = records.into_iter().filter(|r| is_available(&key(r))).collect();
    if keyed.len() < total {
        warn!(
            stream = stream.name(),
            dropped = total - keyed.len(),
            "Skipping records without a key"
        );
    }
    keyed
}

/// Classification stage result
#[derive(Debug, Clone, PartialEq)]
pub enum ClassificationStage {
    Skipped(String),
    Ran(ClassifyOutcome),
}

/// Everything one run did
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub streams: Vec<StreamSummary>,
    pub merge: Option<MergeReport>,
    pub classification: ClassificationStage,
    pub ranking: Option<RankingReport>,
}

/// Offsets and table sizes, read without touching the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub offsets: Vec<(StreamKind, u64)>,
    pub tables: Vec<(String, usize)>,
}

pub struct Pipeline {
    config: PipelineConfig,
    client: ExpertsClient,
    ledger: OffsetLedger,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let client = ExpertsClient::new(&config.api_url, config.api_key.clone())?;
        let ledger = OffsetLedger::new(config.layout.offsets());
        Ok(Self {
            config,
            client,
            ledger,
        })
    }

    pub fn layout(&self) -> &DataLayout {
        &self.config.layout
    }

    async fn sync_stream<T, N, K>(
        &self,
        stream: StreamKind,
        org_units: &[String],
        normalize_batch: N,
        key: K,
    ) -> Result<StreamSync<T>>
    where
        T: Serialize + DeserializeOwned + Clone,
        N: Fn(&[serde_json::Value]) -> Vec<T>,
        K: Fn(&T) -> String,
    {
        let path = self.config.layout.table_for(stream);
        let start = self.ledger.read(stream)?;

        let outcome = self
            .client
            .fetch_stream(stream, start, self.config.page_size, org_units)
            .await;

        let fetched = outcome.items().len();
        let (status, next_offset) = match &outcome {
            FetchOutcome::HasNewData { next_offset, .. } => (StreamStatus::HasNewData, Some(*next_offset)),
            FetchOutcome::NoNewData => (StreamStatus::NoNewData, None),
            FetchOutcome::FetchFailed { reason, .. } => (StreamStatus::FetchFailed(reason.clone()), None),
        };

        let (table, inserted) = if fetched == 0 {
            (store::load_rows(&path)?, Vec::new())
        } else {
            let records = keyed_records(stream, normalize_batch(outcome.items()), &key);
            let upserted = store::upsert_batch(&path, records, &key)?;
            (upserted.table, upserted.inserted)
        };

        // Stored before the offset moves, so a crash in between re-fetches
        // instead of skipping.
        let offset = match next_offset {
            Some(next) => self.ledger.write(stream, next)?,
            None => start,
        };

        let summary = StreamSummary {
            stream,
            status,
            fetched,
            inserted: inserted.len(),
            table_rows: table.len(),
            offset,
        };

        match &summary.status {
            StreamStatus::HasNewData => println!(
                "{}: fetched {}, {} new, {} stored, offset {}",
                stream.name(),
                fetched,
                summary.inserted,
                summary.table_rows,
                offset
            ),
            StreamStatus::NoNewData => println!("{}: no new data (offset {})", stream.name(), offset),
            StreamStatus::FetchFailed(reason) => println!(
                "{}: fetch failed after {} items, offset kept at {} ({})",
                stream.name(),
                fetched,
                offset,
                reason
            ),
        }

        Ok(StreamSync { summary, table })
    }

    /// Run the full incremental update.
    ///
    /// Without a classifier the classification stage is reported as skipped.
    pub async fn run(&self, classifier: Option<&dyn SdgClassifier>) -> Result<RunSummary> {
        let layout = &self.config.layout;
        std::fs::create_dir_all(layout.root())?;
        let _lock = RunLock::acquire(layout.lock())?;

        println!("\n--- Stage 1: Fetch ---");

        let units: StreamSync<OrgUnit> = self
            .sync_stream(
                StreamKind::OrganisationalUnits,
                &[],
                normalize::normalize_org_units,
                |u: &OrgUnit| u.uuid.clone(),
            )
            .await?;

        let filter: Vec<String> = if self.config.org_units.is_empty() {
            units
                .table
                .iter()
                .map(|u| u.uuid.clone())
                .filter(|u| is_available(u))
                .collect()
        } else {
            self.config.org_units.clone()
        };
        info!(units = filter.len(), "Organisational-unit filter");

        let people: StreamSync<Person> = self
            .sync_stream(
                StreamKind::Persons,
                &filter,
                normalize::normalize_people,
                |p: &Person| p.store_key().to_string(),
            )
            .await?;

        let articles: StreamSync<Article> = self
            .sync_stream(
                StreamKind::ResearchOutputs,
                &filter,
                normalize::normalize_articles,
                |a: &Article| a.article_uuid.clone(),
            )
            .await?;

        println!("\n--- Stage 2: Merge ---");
        let merged_rows: Vec<MergedRow> = store::load_rows(&layout.merged())?;
        let pending = merge::unmerged_articles(&articles.table, &merged_rows);
        let merge = if pending.is_empty() {
            println!("Every research output is merged, merged table unchanged.");
            None
        } else {
            let report = merge::append_merged(&layout.merged(), &pending, &people.table)?;
            println!(
                "Merged {} pending articles into {} rows ({} articles without known authors), {} rows total",
                pending.len(),
                report.rows_added,
                report.articles_dropped,
                report.total_rows
            );
            Some(report)
        };

        println!("\n--- Stage 3: SDG Classification ---");
        let classification = match classifier {
            None => {
                println!("Skipped (no LLM configured)");
                ClassificationStage::Skipped("no classifier configured".to_string())
            }
            Some(classifier) => {
                let merged_rows: Vec<MergedRow> = store::load_rows(&layout.merged())?;
                let outcome =
                    sdg::classify_new_articles(&merged_rows, &layout.classifications(), classifier).await?;
                match &outcome {
                    ClassifyOutcome::NothingToClassify => {
                        println!("No new research articles to classify.")
                    }
                    ClassifyOutcome::Classified { added, total } => {
                        println!("Classified {} new articles, {} stored", added, total)
                    }
                    ClassifyOutcome::Failed { pending, reason } => {
                        warn!(pending = pending, "Classification stage failed");
                        println!(
                            "Classification failed for {} articles, will retry next run: {}",
                            pending, reason
                        )
                    }
                }
                ClassificationStage::Ran(outcome)
            }
        };

        println!("\n--- Stage 4: Journal Rankings ---");
        let ranking = match &self.config.journals {
            Some(journals) if journals.exists() => {
                let report = rankings::write_ranked(&layout.articles(), journals, &layout.ranked_articles())?;
                println!("Ranked {} / {} articles", report.matched, report.articles);
                Some(report)
            }
            Some(journals) => {
                println!("Skipped (ranking sheet {} not found)", journals.display());
                None
            }
            None => {
                println!("Skipped (no --journals provided)");
                None
            }
        };

        Ok(RunSummary {
            streams: vec![units.summary, people.summary, articles.summary],
            merge,
            classification,
            ranking,
        })
    }
}

/// Current offsets and table sizes of a data directory
pub fn status(layout: &DataLayout) -> Result<StatusReport> {
    let ledger = OffsetLedger::new(layout.offsets());
    let offsets = StreamKind::ALL
        .iter()
        .map(|s| ledger.read(*s).map(|o| (*s, o)))
        .collect::<Result<Vec<_>>>()?;

    let tables = [
        layout.org_units(),
        layout.people(),
        layout.articles(),
        layout.merged(),
        layout.classifications(),
        layout.ranked_articles(),
    ]
    .into_iter()
    .map(|path| {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        store::count_rows(&path).map(|n| (name, n))
    })
    .collect::<Result<Vec<_>>>()?;

    Ok(StatusReport { offsets, tables })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ArticleText, GoalAssignment, RelevanceVerdict};
    use crate::error::ExpertsError;
    use crate::sdg::SdgClassification;
    use async_trait::async_trait;
    use mockito::{Matcher, Mock, Server, ServerGuard};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingClassifier {
        batches: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl SdgClassifier for CountingClassifier {
        async fn classify_relevance(&self, articles: &[ArticleText]) -> Result<Vec<RelevanceVerdict>> {
            self.batches.lock().unwrap().push(articles.len());
            Ok(articles
                .iter()
                .map(|a| RelevanceVerdict {
                    article_uuid: a.article_uuid.clone(),
                    sdg_relevant: true,
                    confidence: 0.8,
                    reason: "water".into(),
                })
                .collect())
        }

        async fn assign_goals(
            &self,
            articles: &[ArticleText],
            _verdicts: &[RelevanceVerdict],
        ) -> Result<Vec<GoalAssignment>> {
            Ok(articles
                .iter()
                .map(|a| GoalAssignment {
                    article_uuid: a.article_uuid.clone(),
                    goals: vec![6],
                    reason: "water".into(),
                })
                .collect())
        }
    }

    fn page(items: serde_json::Value) -> String {
        json!({ "items": items }).to_string()
    }

    async fn get_page(server: &mut ServerGuard, path: &str, offset: u64, body: String) -> Mock {
        server
            .mock("GET", path)
            .match_query(Matcher::UrlEncoded("offset".into(), offset.to_string()))
            .with_status(200)
            .with_body(body)
            .create_async()
            .await
    }

    async fn search_page(server: &mut ServerGuard, path: &str, offset: u64, body: String) -> Mock {
        server
            .mock("POST", path)
            .match_body(Matcher::PartialJson(json!({ "offset": offset })))
            .with_status(200)
            .with_body(body)
            .create_async()
            .await
    }

    fn person_item(uuid: &str, first: &str, last: &str, email: &str) -> serde_json::Value {
        json!({
            "uuid": uuid,
            "name": {"firstName": first, "lastName": last},
            "staffOrganisationAssociations": [{
                "organisationalUnit": {"uuid": "o1", "name": {"text": [{"value": "Hydrology"}]}},
                "emails": [{"value": email}]
            }]
        })
    }

    fn output_item(uuid: &str, title: &str, authors: &[&str]) -> serde_json::Value {
        let associations: Vec<_> = authors
            .iter()
            .map(|a| json!({"name": {"firstName": "X", "lastName": *a}, "person": {"uuid": *a}}))
            .collect();
        json!({
            "uuid": uuid,
            "title": {"value": title},
            "publicationStatuses": [{"current": true, "publicationDate": {"year": 2024}}],
            "personAssociations": associations
        })
    }

    fn config(server: &ServerGuard, root: &Path) -> PipelineConfig {
        PipelineConfig {
            layout: DataLayout::new(root),
            api_url: server.url(),
            api_key: "k".into(),
            page_size: 10,
            org_units: Vec::new(),
            journals: None,
        }
    }

    fn snapshot(root: &Path) -> BTreeMap<String, Vec<u8>> {
        let mut files = BTreeMap::new();
        for dir in [root.to_path_buf(), root.join("offsets")] {
            for entry in std::fs::read_dir(&dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_file() {
                    files.insert(
                        path.strip_prefix(root).unwrap().display().to_string(),
                        std::fs::read(&path).unwrap(),
                    );
                }
            }
        }
        files
    }

    #[tokio::test]
    async fn test_full_run_then_idempotent_rerun() -> Result<()> {
        let mut server = Server::new_async().await;
        let dir = tempfile::tempdir()?;

        get_page(
            &mut server,
            "/organisational-units",
            0,
            page(json!([{"uuid": "o1", "name": {"text": [{"value": "Hydrology"}]}}])),
        )
        .await;
        get_page(&mut server, "/organisational-units", 1, page(json!([]))).await;

        search_page(
            &mut server,
            "/persons/search",
            0,
            page(json!([
                person_item("p1", "Ann", "Lee", "ann@x.edu"),
                person_item("p2", "Ann", "Lee", "ann.lee@x.edu")
            ])),
        )
        .await;
        search_page(&mut server, "/persons/search", 2, page(json!([]))).await;

        search_page(
            &mut server,
            "/research-outputs/search",
            0,
            page(json!([
                output_item("a1", "Groundwater", &["p1", "p2"]),
                output_item("a2", "Rainfall", &["ext"]),
                output_item("a3", "Wetlands", &["p2"])
            ])),
        )
        .await;
        search_page(&mut server, "/research-outputs/search", 3, page(json!([]))).await;

        let pipeline = Pipeline::new(config(&server, dir.path()))?;
        let classifier = CountingClassifier::default();

        let first = pipeline.run(Some(&classifier)).await?;
        assert_eq!(first.streams[1].inserted, 2);
        assert_eq!(first.streams[2].offset, 3);
        assert_eq!(first.merge.as_ref().map(|m| m.rows_added), Some(3));
        assert_eq!(
            first.classification,
            ClassificationStage::Ran(ClassifyOutcome::Classified { added: 2, total: 2 })
        );

        let people: Vec<Person> = store::load_rows(&pipeline.layout().people())?;
        assert_eq!(people[0].name, "Ann Lee");
        assert_eq!(people[1].name, "Ann Lee (2)");

        let sdg: Vec<SdgClassification> = store::load_rows(&pipeline.layout().classifications())?;
        let ids: Vec<&str> = sdg.iter().map(|c| c.article_uuid.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a3"]);

        let before = snapshot(dir.path());
        let second = pipeline.run(Some(&classifier)).await?;
        let after = snapshot(dir.path());

        assert!(second.streams.iter().all(|s| s.status == StreamStatus::NoNewData));
        // a2 has no known author yet; it is retried without touching the table
        assert_eq!(second.merge.as_ref().map(|m| m.rows_added), Some(0));
        assert_eq!(
            second.classification,
            ClassificationStage::Ran(ClassifyOutcome::NothingToClassify)
        );
        assert_eq!(*classifier.batches.lock().unwrap(), vec![2]);
        assert_eq!(before, after);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_stream_keeps_offset() -> Result<()> {
        let mut server = Server::new_async().await;
        let dir = tempfile::tempdir()?;

        get_page(&mut server, "/organisational-units", 0, page(json!([]))).await;
        server
            .mock("GET", "/persons")
            .match_query(Matcher::UrlEncoded("offset".into(), "0".into()))
            .with_status(200)
            .with_body(page(json!((0..10)
                .map(|i| person_item(&format!("p{}", i), "P", &i.to_string(), &format!("p{}@x.edu", i)))
                .collect::<Vec<_>>())))
            .create_async()
            .await;
        server
            .mock("GET", "/persons")
            .match_query(Matcher::UrlEncoded("offset".into(), "10".into()))
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;
        get_page(&mut server, "/research-outputs", 0, page(json!([]))).await;

        let pipeline = Pipeline::new(config(&server, dir.path()))?;
        let summary = pipeline.run(None).await?;

        let persons = &summary.streams[1];
        assert!(matches!(persons.status, StreamStatus::FetchFailed(_)));
        assert_eq!(persons.fetched, 10);
        assert_eq!(persons.inserted, 10);
        assert_eq!(persons.offset, 0);
        assert!(!pipeline.layout().offsets().join("persons.txt").exists());
        assert_eq!(store::count_rows(&pipeline.layout().people())?, 10);
        assert!(matches!(summary.classification, ClassificationStage::Skipped(_)));

        let report = status(pipeline.layout())?;
        assert!(report.offsets.iter().all(|(_, o)| *o == 0));
        assert!(report.tables.contains(&("people.csv".to_string(), 10)));
        Ok(())
    }

    #[test]
    fn test_keyless_records_are_skipped() {
        let items = vec![
            output_item("a1", "Dunes", &["p1"]),
            json!({"title": {"value": "No id"}}),
            output_item("a2", "Deltas", &["p1"]),
        ];
        let kept = keyed_records(
            StreamKind::ResearchOutputs,
            normalize::normalize_articles(&items),
            |a: &Article| a.article_uuid.clone(),
        );
        let ids: Vec<&str> = kept.iter().map(|a| a.article_uuid.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a2"]);
    }

    #[tokio::test]
    async fn test_article_merged_once_author_arrives() -> Result<()> {
        let mut server = Server::new_async().await;
        let dir = tempfile::tempdir()?;

        get_page(&mut server, "/organisational-units", 0, page(json!([]))).await;
        get_page(
            &mut server,
            "/persons",
            0,
            page(json!([person_item("p1", "Ann", "Lee", "ann@x.edu")])),
        )
        .await;
        get_page(
            &mut server,
            "/persons",
            1,
            page(json!([person_item("p9", "Raj", "Rao", "raj@x.edu")])),
        )
        .await;
        get_page(
            &mut server,
            "/research-outputs",
            0,
            page(json!([output_item("a1", "Monsoons", &["p9"])])),
        )
        .await;
        get_page(&mut server, "/research-outputs", 1, page(json!([]))).await;

        let pipeline = Pipeline::new(config(&server, dir.path()))?;
        let classifier = CountingClassifier::default();

        let first = pipeline.run(Some(&classifier)).await?;
        assert_eq!(first.merge.as_ref().map(|m| m.articles_dropped), Some(1));
        assert_eq!(
            first.classification,
            ClassificationStage::Ran(ClassifyOutcome::NothingToClassify)
        );

        let second = pipeline.run(Some(&classifier)).await?;
        assert_eq!(second.streams[2].status, StreamStatus::NoNewData);
        assert_eq!(second.merge.as_ref().map(|m| m.rows_added), Some(1));
        assert_eq!(
            second.classification,
            ClassificationStage::Ran(ClassifyOutcome::Classified { added: 1, total: 1 })
        );

        let merged: Vec<MergedRow> = store::load_rows(&pipeline.layout().merged())?;
        assert_eq!(merged.len(), 1);
        assert_eq!((merged[0].article_id.as_str(), merged[0].uuid.as_str()), ("a1", "p9"));

        let third = pipeline.run(Some(&classifier)).await;
        assert!(third.is_ok());
        assert_eq!(store::count_rows(&pipeline.layout().merged())?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_run_is_rejected() -> Result<()> {
        let server = Server::new_async().await;
        let dir = tempfile::tempdir()?;
        let pipeline = Pipeline::new(config(&server, dir.path()))?;

        let _held = RunLock::acquire(pipeline.layout().lock())?;
        assert!(matches!(pipeline.run(None).await, Err(ExpertsError::Locked(_))));
        Ok(())
    }
}
