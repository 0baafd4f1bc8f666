//! Pipeline configuration and durable file layout.

use crate::error::{ExpertsError, Result};
use crate::experts::StreamKind;
use std::path::{Path, PathBuf};

/// Default page size for every stream
pub const DEFAULT_PAGE_SIZE: u64 = 100;

/// Environment variable holding the experts API key
pub const API_KEY_ENV: &str = "EXPERTS_API_KEY";

/// Environment variable holding the experts API root
pub const API_URL_ENV: &str = "EXPERTS_API_URL";

/// Locations of every durable artifact under one data directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Keyed by `uuid`
    pub fn org_units(&self) -> PathBuf {
        self.root.join("organisational_units.csv")
    }

    /// Keyed by `email`
    pub fn people(&self) -> PathBuf {
        self.root.join("people.csv")
    }

    /// Keyed by `article_uuid`
    pub fn articles(&self) -> PathBuf {
        self.root.join("research_outputs.csv")
    }

    /// Append-only person × article relation
    pub fn merged(&self) -> PathBuf {
        self.root.join("person_research_outputs.csv")
    }

    /// Keyed by `article_uuid`
    pub fn classifications(&self) -> PathBuf {
        self.root.join("person_research_outputs_with_sdg.csv")
    }

    pub fn ranked_articles(&self) -> PathBuf {
        self.root.join("research_outputs_ranked.csv")
    }

    pub fn offsets(&self) -> PathBuf {
        self.root.join("offsets")
    }

    pub fn lock(&self) -> PathBuf {
        self.root.join(".pipeline.lock")
    }

    /// Table written by a stream
    pub fn table_for(&self, stream: StreamKind) -> PathBuf {
        match stream {
            StreamKind::OrganisationalUnits => self.org_units(),
            StreamKind::Persons => self.people(),
            StreamKind::ResearchOutputs => self.articles(),
        }
    }
}

/// Everything one pipeline run needs
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub layout: DataLayout,
    pub api_url: String,
    pub api_key: String,
    pub page_size: u64,
    /// Organisational-unit filter; empty means every stored unit
    pub org_units: Vec<String>,
    /// Ranking sheet; ranking is skipped when absent
    pub journals: Option<PathBuf>,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(ExpertsError::Config(format!(
                "Experts API key is empty (set {} or pass --api-key)",
                API_KEY_ENV
            )));
        }
        if self.api_url.trim().is_empty() {
            return Err(ExpertsError::Config(format!(
                "Experts API URL is empty (set {} or pass --base-url)",
                API_URL_ENV
            )));
        }
        if self.page_size == 0 {
            return Err(ExpertsError::Config("Page size must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PipelineConfig {
        PipelineConfig {
            layout: DataLayout::new("/tmp/data"),
            api_url: "https://experts.example.edu/ws/api".into(),
            api_key: "k".into(),
            page_size: DEFAULT_PAGE_SIZE,
            org_units: Vec::new(),
            journals: None,
        }
    }

    #[test]
    fn test_layout_paths() {
        let layout = DataLayout::new("/data");
        assert_eq!(layout.people(), PathBuf::from("/data/people.csv"));
        assert_eq!(layout.table_for(StreamKind::ResearchOutputs), layout.articles());
        assert_eq!(layout.offsets(), PathBuf::from("/data/offsets"));
    }

    #[test]
    fn test_validate() {
        assert!(config().validate().is_ok());
        assert!(PipelineConfig { api_key: " ".into(), ..config() }.validate().is_err());
        assert!(PipelineConfig { page_size: 0, ..config() }.validate().is_err());
    }
}
