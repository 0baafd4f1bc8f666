//! # rustexperts
//!
//! Incremental harvester for a university research-experts API.
//!
//! ## Modules
//!
//! - [`experts`] - Paginated experts API client
//! - [`normalize`] - Raw API items to flat records
//! - [`ledger`] - Per-stream offset ledger
//! - [`store`] - Keyed CSV tables with first-wins upsert
//! - [`merge`] - Person × research-output relation
//! - [`sdg`] - Sustainable Development Goal classification gatekeeper
//! - [`classifier`] - LLM-backed SDG classifier
//! - [`rankings`] - Journal ranking join
//! - [`pipeline`] - One incremental run end to end
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rustexperts::config::{DataLayout, PipelineConfig};
//! use rustexperts::pipeline::Pipeline;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig {
//!         layout: DataLayout::new("./data"),
//!         api_url: "https://experts.example.edu/ws/api".into(),
//!         api_key: std::env::var("EXPERTS_API_KEY")?,
//!         page_size: 100,
//!         org_units: Vec::new(),
//!         journals: None,
//!     };
//!     let summary = Pipeline::new(config)?.run(None).await?;
//!     println!("{} streams synced", summary.streams.len());
//!     Ok(())
//! }
//! ```

pub mod classifier;
pub mod config;
pub mod error;
pub mod experts;
pub mod ledger;
pub mod merge;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod prompts;
pub mod rankings;
pub mod sdg;
pub mod store;

pub use error::{ExpertsError, Result};
