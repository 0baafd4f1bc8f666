//! Prompt module for LLM-based operations.
//!
//! Templates for the two classification steps: SDG relevance first, then
//! goal assignment for the articles found relevant.

pub mod sdg_goals;
pub mod sdg_relevance;
