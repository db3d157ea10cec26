//! Storyloom: Long-Form Story Generation
//!
//! Grows a premise into a plan (setting, characters, hierarchical outline)
//! and renders the outline into prose with a scored beam search over
//! language-model continuations.

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod error;
pub mod expansion;
pub mod filter;
pub mod generation;
pub mod logging;
pub mod plan;
pub mod planner;
pub mod prompt;
pub mod provider;
pub mod render;
pub mod retry;
pub mod story;
