//! CLI output: error mapping and table/JSON presentation.

use crate::config::StoryloomConfig;
use crate::error::ApiError;
use crate::plan::Plan;
use crate::story::StoryBeam;
use comfy_table::Table;
use serde::Serialize;
use serde_json::json;

const PREVIEW_CHARS: usize = 60;

/// Map domain/service errors to a string for CLI output.
pub fn map_error(e: &ApiError) -> String {
    match e {
        ApiError::RetriesExhausted { .. } => format!(
            "{}\nThe model kept producing rejected output; try raising max_attempts or adjusting sampling.",
            e
        ),
        ApiError::ProviderAuthFailed(_) => {
            format!("{}\nCheck the server.api_key_env setting.", e)
        }
        _ => e.to_string(),
    }
}

/// One stored checkpoint, summarized.
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointRow {
    pub step: usize,
    pub stories: usize,
    pub rendered_nodes: usize,
    pub best_score: Option<f64>,
    pub preview: String,
}

impl CheckpointRow {
    pub fn from_beam(step: usize, beam: &StoryBeam) -> Self {
        let best = beam.best();
        Self {
            step,
            stories: beam.len(),
            rendered_nodes: best.map(|s| s.len()).unwrap_or(0),
            best_score: best.and_then(|s| s.final_score()),
            preview: best.map(|s| preview(&s.text())).unwrap_or_default(),
        }
    }
}

/// Last characters of `text`, on one line.
fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let count = flat.chars().count();
    if count <= PREVIEW_CHARS {
        flat
    } else {
        let tail: String = flat.chars().skip(count - PREVIEW_CHARS).collect();
        format!("...{}", tail)
    }
}

pub fn format_checkpoint_rows(rows: &[CheckpointRow], format: &str) -> Result<String, ApiError> {
    if format == "json" {
        return Ok(serde_json::to_string_pretty(rows)?);
    }
    if rows.is_empty() {
        return Ok("No checkpoints stored.".to_string());
    }
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["Step", "Stories", "Nodes", "Best Score", "Ending"]);
    for row in rows {
        let score = row
            .best_score
            .map(|s| format!("{:.3}", s))
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            row.step.to_string(),
            row.stories.to_string(),
            row.rendered_nodes.to_string(),
            score,
            row.preview.clone(),
        ]);
    }
    Ok(table.to_string())
}

pub fn format_plan(plan: &Plan, format: &str) -> Result<String, ApiError> {
    if format == "json" {
        return Ok(serde_json::to_string_pretty(plan)?);
    }
    Ok(plan.to_string())
}

pub fn format_config(config: &StoryloomConfig, format: &str) -> Result<String, ApiError> {
    match format {
        "json" => Ok(serde_json::to_string_pretty(config)?),
        "toml" => toml::to_string_pretty(config)
            .map_err(|e| ApiError::ConfigError(format!("Failed to render config: {}", e))),
        other => Err(ApiError::ConfigError(format!(
            "Unknown format: {} (must be 'toml' or 'json')",
            other
        ))),
    }
}

pub fn format_cleared(removed: &[usize], format: &str) -> Result<String, ApiError> {
    if format == "json" {
        return Ok(serde_json::to_string_pretty(&json!({ "removed": removed }))?);
    }
    Ok(format!("Removed {} checkpoint(s).", removed.len()))
}
