//! Premise and Plan Generation
//!
//! The plan phase runs setting, entity list and outline generation in order.
//! Entity and outline generation are each wrapped in an outer retry that
//! regenerates the whole list or tree from scratch when a step inside runs
//! out of attempts.

use crate::config::{EntityConfig, PlanConfig, PremiseConfig, SettingConfig};
use crate::error::ApiError;
use crate::expansion::ExpansionEngine;
use crate::filter::{forbidden_substrings, list_numbering_artifact, Filter};
use crate::generation::GenerationContext;
use crate::plan::{Entity, EntityList, Plan, Premise};
use crate::prompt::PromptVars;
use crate::retry::{each, RetryPolicy};
use std::future::Future;
use tracing::{info, instrument, warn};

/// Words a generated entity name may not contain.
const NAME_PLACEHOLDERS: &[&str] = &["full", "Full", "name", "Name"];

/// Generate a title, then a premise for it.
#[instrument(skip_all)]
pub async fn generate_premise(
    ctx: &GenerationContext,
    config: &PremiseConfig,
) -> Result<Premise, ApiError> {
    let policy = RetryPolicy::attempts(config.max_attempts);

    let title_filter = text_band(ctx, config.title.max_tokens_or(32))?;
    let title = ctx
        .generate_one(
            "premise.title",
            &PromptVars::new(),
            &config.title,
            each(|text: String| clean_title(&text)),
            &title_filter,
            &policy,
        )
        .await?;
    info!(title = %title, "Generated title");

    let premise_filter = text_band(ctx, config.premise.max_tokens_or(256))?;
    let premise = ctx
        .generate_one(
            "premise.premise",
            &PromptVars::new().set("title", &title),
            &config.premise,
            each(|text: String| text.trim().to_string()),
            &premise_filter,
            &policy,
        )
        .await?;
    info!("Generated premise");

    Ok(Premise::new(title, premise))
}

/// Build a complete plan for `premise`: setting, entities, then outline.
#[instrument(skip_all, fields(title = %premise.title))]
pub async fn generate_plan(
    ctx: &GenerationContext,
    config: &PlanConfig,
    premise: Premise,
) -> Result<Plan, ApiError> {
    let mut plan = Plan::new(premise);

    plan.setting = generate_setting(ctx, &config.setting, &plan.premise).await?;
    info!(setting = %plan.setting, "Generated setting");

    let entity_config = &config.entity;
    plan.entities = with_outer_retries("entity list", entity_config.max_attempts, || {
        generate_entities(ctx, entity_config, &plan.premise, &plan.setting)
    })
    .await?;
    info!(entities = plan.entities.len(), "Generated entities");

    let mut attempt = 0;
    loop {
        attempt += 1;
        match ExpansionEngine::new(ctx, &config.outline).run(&mut plan).await {
            Ok(()) => break,
            Err(e) if is_stage_failure(&e) && attempt < config.outline.max_attempts => {
                warn!(attempt, error = %e, "Outline generation failed, starting over");
            }
            Err(e) if is_stage_failure(&e) => {
                return Err(ApiError::RetriesExhausted {
                    operation: "outline".to_string(),
                    attempts: attempt,
                })
            }
            Err(e) => return Err(e),
        }
    }

    plan.validate()?;
    Ok(plan)
}

/// One or two sentences describing where the story takes place.
pub async fn generate_setting(
    ctx: &GenerationContext,
    config: &SettingConfig,
    premise: &Premise,
) -> Result<String, ApiError> {
    let vars = PromptVars::new()
        .set("title", &premise.title)
        .set("premise", &premise.premise);
    let filter = text_band(ctx, config.sampling.max_tokens_or(128))?;
    ctx.generate_one(
        "plan.setting",
        &vars,
        &config.sampling,
        each(|text: String| text.trim().to_string()),
        &filter,
        &RetryPolicy::attempts(config.max_attempts),
    )
    .await
}

/// Generate entities one at a time until the model stops, keeping the count
/// within `[min_entities, max_entities]`.
pub async fn generate_entities(
    ctx: &GenerationContext,
    config: &EntityConfig,
    premise: &Premise,
    setting: &str,
) -> Result<EntityList, ApiError> {
    let mut entities = EntityList::new();
    let description_filter = list_numbering_artifact()?
        .and(ctx.filters.min_max_tokens(0, config.description.max_tokens_or(96) as usize)?)
        .and(Filter::new(|s: &str| s.ends_with('.')))
        .on_first::<bool>();
    let policy = RetryPolicy::default();

    let mut has_next = true;
    while has_next {
        let current_number = entities.len() + 1;
        let previous_entities = if entities.is_empty() {
            String::new()
        } else {
            format!("{}\n\n", entities.print_with_full_names())
        };
        let base = PromptVars::new()
            .set("title", &premise.title)
            .set("premise", &premise.premise)
            .set("setting", setting)
            .set("current_number", current_number);

        let mut forbidden: Vec<&str> = NAME_PLACEHOLDERS.to_vec();
        let taken = entities.names();
        forbidden.extend(taken.iter().map(String::as_str));
        let name_filter = forbidden_substrings(&forbidden)
            .and(ctx.filters.min_max_tokens(0, config.name.max_tokens_or(16) as usize)?)
            .map(String::as_str);

        let name = ctx
            .generate_one(
                "plan.entity.name",
                &base.clone().set("previous_entities", &previous_entities),
                &config.name,
                each(|text: String| clean_name(&text)),
                &name_filter,
                &policy,
            )
            .await?;

        let described = if entities.is_empty() {
            String::new()
        } else {
            entities.to_string()
        };
        let (description, model_has_next) = ctx
            .generate_one(
                "plan.entity.description",
                &base
                    .set("name", &name)
                    .set("previous_entities", described),
                &config.description,
                each(|text: String| split_description(&text)),
                &description_filter,
                &policy,
            )
            .await?;

        entities.push(Entity::new(name, description));
        has_next = if entities.len() < config.min_entities {
            true
        } else if entities.len() >= config.max_entities {
            false
        } else {
            model_has_next
        };
    }
    Ok(entities)
}

/// Run `step` until it succeeds, retrying only failures another attempt could fix.
async fn with_outer_retries<T, F, Fut>(
    operation: &str,
    max_attempts: usize,
    mut step: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    for attempt in 1..=max_attempts {
        match step().await {
            Ok(value) => return Ok(value),
            Err(e) if is_stage_failure(&e) => {
                warn!(operation, attempt, max_attempts, error = %e, "Step failed, starting over");
            }
            Err(e) => return Err(e),
        }
    }
    Err(ApiError::RetriesExhausted {
        operation: operation.to_string(),
        attempts: max_attempts,
    })
}

fn is_stage_failure(error: &ApiError) -> bool {
    matches!(error, ApiError::RetriesExhausted { .. }) || error.is_transient()
}

fn text_band(ctx: &GenerationContext, max_tokens: u32) -> Result<Filter<String>, ApiError> {
    Ok(ctx
        .filters
        .min_max_tokens(0, max_tokens as usize)?
        .map(String::as_str))
}

fn clean_title(raw: &str) -> String {
    let line = raw.trim().lines().next().unwrap_or_default();
    line.trim().trim_matches('"').trim().to_string()
}

fn clean_name(raw: &str) -> String {
    raw.trim_matches(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .to_string()
}

/// First line of a description, and whether the model went on to another item.
fn split_description(raw: &str) -> (String, bool) {
    let raw = raw.trim();
    match raw.split_once('\n') {
        Some((first, _)) => (first.trim_end().to_string(), true),
        None => (raw.to_string(), false),
    }
}
