//! Unit backed by the text-generation backend

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

use super::catalog::{self, UnitSpec};
use super::{Suggestion, TaskUnit, UnitContext, UnitDescriptor, UnitInput, UnitResult};
use crate::config::RetryConfig;
use crate::error::UnitError;
use crate::provider::{complete_json, Backend};

const DEFAULT_CONFIDENCE: f64 = 70.0;

pub struct PromptUnit {
    descriptor: UnitDescriptor,
    system_prompt: String,
    backend: Arc<dyn Backend>,
    retry: RetryConfig,
}

impl PromptUnit {
    pub fn from_spec(spec: &UnitSpec, backend: Arc<dyn Backend>, retry: RetryConfig) -> Self {
        Self {
            descriptor: spec.descriptor(),
            system_prompt: format!("{}\n\n{}", spec.system_prompt, catalog::json_rules()),
            backend,
            retry,
        }
    }
}

/// Render the shared input as the user prompt
pub(crate) fn build_user_prompt(descriptor: &UnitDescriptor, input: &UnitInput) -> String {
    let mut context = Map::new();
    context.insert("city".to_string(), json!(input.city));
    context.insert("nights".to_string(), json!(input.nights));
    context.insert("preferences".to_string(), json!(input.preferences));
    if let Some(trip) = &input.trip {
        context.insert("trip".to_string(), json!(trip));
    }

    let mut upstream = Map::new();
    for dep in &descriptor.depends_on {
        match input.dependency(dep) {
            Some(out) => {
                upstream.insert(dep.clone(), json!(out.data));
            }
            None => {
                upstream.insert(dep.clone(), json!({"unavailable": true}));
            }
        }
    }
    if !upstream.is_empty() {
        context.insert("upstream".to_string(), Value::Object(upstream));
    }

    let mut prompt = format!(
        "## Task\n{}\n\n## Context\n```json\n{}\n```",
        descriptor.description,
        serde_json::to_string_pretty(&Value::Object(context)).unwrap_or_default()
    );

    if let Some(instructions) = &input.refinement_instructions {
        prompt.push_str(&format!(
            "\n\n## Refinement\nA previous attempt was reviewed. Address this: {}",
            instructions
        ));
    }
    prompt
}

/// Split a backend reply into declared slots plus the optional metadata keys
pub(crate) fn parse_reply(
    descriptor: &UnitDescriptor,
    reply: Value,
) -> Result<UnitResult, UnitError> {
    let Value::Object(mut obj) = reply else {
        return Err(UnitError::Execution(format!(
            "{} expected a JSON object reply",
            descriptor.name
        )));
    };

    let confidence = obj
        .remove("confidence")
        .and_then(|v| v.as_f64())
        .unwrap_or(DEFAULT_CONFIDENCE);
    let gaps: Vec<String> = obj
        .remove("gaps")
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();
    let suggestions: Vec<Suggestion> = obj
        .remove("suggestions")
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    let mut result = UnitResult {
        confidence,
        gaps,
        suggestions,
        ..UnitResult::default()
    };
    for slot in &descriptor.outputs {
        if let Some(value) = obj.remove(slot) {
            result.data.insert(slot.clone(), value);
        }
    }

    if result.data.is_empty() {
        return Err(UnitError::Execution(format!(
            "{} reply contained none of: {}",
            descriptor.name,
            descriptor.outputs.join(", ")
        )));
    }
    Ok(result)
}

#[async_trait]
impl TaskUnit for PromptUnit {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    async fn run(&self, input: &UnitInput, ctx: &UnitContext) -> Result<UnitResult, UnitError> {
        let user_prompt = build_user_prompt(&self.descriptor, input);
        debug!(
            "{} prompting {} ({} bytes)",
            self.descriptor.name,
            self.backend.name(),
            user_prompt.len()
        );

        ctx.report_progress(10);
        let reply = complete_json(
            self.backend.as_ref(),
            &self.retry,
            &self.system_prompt,
            &user_prompt,
            ctx.timeout,
        )
        .await?;
        ctx.report_progress(80);

        parse_reply(&self.descriptor, reply)
    }
}
