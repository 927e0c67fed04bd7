//! Prompt rendering and response validation for both translation paths.

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use tera::{Context as TeraContext, Tera};

use crate::document::TextUnit;
use crate::providers::ResponseSchema;

pub const SCHEMA_NAME: &str = "TextItemTranslation";

const HTML_SYSTEM_PROMPT: &str = include_str!("prompts/html_system.tera");
const HTML_USER_PROMPT: &str = include_str!("prompts/html_user.tera");
const DOCUMENT_SYSTEM_PROMPT: &str = include_str!("prompts/document_system.tera");
const DOCUMENT_USER_PROMPT: &str = include_str!("prompts/document_user.tera");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

pub fn render_html_prompt(source_lang: &str, target_lang: &str, chunk: &str) -> Result<Prompt> {
    let mut context = language_context(source_lang, target_lang);
    let system = render("html system prompt", HTML_SYSTEM_PROMPT, &context)?;
    context.insert("content", chunk);
    let user = render("html user prompt", HTML_USER_PROMPT, &context)?;
    Ok(Prompt { system, user })
}

pub fn render_document_prompt(
    source_lang: &str,
    target_lang: &str,
    batch: &[TextUnit],
) -> Result<Prompt> {
    let mut context = language_context(source_lang, target_lang);
    let system = render("document system prompt", DOCUMENT_SYSTEM_PROMPT, &context)?;
    let items = serde_json::to_string_pretty(&json!({ "items": batch }))
        .with_context(|| "failed to encode batch items")?;
    context.insert("content", &items);
    context.insert("item_count", &batch.len());
    let user = render("document user prompt", DOCUMENT_USER_PROMPT, &context)?;
    Ok(Prompt { system, user })
}

pub fn document_response_schema() -> ResponseSchema {
    let schema = json!({
        "type": "object",
        "properties": {
            "items": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "index": {"type": "integer"},
                        "path": {"type": "array", "items": {"type": "string"}},
                        "original": {"type": "string"},
                        "translated": {"type": "string"}
                    },
                    "required": ["index", "path", "original", "translated"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["items"],
        "additionalProperties": false
    });

    ResponseSchema {
        name: SCHEMA_NAME.to_string(),
        description: "Translation of text items with index, path, original and translated text."
            .to_string(),
        schema,
    }
}

/// Parses a structured batch response and returns the translations in batch
/// order. The response must contain exactly one item per unit in the batch.
pub fn parse_document_response(text: &str, batch: &[TextUnit]) -> Result<Vec<String>> {
    let response: BatchResponse = serde_json::from_str(strip_code_fence(text))
        .with_context(|| "failed to parse translation response JSON")?;

    if response.items.len() != batch.len() {
        return Err(anyhow!(
            "translation count mismatch: got {}, expected {}",
            response.items.len(),
            batch.len()
        ));
    }

    let expected = batch.iter().map(|unit| unit.index).collect::<HashSet<_>>();
    let mut seen = HashSet::new();
    for item in &response.items {
        if !expected.contains(&item.index) {
            return Err(anyhow!("unexpected item index {} in response", item.index));
        }
        if !seen.insert(item.index) {
            return Err(anyhow!("duplicate item index {} in response", item.index));
        }
    }

    let mut translations = response
        .items
        .into_iter()
        .map(|item| (item.index, item.translated))
        .collect::<std::collections::HashMap<_, _>>();
    batch
        .iter()
        .map(|unit| {
            translations
                .remove(&unit.index)
                .ok_or_else(|| anyhow!("missing item index {} in response", unit.index))
        })
        .collect()
}

/// Models occasionally wrap output in a markdown fence despite instructions.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    match body.split_once('\n') {
        Some((lang, inner)) if !lang.contains('<') => inner.trim(),
        _ => body.trim(),
    }
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    items: Vec<TranslatedItem>,
}

#[derive(Debug, Deserialize)]
struct TranslatedItem {
    index: usize,
    translated: String,
}

fn language_context(source_lang: &str, target_lang: &str) -> TeraContext {
    let mut context = TeraContext::new();
    context.insert("source_lang", source_lang.trim());
    context.insert("target_lang", target_lang.trim());
    context
}

fn render(name: &str, template: &str, context: &TeraContext) -> Result<String> {
    let rendered = Tera::one_off(template, context, false)
        .with_context(|| format!("failed to render {}", name))?;
    Ok(rendered.trim_end().to_string())
}
