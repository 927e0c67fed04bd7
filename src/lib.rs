use anyhow::{Context, Result, anyhow};
use std::path::Path;

pub mod cancel;
pub mod cost;
pub mod dispatch;
pub mod document;
pub mod error;
pub mod logging;
pub mod providers;
pub mod segmenter;
pub mod server;
pub mod settings;
mod test_util;
pub mod translations;
mod translator;

pub use cancel::{CancelHandle, Cancellation, Cancelled};
pub use cost::{CostEstimate, Pricing};
pub use dispatch::TokenUsage;
pub use document::{KeyPolicy, TextUnit};
pub use error::{ContentKind, TranslateError};
pub use providers::{Claude, OpenAI, Provider, ProviderImpl, ProviderKind};
pub use translator::{DocumentTranslation, TranslationOutput, Translator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputFormat {
    #[default]
    Html,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub format: InputFormat,
    pub lang: String,
    pub source_lang: String,
    pub model: Option<String>,
    pub key: Option<String>,
    pub settings_path: Option<String>,
    pub with_using_tokens: bool,
    pub with_cost: bool,
}

pub async fn run(config: Config, input: String, cancel: &Cancellation) -> Result<String> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let settings = settings::load_settings(settings_path)?;

    if input.trim().is_empty() {
        return Err(anyhow!("input is empty"));
    }
    let lang = config.lang.trim();
    if lang.is_empty() {
        return Err(anyhow!("target language is empty"));
    }
    let source_lang = config.source_lang.trim();
    if source_lang.is_empty() {
        return Err(anyhow!("source language is empty"));
    }

    let translator = build_translator(settings, config.model.as_deref(), config.key.as_deref())?;
    let output = match config.format {
        InputFormat::Html => {
            translator
                .translate_html(&input, source_lang, lang, cancel)
                .await?
        }
        InputFormat::Json => {
            translator
                .translate_document_str(&input, source_lang, lang, cancel)
                .await?
        }
    };

    Ok(format_output(
        &output,
        &translator.settings().pricing,
        config.with_using_tokens,
        config.with_cost,
    ))
}

/// Builds a translator for `model_arg` (`provider:model` or a bare provider),
/// falling back to the configured model and then to whichever provider has a
/// key in the environment.
pub fn build_translator(
    settings: settings::Settings,
    model_arg: Option<&str>,
    key: Option<&str>,
) -> Result<Translator<ProviderImpl>> {
    let selection = match model_arg {
        Some(model) => providers::resolve_provider_selection(Some(model), key)?,
        None => {
            let configured = providers::resolve_provider_selection(Some(&settings.model), key)?;
            if providers::resolve_key(configured.provider, key).is_ok() {
                configured
            } else {
                providers::resolve_provider_selection(None, key)?
            }
        }
    };
    let key = providers::resolve_key(selection.provider, key)
        .with_context(|| "no API key found for selected provider")?;
    let options = providers::RequestOptions {
        temperature: settings.temperature,
        max_output_tokens: settings.max_output_tokens,
        rate_limit_retries: settings.rate_limit_retries,
    };
    let provider =
        providers::build_provider(selection.provider, key, selection.requested_model, options);
    Ok(Translator::new(provider, settings))
}

fn format_output(
    output: &TranslationOutput,
    pricing: &Pricing,
    with_using_tokens: bool,
    with_cost: bool,
) -> String {
    let mut text = output.text.clone();
    let mut meta_lines = Vec::new();

    if with_using_tokens {
        meta_lines.push(format_usage(output.usage));
    }
    if with_cost {
        meta_lines.push(format_cost(&pricing.estimate_usage(output.usage)));
    }

    if !meta_lines.is_empty() {
        text.push('\n');
        text.push_str(&meta_lines.join("\n"));
    }
    text
}

fn format_usage(usage: TokenUsage) -> String {
    format!(
        "tokens: prompt={}, completion={}, total={}",
        usage.prompt_tokens,
        usage.completion_tokens,
        usage.total()
    )
}

fn format_cost(cost: &CostEstimate) -> String {
    format!(
        "cost: ${:.6} (input ${:.6}, output ${:.6})",
        cost.total_cost, cost.input_cost, cost.output_cost
    )
}
