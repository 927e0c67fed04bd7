use std::sync::Arc;

use anyhow::{Result, anyhow};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::cancel::Cancellation;
use crate::cost::CostEstimate;
use crate::dispatch::{DispatchOptions, TokenUsage, UnitFailure, UnitOutput, dispatch};
use crate::document::{self, KeyPolicy, TextUnit, split_text_bounds};
use crate::error::{ContentKind, TranslateError};
use crate::providers::{Provider, ProviderResponse, ResponseSchema};
use crate::segmenter::segment_owned;
use crate::settings::Settings;
use crate::translations::{self, Prompt};

#[derive(Debug, Clone)]
pub struct Translator<P: Provider> {
    provider: P,
    settings: Settings,
    policy: KeyPolicy,
}

/// Translated text plus what it cost. `units` counts HTML chunks or document
/// text units.
#[derive(Debug, Clone, Serialize)]
pub struct TranslationOutput {
    pub text: String,
    pub usage: TokenUsage,
    pub units: usize,
}

#[derive(Debug, Clone)]
pub struct DocumentTranslation {
    pub document: Value,
    pub usage: TokenUsage,
    pub units: usize,
}

impl<P: Provider + 'static> Translator<P> {
    pub fn new(provider: P, settings: Settings) -> Self {
        let policy = settings.key_policy();
        Self {
            provider,
            settings,
            policy,
        }
    }

    pub fn with_policy(mut self, policy: KeyPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn estimate_cost(&self, usage: TokenUsage) -> CostEstimate {
        self.settings.pricing.estimate_usage(usage)
    }

    /// Splits `html` at structural boundaries, translates every chunk and
    /// joins the translations in chunk order.
    pub async fn translate_html(
        &self,
        html: &str,
        source_lang: &str,
        target_lang: &str,
        cancel: &Cancellation,
    ) -> Result<TranslationOutput, TranslateError> {
        if html.trim().is_empty() {
            return Ok(TranslationOutput {
                text: html.to_string(),
                usage: TokenUsage::default(),
                units: 0,
            });
        }

        let chunks = segment_owned(html, self.settings.max_chunk_size);
        let chunk_count = chunks.len();
        info!(
            "translating HTML {} -> {} ({} bytes, {} chunks)",
            source_lang,
            target_lang,
            html.len(),
            chunk_count
        );

        let options = self.dispatch_options(self.settings.max_chunk_count);
        let cancel = self.deadline(cancel);
        let job = self.job(source_lang, target_lang);
        let dispatched = dispatch(chunks, &options, &cancel, |_, chunk| {
            let job = job.clone();
            async move { job.translate_chunk(chunk).await }
        })
        .await
        .map_err(|err| {
            TranslateError::from_dispatch(ContentKind::Html, self.settings.max_chunk_size, err)
        })?;

        info!(
            "translated {} chunks using {} tokens",
            chunk_count,
            dispatched.usage.total()
        );
        Ok(TranslationOutput {
            text: dispatched.results.concat(),
            usage: dispatched.usage,
            units: chunk_count,
        })
    }

    /// Translates every translatable string of a rich-text document. The
    /// input is never modified; on any failure no translation is applied.
    pub async fn translate_document(
        &self,
        source: &Value,
        source_lang: &str,
        target_lang: &str,
        cancel: &Cancellation,
    ) -> Result<DocumentTranslation, TranslateError> {
        let units = document::collect(source, &self.policy);
        if units.is_empty() {
            return Ok(DocumentTranslation {
                document: source.clone(),
                usage: TokenUsage::default(),
                units: 0,
            });
        }

        let batch_size = self.settings.batch_size;
        let groups = document::batches(&units, batch_size);
        info!(
            "translating document {} -> {} ({} text units, {} batches)",
            source_lang,
            target_lang,
            units.len(),
            groups.len()
        );

        let options = self.dispatch_options(self.settings.max_batch_count);
        let cancel = self.deadline(cancel);
        let job = self.job(source_lang, target_lang);
        let dispatched = dispatch(groups, &options, &cancel, |_, batch| {
            let job = job.clone();
            async move { job.translate_batch(batch).await }
        })
        .await
        .map_err(|err| TranslateError::from_dispatch(ContentKind::Document, batch_size, err))?;

        let translations = dispatched
            .results
            .into_iter()
            .flatten()
            .zip(&units)
            .map(|(translated, unit)| restore_whitespace(&unit.original, &translated))
            .collect::<Vec<_>>();
        if translations.len() != units.len() {
            return Err(TranslateError::Other(anyhow!(
                "expected {} translations, got {}",
                units.len(),
                translations.len()
            )));
        }

        let mut translated = source.clone();
        document::patch(
            &mut translated,
            units
                .iter()
                .zip(&translations)
                .map(|(unit, text)| (unit.path.as_slice(), text.as_str())),
        )?;

        info!(
            "translated {} text units using {} tokens",
            units.len(),
            dispatched.usage.total()
        );
        Ok(DocumentTranslation {
            document: translated,
            usage: dispatched.usage,
            units: units.len(),
        })
    }

    /// String form of [`Translator::translate_document`]. Returns pretty JSON,
    /// or the input untouched when it has nothing to translate.
    pub async fn translate_document_str(
        &self,
        json: &str,
        source_lang: &str,
        target_lang: &str,
        cancel: &Cancellation,
    ) -> Result<TranslationOutput, TranslateError> {
        let source: Value = serde_json::from_str(json).map_err(TranslateError::InvalidDocument)?;
        let translated = self
            .translate_document(&source, source_lang, target_lang, cancel)
            .await?;
        if translated.units == 0 {
            return Ok(TranslationOutput {
                text: json.to_string(),
                usage: translated.usage,
                units: 0,
            });
        }
        let text = serde_json::to_string_pretty(&translated.document)
            .map_err(|err| TranslateError::Other(err.into()))?;
        Ok(TranslationOutput {
            text,
            usage: translated.usage,
            units: translated.units,
        })
    }

    fn job(&self, source_lang: &str, target_lang: &str) -> Arc<UnitJob<P>> {
        Arc::new(UnitJob {
            provider: self.provider.clone(),
            temperature: self.settings.temperature,
            max_output_tokens: self.settings.max_output_tokens,
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
        })
    }

    fn dispatch_options(&self, max_units: usize) -> DispatchOptions {
        DispatchOptions {
            concurrency: self.settings.concurrency,
            max_units,
        }
    }

    fn deadline(&self, cancel: &Cancellation) -> Cancellation {
        match self.settings.request_timeout {
            Some(timeout) => cancel.clone().with_timeout(timeout),
            None => cancel.clone(),
        }
    }
}

/// Owned state every unit task of one translation call shares.
struct UnitJob<P> {
    provider: P,
    temperature: f32,
    max_output_tokens: u32,
    source_lang: String,
    target_lang: String,
}

impl<P: Provider + 'static> UnitJob<P> {
    async fn translate_chunk(&self, chunk: String) -> Result<UnitOutput<String>, UnitFailure> {
        if chunk.trim().is_empty() {
            return Ok(UnitOutput::new(chunk, TokenUsage::default()));
        }
        let (leading, core, trailing) = split_text_bounds(&chunk).unwrap_or(("", &chunk, ""));
        let prompt =
            translations::render_html_prompt(&self.source_lang, &self.target_lang, core)?;
        let response = self.generate(prompt, None).await?;
        let usage = response.token_usage();
        let text = translations::strip_code_fence(&response.text);
        if text.is_empty() {
            return Err(UnitFailure::new(anyhow!("empty translation"), usage));
        }
        Ok(UnitOutput::new(
            format!("{}{}{}", leading, text, trailing),
            usage,
        ))
    }

    async fn translate_batch(
        &self,
        batch: Vec<TextUnit>,
    ) -> Result<UnitOutput<Vec<String>>, UnitFailure> {
        let trimmed = batch
            .iter()
            .map(|unit| TextUnit {
                index: unit.index,
                path: unit.path.clone(),
                original: split_text_bounds(&unit.original)
                    .map(|(_, core, _)| core.to_string())
                    .unwrap_or_else(|| unit.original.clone()),
            })
            .collect::<Vec<_>>();
        let prompt =
            translations::render_document_prompt(&self.source_lang, &self.target_lang, &trimmed)?;
        let response = self
            .generate(prompt, Some(translations::document_response_schema()))
            .await?;
        let usage = response.token_usage();
        let translated = translations::parse_document_response(&response.text, &trimmed)
            .map_err(|err| UnitFailure::new(err, usage))?;
        Ok(UnitOutput::new(translated, usage))
    }

    async fn generate(
        &self,
        prompt: Prompt,
        schema: Option<ResponseSchema>,
    ) -> Result<ProviderResponse> {
        let mut provider = self
            .provider
            .clone()
            .with_temperature(self.temperature)
            .with_max_output_tokens(self.max_output_tokens)
            .append_system_input(prompt.system)
            .append_user_input(prompt.user);
        if let Some(schema) = schema {
            provider = provider.with_response_schema(schema);
        }
        provider.generate().await
    }
}

fn restore_whitespace(original: &str, translated: &str) -> String {
    match split_text_bounds(original) {
        Some((leading, _, trailing)) => format!("{}{}{}", leading, translated.trim(), trailing),
        None => translated.to_string(),
    }
}
