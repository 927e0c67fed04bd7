use anyhow::{Result, anyhow};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;

use crate::dispatch::TokenUsage;

mod claude;
mod openai;
pub(crate) mod retry;

pub use claude::Claude;
pub use openai::OpenAI;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAI,
    Claude,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::Claude => "claude",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderSelection {
    pub provider: ProviderKind,
    pub requested_model: Option<String>,
}

/// JSON schema the generated text must conform to.
#[derive(Debug, Clone)]
pub struct ResponseSchema {
    pub name: String,
    pub description: String,
    pub schema: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProviderUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

impl ProviderUsage {
    pub fn token_usage(&self) -> TokenUsage {
        TokenUsage::new(
            self.prompt_tokens.unwrap_or(0),
            self.completion_tokens.unwrap_or(0),
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderResponse {
    pub text: String,
    pub model: Option<String>,
    pub usage: Option<ProviderUsage>,
}

impl ProviderResponse {
    pub fn token_usage(&self) -> TokenUsage {
        self.usage
            .as_ref()
            .map(ProviderUsage::token_usage)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: String) -> Self {
        Self {
            role: MessageRole::System,
            content,
        }
    }

    pub fn user(content: String) -> Self {
        Self {
            role: MessageRole::User,
            content,
        }
    }
}

/// Sampling and transport knobs shared by every request a provider makes.
#[derive(Debug, Clone, Copy)]
pub struct RequestOptions {
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub rate_limit_retries: usize,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_output_tokens: 4096,
            rate_limit_retries: retry::RATE_LIMIT_MAX_RETRIES,
        }
    }
}

pub type ProviderFuture = Pin<Box<dyn Future<Output = Result<ProviderResponse>> + Send>>;

pub trait Provider: Clone + Send + Sync {
    fn append_system_input(self, input: String) -> Self;
    fn append_user_input(self, input: String) -> Self;
    fn with_temperature(self, temperature: f32) -> Self;
    fn with_max_output_tokens(self, max_output_tokens: u32) -> Self;
    fn with_response_schema(self, schema: ResponseSchema) -> Self;
    fn generate(self) -> ProviderFuture;
}

#[derive(Debug, Clone)]
pub enum ProviderImpl {
    OpenAI(OpenAI),
    Claude(Claude),
}

impl Provider for ProviderImpl {
    fn append_system_input(self, input: String) -> Self {
        match self {
            ProviderImpl::OpenAI(provider) => {
                ProviderImpl::OpenAI(provider.append_system_input(input))
            }
            ProviderImpl::Claude(provider) => {
                ProviderImpl::Claude(provider.append_system_input(input))
            }
        }
    }

    fn append_user_input(self, input: String) -> Self {
        match self {
            ProviderImpl::OpenAI(provider) => {
                ProviderImpl::OpenAI(provider.append_user_input(input))
            }
            ProviderImpl::Claude(provider) => {
                ProviderImpl::Claude(provider.append_user_input(input))
            }
        }
    }

    fn with_temperature(self, temperature: f32) -> Self {
        match self {
            ProviderImpl::OpenAI(provider) => {
                ProviderImpl::OpenAI(provider.with_temperature(temperature))
            }
            ProviderImpl::Claude(provider) => {
                ProviderImpl::Claude(provider.with_temperature(temperature))
            }
        }
    }

    fn with_max_output_tokens(self, max_output_tokens: u32) -> Self {
        match self {
            ProviderImpl::OpenAI(provider) => {
                ProviderImpl::OpenAI(provider.with_max_output_tokens(max_output_tokens))
            }
            ProviderImpl::Claude(provider) => {
                ProviderImpl::Claude(provider.with_max_output_tokens(max_output_tokens))
            }
        }
    }

    fn with_response_schema(self, schema: ResponseSchema) -> Self {
        match self {
            ProviderImpl::OpenAI(provider) => {
                ProviderImpl::OpenAI(provider.with_response_schema(schema))
            }
            ProviderImpl::Claude(provider) => {
                ProviderImpl::Claude(provider.with_response_schema(schema))
            }
        }
    }

    fn generate(self) -> ProviderFuture {
        match self {
            ProviderImpl::OpenAI(provider) => provider.generate(),
            ProviderImpl::Claude(provider) => provider.generate(),
        }
    }
}

pub fn build_provider(
    provider: ProviderKind,
    key: String,
    model: Option<String>,
    options: RequestOptions,
) -> ProviderImpl {
    match provider {
        ProviderKind::OpenAI => {
            let mut openai = OpenAI::new(key).with_options(options);
            if let Some(model) = model {
                openai = openai.with_model(model);
            }
            ProviderImpl::OpenAI(openai)
        }
        ProviderKind::Claude => {
            let mut claude = Claude::new(key).with_options(options);
            if let Some(model) = model {
                claude = claude.with_model(model);
            }
            ProviderImpl::Claude(claude)
        }
    }
}

pub fn resolve_provider_selection(
    model_arg: Option<&str>,
    override_key: Option<&str>,
) -> Result<ProviderSelection> {
    match model_arg {
        Some(model) => parse_model_arg(model),
        None => default_provider_selection(override_key),
    }
}

pub fn resolve_key(provider: ProviderKind, override_key: Option<&str>) -> Result<String> {
    if let Some(key) = override_key {
        return Ok(key.to_string());
    }

    match provider {
        ProviderKind::OpenAI => get_env("OPENAI_API_KEY"),
        ProviderKind::Claude => get_env("ANTHROPIC_API_KEY"),
    }
    .ok_or_else(|| anyhow!("API key not found for provider {}", provider.as_str()))
}

fn default_provider_selection(override_key: Option<&str>) -> Result<ProviderSelection> {
    if get_env("OPENAI_API_KEY").is_some() {
        return Ok(ProviderSelection {
            provider: ProviderKind::OpenAI,
            requested_model: None,
        });
    }

    if get_env("ANTHROPIC_API_KEY").is_some() {
        return Ok(ProviderSelection {
            provider: ProviderKind::Claude,
            requested_model: None,
        });
    }

    if override_key.is_some() {
        return Ok(ProviderSelection {
            provider: ProviderKind::OpenAI,
            requested_model: None,
        });
    }

    Err(anyhow!(
        "no API keys found (checked OPENAI_API_KEY, ANTHROPIC_API_KEY)"
    ))
}

fn parse_model_arg(model_arg: &str) -> Result<ProviderSelection> {
    let raw = model_arg.trim();
    if raw.is_empty() {
        return Err(anyhow!("model argument is empty"));
    }

    let lower = raw.to_lowercase();
    if let Some(provider) = provider_from_name(&lower) {
        return Ok(ProviderSelection {
            provider,
            requested_model: None,
        });
    }

    if let Some((provider, model)) = parse_provider_model_pair(raw) {
        return Ok(ProviderSelection {
            provider,
            requested_model: model,
        });
    }

    Err(anyhow!(
        "unable to infer provider from model '{}'. Use provider:model (openai:, claude:)",
        raw
    ))
}

fn parse_provider_model_pair(input: &str) -> Option<(ProviderKind, Option<String>)> {
    let (provider_part, model_part) = input.split_once(':')?;
    let provider = provider_from_name(&provider_part.to_lowercase())?;
    let model = if model_part.trim().is_empty() {
        None
    } else {
        Some(model_part.trim().to_string())
    };
    Some((provider, model))
}

fn provider_from_name(name: &str) -> Option<ProviderKind> {
    match name {
        "openai" => Some(ProviderKind::OpenAI),
        "claude" | "anthropic" => Some(ProviderKind::Claude),
        _ => None,
    }
}

fn get_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

pub(crate) fn format_error_parts(
    message: Option<String>,
    kind: Option<String>,
    code: Option<String>,
) -> String {
    let mut parts = Vec::new();
    if let Some(message) = message
        && !message.trim().is_empty()
    {
        parts.push(message);
    }
    if let Some(kind) = kind
        && !kind.trim().is_empty()
    {
        parts.push(format!("type: {}", kind));
    }
    if let Some(code) = code
        && !code.trim().is_empty()
    {
        parts.push(format!("code: {}", code));
    }
    if parts.is_empty() {
        "unknown error".to_string()
    } else {
        parts.join(" | ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_model_pairs() {
        let selection = parse_model_arg("openai:gpt-4.1-nano").unwrap();
        assert_eq!(selection.provider, ProviderKind::OpenAI);
        assert_eq!(selection.requested_model.as_deref(), Some("gpt-4.1-nano"));

        let selection = parse_model_arg("Anthropic").unwrap();
        assert_eq!(selection.provider, ProviderKind::Claude);
        assert!(selection.requested_model.is_none());

        let selection = parse_model_arg("claude:").unwrap();
        assert!(selection.requested_model.is_none());
    }

    #[test]
    fn rejects_unknown_providers() {
        assert!(parse_model_arg("gemini:flash").is_err());
        assert!(parse_model_arg("   ").is_err());
    }

    #[test]
    fn override_key_wins() {
        let key = resolve_key(ProviderKind::Claude, Some("sk-test")).unwrap();
        assert_eq!(key, "sk-test");
    }

    #[test]
    fn missing_usage_counts_as_zero() {
        let response = ProviderResponse {
            text: "ok".to_string(),
            model: None,
            usage: Some(ProviderUsage {
                prompt_tokens: Some(12),
                completion_tokens: None,
                total_tokens: None,
            }),
        };
        assert_eq!(response.token_usage(), TokenUsage::new(12, 0));
    }

    #[test]
    fn formats_error_parts() {
        assert_eq!(
            format_error_parts(Some("slow down".into()), Some("rate_limit".into()), None),
            "slow down | type: rate_limit"
        );
        assert_eq!(format_error_parts(None, Some(" ".into()), None), "unknown error");
    }
}
