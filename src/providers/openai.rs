use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::json;

use super::retry::{RATE_LIMIT_BASE_DELAY, is_rate_limited, retry_after, wait_with_backoff};
use super::{
    Message, MessageRole, Provider, ProviderFuture, ProviderResponse, ProviderUsage,
    RequestOptions, ResponseSchema, format_error_parts,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub(crate) const DEFAULT_MODEL: &str = "gpt-4.1-nano";

#[derive(Debug, Clone)]
pub struct OpenAI {
    key: String,
    model: String,
    messages: Vec<Message>,
    options: RequestOptions,
    schema: Option<ResponseSchema>,
}

impl OpenAI {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
            messages: Vec::new(),
            options: RequestOptions::default(),
            schema: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    fn request_body(&self) -> serde_json::Value {
        let messages = self
            .messages
            .iter()
            .map(|message| {
                let role = match message.role {
                    MessageRole::System => "system",
                    MessageRole::User => "user",
                };
                json!({"role": role, "content": message.content})
            })
            .collect::<Vec<_>>();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.options.temperature,
            "max_completion_tokens": self.options.max_output_tokens,
        });
        if let Some(schema) = &self.schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "description": schema.description,
                    "schema": schema.schema,
                    "strict": true
                }
            });
        }
        body
    }
}

impl Provider for OpenAI {
    fn append_system_input(mut self, input: String) -> Self {
        self.messages.push(Message::system(input));
        self
    }

    fn append_user_input(mut self, input: String) -> Self {
        self.messages.push(Message::user(input));
        self
    }

    fn with_temperature(mut self, temperature: f32) -> Self {
        self.options.temperature = temperature;
        self
    }

    fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.options.max_output_tokens = max_output_tokens;
        self
    }

    fn with_response_schema(mut self, schema: ResponseSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    fn generate(self) -> ProviderFuture {
        Box::pin(async move { call_with_chat_completions(self).await })
    }
}

fn base_url() -> String {
    std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
}

async fn call_with_chat_completions(provider: OpenAI) -> Result<ProviderResponse> {
    let client = reqwest::Client::new();
    let url = format!("{}/chat/completions", base_url());
    let body = provider.request_body();
    let max_retries = provider.options.rate_limit_retries;

    let mut attempt = 0usize;
    let mut delay = RATE_LIMIT_BASE_DELAY;
    loop {
        attempt += 1;
        let response = client
            .post(&url)
            .bearer_auth(provider.key.clone())
            .json(&body)
            .send()
            .await
            .with_context(|| "failed to reach OpenAI")?;

        let status = response.status();
        let retry_after = retry_after(response.headers());
        let text = response.text().await.unwrap_or_default();
        if status.is_success() {
            return extract_completion(&text, &provider.model);
        }
        if is_rate_limited(status, &text) && attempt <= max_retries {
            delay = wait_with_backoff("OpenAI", attempt, max_retries, delay, retry_after).await;
            continue;
        }
        return Err(anyhow!(
            "OpenAI API error ({}): {}",
            status,
            extract_openai_error(&text).unwrap_or(text)
        ));
    }
}

fn extract_completion(text: &str, fallback_model: &str) -> Result<ProviderResponse> {
    let payload: OpenAIResponse =
        serde_json::from_str(text).with_context(|| "failed to parse OpenAI response JSON")?;
    let message = payload
        .choices
        .first()
        .map(|choice| &choice.message)
        .ok_or_else(|| anyhow!("empty response from OpenAI"))?;

    if let Some(refusal) = message.refusal.as_deref()
        && !refusal.trim().is_empty()
    {
        return Err(anyhow!("OpenAI refused the request: {}", refusal));
    }
    let content = message
        .content
        .as_deref()
        .map(str::trim)
        .filter(|content| !content.is_empty())
        .ok_or_else(|| anyhow!("empty response from OpenAI"))?;

    let model = payload
        .model
        .filter(|value| !value.trim().is_empty())
        .or_else(|| Some(fallback_model.to_string()));
    let usage = payload.usage.map(|usage| ProviderUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    });
    Ok(ProviderResponse {
        text: content.to_string(),
        model,
        usage,
    })
}

fn extract_openai_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<OpenAIError>,
    }

    #[derive(Deserialize)]
    struct OpenAIError {
        message: Option<String>,
        #[serde(rename = "type")]
        kind: Option<String>,
        code: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    Some(format_error_parts(error.message, error.kind, error.code))
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    content: Option<String>,
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}
