use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::json;

use super::retry::{RATE_LIMIT_BASE_DELAY, is_rate_limited, retry_after, wait_with_backoff};
use super::{
    Message, MessageRole, Provider, ProviderFuture, ProviderResponse, ProviderUsage,
    RequestOptions, ResponseSchema, format_error_parts,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1/messages";
pub(crate) const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";

#[derive(Debug, Clone)]
pub struct Claude {
    key: String,
    model: String,
    messages: Vec<Message>,
    options: RequestOptions,
    schema: Option<ResponseSchema>,
}

impl Claude {
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
        let (system_inputs, user_inputs): (Vec<&Message>, Vec<&Message>) = self
            .messages
            .iter()
            .partition(|message| matches!(message.role, MessageRole::System));

        let system = system_inputs
            .into_iter()
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let messages = user_inputs
            .into_iter()
            .map(|message| {
                json!({
                    "role": "user",
                    "content": [{"type": "text", "text": message.content}]
                })
            })
            .collect::<Vec<_>>();

        let mut body = json!({
            "model": self.model,
            "max_tokens": self.options.max_output_tokens,
            "temperature": self.options.temperature,
            "messages": messages,
        });
        if !system.trim().is_empty() {
            body["system"] = json!(system);
        }
        // structured output is a single forced tool call
        if let Some(schema) = &self.schema {
            body["tools"] = json!([
                {
                    "name": schema.name,
                    "description": schema.description,
                    "input_schema": schema.schema
                }
            ]);
            body["tool_choice"] = json!({"type": "tool", "name": schema.name});
        }
        body
    }
}

impl Provider for Claude {
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
        Box::pin(async move {
            let client = reqwest::Client::new();
            let url = base_url();
            let body = self.request_body();
            let tool_name = self.schema.as_ref().map(|schema| schema.name.clone());
            let max_retries = self.options.rate_limit_retries;

            let mut attempt = 0usize;
            let mut delay = RATE_LIMIT_BASE_DELAY;
            loop {
                attempt += 1;
                let response = client
                    .post(&url)
                    .header("x-api-key", self.key.clone())
                    .header("anthropic-version", "2023-06-01")
                    .json(&body)
                    .send()
                    .await
                    .with_context(|| "failed to reach Claude")?;

                let status = response.status();
                let retry_after = retry_after(response.headers());
                let text = response.text().await.unwrap_or_default();
                if status.is_success() {
                    return extract_response(&text, tool_name.as_deref(), &self.model);
                }
                if is_rate_limited(status, &text) && attempt <= max_retries {
                    delay =
                        wait_with_backoff("Claude", attempt, max_retries, delay, retry_after).await;
                    continue;
                }
                return Err(anyhow!(
                    "Claude API error ({}): {}",
                    status,
                    extract_claude_error(&text).unwrap_or(text)
                ));
            }
        })
    }
}

fn base_url() -> String {
    std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
}

/// With a tool name the forced tool input is returned as JSON text,
/// otherwise the text blocks are joined.
fn extract_response(
    text: &str,
    tool_name: Option<&str>,
    fallback_model: &str,
) -> Result<ProviderResponse> {
    let payload: ClaudeResponse =
        serde_json::from_str(text).with_context(|| "failed to parse Claude response JSON")?;

    let generated = match tool_name {
        Some(tool_name) => {
            let input = payload
                .content
                .iter()
                .find(|block| block.kind == "tool_use" && block.name.as_deref() == Some(tool_name))
                .and_then(|block| block.input.as_ref())
                .ok_or_else(|| anyhow!("no tool call returned from Claude"))?;
            serde_json::to_string(input).with_context(|| "failed to encode Claude tool input")?
        }
        None => payload
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join(""),
    };
    let generated = generated.trim();
    if generated.is_empty() {
        return Err(anyhow!("empty response from Claude"));
    }

    let model = payload
        .model
        .filter(|value| !value.trim().is_empty())
        .or_else(|| Some(fallback_model.to_string()));
    let usage = payload.usage.map(|usage| ProviderUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage
            .input_tokens
            .zip(usage.output_tokens)
            .map(|(input, output)| input + output),
    });
    Ok(ProviderResponse {
        text: generated.to_string(),
        model,
        usage,
    })
}

fn extract_claude_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<ClaudeError>,
    }

    #[derive(Deserialize)]
    struct ClaudeError {
        #[serde(rename = "type")]
        kind: Option<String>,
        message: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    Some(format_error_parts(error.message, error.kind, None))
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    #[serde(default)]
    content: Vec<ClaudeContent>,
    model: Option<String>,
    usage: Option<ClaudeUsage>,
}

#[derive(Debug, Deserialize)]
struct ClaudeUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ClaudeContent {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
    name: Option<String>,
    input: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_text_blocks() {
        let payload = r#"{
            "model": "claude-3-5-haiku-20241022",
            "content": [
                {"type": "text", "text": "<h1>Bonjour</h1>"},
                {"type": "text", "text": "<p>monde</p>"}
            ],
            "usage": {"input_tokens": 40, "output_tokens": 9}
        }"#;
        let response = extract_response(payload, None, DEFAULT_MODEL).unwrap();
        assert_eq!(response.text, "<h1>Bonjour</h1><p>monde</p>");
        assert_eq!(response.usage.unwrap().total_tokens, Some(49));
    }

    #[test]
    fn returns_tool_input_as_json_text() {
        let payload = r#"{
            "content": [
                {"type": "text", "text": "Here you go"},
                {"type": "tool_use", "name": "TextItemTranslation",
                 "input": {"items": [{"index": 0, "translated": "Hallo"}]}}
            ]
        }"#;
        let response =
            extract_response(payload, Some("TextItemTranslation"), DEFAULT_MODEL).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&response.text).unwrap();
        assert_eq!(parsed["items"][0]["translated"], "Hallo");
        assert_eq!(response.model.as_deref(), Some(DEFAULT_MODEL));
    }

    #[test]
    fn missing_tool_call_is_an_error() {
        let payload = r#"{"content": [{"type": "text", "text": "sorry"}]}"#;
        let err = extract_response(payload, Some("TextItemTranslation"), DEFAULT_MODEL)
            .unwrap_err();
        assert!(err.to_string().contains("no tool call"));
    }

    #[test]
    fn structured_requests_force_the_tool() {
        let body = Claude::new("key")
            .append_system_input("be precise".to_string())
            .append_user_input("translate".to_string())
            .with_max_output_tokens(2048)
            .with_response_schema(ResponseSchema {
                name: "TextItemTranslation".to_string(),
                description: "items".to_string(),
                schema: json!({"type": "object"}),
            })
            .request_body();
        assert_eq!(body["system"], "be precise");
        assert_eq!(body["max_tokens"], 2048);
        assert_eq!(body["messages"][0]["content"][0]["text"], "translate");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(body["tool_choice"]["name"], "TextItemTranslation");
    }

    #[test]
    fn formats_api_errors() {
        let body = r#"{"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}"#;
        assert_eq!(
            extract_claude_error(body).unwrap(),
            "Overloaded | type: overloaded_error"
        );
    }
}
