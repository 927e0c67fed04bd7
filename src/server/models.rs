use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cost::CostEstimate;
use crate::dispatch::TokenUsage;

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct HtmlRequest {
    pub(crate) html: Option<String>,
    #[serde(alias = "sourceLanguage")]
    pub(crate) source_lang: Option<String>,
    #[serde(alias = "targetLanguage")]
    pub(crate) target_lang: Option<String>,
    pub(crate) model: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct DocumentRequest {
    /// Either a JSON object or a string holding one.
    #[serde(alias = "tiptapJSON")]
    pub(crate) document: Option<Value>,
    #[serde(alias = "sourceLanguage")]
    pub(crate) source_lang: Option<String>,
    #[serde(alias = "targetLanguage")]
    pub(crate) target_lang: Option<String>,
    pub(crate) model: Option<String>,
}

#[derive(Debug, PartialEq, Serialize)]
pub(crate) enum Translated {
    #[serde(rename = "translatedHTML")]
    Html(String),
    #[serde(rename = "translatedJSON")]
    Document(Value),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TranslateResponse {
    #[serde(flatten)]
    pub(crate) translated: Translated,
    pub(crate) source_language: String,
    pub(crate) target_language: String,
    pub(crate) units: usize,
    pub(crate) tokens_used: u64,
    pub(crate) usage: TokenUsage,
    pub(crate) cost: CostEstimate,
}

impl TranslateResponse {
    pub(crate) fn new(
        translated: Translated,
        source_language: String,
        target_language: String,
        units: usize,
        usage: TokenUsage,
        cost: CostEstimate,
    ) -> Self {
        Self {
            translated,
            source_language,
            target_language,
            units,
            tokens_used: usage.total(),
            usage,
            cost,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
}
