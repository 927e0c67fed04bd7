use axum::http::StatusCode;
use serde_json::Value;

use super::models::{DocumentRequest, HtmlRequest, TranslateResponse, Translated};
use super::state::ServerState;
use crate::TranslationOutput;
use crate::cancel::Cancellation;
use crate::error::TranslateError;

#[derive(Debug)]
pub(crate) struct ServerError {
    pub(crate) status: StatusCode,
    pub(crate) message: String,
}

impl ServerError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        ServerError::internal(format!("{:#}", err))
    }
}

impl From<TranslateError> for ServerError {
    fn from(err: TranslateError) -> Self {
        let status = match &err {
            TranslateError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            TranslateError::InvalidDocument(_) => StatusCode::BAD_REQUEST,
            TranslateError::Cancelled { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

pub(crate) async fn translate_html_request(
    state: &ServerState,
    request: HtmlRequest,
) -> Result<TranslateResponse, ServerError> {
    let html = request
        .html
        .ok_or_else(|| ServerError::bad_request("html is required"))?;
    let (source_lang, target_lang) = languages(request.source_lang, request.target_lang)?;
    let translator = crate::build_translator(
        state.settings.clone(),
        request.model.as_deref().or(state.model.as_deref()),
        state.key.as_deref(),
    )?;

    let output = translator
        .translate_html(&html, &source_lang, &target_lang, &Cancellation::never())
        .await?;
    let TranslationOutput { text, usage, units } = output;
    Ok(TranslateResponse::new(
        Translated::Html(text),
        source_lang,
        target_lang,
        units,
        usage,
        translator.estimate_cost(usage),
    ))
}

pub(crate) async fn translate_document_request(
    state: &ServerState,
    request: DocumentRequest,
) -> Result<TranslateResponse, ServerError> {
    let document = match request.document {
        None | Some(Value::Null) => return Err(ServerError::bad_request("document is required")),
        Some(Value::String(raw)) => serde_json::from_str(&raw)
            .map_err(|err| ServerError::bad_request(format!("invalid JSON document: {}", err)))?,
        Some(document) => document,
    };
    let (source_lang, target_lang) = languages(request.source_lang, request.target_lang)?;
    let translator = crate::build_translator(
        state.settings.clone(),
        request.model.as_deref().or(state.model.as_deref()),
        state.key.as_deref(),
    )?;

    let output = translator
        .translate_document(&document, &source_lang, &target_lang, &Cancellation::never())
        .await?;
    Ok(TranslateResponse::new(
        Translated::Document(output.document),
        source_lang,
        target_lang,
        output.units,
        output.usage,
        translator.estimate_cost(output.usage),
    ))
}

fn languages(
    source_lang: Option<String>,
    target_lang: Option<String>,
) -> Result<(String, String), ServerError> {
    let target_lang = target_lang
        .map(|lang| lang.trim().to_string())
        .filter(|lang| !lang.is_empty())
        .ok_or_else(|| ServerError::bad_request("targetLang is required"))?;
    let source_lang = source_lang
        .map(|lang| lang.trim().to_string())
        .filter(|lang| !lang.is_empty())
        .ok_or_else(|| ServerError::bad_request("sourceLang is required"))?;
    Ok((source_lang, target_lang))
}
