use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tracing::info;

use super::models::{DocumentRequest, ErrorResponse, HtmlRequest, TranslateResponse};
use super::state::ServerState;
use super::translate::{ServerError, translate_document_request, translate_html_request};
use crate::settings;

type HandlerError = (StatusCode, Json<ErrorResponse>);

pub async fn run_server(
    settings: settings::Settings,
    addr: String,
    model: Option<String>,
    key: Option<String>,
) -> Result<()> {
    let state = Arc::new(ServerState {
        settings,
        model,
        key,
    });
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind server address {}", addr))?;
    info!("listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/translate/html", post(translate_html))
        .route("/translate/json", post(translate_json))
        .with_state(state)
        .layer(axum::middleware::from_fn(cors_middleware))
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn cors_middleware(req: Request<Body>, next: Next) -> Result<Response<Body>, StatusCode> {
    if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return Ok(response);
    }
    let mut response = next.run(req).await;
    apply_cors_headers(response.headers_mut());
    Ok(response)
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("content-type,authorization"),
    );
}

async fn translate_html(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<HtmlRequest>,
) -> Result<Json<TranslateResponse>, HandlerError> {
    translate_html_request(state.as_ref(), payload)
        .await
        .map(Json)
        .map_err(into_handler_error)
}

async fn translate_json(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<DocumentRequest>,
) -> Result<Json<TranslateResponse>, HandlerError> {
    translate_document_request(state.as_ref(), payload)
        .await
        .map(Json)
        .map_err(into_handler_error)
}

fn into_handler_error(err: ServerError) -> HandlerError {
    (err.status, Json(ErrorResponse { error: err.message }))
}
