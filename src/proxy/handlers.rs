//! HTTP request handlers.

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::executor;
use super::fanout::spawn_fan_out;
use super::relay::{spawn_relay, ChunkFactory, RelayPlan};
use super::server::AppState;
use super::summary;
use super::types::{ChatCompletionRequest, Message};
use crate::error::{Error, Result};
use crate::router::vision::sanitize_messages;
use crate::router::Combination;

/// Response header: correlation ID (UUID v4).
pub const REQUEST_ID_HEADER: &str = "x-synthgate-request-id";
/// Response header: combination that handled the request.
pub const COMBINATION_HEADER: &str = "x-synthgate-combination";

/// Token from an `Authorization: Bearer <token>` header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Attach synthgate metadata headers to a response.
fn attach_synthgate_headers(response: &mut Response, request_id: &str, combination: &str) {
    let headers = response.headers_mut();

    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    if let Ok(value) = HeaderValue::from_str(combination) {
        headers.insert(HeaderName::from_static(COMBINATION_HEADER), value);
    }
}

/// Check the bearer token against the combination's token, or the global one.
fn authenticate(headers: &HeaderMap, combination: &Combination) -> Result<()> {
    let token = bearer_token(headers)
        .ok_or_else(|| Error::Unauthorized("missing bearer token".to_string()))?;
    if !combination.authorizes(token) {
        return Err(Error::Unauthorized("invalid bearer token".to_string()));
    }
    Ok(())
}

/// Handle POST /v1/chat/completions
pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: std::result::Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Response {
    let request_id = Uuid::new_v4().to_string();

    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return reject_body(&state, &headers, rejection, &request_id),
    };
    let combination = state.registry.combination(request.model.as_deref());

    tracing::info!(
        request_id = %request_id,
        combination = %combination.name,
        stream = request.is_streaming(),
        messages = request.messages.len(),
        "Received chat completion request"
    );

    let mut response = match execute_request(&state, combination, &headers, request, &request_id)
        .await
    {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(
                request_id = %request_id,
                combination = %combination.name,
                status = e.status_code().as_u16(),
                error = %e,
                "Request failed"
            );
            e.into_response()
        }
    };

    attach_synthgate_headers(&mut response, &request_id, &combination.name);
    response
}

/// Answer a body that could not be read or parsed.
///
/// The model name is unknown here, so the token is checked against the
/// default combination before the body error is reported.
fn reject_body(
    state: &AppState,
    headers: &HeaderMap,
    rejection: JsonRejection,
    request_id: &str,
) -> Response {
    let combination = state.registry.default_combination();
    let error = match authenticate(headers, combination) {
        Ok(()) => Error::from(rejection),
        Err(e) => e,
    };

    tracing::warn!(
        request_id = %request_id,
        status = error.status_code().as_u16(),
        error = %error,
        "Rejected request body"
    );

    let mut response = error.into_response();
    attach_synthgate_headers(&mut response, request_id, &combination.name);
    response
}

/// Authenticate, select the branch, then run fan-out and the summarizer.
async fn execute_request(
    state: &AppState,
    combination: &Combination,
    headers: &HeaderMap,
    request: ChatCompletionRequest,
    request_id: &str,
) -> Result<Response> {
    authenticate(headers, combination)?;

    if request.messages.is_empty() {
        return Err(Error::BadRequest("messages must not be empty".to_string()));
    }

    let is_streaming = request.is_streaming();
    let selection = combination.select(&request.messages)?;
    let messages: Arc<[Message]> =
        Arc::from(sanitize_messages(request.messages, selection.is_vision));

    let flags = selection.flags();
    tracing::info!(
        request_id = %request_id,
        combination = %combination.name,
        vision = selection.is_vision,
        parallel = flags.use_parallel_analysis,
        models = selection.models.len(),
        summary_model = %selection.summary_model.model_name,
        "Selected combination branch"
    );

    let fan_out = flags.use_parallel_analysis.then(|| {
        spawn_fan_out(
            &state.http_client,
            selection.models,
            messages.clone(),
            flags.debug_mode,
        )
    });

    if is_streaming {
        let plan = RelayPlan {
            client: state.http_client.clone(),
            fan_out,
            messages,
            summary_model: selection.summary_model.clone(),
            status_feedback: flags.use_parallel_analysis && flags.stream_status_feedback,
            debug: flags.debug_mode,
            chunks: ChunkFactory::new(combination.name.clone()),
            request_id: request_id.to_string(),
        };

        return Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Body::from_stream(spawn_relay(plan)))
            .map_err(|e| Error::Internal(e.to_string()));
    }

    let input = match fan_out {
        Some(fan_out) => {
            let results = fan_out.collect().await;
            tracing::info!(
                request_id = %request_id,
                succeeded = results.iter().filter(|r| r.is_success()).count(),
                total = results.len(),
                "Fan-out complete"
            );
            summary::build_parallel_input(&results, &messages, selection.summary_model)
        }
        None => summary::build_direct_input(&messages, selection.summary_model),
    };

    let body = executor::complete(
        &state.http_client,
        selection.summary_model,
        &input,
        flags.debug_mode,
    )
    .await
    .map_err(|e| {
        tracing::error!(
            request_id = %request_id,
            model = %selection.summary_model.model_name,
            error = %e,
            "Summary model failed"
        );
        Error::Summary(e.to_string())
    })?;

    // Passed through verbatim, but only if it is JSON at all.
    if let Err(e) = serde_json::from_str::<serde_json::Value>(&body) {
        return Err(Error::Summary(format!(
            "invalid JSON from '{}': {}",
            selection.summary_model.model_name, e
        )));
    }

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .map_err(|e| Error::Internal(e.to_string()))
}

/// Handle GET /v1/models - one entry per combination
pub async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    let models: Vec<serde_json::Value> = state
        .registry
        .combinations()
        .iter()
        .map(|combination| {
            serde_json::json!({
                "id": combination.name,
                "object": "model",
                "owned_by": "synthgate",
            })
        })
        .collect();

    Json(serde_json::json!({
        "object": "list",
        "data": models
    }))
}

/// Handle GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "synthgate"
    }))
}
