//! End-to-end tests for POST /v1/chat/completions.
//!
//! Verifies that:
//! - Missing or wrong bearer tokens yield 401 with zero backend calls
//! - An unsatisfiable combination yields 400 with zero backend calls
//! - Reference answers are numbered and the summarizer body is passed through
//! - A timed-out model is dropped from the references without failing the request
//! - All backends failing still reaches the summarizer
//! - Direct mode forwards the full history and skips fan-out
//! - Image content routes to the vision branch
//! - Large inline images fit under the body cap; larger bodies get a JSON 413
//! - Malformed or unknown content blocks do not reject the request
//! - Unreadable bodies get a JSON error, and 401 comes first without a token
//! - Streaming responses open, report status, and end with one [DONE]
//! - Summarizer failure maps to 500 (JSON) or an inline error frame (stream)
//!
//! Backends are wiremock servers; the gateway is driven through
//! `tower::ServiceExt::oneshot`.

use std::time::Duration;

use axum::body::Body;
use http::Request;
use tower::ServiceExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use synthgate::config::Config;
use synthgate::proxy::{create_router, AppState};

const GATEWAY_TOKEN: &str = "gateway-token";

const SUMMARY_BODY: &str = r#"{"id":"chatcmpl-summary","object":"chat.completion","choices":[{"index":0,"message":{"role":"assistant","content":"final answer"},"finish_reason":"stop"}]}"#;

const SUMMARY_SSE: &str = concat!(
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"final\"}}]}\n\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\" answer\"}}]}\n\n",
    "data: [DONE]\n\n",
);

/// Three combinations against one mock server:
/// `parallel` (two text models, one vision model, status feedback on),
/// `direct` (no fan-out, keep_history on), and `text-only` (no vision models).
fn gateway_config(uri: &str) -> String {
    format!(
        r#"
default_combination = "parallel"
api_bearer_token = "{GATEWAY_TOKEN}"

[[combinations]]
name = "parallel"
use_parallel_analysis = true
stream_status_feedback = true

[[combinations.text_models]]
endpoint = "{uri}/alpha"
bearer_token = "alpha-key"
model_name = "alpha"
max_retries = 1
timeout = 5

[[combinations.text_models]]
endpoint = "{uri}/beta"
bearer_token = "beta-key"
model_name = "beta"
max_retries = 1
timeout = 5

[[combinations.vision_models]]
endpoint = "{uri}/seer"
bearer_token = "seer-key"
model_name = "seer"
max_retries = 1
timeout = 5

[combinations.text_summary_model]
endpoint = "{uri}/summary"
bearer_token = "summary-key"
model_name = "synth"
summary_prompt = "Combine the reference answers."

[combinations.vision_summary_model]
endpoint = "{uri}/vision-summary"
bearer_token = "summary-key"
model_name = "vision-synth"
summary_prompt = "Describe the image using the references."

[[combinations]]
name = "direct"
use_parallel_analysis = false

[combinations.text_summary_model]
endpoint = "{uri}/direct-summary"
bearer_token = "summary-key"
model_name = "direct-synth"
keep_history = true

[[combinations]]
name = "text-only"
use_parallel_analysis = true

[[combinations.text_models]]
endpoint = "{uri}/alpha"
bearer_token = "alpha-key"
model_name = "alpha"
max_retries = 1

[combinations.text_summary_model]
endpoint = "{uri}/summary"
bearer_token = "summary-key"
model_name = "synth"
"#
    )
}

fn app_for(config: &str) -> axum::Router {
    let config = Config::parse_str(config).expect("valid config");
    create_router(AppState::from_config(&config).expect("app state"))
}

fn completion(text: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{"index": 0, "message": {"role": "assistant", "content": text}}]
    })
}

fn chat_request(token: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn raw_chat_request(
    token: Option<&str>,
    content_type: Option<&str>,
    body: &str,
) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri("/v1/chat/completions");
    if let Some(content_type) = content_type {
        builder = builder.header("content-type", content_type);
    }
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// A user message carrying an inline PNG of roughly `bytes` base64 characters.
fn inline_image_message(bytes: usize) -> serde_json::Value {
    let payload = "A".repeat(bytes / 4 * 4);
    serde_json::json!({
        "role": "user",
        "content": [
            {"type": "text", "text": "what is this?"},
            {"type": "image_url", "image_url": {"url": format!("data:image/png;base64,{}", payload)}}
        ]
    })
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 4 * 1_048_576)
        .await
        .expect("read body");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

/// Mount a backend at `route` answering with `template`, expecting `calls` hits.
async fn mount(server: &MockServer, route: &str, template: ResponseTemplate, calls: u64) {
    Mock::given(method("POST"))
        .and(path(route))
        .respond_with(template)
        .expect(calls)
        .mount(server)
        .await;
}

/// The JSON body the summarizer (mounted at `route`) received.
async fn summary_request(server: &MockServer, route: &str) -> serde_json::Value {
    let requests = server.received_requests().await.expect("recording enabled");
    let request = requests
        .iter()
        .find(|r| r.url.path() == route)
        .expect("summarizer was called");
    serde_json::from_slice(&request.body).expect("json body")
}

fn conversation() -> serde_json::Value {
    serde_json::json!([
        {"role": "system", "content": "be brief"},
        {"role": "user", "content": "first question"},
        {"role": "assistant", "content": "first answer"},
        {"role": "user", "content": "what is rust?"}
    ])
}

#[tokio::test]
async fn test_missing_token_is_401_without_backend_calls() {
    let server = MockServer::start().await;
    mount(&server, "/alpha", ResponseTemplate::new(200), 0).await;
    mount(&server, "/beta", ResponseTemplate::new(200), 0).await;
    mount(&server, "/summary", ResponseTemplate::new(200), 0).await;

    let app = app_for(&gateway_config(&server.uri()));
    let body = serde_json::json!({"messages": conversation()});

    let response = app
        .clone()
        .oneshot(chat_request(None, body.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert!(response.headers().contains_key("x-synthgate-request-id"));
    let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["error"]["code"], 401);

    let response = app
        .oneshot(chat_request(Some("wrong-token"), body))
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_combination_token_overrides_global() {
    let server = MockServer::start().await;
    mount(&server, "/direct-summary", ResponseTemplate::new(200), 0).await;

    let config = gateway_config(&server.uri()).replace(
        "name = \"direct\"\n",
        "name = \"direct\"\napi_bearer_token = \"direct-only\"\n",
    );
    let app = app_for(&config);

    let response = app
        .oneshot(chat_request(
            Some(GATEWAY_TOKEN),
            serde_json::json!({"model": "direct", "messages": conversation()}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_vision_request_without_vision_models_is_400() {
    let server = MockServer::start().await;
    mount(&server, "/alpha", ResponseTemplate::new(200), 0).await;
    mount(&server, "/summary", ResponseTemplate::new(200), 0).await;

    let app = app_for(&gateway_config(&server.uri()));
    let response = app
        .oneshot(chat_request(
            Some(GATEWAY_TOKEN),
            serde_json::json!({
                "model": "text-only",
                "messages": [{
                    "role": "user",
                    "content": [
                        {"type": "text", "text": "what is this?"},
                        {"type": "image_url", "image_url": {"url": "https://example.com/cat.png"}}
                    ]
                }]
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let text = body_text(response).await;
    assert!(text.contains("text-only"), "{}", text);
}

#[tokio::test]
async fn test_empty_messages_is_400() {
    let server = MockServer::start().await;
    mount(&server, "/summary", ResponseTemplate::new(200), 0).await;

    let app = app_for(&gateway_config(&server.uri()));
    let response = app
        .oneshot(chat_request(
            Some(GATEWAY_TOKEN),
            serde_json::json!({"messages": []}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_two_successes_build_numbered_references() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/alpha"))
        .and(header("authorization", "Bearer alpha-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("alpha says")))
        .expect(1)
        .mount(&server)
        .await;
    // Delayed so arrival order, and therefore numbering, is deterministic.
    mount(
        &server,
        "/beta",
        ResponseTemplate::new(200)
            .set_body_json(completion("beta says"))
            .set_delay(Duration::from_millis(300)),
        1,
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/summary"))
        .and(header("authorization", "Bearer summary-key"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SUMMARY_BODY))
        .expect(1)
        .mount(&server)
        .await;

    let app = app_for(&gateway_config(&server.uri()));
    let response = app
        .oneshot(chat_request(
            Some(GATEWAY_TOKEN),
            serde_json::json!({"messages": conversation()}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("x-synthgate-combination").unwrap(),
        "parallel"
    );
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );
    assert_eq!(body_text(response).await, SUMMARY_BODY);

    let sent = summary_request(&server, "/summary").await;
    assert_eq!(sent["model"], "synth");
    assert_eq!(sent["stream"], false);
    assert_eq!(
        sent["messages"],
        serde_json::json!([
            {"role": "assistant", "content": "参考回答1: alpha says\n\n参考回答2: beta says"},
            {"role": "user", "content": "Combine the reference answers."},
            {"role": "user", "content": "what is rust?"}
        ])
    );
}

#[tokio::test]
async fn test_timed_out_model_is_dropped() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/alpha",
        ResponseTemplate::new(200).set_body_json(completion("alpha says")),
        1,
    )
    .await;
    // Two attempts, each cut off by the one-second timeout.
    mount(
        &server,
        "/beta",
        ResponseTemplate::new(200)
            .set_body_json(completion("too late"))
            .set_delay(Duration::from_secs(3)),
        2,
    )
    .await;
    mount(
        &server,
        "/summary",
        ResponseTemplate::new(200).set_body_string(SUMMARY_BODY),
        1,
    )
    .await;

    let config = gateway_config(&server.uri()).replace(
        "model_name = \"beta\"\nmax_retries = 1\ntimeout = 5",
        "model_name = \"beta\"\nmax_retries = 2\ntimeout = 1",
    );
    let app = app_for(&config);
    let response = app
        .oneshot(chat_request(
            Some(GATEWAY_TOKEN),
            serde_json::json!({"messages": conversation()}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let sent = summary_request(&server, "/summary").await;
    let references = sent["messages"][0]["content"].as_str().unwrap();
    assert_eq!(references, "参考回答1: alpha says");
    assert!(!references.contains("参考回答2"));
}

#[tokio::test]
async fn test_all_backends_failing_still_summarizes() {
    let server = MockServer::start().await;
    mount(&server, "/alpha", ResponseTemplate::new(500), 1).await;
    mount(
        &server,
        "/beta",
        ResponseTemplate::new(200).set_body_string("not json"),
        1,
    )
    .await;
    mount(
        &server,
        "/summary",
        ResponseTemplate::new(200).set_body_string(SUMMARY_BODY),
        1,
    )
    .await;

    let app = app_for(&gateway_config(&server.uri()));
    let response = app
        .oneshot(chat_request(
            Some(GATEWAY_TOKEN),
            serde_json::json!({"messages": conversation()}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let sent = summary_request(&server, "/summary").await;
    assert_eq!(
        sent["messages"],
        serde_json::json!([
            {"role": "user", "content": "Combine the reference answers."},
            {"role": "user", "content": "what is rust?"}
        ])
    );
}

#[tokio::test]
async fn test_direct_mode_forwards_history_without_fan_out() {
    let server = MockServer::start().await;
    mount(&server, "/alpha", ResponseTemplate::new(200), 0).await;
    mount(&server, "/beta", ResponseTemplate::new(200), 0).await;
    mount(
        &server,
        "/direct-summary",
        ResponseTemplate::new(200).set_body_string(SUMMARY_BODY),
        1,
    )
    .await;

    let app = app_for(&gateway_config(&server.uri()));
    let response = app
        .oneshot(chat_request(
            Some(GATEWAY_TOKEN),
            serde_json::json!({"model": "direct", "messages": conversation()}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("x-synthgate-combination").unwrap(),
        "direct"
    );
    let sent = summary_request(&server, "/direct-summary").await;
    assert_eq!(sent["model"], "direct-synth");
    assert_eq!(sent["messages"], conversation());
}

#[tokio::test]
async fn test_unknown_combination_falls_back_to_default() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/alpha",
        ResponseTemplate::new(200).set_body_json(completion("a")),
        1,
    )
    .await;
    mount(
        &server,
        "/beta",
        ResponseTemplate::new(200).set_body_json(completion("b")),
        1,
    )
    .await;
    mount(
        &server,
        "/summary",
        ResponseTemplate::new(200).set_body_string(SUMMARY_BODY),
        1,
    )
    .await;

    let app = app_for(&gateway_config(&server.uri()));
    let response = app
        .oneshot(chat_request(
            Some(GATEWAY_TOKEN),
            serde_json::json!({"model": "gpt-4o", "messages": conversation()}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("x-synthgate-combination").unwrap(),
        "parallel"
    );
}

#[tokio::test]
async fn test_image_content_routes_to_vision_branch() {
    let server = MockServer::start().await;
    mount(&server, "/alpha", ResponseTemplate::new(200), 0).await;
    mount(&server, "/beta", ResponseTemplate::new(200), 0).await;
    mount(&server, "/summary", ResponseTemplate::new(200), 0).await;
    mount(
        &server,
        "/seer",
        ResponseTemplate::new(200).set_body_json(completion("a cat")),
        1,
    )
    .await;
    mount(
        &server,
        "/vision-summary",
        ResponseTemplate::new(200).set_body_string(SUMMARY_BODY),
        1,
    )
    .await;

    let app = app_for(&gateway_config(&server.uri()));
    let response = app
        .oneshot(chat_request(
            Some(GATEWAY_TOKEN),
            serde_json::json!({
                "messages": [{
                    "role": "user",
                    "content": [
                        {"type": "text", "text": "what is this?"},
                        {"type": "image_url", "image_url": {"url": "https://example.com/cat.png"}},
                        {"type": "image_url", "image_url": {"url": "data:image/bmp;base64,AAAA"}}
                    ]
                }]
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let sent = summary_request(&server, "/vision-summary").await;
    assert_eq!(sent["model"], "vision-synth");
    assert_eq!(
        sent["messages"][0],
        serde_json::json!({"role": "assistant", "content": "参考回答1: a cat"})
    );
    // Unsupported image dropped, the valid one gets a default detail.
    assert_eq!(
        sent["messages"][2]["content"],
        serde_json::json!([
            {"type": "text", "text": "what is this?"},
            {"type": "image_url", "image_url": {"url": "https://example.com/cat.png", "detail": "auto"}}
        ])
    );
}

#[tokio::test]
async fn test_large_inline_image_is_accepted() {
    let server = MockServer::start().await;
    mount(&server, "/alpha", ResponseTemplate::new(200), 0).await;
    mount(&server, "/beta", ResponseTemplate::new(200), 0).await;
    mount(
        &server,
        "/seer",
        ResponseTemplate::new(200).set_body_json(completion("a big cat")),
        1,
    )
    .await;
    mount(
        &server,
        "/vision-summary",
        ResponseTemplate::new(200).set_body_string(SUMMARY_BODY),
        1,
    )
    .await;

    let app = app_for(&gateway_config(&server.uri()));
    let response = app
        .oneshot(chat_request(
            Some(GATEWAY_TOKEN),
            serde_json::json!({"messages": [inline_image_message(3 * 1024 * 1024)]}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(body_text(response).await, SUMMARY_BODY);
}

#[tokio::test]
async fn test_body_over_configured_limit_is_413() {
    let server = MockServer::start().await;
    mount(&server, "/seer", ResponseTemplate::new(200), 0).await;
    mount(&server, "/vision-summary", ResponseTemplate::new(200), 0).await;

    let config = gateway_config(&server.uri()).replacen(
        "[[combinations]]",
        "[server]\nmax_body_mb = 1\n\n[[combinations]]",
        1,
    );
    let response = app_for(&config)
        .oneshot(chat_request(
            Some(GATEWAY_TOKEN),
            serde_json::json!({"messages": [inline_image_message(2 * 1024 * 1024)]}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), 413);
    assert!(response.headers().contains_key("x-synthgate-request-id"));
    let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["error"]["code"], 413);
    assert_eq!(json["error"]["type"], "synthgate_error");
}

#[tokio::test]
async fn test_malformed_content_blocks_fall_back_to_text_branch() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/alpha",
        ResponseTemplate::new(200).set_body_json(completion("alpha says")),
        1,
    )
    .await;
    mount(
        &server,
        "/beta",
        ResponseTemplate::new(200).set_body_json(completion("beta says")),
        1,
    )
    .await;
    mount(&server, "/seer", ResponseTemplate::new(200), 0).await;
    mount(
        &server,
        "/summary",
        ResponseTemplate::new(200).set_body_string(SUMMARY_BODY),
        1,
    )
    .await;

    let app = app_for(&gateway_config(&server.uri()));
    let response = app
        .oneshot(chat_request(
            Some(GATEWAY_TOKEN),
            serde_json::json!({
                "messages": [{
                    "role": "user",
                    "content": [
                        {"type": "text", "text": "what is this?"},
                        {"type": "image_url", "image_url": {"detail": "high"}},
                        {"type": "image_url", "image_url": "not-a-url"},
                        {"type": "input_audio", "input_audio": {"data": "AAAA", "format": "wav"}}
                    ]
                }]
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let sent = summary_request(&server, "/summary").await;
    let last = sent["messages"].as_array().unwrap().last().unwrap().clone();
    let blocks = last["content"].as_array().unwrap();
    assert_eq!(blocks.len(), 3);
    assert!(blocks.iter().all(|b| b["type"] != "input_audio"));
    assert_eq!(blocks[2]["image_url"]["url"], "not-a-url");
}

#[tokio::test]
async fn test_unreadable_body_checks_token_first() {
    let server = MockServer::start().await;
    mount(&server, "/alpha", ResponseTemplate::new(200), 0).await;
    mount(&server, "/summary", ResponseTemplate::new(200), 0).await;

    let app = app_for(&gateway_config(&server.uri()));

    let response = app
        .clone()
        .oneshot(raw_chat_request(None, Some("application/json"), "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(response.headers()["x-synthgate-combination"], "parallel");
    let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["error"]["code"], 401);

    let cases: [(Option<&str>, &str, u16); 3] = [
        (Some("application/json"), "{}", 422),
        (Some("application/json"), "{not json", 400),
        (None, r#"{"messages":[]}"#, 415),
    ];
    for (content_type, body, status) in cases {
        let response = app
            .clone()
            .oneshot(raw_chat_request(Some(GATEWAY_TOKEN), content_type, body))
            .await
            .unwrap();
        assert_eq!(response.status(), status, "{}", body);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["error"]["code"], status, "{}", body);
        assert!(json["error"]["message"]
            .as_str()
            .unwrap()
            .starts_with("Invalid request body"));
    }
}

#[tokio::test]
async fn test_summary_failure_is_500() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/alpha",
        ResponseTemplate::new(200).set_body_json(completion("a")),
        1,
    )
    .await;
    mount(
        &server,
        "/beta",
        ResponseTemplate::new(200).set_body_json(completion("b")),
        1,
    )
    .await;
    mount(
        &server,
        "/summary",
        ResponseTemplate::new(503).set_body_string("overloaded"),
        1,
    )
    .await;

    let app = app_for(&gateway_config(&server.uri()));
    let response = app
        .oneshot(chat_request(
            Some(GATEWAY_TOKEN),
            serde_json::json!({"messages": conversation()}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), 500);
    let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    let message = json["error"]["message"].as_str().unwrap();
    assert!(message.starts_with("Summary generation failed"), "{}", message);
    assert!(message.contains("503"), "{}", message);
}

/// `data:` payloads of a streamed body, in order.
fn stream_payloads(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter_map(|frame| frame.strip_prefix("data: "))
        .map(str::to_string)
        .collect()
}

fn delta_content(payload: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    value["choices"][0]["delta"]["content"]
        .as_str()
        .map(str::to_string)
}

#[tokio::test]
async fn test_streaming_frame_sequence() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/alpha",
        ResponseTemplate::new(200).set_body_json(completion("a")),
        1,
    )
    .await;
    mount(&server, "/beta", ResponseTemplate::new(500), 1).await;
    mount(
        &server,
        "/summary",
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/event-stream")
            .set_body_string(SUMMARY_SSE),
        1,
    )
    .await;

    let app = app_for(&gateway_config(&server.uri()));
    let response = app
        .oneshot(chat_request(
            Some(GATEWAY_TOKEN),
            serde_json::json!({"stream": true, "messages": conversation()}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    assert_eq!(response.headers().get("cache-control").unwrap(), "no-cache");

    let body = body_text(response).await;
    let payloads = stream_payloads(&body);

    assert_eq!(delta_content(&payloads[0]).as_deref(), Some(" "));
    let mut statuses = vec![
        delta_content(&payloads[1]).unwrap(),
        delta_content(&payloads[2]).unwrap(),
    ];
    statuses.sort();
    assert_eq!(statuses, vec!["alpha ✅\n", "beta ❌\n"]);
    assert_eq!(delta_content(&payloads[3]).as_deref(), Some("final"));
    assert_eq!(delta_content(&payloads[4]).as_deref(), Some(" answer"));
    assert!(payloads[5].contains("\"finish_reason\":\"stop\""));
    assert_eq!(payloads[6], "[DONE]");
    assert_eq!(payloads.len(), 7);
    assert!(body.ends_with("data: [DONE]\n\n"));

    let sent = summary_request(&server, "/summary").await;
    assert_eq!(sent["stream"], true);
    assert_eq!(sent["messages"][0]["content"], "参考回答1: a");
}

#[tokio::test]
async fn test_streaming_summary_failure_is_inline() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/direct-summary",
        ResponseTemplate::new(502).set_body_string("upstream down"),
        1,
    )
    .await;

    let app = app_for(&gateway_config(&server.uri()));
    let response = app
        .oneshot(chat_request(
            Some(GATEWAY_TOKEN),
            serde_json::json!({"model": "direct", "stream": true, "messages": conversation()}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body = body_text(response).await;
    let payloads = stream_payloads(&body);

    assert_eq!(payloads.len(), 3);
    assert_eq!(delta_content(&payloads[0]).as_deref(), Some(" "));
    let error = delta_content(&payloads[1]).unwrap();
    assert!(
        error.starts_with("Error: Summary generation failed - "),
        "{}",
        error
    );
    assert_eq!(payloads[2], "[DONE]");
    assert_eq!(body.matches("[DONE]").count(), 1);
}
