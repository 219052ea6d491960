use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::post;
use boardroom_core::providers::{AnthropicProvider, GoogleProvider, OpenAiProvider};
use boardroom_core::{
    AdapterMode, AdapterOptions, Boardroom, ConcurrencyPolicy, GatewayClient, LlmProvider,
    ProviderAdapter, ProviderCall, ProviderId, ProviderSet, Round, Source, StreamChunk, TurnLog,
};
use boardroom_gateway::GatewayServer;
use serde_json::{Value, json};
use tokio::net::TcpListener;

const SECRET: &str = "sk-very-secret-value";

async fn spawn(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn options(mode: AdapterMode, timeout: Duration) -> AdapterOptions {
    AdapterOptions {
        mode,
        timeout,
        mock_word_delay: Duration::ZERO,
    }
}

/// Real upstream clients pointed at `upstream_base`
fn live_providers(upstream_base: &str, options: AdapterOptions) -> ProviderSet {
    ProviderSet::from_fn(|id| {
        let key = SECRET.to_string();
        let base = upstream_base.to_string();
        let upstream: Arc<dyn LlmProvider> = match id {
            ProviderId::Gpt => Arc::new(OpenAiProvider::new(key, "gpt-4-turbo".into(), base, 1000)),
            ProviderId::Claude => Arc::new(AnthropicProvider::new(
                key,
                "claude-3-haiku-20240307".into(),
                base,
                1000,
            )),
            ProviderId::Gemini => {
                Arc::new(GoogleProvider::new(key, "gemini-1.5-pro".into(), base, 1000))
            }
        };
        ProviderAdapter::new(id, upstream, options)
    })
}

fn offline_providers(mode: AdapterMode) -> ProviderSet {
    ProviderSet::from_fn(|id| ProviderAdapter::offline(id, options(mode, Duration::from_secs(5))))
}

async fn spawn_gateway(providers: ProviderSet) -> String {
    let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = GatewayServer::new(bind, Boardroom::new(providers, ConcurrencyPolicy::Parallel));
    format!("{}/api", spawn(server.router()).await)
}

/// Upstream that fails every call with a 500
async fn spawn_failing_upstream() -> String {
    let router = Router::new().fallback(|| async {
        (StatusCode::INTERNAL_SERVER_ERROR, "upstream is down").into_response()
    });
    spawn(router).await
}

/// `data:` payloads of an SSE body
fn sse_payloads(body: &str) -> Vec<Value> {
    body.split("\n\n")
        .filter_map(|frame| frame.trim().strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).unwrap())
        .collect()
}

fn ndjson_chunks(body: &str) -> Vec<StreamChunk> {
    body.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[tokio::test]
async fn health_without_credentials_reports_false() {
    let api = spawn_gateway(offline_providers(AdapterMode::Stream)).await;

    let resp = reqwest::get(format!("{}/health", api)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(
        body["environment"],
        json!({
            "openai_key_available": false,
            "anthropic_key_available": false,
            "gemini_key_available": false,
        })
    );
}

#[tokio::test]
async fn health_never_echoes_credentials() {
    let upstream = spawn_failing_upstream().await;
    let api = spawn_gateway(live_providers(
        &upstream,
        options(AdapterMode::Stream, Duration::from_secs(5)),
    ))
    .await;

    let client = reqwest::Client::new();
    let text = client
        .post(format!("{}/health", api))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(!text.contains(SECRET));
    let body: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(body["environment"]["openai_key_available"], true);
    assert_eq!(body["mode"], "stream");
}

#[tokio::test]
async fn missing_prompt_is_rejected_everywhere() {
    let api = spawn_gateway(offline_providers(AdapterMode::Mock)).await;
    let client = reqwest::Client::new();

    for path in ["gpt", "claude", "gemini", "boardroom"] {
        for body in [json!({}), json!({"prompt": ""}), json!({"prompt": "   "})] {
            let resp = client
                .post(format!("{}/{}", api, path))
                .json(&body)
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{path}");
            assert_eq!(resp.text().await.unwrap(), r#"{"error":"Prompt is required"}"#);
        }

        let resp = client
            .post(format!("{}/{}", api, path))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{path} empty body");
        assert_eq!(resp.text().await.unwrap(), r#"{"error":"Prompt is required"}"#);
    }
}

#[tokio::test]
async fn malformed_requests_get_json_errors() {
    let api = spawn_gateway(offline_providers(AdapterMode::Mock)).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/gpt", api))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(resp.text().await.unwrap(), r#"{"error":"Invalid JSON body"}"#);

    let resp = client
        .post(format!("{}/mistral", api))
        .json(&json!({"prompt": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.text().await.unwrap(), r#"{"error":"Unknown provider: mistral"}"#);

    let resp = client.get(format!("{}/claude", api)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(resp.text().await.unwrap(), r#"{"error":"Method not allowed"}"#);
}

#[tokio::test]
async fn live_mode_without_credential_is_a_config_error() {
    let api = spawn_gateway(offline_providers(AdapterMode::Stream)).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/anthropic", api))
        .json(&json!({"prompt": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        resp.text().await.unwrap(),
        r#"{"error":"ANTHROPIC_API_KEY is not configured"}"#
    );
}

#[tokio::test]
async fn cors_headers_and_options() {
    let api = spawn_gateway(offline_providers(AdapterMode::Mock)).await;
    let client = reqwest::Client::new();

    let resp = client
        .request(reqwest::Method::OPTIONS, format!("{}/gpt", api))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = client
        .request(reqwest::Method::OPTIONS, format!("{}/boardroom", api))
        .header("Origin", "http://localhost:5173")
        .header("Access-Control-Request-Method", "POST")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("access-control-allow-origin"));

    let resp = client
        .get(format!("{}/health", api))
        .header("Origin", "http://localhost:5173")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");
}

#[tokio::test]
async fn provider_endpoint_streams_live_ndjson() {
    let sse = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"It is \"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Monday.\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    let upstream = spawn(Router::new().route(
        "/v1/chat/completions",
        post(move || async move { ([(header::CONTENT_TYPE, "text/event-stream")], sse) }),
    ))
    .await;
    let api = spawn_gateway(live_providers(
        &upstream,
        options(AdapterMode::Stream, Duration::from_secs(5)),
    ))
    .await;

    let resp = reqwest::Client::new()
        .post(format!("{}/gpt", api))
        .json(&json!({"prompt": "What day is it?", "systemPrompt": "Be brief."}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");

    let chunks = ndjson_chunks(&resp.text().await.unwrap());
    let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
    assert_eq!(contents, ["It is ", "It is Monday.", "It is Monday."]);
    assert_eq!(chunks.iter().filter(|c| c.done).count(), 1);
    assert_eq!(chunks.last().unwrap().source, Some(Source::Live));
}

#[tokio::test]
async fn provider_endpoint_uses_sse_framing_when_asked() {
    let api = spawn_gateway(offline_providers(AdapterMode::Mock)).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/gemini", api))
        .header("Accept", "text/event-stream")
        .json(&json!({"prompt": "hello", "round": 2}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/event-stream");

    let payloads = sse_payloads(&resp.text().await.unwrap());
    let last = payloads.last().unwrap();
    assert_eq!(last["done"], true);
    assert_eq!(last["source"], "fallback");
    assert!(last["content"].as_str().unwrap().contains("Round 2"));
}

#[tokio::test]
async fn upstream_failures_fall_back_per_provider() {
    let upstream = spawn_failing_upstream().await;
    let api = spawn_gateway(live_providers(
        &upstream,
        options(AdapterMode::Stream, Duration::from_secs(5)),
    ))
    .await;
    let client = GatewayClient::new(api, Duration::from_secs(10));

    let mut log = TurnLog::new();
    log.push_user("What day is it?");
    for round in [Round::Initial, Round::Refinement] {
        for provider in ProviderId::ALL {
            let turn = log.open_assistant(provider, round);
            let call = ProviderCall {
                prompt: "What day is it?",
                system_prompt: "",
                round: Some(round),
            };
            let mut applied = Vec::new();
            let terminal = client
                .stream_provider(provider, &call, |chunk| applied.push(chunk.clone()))
                .await
                .unwrap();
            for chunk in &applied {
                log.apply(&turn, chunk).unwrap();
            }
            assert_eq!(terminal.source, Some(Source::Fallback));
        }
    }

    let assistants: Vec<_> = log.turns().iter().filter(|t| t.producer_model.is_some()).collect();
    assert_eq!(assistants.len(), 6);
    for turn in assistants {
        assert!(!turn.pending);
        assert_eq!(turn.source, Some(Source::Fallback));
        assert!(turn.content.contains("What day is it?"), "{}", turn.content);
    }
}

#[tokio::test]
async fn slow_upstream_times_out_into_fallback() {
    let upstream = spawn(Router::new().fallback(|| async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        StatusCode::OK
    }))
    .await;
    let api = spawn_gateway(live_providers(
        &upstream,
        options(AdapterMode::Single, Duration::from_millis(200)),
    ))
    .await;

    let resp = reqwest::Client::new()
        .post(format!("{}/claude", api))
        .json(&json!({"prompt": "Are you there?"}))
        .send()
        .await
        .unwrap();
    let chunks = ndjson_chunks(&resp.text().await.unwrap());
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].done);
    assert_eq!(chunks[0].source, Some(Source::Fallback));
    assert!(chunks[0].content.contains("Are you there?"));
}

#[tokio::test]
async fn boardroom_with_failing_upstreams_completes_with_fallbacks() {
    let upstream = spawn_failing_upstream().await;
    let api = spawn_gateway(live_providers(
        &upstream,
        options(AdapterMode::Stream, Duration::from_secs(5)),
    ))
    .await;

    let resp = reqwest::Client::new()
        .post(format!("{}/boardroom", api))
        .json(&json!({"prompt": "What day is it?"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(
        resp.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let payloads = sse_payloads(&resp.text().await.unwrap());
    let steps: Vec<&str> = payloads.iter().map(|p| p["step"].as_str().unwrap()).collect();
    assert_eq!(
        steps,
        [
            "gpt4",
            "claude",
            "gemini",
            "gpt4-round2",
            "claude-round2",
            "gemini-round2",
            "complete"
        ]
    );

    for payload in &payloads[..6] {
        assert_eq!(payload["data"]["source"], "fallback");
        assert!(
            payload["data"]["content"]
                .as_str()
                .unwrap()
                .contains("What day is it?")
        );
    }
    let complete = &payloads[6]["data"];
    assert_eq!(complete.as_object().unwrap().len(), 6);
    assert_eq!(complete["gemini-round2"]["source"], "fallback");
}

#[tokio::test]
async fn gateway_provider_drives_a_local_boardroom() {
    let api = spawn_gateway(offline_providers(AdapterMode::Mock)).await;
    let client = Arc::new(GatewayClient::new(api, Duration::from_secs(10)));
    let health = client.health().await.unwrap();
    assert_eq!(health["mode"], "mock");

    let providers = ProviderSet::from_fn(|id| {
        ProviderAdapter::new(
            id,
            Arc::new(boardroom_core::GatewayProvider::new(client.clone(), id)),
            options(AdapterMode::Stream, Duration::from_secs(10)),
        )
    });
    let boardroom = Boardroom::new(providers, ConcurrencyPolicy::Sequential);
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let transcript = boardroom
        .run("hello", &tokio_util::sync::CancellationToken::new(), &tx)
        .await
        .unwrap();

    // The remote side only has canned text, so every step falls back locally.
    assert_eq!(transcript.fallback_count(), 6);
    assert!(transcript.results.iter().all(|r| r.text.contains("hello")));
}
