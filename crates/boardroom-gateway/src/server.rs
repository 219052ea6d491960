//! Gateway HTTP server: Axum-based streaming endpoints

use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, post};
use boardroom_core::{
    AdapterMode, Boardroom, BoardroomEvent, ChunkRelay, CompletionRequest, Framing, ProviderId,
    Round,
};
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use crate::protocol::{
    self, BoardroomRequest, ERR_INVALID_JSON, ERR_METHOD_NOT_ALLOWED, ERR_PROMPT_REQUIRED,
    HealthResponse, KeyAvailability, ProviderRequest, error_response,
};

/// Shared state for all requests
#[derive(Clone)]
pub struct GatewayState {
    pub boardroom: Arc<Boardroom>,
    pub start_time: std::time::Instant,
}

impl GatewayState {
    pub fn new(boardroom: Boardroom) -> Self {
        Self {
            boardroom: Arc::new(boardroom),
            start_time: std::time::Instant::now(),
        }
    }

    fn mode(&self) -> AdapterMode {
        self.boardroom.providers().get(ProviderId::Gpt).mode()
    }

    fn keys(&self) -> KeyAvailability {
        let providers = self.boardroom.providers();
        KeyAvailability {
            openai_key_available: providers.get(ProviderId::Gpt).has_upstream(),
            anthropic_key_available: providers.get(ProviderId::Claude).has_upstream(),
            gemini_key_available: providers.get(ProviderId::Gemini).has_upstream(),
        }
    }
}

/// The gateway server
pub struct GatewayServer {
    state: GatewayState,
    bind: SocketAddr,
}

impl GatewayServer {
    pub fn new(bind: SocketAddr, boardroom: Boardroom) -> Self {
        Self {
            state: GatewayState::new(boardroom),
            bind,
        }
    }

    pub fn bind(&self) -> SocketAddr {
        self.bind
    }

    /// Build the Axum router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/health", any(health_handler))
            .route(
                "/api/boardroom",
                post(boardroom_handler)
                    .options(preflight_handler)
                    .fallback(method_not_allowed),
            )
            .route(
                "/api/{provider}",
                post(provider_handler)
                    .options(preflight_handler)
                    .fallback(method_not_allowed),
            )
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Serve until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(self.bind).await?;
        info!("Gateway listening on {}", listener.local_addr()?);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Gateway stopped");
        Ok(())
    }

    /// Start the server in the background, returning a handle
    pub fn spawn(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}

// ── HTTP Handlers ──

async fn health_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    axum::Json(HealthResponse {
        status: "ok".to_string(),
        message: "AI Boardroom gateway is running".to_string(),
        mode: state.mode(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        environment: state.keys(),
    })
}

async fn preflight_handler() -> StatusCode {
    StatusCode::OK
}

async fn method_not_allowed() -> Response {
    error_response(StatusCode::METHOD_NOT_ALLOWED, ERR_METHOD_NOT_ALLOWED)
}

/// `POST /api/{provider}`: one adapter call streamed as NDJSON (or SSE)
async fn provider_handler(
    State(state): State<GatewayState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Ok(id) = name.parse::<ProviderId>() else {
        return error_response(StatusCode::NOT_FOUND, format!("Unknown provider: {}", name));
    };

    let req: ProviderRequest = match protocol::parse_body(&body) {
        Ok(req) => req,
        Err(e) => {
            debug!("Rejected {} body: {}", id, e);
            return error_response(StatusCode::BAD_REQUEST, ERR_INVALID_JSON);
        }
    };

    let Some(prompt) = protocol::required_prompt(req.prompt) else {
        return error_response(StatusCode::BAD_REQUEST, ERR_PROMPT_REQUIRED);
    };

    let adapter = state.boardroom.providers().get(id).clone();
    if adapter.mode().is_live() && !adapter.has_upstream() {
        warn!("{} request rejected: credential missing", id);
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("{} is not configured", id.credential_var()),
        );
    }

    let framing = if accepts_event_stream(&headers) {
        Framing::Sse
    } else {
        Framing::Ndjson
    };
    let round = req.round.unwrap_or(Round::Initial);
    let request = CompletionRequest::new(req.system_prompt.unwrap_or_default(), prompt, round);

    info!(
        "{} request: round={}, prompt={} chars, framing={:?}",
        id,
        round,
        request.prompt.len(),
        framing
    );

    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    tokio::spawn(async move {
        let mut relay = ChunkRelay::new(tx, framing);
        let result = adapter
            .generate(&request, &cancel, |increment| {
                relay.apply(increment);
                if relay.is_closed() {
                    cancel.cancel();
                }
            })
            .await;

        match result {
            Ok(generation) => debug!("{} stream finished ({})", id, generation.source),
            Err(e) => {
                debug!(
                    "{} stream aborted after {} bytes: {}",
                    id,
                    relay.content().len(),
                    e
                );
                relay.fail(&e.to_string());
            }
        }
    });

    let stream = Guarded::new(UnboundedReceiverStream::new(rx), guard)
        .map(Ok::<_, Infallible>);

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, framing.content_type()),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

/// `POST /api/boardroom`: the full two-round run as server-sent events
async fn boardroom_handler(State(state): State<GatewayState>, body: Bytes) -> Response {
    let req: BoardroomRequest = match protocol::parse_body(&body) {
        Ok(req) => req,
        Err(e) => {
            debug!("Rejected boardroom body: {}", e);
            return error_response(StatusCode::BAD_REQUEST, ERR_INVALID_JSON);
        }
    };

    let Some(prompt) = protocol::required_prompt(req.prompt) else {
        return error_response(StatusCode::BAD_REQUEST, ERR_PROMPT_REQUIRED);
    };

    info!("Boardroom request: prompt={} chars", prompt.len());

    let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let boardroom = state.boardroom.clone();

    tokio::spawn(async move {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<BoardroomEvent>();

        let run = async {
            let result = boardroom.run(&prompt, &cancel, &events_tx).await;
            drop(events_tx);
            result
        };

        let forward = async {
            while let Some(event) = events_rx.recv().await {
                let payload = match protocol::step_payload(&event) {
                    Some(Ok(payload)) => payload,
                    Some(Err(e)) => {
                        error!("Failed to serialize boardroom event: {}", e);
                        continue;
                    }
                    None => continue,
                };
                if out_tx.send(payload).is_err() {
                    cancel.cancel();
                }
            }
        };

        let (result, ()) = tokio::join!(run, forward);

        if let Err(e) = result {
            warn!("Boardroom run aborted: {}", e);
            match protocol::error_payload(&e.to_string()) {
                Ok(payload) => {
                    let _ = out_tx.send(payload);
                }
                Err(e) => error!("Failed to serialize boardroom error: {}", e),
            }
        }
    });

    let stream = Guarded::new(UnboundedReceiverStream::new(out_rx), guard)
        .map(|payload| Ok::<_, Infallible>(Event::default().data(payload)));

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/event-stream"))
}

/// Response body stream that cancels its request when dropped
struct Guarded<S> {
    inner: S,
    _guard: DropGuard,
}

impl<S> Guarded<S> {
    fn new(inner: S, guard: DropGuard) -> Self {
        Self {
            inner,
            _guard: guard,
        }
    }
}

impl<S: Stream + Unpin> Stream for Guarded<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_event_stream() {
        let mut headers = HeaderMap::new();
        assert!(!accepts_event_stream(&headers));
        headers.insert(header::ACCEPT, "application/json".parse().unwrap());
        assert!(!accepts_event_stream(&headers));
        headers.insert(header::ACCEPT, "text/event-stream".parse().unwrap());
        assert!(accepts_event_stream(&headers));
    }

    #[tokio::test]
    async fn test_guarded_stream_cancels_on_drop() {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let mut stream = Guarded::new(UnboundedReceiverStream::new(rx), cancel.clone().drop_guard());

        tx.send("a".into()).unwrap();
        assert_eq!(stream.next().await.as_deref(), Some("a"));
        assert!(!cancel.is_cancelled());

        drop(stream);
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn test_health_reports_offline_adapters() {
        let state = GatewayState::new(Boardroom::new(
            boardroom_core::ProviderSet::mock(std::time::Duration::ZERO),
            boardroom_core::ConcurrencyPolicy::Parallel,
        ));
        assert_eq!(state.mode(), AdapterMode::Mock);
        assert_eq!(
            state.keys(),
            KeyAvailability {
                openai_key_available: false,
                anthropic_key_available: false,
                gemini_key_available: false,
            }
        );
    }
}
