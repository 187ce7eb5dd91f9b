//! Request dispatch: mock or proxy.
//!
//! Every inbound request is answered from a single config snapshot taken up
//! front, so a config change mid-request can never tear a decision. Each
//! dispatch decision is logged before it executes; the outcome is attached
//! to the entry once the exchange completes.

use crate::config::GatewayConfig;
use crate::mock;
use crate::proxy;
use crate::recording::{LogEntry, RequestInfo, ResponseInfo, ResponseRecorder};
use crate::response::{text_response, ChannelSink, GatewayBody, SinkError};
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, warn};

use super::GatewayCore;

/// Route eligible for mock dispatch; everything else is always proxied.
pub const MOCK_ROUTE: &str = "/chat/completions";

/// Header carrying the function-name selector.
pub const FUNCTION_HEADER: &str = "FunctionName";

/// Entry point for every inbound request.
pub async fn handle_request(
    core: Arc<GatewayCore>,
    req: Request<Incoming>,
) -> Result<Response<GatewayBody>, Infallible> {
    let config = core.config.snapshot();

    if config.mock_enabled && req.uri().path() == MOCK_ROUTE {
        let function = req
            .headers()
            .get(FUNCTION_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if config.mock_allows(&function) {
            return Ok(serve_mock(&core, &config, &function, &req));
        }

        core.log.append(LogEntry::new(
            format!("Not mocking function: {function}"),
            request_info(&req),
            "",
        ));
    }

    Ok(serve_proxy(&core, &config, req).await)
}

/// Stream the canned response instead of contacting the backend.
fn serve_mock(
    core: &Arc<GatewayCore>,
    config: &GatewayConfig,
    function: &str,
    req: &Request<Incoming>,
) -> Response<GatewayBody> {
    let entry = core.log.append(LogEntry::new(
        format!("Mocking function: {function}"),
        request_info(req),
        format!(
            "Thinking: {}\nContent: {}\nRawMode: {}",
            config.mock_thinking, config.mock_content, config.raw_mode
        ),
    ));

    let (sink, body) = ChannelSink::new(16);
    let mut recorder = ResponseRecorder::new(sink);

    let mut response = Response::new(body.boxed());
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    let log_headers: Vec<(String, String)> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or("").to_string(),
            )
        })
        .collect();

    let thinking = config.mock_thinking.clone();
    let content = config.mock_content.clone();
    let raw_mode = config.raw_mode;

    tokio::spawn(async move {
        match mock::emit_stream(
            &mut recorder,
            &thinking,
            &content,
            raw_mode,
            mock::CHUNK_INTERVAL,
        )
        .await
        {
            Ok(()) => {}
            Err(SinkError::Disconnected) => {
                debug!("client disconnected during mock stream");
            }
            Err(e) => {
                warn!("mock stream aborted: {e}");
            }
        }
        let status = recorder.status();
        let body = recorder.into_body();
        entry.complete(ResponseInfo {
            status,
            headers: log_headers,
            body,
        });
    });

    response
}

/// Hand the request to the reverse proxy adapter, or answer 502 when no
/// backend is configured.
async fn serve_proxy(
    core: &Arc<GatewayCore>,
    config: &GatewayConfig,
    req: Request<Incoming>,
) -> Response<GatewayBody> {
    if config.backend_url.is_empty() {
        let entry = core.log.append(LogEntry::new(
            "Proxy URL is not set",
            request_info(&req),
            "",
        ));
        entry.complete(ResponseInfo {
            status: StatusCode::BAD_GATEWAY,
            headers: Vec::new(),
            body: Bytes::new(),
        });
        return text_response(StatusCode::BAD_GATEWAY, "Proxy URL is not set");
    }

    let entry = core.log.append(LogEntry::new(
        format!("Proxying request: {}", req.uri()),
        request_info(&req),
        "",
    ));

    let stream_route = req.uri().path() == MOCK_ROUTE;
    let client = core.client();
    proxy::forward(&client, &config.backend_url, stream_route, req, entry).await
}

fn request_info(req: &Request<Incoming>) -> RequestInfo {
    RequestInfo::from_parts(req.method(), req.uri(), req.headers())
}
