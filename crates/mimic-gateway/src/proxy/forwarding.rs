//! Request forwarding to the configured backend.
//!
//! The inbound request is rewritten to target the backend's scheme and
//! authority (with the `Host` header replaced to match) and both bodies are
//! streamed, never collected. The upstream response body flows through a
//! [`ResponseRecorder`] so the exchange can be attached to the request log
//! once it completes.

use super::client::HttpClient;
use crate::recording::{LogEntry, ResponseInfo, ResponseRecorder};
use crate::response::{error_response, ChannelSink, GatewayBody, ResponseSink};
use http_body_util::combinators::BoxBody;
use http_body_util::BodyExt;
use hyper::body::{Bytes, Incoming};
use hyper::header::{
    HeaderName, HeaderValue, CACHE_CONTROL, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST,
    TRANSFER_ENCODING,
};
use hyper::http::uri::Scheme;
use hyper::{HeaderMap, Request, Response, StatusCode, Uri};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Forward a request to `backend_url`, streaming the response back.
///
/// `stream_route` forces SSE anti-buffering headers onto the response so
/// intermediaries cannot hold back a streamed backend. Transport failures
/// are not retried: they surface as 502 (504 for dial timeouts) and are
/// recorded on the log entry.
pub async fn forward(
    client: &HttpClient,
    backend_url: &str,
    stream_route: bool,
    req: Request<Incoming>,
    entry: Arc<LogEntry>,
) -> Response<GatewayBody> {
    let backend: Uri = match backend_url.parse() {
        Ok(uri) => uri,
        Err(e) => {
            warn!("invalid backend URL {backend_url:?}: {e}");
            return fail(&entry, StatusCode::BAD_GATEWAY, "Invalid proxy URL");
        }
    };
    let authority = match backend.authority() {
        Some(authority) => authority.clone(),
        None => {
            warn!("backend URL {backend_url:?} has no host");
            return fail(&entry, StatusCode::BAD_GATEWAY, "Invalid proxy URL");
        }
    };
    let scheme = backend.scheme().cloned().unwrap_or(Scheme::HTTP);

    let (parts, body) = req.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let upstream_uri = match Uri::builder()
        .scheme(scheme)
        .authority(authority.clone())
        .path_and_query(path_and_query)
        .build()
    {
        Ok(uri) => uri,
        Err(e) => {
            warn!("failed to rewrite request target: {e}");
            return fail(&entry, StatusCode::BAD_GATEWAY, "Invalid proxy URL");
        }
    };

    debug!("Forwarding to: {}", upstream_uri);

    let mut upstream_req = Request::builder()
        .method(parts.method.clone())
        .uri(upstream_uri);
    for (name, value) in parts.headers.iter() {
        if name != HOST {
            upstream_req = upstream_req.header(name, value);
        }
    }
    let host = HeaderValue::from_str(authority.as_str())
        .unwrap_or(HeaderValue::from_static(""));
    let upstream_req = match upstream_req
        .header(HOST, host)
        .body(BoxBody::new(body))
    {
        Ok(request) => request,
        Err(e) => {
            error!("failed to build upstream request: {e}");
            return fail(
                &entry,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Request build error",
            );
        }
    };

    match client.request(upstream_req).await {
        Ok(upstream) => {
            let (up_parts, up_body) = upstream.into_parts();

            let (sink, body) = ChannelSink::new(16);
            let mut recorder = ResponseRecorder::new(sink);
            recorder.set_status(up_parts.status);

            let mut response = Response::new(body.boxed());
            *response.status_mut() = up_parts.status;
            let headers = response.headers_mut();
            for (name, value) in up_parts.headers.iter() {
                if !is_hop_by_hop(name) {
                    headers.append(name, value.clone());
                }
            }
            if stream_route {
                force_stream_headers(headers);
            }
            let log_headers = collect_headers(headers);

            tokio::spawn(async move {
                relay_body(up_body, &mut recorder).await;
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
        Err(e) => {
            error!("Failed to forward request to upstream: {e}");
            let (status, message) = if is_timeout(&e) {
                (StatusCode::GATEWAY_TIMEOUT, "Gateway Timeout")
            } else {
                (StatusCode::BAD_GATEWAY, "Bad Gateway")
            };
            fail(&entry, status, message)
        }
    }
}

/// Copy upstream body frames through the recorder until the stream ends or
/// the client goes away.
async fn relay_body<S: ResponseSink>(mut body: Incoming, sink: &mut S) {
    loop {
        match body.frame().await {
            Some(Ok(frame)) => {
                if let Ok(data) = frame.into_data() {
                    if sink.write_chunk(data).await.is_err() {
                        debug!("client disconnected mid-stream, dropping upstream body");
                        break;
                    }
                    if let Some(flush) = sink.as_flush() {
                        let _ = flush.flush().await;
                    }
                }
            }
            Some(Err(e)) => {
                warn!("upstream body error: {e}");
                break;
            }
            None => break,
        }
    }
}

/// Headers an intermediary must see to leave a streamed response alone.
fn force_stream_headers(headers: &mut HeaderMap) {
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    name == CONNECTION
        || name == TRANSFER_ENCODING
        || name == CONTENT_LENGTH
        || name.as_str() == "keep-alive"
}

fn collect_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or("").to_string(),
            )
        })
        .collect()
}

fn fail(entry: &LogEntry, status: StatusCode, message: &str) -> Response<GatewayBody> {
    entry.complete(ResponseInfo {
        status,
        headers: Vec::new(),
        body: Bytes::new(),
    });
    error_response(status, message)
}

fn is_timeout(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = Some(err);
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::TimedOut {
                return true;
            }
        }
        source = e.source();
    }
    false
}
