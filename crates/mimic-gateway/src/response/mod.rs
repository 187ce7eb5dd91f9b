//! Response sink abstraction.
//!
//! Handlers write response bodies through a [`ResponseSink`] rather than
//! directly into hyper, so the same emitter code can be decorated (see
//! [`crate::recording::ResponseRecorder`]) and unit-tested against an
//! in-memory sink. Optional capabilities (flush, connection takeover,
//! server push) are modelled as capability accessors that default to
//! "not supported" instead of silent no-ops.

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::SinkExt;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use hyper::upgrade::OnUpgrade;
use hyper::{Response, StatusCode};
use std::convert::Infallible;
use thiserror::Error;

/// Body type produced by every gateway handler.
pub type GatewayBody = BoxBody<Bytes, Infallible>;

/// Frame item carried over the channel backing a streamed response.
pub type BodyFrame = Result<Frame<Bytes>, Infallible>;

/// Streamed response body fed by a [`ChannelSink`].
pub type StreamingBody = StreamBody<mpsc::Receiver<BodyFrame>>;

#[derive(Debug, Error)]
pub enum SinkError {
    /// The client closed the connection before the response completed.
    #[error("client disconnected before the response completed")]
    Disconnected,
    /// A capability was requested that the sink does not provide.
    #[error("sink does not support {0}")]
    Unsupported(&'static str),
    /// A response chunk could not be encoded.
    #[error("failed to encode response chunk: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Flush capability: push buffered bytes towards the client now.
#[async_trait]
pub trait FlushSink: Send {
    async fn flush(&mut self) -> Result<(), SinkError>;
}

/// Connection-takeover capability: detach the raw connection from HTTP
/// handling (the hyper upgrade mechanism).
pub trait HijackSink: Send {
    fn hijack(&mut self) -> Result<OnUpgrade, SinkError>;
}

/// Server-push capability.
pub trait PushSink: Send {
    fn push(&mut self, path: &str) -> Result<(), SinkError>;
}

/// Write half of an in-flight HTTP response.
#[async_trait]
pub trait ResponseSink: Send {
    /// Record the response status. Only the first call is meaningful;
    /// the default when never called is `200 OK`.
    fn set_status(&mut self, status: StatusCode);

    /// Write one chunk of the response body.
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), SinkError>;

    fn as_flush(&mut self) -> Option<&mut dyn FlushSink> {
        None
    }

    fn as_hijack(&mut self) -> Option<&mut dyn HijackSink> {
        None
    }

    fn as_push(&mut self) -> Option<&mut dyn PushSink> {
        None
    }
}

/// Sink writing body frames into a bounded channel drained by the
/// connection task.
///
/// A failed send means the receiving body was dropped, i.e. the client
/// disconnected; writers must treat that as terminal.
pub struct ChannelSink {
    tx: mpsc::Sender<BodyFrame>,
    status: StatusCode,
}

impl ChannelSink {
    /// Create a sink and the response body it feeds.
    pub fn new(buffer: usize) -> (Self, StreamingBody) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            Self {
                tx,
                status: StatusCode::OK,
            },
            StreamBody::new(rx),
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

#[async_trait]
impl ResponseSink for ChannelSink {
    fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), SinkError> {
        self.tx
            .send(Ok(Frame::data(chunk)))
            .await
            .map_err(|_| SinkError::Disconnected)
    }

    fn as_flush(&mut self) -> Option<&mut dyn FlushSink> {
        Some(self)
    }
}

#[async_trait]
impl FlushSink for ChannelSink {
    async fn flush(&mut self) -> Result<(), SinkError> {
        // Frames are handed straight to the connection task as the channel
        // is polled; there is no intermediate buffer to drain.
        Ok(())
    }
}

/// Build a complete (non-streamed) body.
pub fn full_body(bytes: impl Into<Bytes>) -> GatewayBody {
    Full::new(bytes.into()).boxed()
}

/// Plain-text response with the given status.
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<GatewayBody> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(full_body(body))
        .unwrap_or_else(|_| internal_error())
}

/// JSON error response with the given status.
pub fn error_response(status: StatusCode, message: &str) -> Response<GatewayBody> {
    let body = format!(r#"{{"error": "{message}"}}"#);
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(full_body(body))
        .unwrap_or_else(|_| internal_error())
}

fn internal_error() -> Response<GatewayBody> {
    let mut response = Response::new(full_body("internal error"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}
