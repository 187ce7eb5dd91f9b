//! Response-capturing sink decorator.

use crate::response::{FlushSink, HijackSink, PushSink, ResponseSink, SinkError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use hyper::upgrade::OnUpgrade;
use hyper::StatusCode;

/// Wraps another [`ResponseSink`], mirroring every chunk into an internal
/// buffer and remembering the first status set, so the exchange can be
/// reconstructed for the log detail view afterwards.
///
/// Capabilities are delegated by querying the inner sink: flush silently
/// succeeds when the inner sink has no flush support, while hijack and push
/// fail with [`SinkError::Unsupported`] rather than no-opping.
pub struct ResponseRecorder<S> {
    inner: S,
    status: Option<StatusCode>,
    body: BytesMut,
}

impl<S: ResponseSink> ResponseRecorder<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            status: None,
            body: BytesMut::new(),
        }
    }

    /// Recorded status; `200 OK` when no status was ever set.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    /// Bytes mirrored so far.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Consume the recorder, yielding the mirrored body.
    pub fn into_body(self) -> Bytes {
        self.body.freeze()
    }
}

#[async_trait]
impl<S: ResponseSink> ResponseSink for ResponseRecorder<S> {
    fn set_status(&mut self, status: StatusCode) {
        if self.status.is_none() {
            self.status = Some(status);
        }
        self.inner.set_status(status);
    }

    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), SinkError> {
        self.body.extend_from_slice(&chunk);
        self.inner.write_chunk(chunk).await
    }

    fn as_flush(&mut self) -> Option<&mut dyn FlushSink> {
        Some(self)
    }

    fn as_hijack(&mut self) -> Option<&mut dyn HijackSink> {
        Some(self)
    }

    fn as_push(&mut self) -> Option<&mut dyn PushSink> {
        Some(self)
    }
}

#[async_trait]
impl<S: ResponseSink> FlushSink for ResponseRecorder<S> {
    async fn flush(&mut self) -> Result<(), SinkError> {
        match self.inner.as_flush() {
            Some(flush) => flush.flush().await,
            None => Ok(()),
        }
    }
}

impl<S: ResponseSink> HijackSink for ResponseRecorder<S> {
    fn hijack(&mut self) -> Result<OnUpgrade, SinkError> {
        match self.inner.as_hijack() {
            Some(hijack) => hijack.hijack(),
            None => Err(SinkError::Unsupported("hijack")),
        }
    }
}

impl<S: ResponseSink> PushSink for ResponseRecorder<S> {
    fn push(&mut self, path: &str) -> Result<(), SinkError> {
        match self.inner.as_push() {
            Some(push) => push.push(path),
            None => Err(SinkError::Unsupported("push")),
        }
    }
}
