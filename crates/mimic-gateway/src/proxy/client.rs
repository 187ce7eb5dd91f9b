//! Upstream HTTP client creation and configuration.
//!
//! One pooled client is shared by all proxied requests. It dials upstreams
//! directly (no system proxy interposition), never injects
//! `Accept-Encoding` (streamed bytes are forwarded as received, without a
//! decompression stage), and speaks HTTP/1.1 only.

use crate::config::ConnectionPoolConfig;
use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;
use hyper::Uri;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;
use tracing::{info, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Type alias for the pooled client used by the proxy adapter.
pub type HttpClient = Client<
    DialTimeout<hyper_rustls::HttpsConnector<HttpConnector>>,
    BoxBody<Bytes, hyper::Error>,
>;

/// Connector wrapper bounding connection establishment.
///
/// The inner `HttpConnector` already bounds the TCP connect; this wrapper
/// bounds the whole dial, so a stalled TLS handshake cannot hang a request
/// indefinitely.
#[derive(Clone)]
pub struct DialTimeout<C> {
    inner: C,
    timeout: Duration,
}

impl<C> DialTimeout<C> {
    pub fn new(inner: C, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl<C> Service<Uri> for DialTimeout<C>
where
    C: Service<Uri>,
    C::Future: Send + 'static,
    C::Error: Into<BoxError>,
{
    type Response = C::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<C::Response, BoxError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let connecting = self.inner.call(dst);
        let timeout = self.timeout;
        Box::pin(async move {
            match tokio::time::timeout(timeout, connecting).await {
                Ok(result) => result.map_err(Into::into),
                Err(_) => Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "upstream dial timed out",
                )
                .into()),
            }
        })
    }
}

/// Create the shared upstream client with connection pooling.
pub fn create_http_client(pool: &ConnectionPoolConfig) -> HttpClient {
    // The ring provider is the only one compiled in; installing it up front
    // keeps rustls deterministic regardless of downstream feature unification.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut http_connector = HttpConnector::new();
    http_connector.set_keepalive(Some(Duration::from_secs(pool.keepalive_secs)));
    http_connector.set_connect_timeout(Some(Duration::from_secs(pool.connect_timeout_secs)));
    http_connector.enforce_http(false); // Allow both HTTP and HTTPS

    let roots = match hyper_rustls::HttpsConnectorBuilder::new().with_native_roots() {
        Ok(builder) => builder,
        Err(e) => {
            warn!("failed to load native root certificates ({e}), using bundled roots");
            hyper_rustls::HttpsConnectorBuilder::new().with_webpki_roots()
        }
    };
    let https_connector = roots
        .https_or_http()
        .enable_http1()
        .wrap_connector(http_connector);

    // TCP connect is bounded above; the handshake allowance extends the
    // overall dial bound for TLS upstreams.
    let dial_timeout =
        Duration::from_secs(pool.connect_timeout_secs + pool.tls_handshake_timeout_secs);
    let connector = DialTimeout::new(https_connector, dial_timeout);

    let client = Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(pool.idle_timeout_secs))
        .pool_max_idle_per_host(pool.max_idle_per_host)
        .build(connector);

    info!(
        "Connection pool configured (HTTP/1.1): max_idle={}, idle_timeout={}s, keepalive={}s, dial_timeout={}s",
        pool.max_idle_per_host,
        pool.idle_timeout_secs,
        pool.keepalive_secs,
        dial_timeout.as_secs()
    );

    client
}
