//! End-to-end tests driving a running gateway over loopback.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::HOST;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use mimic_gateway::{Gateway, GatewayConfig};
use std::convert::Infallible;
use std::time::Duration;
use tokio::time::sleep;

fn client() -> reqwest::Client {
    // Loopback traffic must never be routed through a proxy from the
    // environment.
    reqwest::Client::builder().no_proxy().build().unwrap()
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn base_config(port: u16) -> GatewayConfig {
    GatewayConfig {
        mock_thinking: "I am thinking...\n".to_string(),
        mock_content: "Hello.\n".to_string(),
        mock_functions: "chat".to_string(),
        port,
        ..GatewayConfig::default()
    }
}

/// Upstream that echoes request metadata back as JSON.
async fn spawn_echo_upstream() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(|req: Request<Incoming>| async move {
                    let host = req
                        .headers()
                        .get(HOST)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    let body = serde_json::json!({
                        "method": req.method().as_str(),
                        "path": req.uri().path(),
                        "query": req.uri().query().unwrap_or(""),
                        "host": host,
                    })
                    .to_string();
                    Ok::<_, Infallible>(
                        Response::builder()
                            .header("content-type", "application/json")
                            .body(Full::new(Bytes::from(body)))
                            .unwrap(),
                    )
                });
                let _ = http1::Builder::new().serve_connection(io, service).await;
            });
        }
    });

    port
}

fn delta_of(line: &str, field: &str) -> String {
    let payload = line.strip_prefix("data: ").unwrap();
    let value: serde_json::Value = serde_json::from_str(payload).unwrap();
    value["choices"][0]["delta"][field]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn mock_stream_emits_reasoning_content_and_sentinel() {
    let port = free_port();
    let gateway = Gateway::new(base_config(port));
    gateway.start(base_config(port)).unwrap();

    let client = client();
    let response = client
        .post(format!("http://127.0.0.1:{port}/chat/completions"))
        .header("FunctionName", "chat")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    assert_eq!(response.headers().get("cache-control").unwrap(), "no-cache");

    let body = response.text().await.unwrap();
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines.len(), 3, "unexpected body: {body:?}");
    assert_eq!(delta_of(lines[0], "reasoning_content"), "I am thinking...\n");
    assert_eq!(delta_of(lines[1], "content"), "Hello.\n");
    assert_eq!(lines[2], "data: [DONE]");

    // The dispatch was logged and the outcome attached after the stream.
    let entry = gateway.log().get(0).unwrap();
    assert_eq!(entry.summary, "Mocking function: chat");
    assert!(entry.body.contains("RawMode: false"));
    for _ in 0..100 {
        if entry.response().is_some() {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    let recorded = entry.response().expect("mock outcome never attached");
    assert_eq!(recorded.status, 200);
    assert!(String::from_utf8_lossy(&recorded.body).contains("[DONE]"));

    gateway.stop().unwrap();
}

#[tokio::test]
async fn raw_mode_emits_bare_lines_without_sentinel() {
    let port = free_port();
    let mut config = base_config(port);
    config.raw_mode = true;
    let gateway = Gateway::new(config.clone());
    gateway.start(config).unwrap();

    let client = client();
    let body = client
        .post(format!("http://127.0.0.1:{port}/chat/completions"))
        .header("FunctionName", "chat")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(!body.contains("data: "), "unexpected body: {body:?}");
    assert!(!body.contains("[DONE]"));
    assert!(body.contains("I am thinking...\n"));
    assert!(body.contains("Hello.\n"));

    gateway.stop().unwrap();
}

#[tokio::test]
async fn function_outside_allow_list_is_proxied() {
    let port = free_port();
    // No backend configured: the proxy path answers 502.
    let gateway = Gateway::new(base_config(port));
    gateway.start(base_config(port)).unwrap();

    let client = client();
    let response = client
        .post(format!("http://127.0.0.1:{port}/chat/completions"))
        .header("FunctionName", "codebase")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 502);
    assert_eq!(response.text().await.unwrap(), "Proxy URL is not set");

    // Newest-first: the 502 entry sits above the dispatch note.
    let newest = gateway.log().get(0).unwrap();
    assert_eq!(newest.summary, "Proxy URL is not set");
    let recorded = newest.response().expect("502 outcome should be attached");
    assert_eq!(recorded.status, 502);
    assert!(recorded.body.is_empty());

    let note = gateway.log().get(1).unwrap();
    assert_eq!(note.summary, "Not mocking function: codebase");

    gateway.stop().unwrap();
}

#[tokio::test]
async fn disabled_mock_proxies_even_allowed_functions() {
    let port = free_port();
    let mut config = base_config(port);
    config.mock_enabled = false;
    let gateway = Gateway::new(config.clone());
    gateway.start(config).unwrap();

    let response = client()
        .post(format!("http://127.0.0.1:{port}/chat/completions"))
        .header("FunctionName", "chat")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 502);

    gateway.stop().unwrap();
}

#[tokio::test]
async fn proxy_rewrites_host_and_preserves_path_and_query() {
    let upstream_port = spawn_echo_upstream().await;
    let port = free_port();
    let mut config = base_config(port);
    config.backend_url = format!("http://127.0.0.1:{upstream_port}");
    let gateway = Gateway::new(config.clone());
    gateway.start(config).unwrap();

    let response = client()
        .get(format!("http://127.0.0.1:{port}/v1/models?page=2"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let echoed: serde_json::Value = response.json().await.unwrap();
    assert_eq!(echoed["method"], "GET");
    assert_eq!(echoed["path"], "/v1/models");
    assert_eq!(echoed["query"], "page=2");
    assert_eq!(echoed["host"], format!("127.0.0.1:{upstream_port}"));

    // The proxied exchange lands in the log with its body captured.
    let entry = gateway.log().get(0).unwrap();
    assert!(entry.summary.starts_with("Proxying request:"));
    for _ in 0..100 {
        if entry.response().is_some() {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    let recorded = entry.response().expect("proxy outcome never attached");
    assert_eq!(recorded.status, 200);
    assert!(String::from_utf8_lossy(&recorded.body).contains("/v1/models"));

    gateway.stop().unwrap();
}

#[tokio::test]
async fn proxied_stream_route_gets_anti_buffering_headers() {
    let upstream_port = spawn_echo_upstream().await;
    let port = free_port();
    let mut config = base_config(port);
    config.backend_url = format!("http://127.0.0.1:{upstream_port}");
    config.mock_functions = String::new(); // nothing allow-listed
    let gateway = Gateway::new(config.clone());
    gateway.start(config).unwrap();

    let response = client()
        .post(format!("http://127.0.0.1:{port}/chat/completions"))
        .header("FunctionName", "chat")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let headers = response.headers();
    assert_eq!(headers.get("content-type").unwrap(), "text/event-stream");
    assert_eq!(headers.get("cache-control").unwrap(), "no-cache");
    assert_eq!(headers.get("x-accel-buffering").unwrap(), "no");

    // Non-stream routes keep the upstream's own content type.
    let response = client()
        .get(format!("http://127.0.0.1:{port}/v1/models"))
        .send()
        .await
        .unwrap();
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );

    gateway.stop().unwrap();
}

#[tokio::test]
async fn unreachable_backend_yields_bad_gateway() {
    let port = free_port();
    let closed_port = free_port();
    let mut config = base_config(port);
    config.backend_url = format!("http://127.0.0.1:{closed_port}");
    let gateway = Gateway::new(config.clone());
    gateway.start(config).unwrap();

    let response = client()
        .get(format!("http://127.0.0.1:{port}/v1/models"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 502);

    let entry = gateway.log().get(0).unwrap();
    let recorded = entry.response().expect("transport failure not recorded");
    assert_eq!(recorded.status, 502);

    gateway.stop().unwrap();
}

#[tokio::test]
async fn stop_closes_the_listener_and_start_works_again() {
    let port = free_port();
    let gateway = Gateway::new(base_config(port));
    gateway.start(base_config(port)).unwrap();

    let client = reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    let response = client
        .post(format!("http://127.0.0.1:{port}/chat/completions"))
        .header("FunctionName", "chat")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response.text().await.unwrap();

    gateway.stop().unwrap();
    // Give the accept loop a moment to observe the shutdown signal.
    sleep(Duration::from_millis(50)).await;

    let err = client
        .post(format!("http://127.0.0.1:{port}/chat/completions"))
        .header("FunctionName", "chat")
        .send()
        .await;
    assert!(err.is_err(), "listener should be closed after stop");

    gateway.start(base_config(port)).unwrap();
    let response = client
        .post(format!("http://127.0.0.1:{port}/chat/completions"))
        .header("FunctionName", "chat")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    gateway.stop().unwrap();
}
