//! Bounded, newest-first log of handled requests.
//!
//! Entries are appended at dispatch time with the response still unknown and
//! completed exactly once when the exchange finishes. The buffer is shared
//! between request handlers and an external observer (typically a UI list);
//! it uses its own lock, independent of the configuration store's.

use bytes::Bytes;
use chrono::Local;
use hyper::{HeaderMap, Method, StatusCode, Uri};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::{Arc, OnceLock};

/// Default number of retained entries.
pub const DEFAULT_LOG_CAPACITY: usize = 100;

/// Request-side metadata captured when an entry is created.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: String,
    pub uri: String,
    pub headers: Vec<(String, String)>,
}

impl RequestInfo {
    pub fn from_parts(method: &Method, uri: &Uri, headers: &HeaderMap) -> Self {
        Self {
            method: method.to_string(),
            uri: uri.to_string(),
            headers: collect_headers(headers),
        }
    }
}

/// Response-side metadata attached once the exchange completes.
#[derive(Debug, Clone)]
pub struct ResponseInfo {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    /// Body bytes mirrored by the response recorder; empty when nothing
    /// was captured.
    pub body: Bytes,
}

/// One handled request. Immutable apart from the single response attachment.
#[derive(Debug)]
pub struct LogEntry {
    pub timestamp: String,
    pub summary: String,
    pub request: RequestInfo,
    /// Free-form annotation (e.g. the mock parameters in effect).
    pub body: String,
    response: OnceLock<ResponseInfo>,
}

impl LogEntry {
    pub fn new(
        summary: impl Into<String>,
        request: RequestInfo,
        body: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Local::now().format("%H:%M:%S").to_string(),
            summary: summary.into(),
            request,
            body: body.into(),
            response: OnceLock::new(),
        }
    }

    /// Attach the response outcome. Only the first call takes effect;
    /// returns whether this call was the one that did.
    pub fn complete(&self, response: ResponseInfo) -> bool {
        self.response.set(response).is_ok()
    }

    pub fn response(&self) -> Option<&ResponseInfo> {
        self.response.get()
    }

    /// Human-readable detail view of the exchange.
    pub fn details(&self) -> String {
        let mut details = String::new();
        let _ = writeln!(details, "Time: {}\n", self.timestamp);

        let _ = writeln!(details, "=== Request ===");
        let _ = writeln!(details, "Method: {}", self.request.method);
        let _ = writeln!(details, "URL: {}", self.request.uri);
        let _ = writeln!(details, "Headers:");
        for (name, value) in &self.request.headers {
            let _ = writeln!(details, "  {name}: {value}");
        }

        let _ = writeln!(details, "\n=== Response ===");
        match self.response() {
            Some(response) => {
                let _ = writeln!(details, "Status: {}", response.status);
                let _ = writeln!(details, "Headers:");
                for (name, value) in &response.headers {
                    let _ = writeln!(details, "  {name}: {value}");
                }
                if !response.body.is_empty() {
                    let _ = writeln!(details, "Body:");
                    let _ = writeln!(details, "{}", String::from_utf8_lossy(&response.body));
                }
            }
            None => {
                let _ = writeln!(details, "No response information available");
            }
        }

        if !self.body.is_empty() {
            let _ = writeln!(details, "\n=== Body ===");
            let _ = writeln!(details, "{}", self.body);
        }

        details
    }
}

type Observer = Arc<dyn Fn() + Send + Sync>;

/// Capacity-bounded, newest-first request log.
pub struct RequestLog {
    entries: RwLock<VecDeque<Arc<LogEntry>>>,
    observer: RwLock<Option<Observer>>,
    capacity: usize,
}

impl RequestLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            observer: RwLock::new(None),
            capacity,
        }
    }

    /// Insert an entry at the front, evicting past capacity. Returns the
    /// handle used to attach the response later.
    ///
    /// The observer runs on its own task, never on the caller's stack, so a
    /// slow observer cannot delay the request path. Requires a Tokio
    /// runtime when an observer is registered.
    pub fn append(&self, entry: LogEntry) -> Arc<LogEntry> {
        let entry = Arc::new(entry);
        {
            let mut entries = self.entries.write();
            entries.push_front(Arc::clone(&entry));
            entries.truncate(self.capacity);
        }
        if let Some(observer) = self.observer.read().clone() {
            tokio::spawn(async move {
                observer();
            });
        }
        entry
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Entry at `index`, 0 being the most recently inserted.
    pub fn get(&self, index: usize) -> Option<Arc<LogEntry>> {
        self.entries.read().get(index).cloned()
    }

    /// Register the observer invoked after each insertion.
    pub fn set_observer(&self, observer: impl Fn() + Send + Sync + 'static) {
        *self.observer.write() = Some(Arc::new(observer));
    }
}

impl Default for RequestLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
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

#[cfg(test)]
mod tests {
    use super::*;

    fn request_info(path: &str) -> RequestInfo {
        RequestInfo {
            method: "GET".to_string(),
            uri: path.to_string(),
            headers: Vec::new(),
        }
    }

    fn entry(summary: &str) -> LogEntry {
        LogEntry::new(summary, request_info("/test"), "")
    }

    #[test]
    fn newest_entry_is_first() {
        let log = RequestLog::new(10);
        log.append(entry("first"));
        log.append(entry("second"));

        assert_eq!(log.len(), 2);
        assert_eq!(log.get(0).unwrap().summary, "second");
        assert_eq!(log.get(1).unwrap().summary, "first");
    }

    #[test]
    fn capacity_evicts_oldest() {
        let log = RequestLog::new(3);
        for i in 0..5 {
            log.append(entry(&format!("entry {i}")));
        }

        assert_eq!(log.len(), 3);
        assert_eq!(log.get(0).unwrap().summary, "entry 4");
        assert_eq!(log.get(2).unwrap().summary, "entry 2");
        assert!(log.get(3).is_none());
    }

    #[test]
    fn response_attaches_exactly_once() {
        let log = RequestLog::default();
        let handle = log.append(entry("proxied"));
        assert!(handle.response().is_none());

        let first = ResponseInfo {
            status: StatusCode::OK,
            headers: vec![("content-type".into(), "text/plain".into())],
            body: Bytes::from_static(b"hello"),
        };
        assert!(handle.complete(first));

        let second = ResponseInfo {
            status: StatusCode::BAD_GATEWAY,
            headers: Vec::new(),
            body: Bytes::new(),
        };
        assert!(!handle.complete(second));

        let recorded = handle.response().unwrap();
        assert_eq!(recorded.status, StatusCode::OK);
        assert_eq!(&recorded.body[..], b"hello");
    }

    #[test]
    fn handle_survives_eviction() {
        let log = RequestLog::new(1);
        let handle = log.append(entry("evicted"));
        log.append(entry("newer"));

        assert_eq!(log.len(), 1);
        assert!(handle.complete(ResponseInfo {
            status: StatusCode::OK,
            headers: Vec::new(),
            body: Bytes::new(),
        }));
    }

    #[tokio::test]
    async fn observer_fires_per_append_off_the_append_path() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::time::Duration;

        let log = RequestLog::default();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        log.set_observer(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        log.append(entry("a"));
        log.append(entry("b"));

        // Notifications run on their own tasks; give them a chance to land.
        for _ in 0..100 {
            if fired.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn slow_observer_does_not_delay_append() {
        use std::time::{Duration, Instant};

        let log = RequestLog::default();
        log.set_observer(|| {
            std::thread::sleep(Duration::from_millis(200));
        });

        let started = Instant::now();
        log.append(entry("a"));
        assert!(
            started.elapsed() < Duration::from_millis(100),
            "append was gated on the observer"
        );
    }

    #[test]
    fn concurrent_appends_respect_capacity() {
        let log = Arc::new(RequestLog::new(50));
        let mut handles = Vec::new();
        for t in 0..8 {
            let log = Arc::clone(&log);
            handles.push(std::thread::spawn(move || {
                for i in 0..25 {
                    log.append(entry(&format!("t{t}-{i}")));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // 200 appends against capacity 50: exactly 50 retained, all readable.
        assert_eq!(log.len(), 50);
        for i in 0..50 {
            assert!(log.get(i).is_some());
        }
    }

    #[test]
    fn details_cover_request_and_response() {
        let handle = entry("proxied");
        handle.complete(ResponseInfo {
            status: StatusCode::OK,
            headers: vec![("content-type".into(), "application/json".into())],
            body: Bytes::from_static(b"{}"),
        });

        let details = handle.details();
        assert!(details.contains("=== Request ==="));
        assert!(details.contains("Method: GET"));
        assert!(details.contains("Status: 200 OK"));
        assert!(details.contains("content-type: application/json"));
    }
}
