//! Mimic: a local mock-or-proxy gateway for chat-completion backends.
//!
//! For an allow-listed set of function names the gateway answers
//! `/chat/completions` itself with a paced, SSE-style canned stream
//! (reasoning text, then content text, then a completion sentinel); every
//! other request is transparently reverse-proxied to the configured backend.
//! Each exchange is captured in a bounded, newest-first request log an
//! external collaborator can observe.

pub mod config;
pub mod gateway;
pub mod mock;
pub mod proxy;
pub mod recording;
pub mod response;

pub use config::{ConfigStore, GatewayConfig};
pub use gateway::{Gateway, GatewayError};
pub use recording::{LogEntry, RequestLog};
